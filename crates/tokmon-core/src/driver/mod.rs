//! Interaction driver: decides which keystrokes to send and when.
//!
//! The driver is a pure state machine over (time, output chunk). It knows
//! nothing about terminals; [`crate::usage::fetcher`] runs it against a
//! [`crate::pty::Terminal`].

pub mod config;
pub mod machine;
pub mod markers;

pub use config::DriverConfig;
pub use machine::{Action, Driver, DriverState, TerminateReason};
pub use markers::{Marker, MarkerScanner, Observed, MARKERS};
