//! Core of tokmon: capture Claude Code's usage and quota screen through a
//! pseudo-terminal and turn it into structured data.

pub mod ansi;
pub mod driver;
pub mod error;
pub mod pty;
pub mod usage;

pub use error::SessionError;
