//! Usage capture: drive the status screen, then parse and render it.
//!
//! The fetcher runs the interaction loop over a PTY session and hands the
//! normalized transcript to the parser; the formatter turns the result into
//! plain text or JSON.

pub mod fetcher;
pub mod format;
pub mod parser;
pub mod types;

pub use fetcher::{
    drive, fetch_usage, CaptureRequest, DriveOutcome, LoopEnd, UsageCapture, DEFAULT_TERM,
};
pub use format::{render, render_session_error, OutputMode};
pub use parser::{parse_usage_output, SectionPattern, SECTION_TABLE};
pub use types::{Diagnostic, Extraction, SectionKind, UsageSection, UsageSummary};
