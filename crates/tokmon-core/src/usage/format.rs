//! Render extraction results for stdout.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use super::types::{Diagnostic, Extraction, SectionKind, UsageSummary, SOURCE_TAG};
use crate::error::SessionError;

/// Lines of transcript carried by the structured error payload
pub const JSON_TAIL_LINES: usize = 10;

/// Error code for a transcript with no recognizable section
pub const PARSE_FAILED: &str = "parse_failed";

/// Output flavor selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Plain,
    Json,
}

impl OutputMode {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Plain
        }
    }
}

#[derive(Serialize)]
struct SummaryPayload<'a> {
    captured_at: String,
    current_session_reset: Option<&'a str>,
    current_session_percent: Option<u8>,
    current_week_all_reset: Option<&'a str>,
    current_week_sonnet_reset: Option<&'a str>,
    source: &'a str,
}

#[derive(Serialize)]
struct DiagnosticPayload<'a> {
    captured_at: String,
    error: &'a str,
    raw_tail: &'a [String],
    source: &'a str,
}

#[derive(Serialize)]
struct SessionErrorPayload<'a> {
    captured_at: String,
    error: &'a str,
    message: String,
    source: &'a str,
}

/// Render an extraction in the requested mode
pub fn render(extraction: &Extraction, mode: OutputMode) -> String {
    match (extraction, mode) {
        (Extraction::Summary(summary), OutputMode::Plain) => render_summary_plain(summary),
        (Extraction::Summary(summary), OutputMode::Json) => render_summary_json(summary),
        (Extraction::Diagnostic(diagnostic), OutputMode::Plain) => diagnostic.tail.join("\n"),
        (Extraction::Diagnostic(diagnostic), OutputMode::Json) => {
            render_diagnostic_json(diagnostic)
        }
    }
}

/// Render a session failure. The process still exits successfully, so the
/// failure is reported in the output itself.
pub fn render_session_error(
    error: &SessionError,
    mode: OutputMode,
    captured_at: DateTime<Utc>,
) -> String {
    match mode {
        OutputMode::Plain => format!("error: {}", error),
        OutputMode::Json => to_json(&SessionErrorPayload {
            captured_at: timestamp(captured_at),
            error: error.code(),
            message: error.to_string(),
            source: SOURCE_TAG,
        }),
    }
}

/// `<section>: Resets <detail>`, one line per section in first-seen order
fn render_summary_plain(summary: &UsageSummary) -> String {
    summary
        .sections
        .iter()
        .filter_map(|s| {
            s.reset_text
                .as_deref()
                .map(|reset| format!("{}: {}", s.kind.name(), reset))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_summary_json(summary: &UsageSummary) -> String {
    let reset = |kind| summary.get(kind).and_then(|s| s.reset_text.as_deref());
    to_json(&SummaryPayload {
        captured_at: timestamp(summary.captured_at),
        current_session_reset: reset(SectionKind::CurrentSession),
        current_session_percent: summary
            .get(SectionKind::CurrentSession)
            .and_then(|s| s.percent_used),
        current_week_all_reset: reset(SectionKind::CurrentWeekAll),
        current_week_sonnet_reset: reset(SectionKind::CurrentWeekSonnet),
        source: summary.source,
    })
}

fn render_diagnostic_json(diagnostic: &Diagnostic) -> String {
    to_json(&DiagnosticPayload {
        captured_at: timestamp(diagnostic.captured_at),
        error: PARSE_FAILED,
        raw_tail: diagnostic.last(JSON_TAIL_LINES),
        source: diagnostic.source,
    })
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn to_json<T: Serialize>(payload: &T) -> String {
    serde_json::to_string(payload).unwrap_or_else(|e| {
        warn!("Failed to serialize payload: {}", e);
        format!(r#"{{"error":"serialize_failed","source":"{}"}}"#, SOURCE_TAG)
    })
}
