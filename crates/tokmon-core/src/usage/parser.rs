//! Parse the status screen's usage panel from a normalized transcript.
//!
//! Every strategy is driven by [`SECTION_TABLE`], so a new section or a
//! wording variant is a table entry, not new control flow.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::types::{non_empty_lines, Diagnostic, Extraction, SectionKind, UsageSummary};

/// How one section appears on screen
#[derive(Debug, Clone, Copy)]
pub struct SectionPattern {
    pub kind: SectionKind,
    /// Header line prefix, matched case-insensitively
    pub header: &'static str,
    /// Percentage figure; capture group 1 holds the number
    pub percent: &'static str,
    /// Reset indicator; capture group 1 holds the detail
    pub reset: &'static str,
}

const PERCENT_USED: &str = r"(\d+)%\s*used";
const RESET_DETAIL: &str = r"rese[t]?s?\s*([^\n]+)";

/// Sections recognized on the usage panel, in display order
pub const SECTION_TABLE: &[SectionPattern] = &[
    SectionPattern {
        kind: SectionKind::CurrentSession,
        header: "Current session",
        percent: PERCENT_USED,
        reset: RESET_DETAIL,
    },
    SectionPattern {
        kind: SectionKind::CurrentWeekAll,
        header: "Current week (all models)",
        percent: PERCENT_USED,
        reset: RESET_DETAIL,
    },
    SectionPattern {
        kind: SectionKind::CurrentWeekSonnet,
        header: "Current week (Sonnet only)",
        percent: PERCENT_USED,
        reset: RESET_DETAIL,
    },
];

/// A table entry with its regexes compiled
struct CompiledSection {
    kind: SectionKind,
    header_lower: String,
    /// Percent anywhere in a line
    percent: Regex,
    /// Reset indicator at the start of a line
    reset_line: Regex,
    /// Reset detail anywhere in a block of text
    reset: Regex,
    /// `<header> … reset <detail>` across the whole transcript
    fallback_reset: Regex,
    /// `<header> … NN% used` across the whole transcript
    fallback_percent: Regex,
}

static SECTIONS: Lazy<Vec<CompiledSection>> = Lazy::new(|| {
    SECTION_TABLE
        .iter()
        .map(|p| {
            let header = regex::escape(p.header);
            CompiledSection {
                kind: p.kind,
                header_lower: p.header.to_lowercase(),
                percent: Regex::new(&format!("(?i){}", p.percent)).expect("Invalid percent pattern"),
                reset_line: Regex::new(&format!("(?i)^{}", p.reset))
                    .expect("Invalid reset pattern"),
                reset: Regex::new(&format!("(?i){}", p.reset)).expect("Invalid reset pattern"),
                fallback_reset: Regex::new(&format!("(?is){}.*?{}", header, p.reset))
                    .expect("Invalid fallback reset pattern"),
                fallback_percent: Regex::new(&format!("(?is){}.*?{}", header, p.percent))
                    .expect("Invalid fallback percent pattern"),
            }
        })
        .collect()
});

/// The "Current session" block, up to the first weekly header or the end
static SESSION_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)Current session(.*?)(?:Current week|\z)").expect("Invalid SESSION_BLOCK regex")
});

/// Parse the usage panel out of an ANSI-free transcript.
///
/// Expected format (each section):
/// ```text
///   Current session
///   ████████████████████████████████████               72% used
///   Resets 1am (Asia/Tokyo)
///
///   Current week (all models)
///   ███████████▌                                       23% used
///   Resets Mar 3, 12am (Asia/Tokyo)
/// ```
///
/// The line scan runs first. If it found something but no "Current session"
/// reset, the session block is searched directly. The whole-transcript regex
/// search is used only when the line scan found nothing.
pub fn parse_usage_output(text: &str, captured_at: DateTime<Utc>) -> Extraction {
    let mut summary = scan_lines(text, captured_at);

    if !summary.is_empty() && !has_reset(&summary, SectionKind::CurrentSession) {
        rescue_session_block(text, &mut summary);
    }

    if summary.is_empty() {
        debug!("Line scan found no sections, falling back to regex search");
        summary = search_transcript(text, captured_at);
    }

    if summary.is_empty() {
        Extraction::Diagnostic(Diagnostic::from_transcript(text, captured_at))
    } else {
        Extraction::Summary(summary)
    }
}

/// Line-oriented scan: header opens a section, a reset line closes it
fn scan_lines(text: &str, captured_at: DateTime<Utc>) -> UsageSummary {
    let mut summary = UsageSummary::new(captured_at);
    // Open section and the percent seen within this occurrence of it
    let mut open: Option<(&CompiledSection, Option<u8>)> = None;

    for line in non_empty_lines(text) {
        let lowered = line.to_lowercase();

        if let Some(section) = SECTIONS
            .iter()
            .find(|s| lowered.starts_with(&s.header_lower))
        {
            // A new header abandons whatever was open, percent included
            open = Some((section, extract_percent(&section.percent, line)));
            continue;
        }

        let Some((section, percent_used)) = open.as_mut() else {
            continue;
        };

        if let Some(percent) = extract_percent(&section.percent, line) {
            *percent_used = Some(percent);
        } else if section.reset_line.is_match(line) {
            let reset = normalize_reset(&section.reset, line).unwrap_or_else(|| line.to_string());
            summary.record(section.kind, *percent_used, Some(reset));
            open = None;
        }
    }

    summary
}

/// Recover "Current session" from its block when its reset line was not on a line of its own
fn rescue_session_block(text: &str, summary: &mut UsageSummary) {
    let Some(block) = SESSION_BLOCK.captures(text).and_then(|c| c.get(1)) else {
        return;
    };
    let Some(section) = SECTIONS
        .iter()
        .find(|s| s.kind == SectionKind::CurrentSession)
    else {
        return;
    };

    if let Some(reset) = normalize_reset(&section.reset, block.as_str()) {
        debug!("Recovered current session from its block");
        let percent = extract_percent(&section.percent, block.as_str());
        let index = transcript_position(text, &section.header_lower, summary);
        summary.record_at(index, SectionKind::CurrentSession, percent, Some(reset));
    }
}

/// Number of recorded sections whose header first appears before `header_lower`
fn transcript_position(text: &str, header_lower: &str, summary: &UsageSummary) -> usize {
    let lowered = text.to_lowercase();
    let Some(at) = lowered.find(header_lower) else {
        return summary.sections.len();
    };
    summary
        .sections
        .iter()
        .filter(|recorded| {
            SECTIONS
                .iter()
                .find(|s| s.kind == recorded.kind)
                .and_then(|s| lowered.find(&s.header_lower))
                .is_some_and(|pos| pos < at)
        })
        .count()
}

/// Whole-transcript search, tolerant of wrapping and reordering
fn search_transcript(text: &str, captured_at: DateTime<Utc>) -> UsageSummary {
    let mut summary = UsageSummary::new(captured_at);
    for section in SECTIONS.iter() {
        let reset = section
            .fallback_reset
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| format!("Resets {}", m.as_str().trim()));
        let percent = section
            .fallback_percent
            .captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| parse_percent(m.as_str()));

        if reset.is_some() {
            summary.record(section.kind, percent, reset);
        }
    }
    summary
}

fn has_reset(summary: &UsageSummary, kind: SectionKind) -> bool {
    summary
        .get(kind)
        .is_some_and(|s| s.reset_text.is_some())
}

/// Canonical reset text: "Resets " followed by the trailing detail
fn normalize_reset(pattern: &Regex, text: &str) -> Option<String> {
    let detail = pattern.captures(text)?.get(1)?.as_str().trim();
    Some(format!("Resets {}", detail))
}

/// Extract the percentage from a line containing "N% used"
fn extract_percent(pattern: &Regex, line: &str) -> Option<u8> {
    let digits = pattern.captures(line)?.get(1)?;
    parse_percent(digits.as_str())
}

fn parse_percent(digits: &str) -> Option<u8> {
    digits.parse::<u8>().ok().filter(|p| *p <= 100)
}
