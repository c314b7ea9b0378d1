//! Usage data types recovered from the status screen.

use chrono::{DateTime, Utc};

/// Source tag attached to every payload
pub const SOURCE_TAG: &str = "status_ui";

/// Number of trailing transcript lines kept for diagnostics
pub const DIAGNOSTIC_TAIL_LINES: usize = 20;

/// Quota categories shown on the status screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    /// "Current session"
    CurrentSession,
    /// "Current week (all models)"
    CurrentWeekAll,
    /// "Current week (Sonnet only)"
    CurrentWeekSonnet,
}

impl SectionKind {
    /// Name used in plain output and payload keys
    pub fn name(self) -> &'static str {
        match self {
            SectionKind::CurrentSession => "current_session",
            SectionKind::CurrentWeekAll => "current_week_all",
            SectionKind::CurrentWeekSonnet => "current_week_sonnet",
        }
    }
}

/// One quota category (e.g. "Current session")
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageSection {
    pub kind: SectionKind,
    /// Percentage used (0-100)
    pub percent_used: Option<u8>,
    /// Normalized reset description (e.g. "Resets 1am (Asia/Tokyo)")
    pub reset_text: Option<String>,
}

/// Sections recovered from one capture, in first-seen order
#[derive(Debug, Clone)]
pub struct UsageSummary {
    pub sections: Vec<UsageSection>,
    /// When the transcript was captured
    pub captured_at: DateTime<Utc>,
    pub source: &'static str,
}

impl UsageSummary {
    pub fn new(captured_at: DateTime<Utc>) -> Self {
        Self {
            sections: Vec::new(),
            captured_at,
            source: SOURCE_TAG,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn get(&self, kind: SectionKind) -> Option<&UsageSection> {
        self.sections.iter().find(|s| s.kind == kind)
    }

    /// Record a section at the end. The first occurrence of a kind wins as a
    /// whole; later occurrences are ignored.
    pub fn record(&mut self, kind: SectionKind, percent_used: Option<u8>, reset_text: Option<String>) {
        let at = self.sections.len();
        self.record_at(at, kind, percent_used, reset_text);
    }

    /// Like [`record`](Self::record), but insert at `index` (clamped to the length)
    pub fn record_at(
        &mut self,
        index: usize,
        kind: SectionKind,
        percent_used: Option<u8>,
        reset_text: Option<String>,
    ) {
        if self.get(kind).is_some() {
            return;
        }
        let index = index.min(self.sections.len());
        self.sections.insert(
            index,
            UsageSection {
                kind,
                percent_used,
                reset_text,
            },
        );
    }
}

/// Produced when no section could be recognized
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Last non-empty, trimmed transcript lines (oldest first)
    pub tail: Vec<String>,
    pub captured_at: DateTime<Utc>,
    pub source: &'static str,
}

impl Diagnostic {
    /// Keep the last [`DIAGNOSTIC_TAIL_LINES`] non-empty lines of `text`
    pub fn from_transcript(text: &str, captured_at: DateTime<Utc>) -> Self {
        let lines = non_empty_lines(text);
        let skip = lines.len().saturating_sub(DIAGNOSTIC_TAIL_LINES);
        Self {
            tail: lines.into_iter().skip(skip).map(str::to_string).collect(),
            captured_at,
            source: SOURCE_TAG,
        }
    }

    /// The last `n` retained lines
    pub fn last(&self, n: usize) -> &[String] {
        &self.tail[self.tail.len().saturating_sub(n)..]
    }
}

/// Outcome of running the extractor over a transcript
#[derive(Debug, Clone)]
pub enum Extraction {
    Summary(UsageSummary),
    Diagnostic(Diagnostic),
}

/// Trimmed, non-empty lines, splitting on both `\n` and `\r`
pub fn non_empty_lines(text: &str) -> Vec<&str> {
    text.split(['\n', '\r'])
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_first_occurrence_wins() {
        let mut summary = UsageSummary::new(Utc::now());
        summary.record(SectionKind::CurrentSession, Some(45), Some("Resets 1am".into()));
        summary.record(SectionKind::CurrentWeekAll, None, Some("Resets Mar 3".into()));
        summary.record(SectionKind::CurrentSession, Some(99), Some("Resets 9pm".into()));

        assert_eq!(summary.sections.len(), 2);
        let session = summary.get(SectionKind::CurrentSession).unwrap();
        assert_eq!(session.percent_used, Some(45));
        assert_eq!(session.reset_text.as_deref(), Some("Resets 1am"));
    }

    #[test]
    fn test_later_occurrence_never_completes_first() {
        let mut summary = UsageSummary::new(Utc::now());
        summary.record(SectionKind::CurrentWeekAll, None, Some("Resets Mar 3".into()));
        summary.record(SectionKind::CurrentWeekAll, Some(23), Some("Resets Mar 4".into()));
        let week = summary.get(SectionKind::CurrentWeekAll).unwrap();
        assert_eq!(week.percent_used, None);
        assert_eq!(week.reset_text.as_deref(), Some("Resets Mar 3"));
    }

    #[test]
    fn test_record_at_inserts_in_place() {
        let mut summary = UsageSummary::new(Utc::now());
        summary.record(SectionKind::CurrentWeekAll, None, Some("Resets Mar 3".into()));
        summary.record_at(0, SectionKind::CurrentSession, Some(5), Some("Resets 1am".into()));
        summary.record_at(9, SectionKind::CurrentWeekSonnet, None, Some("Resets Tue".into()));
        let kinds: Vec<SectionKind> = summary.sections.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SectionKind::CurrentSession,
                SectionKind::CurrentWeekAll,
                SectionKind::CurrentWeekSonnet
            ]
        );
    }

    #[test]
    fn test_diagnostic_keeps_tail() {
        let text: String = (1..=30).map(|i| format!("line {}\n\n", i)).collect();
        let diagnostic = Diagnostic::from_transcript(&text, Utc::now());
        assert_eq!(diagnostic.tail.len(), 20);
        assert_eq!(diagnostic.tail[0], "line 11");
        assert_eq!(diagnostic.last(10)[0], "line 21");
        assert_eq!(diagnostic.last(100).len(), 20);
    }

    #[test]
    fn test_non_empty_lines_splits_carriage_returns() {
        assert_eq!(non_empty_lines("  a \r\n\rb\r   \nc"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_section_names() {
        assert_eq!(SectionKind::CurrentWeekSonnet.name(), "current_week_sonnet");
    }
}
