//! ANSI normalizer.
//!
//! Strips terminal control sequences so screen text can be pattern-matched.
//! This is not a terminal emulator: cursor movement is discarded, not replayed.

use once_cell::sync::Lazy;
use regex::Regex;

/// OSC sequences (window titles, hyperlinks), terminated by BEL or ST
static OSC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)").expect("Invalid OSC_RE regex"));

/// CSI sequences: ESC [ parameters intermediates final
static CSI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("Invalid CSI_RE regex"));

/// Remove OSC and CSI sequences from `input`.
///
/// Removal is repeated until nothing matches, since deleting one sequence can
/// splice its neighbours into a new one (`"\x1b\x1b[0m[0m"`). This makes the
/// function idempotent and safe to apply to partial chunks as well as to the
/// full transcript.
pub fn strip_ansi(input: &str) -> String {
    let mut text = strip_once(input);
    while OSC_RE.is_match(&text) || CSI_RE.is_match(&text) {
        text = strip_once(&text);
    }
    text
}

/// Decode raw terminal bytes (invalid UTF-8 is replaced) and strip ANSI sequences
pub fn normalize_bytes(bytes: &[u8]) -> String {
    strip_ansi(&String::from_utf8_lossy(bytes))
}

fn strip_once(input: &str) -> String {
    let without_osc = OSC_RE.replace_all(input, "");
    CSI_RE.replace_all(&without_osc, "").into_owned()
}
