//! Textual triggers observed in the target program's output.

/// Kinds of screen text the driver reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// Interactive prompt or shortcut hint: the UI accepts input
    Ready,
    /// The settings panel header (tabs can be cycled)
    Settings,
    /// "Do you want to work in this folder?" style confirmation
    FolderPrompt,
    /// The session started after the folder prompt was answered
    FolderCleared,
    /// Slash-command help hint, the command was recognized
    CommandAck,
    /// Usage figures are on screen
    UsageData,
}

/// Marker table, matched case-insensitively. Patterns must be lowercase.
pub const MARKERS: &[(Marker, &str)] = &[
    (Marker::Ready, "❯"),
    (Marker::Ready, "for shortcuts"),
    (Marker::Ready, "try \""),
    (Marker::Settings, "settings:"),
    (Marker::FolderPrompt, "do you want to work in this folder?"),
    (Marker::FolderPrompt, "yes, continue"),
    (Marker::FolderPrompt, "yes, i trust this folder"),
    (Marker::FolderCleared, "welcome back"),
    (Marker::FolderCleared, "try \""),
    (Marker::CommandAck, "show claude code status"),
    (Marker::CommandAck, "/usage"),
    (Marker::UsageData, "current session"),
];

/// Characters of the previous chunk kept to catch markers split across reads
const CARRY_CHARS: usize = 64;

/// Markers present in one chunk of output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Observed {
    pub ready: bool,
    pub settings: bool,
    pub folder_prompt: bool,
    pub folder_cleared: bool,
    pub command_ack: bool,
    pub usage_data: bool,
}

impl Observed {
    fn set(&mut self, marker: Marker) {
        match marker {
            Marker::Ready => self.ready = true,
            Marker::Settings => self.settings = true,
            Marker::FolderPrompt => self.folder_prompt = true,
            Marker::FolderCleared => self.folder_cleared = true,
            Marker::CommandAck => self.command_ack = true,
            Marker::UsageData => self.usage_data = true,
        }
    }

    /// Whether any marker was seen
    pub fn any(&self) -> bool {
        *self != Self::default()
    }
}

/// Scans normalized output chunks for [`MARKERS`].
///
/// The tail of the previous chunk is prepended to each new one so a marker
/// split by a read boundary is still found, but a marker lying entirely in
/// that tail is not reported twice.
#[derive(Debug, Default)]
pub struct MarkerScanner {
    carry: String,
}

impl MarkerScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan one chunk of ANSI-free text
    pub fn scan(&mut self, chunk: &str) -> Observed {
        let mut window = std::mem::take(&mut self.carry);
        let fresh_from = window.len();
        window.push_str(&chunk.to_lowercase());

        let mut observed = Observed::default();
        for &(marker, pattern) in MARKERS {
            let hit = window
                .match_indices(pattern)
                .any(|(at, _)| at + pattern.len() > fresh_from);
            if hit {
                observed.set(marker);
            }
        }

        self.carry = tail_chars(&window, CARRY_CHARS).to_string();
        observed
    }
}

/// Last `n` characters of `s`, respecting UTF-8 boundaries
fn tail_chars(s: &str, n: usize) -> &str {
    match s.char_indices().rev().nth(n.saturating_sub(1)) {
        Some((i, _)) if n > 0 => &s[i..],
        _ if n == 0 => "",
        _ => s,
    }
}
