//! Capture the status screen by driving the target program through a PTY.
//!
//! 1. Opens a pseudo-terminal session running the target
//! 2. Feeds each output chunk to the [`Driver`] and writes its keystrokes
//! 3. Stops when the driver terminates, the child exits, or I/O fails
//! 4. Shuts the session down and parses the full transcript

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use super::parser::parse_usage_output;
use super::types::Extraction;
use crate::ansi::normalize_bytes;
use crate::driver::{Action, Driver, DriverConfig, TerminateReason};
use crate::error::SessionError;
use crate::pty::{open_session, ResolvedExecutable, Terminal, WindowSize};

/// Terminal type advertised to the child unless configured otherwise
pub const DEFAULT_TERM: &str = "xterm-256color";

/// Everything needed to run one capture
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub executable: ResolvedExecutable,
    pub working_dir: Option<PathBuf>,
    pub window: WindowSize,
    /// Value of `TERM` in the child's environment
    pub term: String,
    pub driver: DriverConfig,
}

impl CaptureRequest {
    pub fn new(executable: ResolvedExecutable) -> Self {
        Self {
            executable,
            working_dir: None,
            window: WindowSize::default(),
            term: DEFAULT_TERM.to_string(),
            driver: DriverConfig::default(),
        }
    }
}

/// Why the interaction loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEnd {
    /// The driver asked to stop
    Driver(TerminateReason),
    /// The child exited or the terminal reached end of file
    ChildExited,
    /// Reading from the terminal failed
    ReadFailed,
    /// Writing a keystroke failed
    WriteFailed,
}

/// Output of the interaction loop
#[derive(Debug, Clone)]
pub struct DriveOutcome {
    /// Full transcript, ANSI-free
    pub transcript: String,
    pub end: LoopEnd,
}

/// Result of a completed capture
#[derive(Debug, Clone)]
pub struct UsageCapture {
    pub transcript: String,
    pub extraction: Extraction,
    pub end: LoopEnd,
}

/// Launch the target and capture its status screen.
///
/// Only session setup fails; everything after the spawn ends in a capture,
/// possibly holding a diagnostic instead of a summary.
pub fn fetch_usage(request: &CaptureRequest) -> Result<UsageCapture, SessionError> {
    let env = vec![("TERM".to_string(), request.term.clone())];
    let mut session = open_session(
        request.executable.clone(),
        request.working_dir.as_deref(),
        request.window,
        env,
    )?;
    info!(
        "Usage fetch: started {} ({:?}) with PID {:?}",
        request.executable.path.display(),
        request.executable.source,
        session.pid()
    );

    let mut driver = Driver::new(&request.driver, Instant::now());
    let outcome = drive(&mut session, &mut driver, request.driver.poll_interval());
    info!("Usage fetch: loop ended ({:?})", outcome.end);

    let extraction = parse_usage_output(&outcome.transcript, Utc::now());
    Ok(UsageCapture {
        transcript: outcome.transcript,
        extraction,
        end: outcome.end,
    })
}

/// Run `driver` against `terminal` until either side ends the session.
///
/// The only blocking call is the bounded read; its timeout is shortened when
/// a keystroke falls due sooner. The terminal is shut down on every path.
pub fn drive<T: Terminal>(terminal: &mut T, driver: &mut Driver, poll: Duration) -> DriveOutcome {
    let mut raw = Vec::new();
    let mut pending = Vec::new();
    let mut chunk: Option<String> = None;

    let end = 'session: loop {
        for action in driver.on_tick(Instant::now(), chunk.take().as_deref()) {
            match action {
                Action::Write(bytes) => {
                    if let Err(e) = terminal.write(&bytes) {
                        warn!("Usage fetch: write failed: {}", e);
                        break 'session LoopEnd::WriteFailed;
                    }
                }
                Action::Terminate(reason) => break 'session LoopEnd::Driver(reason),
            }
        }

        match terminal.read_available(driver.poll_timeout(Instant::now(), poll)) {
            Ok(Some(bytes)) => {
                raw.extend_from_slice(&bytes);
                chunk = Some(decode_chunk(&mut pending, &bytes));
            }
            Ok(None) => {
                if !terminal.is_alive() {
                    // The reader thread may still hold the child's last output
                    drain(terminal, &mut raw, poll);
                    break LoopEnd::ChildExited;
                }
            }
            Err(SessionError::Closed) => break LoopEnd::ChildExited,
            Err(e) => {
                debug!("Usage fetch: read failed: {}", e);
                break LoopEnd::ReadFailed;
            }
        }
    };

    terminal.shutdown();
    DriveOutcome {
        transcript: normalize_bytes(&raw),
        end,
    }
}

/// Collect output still buffered after the child exited, until the terminal goes quiet
fn drain<T: Terminal>(terminal: &mut T, raw: &mut Vec<u8>, poll: Duration) {
    while let Ok(Some(bytes)) = terminal.read_available(poll) {
        raw.extend_from_slice(&bytes);
    }
}

/// Normalize one chunk, holding back a UTF-8 sequence cut off at its end
fn decode_chunk(pending: &mut Vec<u8>, bytes: &[u8]) -> String {
    pending.extend_from_slice(bytes);
    let complete = match std::str::from_utf8(pending) {
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        _ => pending.len(),
    };
    let text = normalize_bytes(&pending[..complete]);
    pending.drain(..complete);
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverState;
    use crate::usage::types::SectionKind;
    use std::collections::VecDeque;
    use std::thread;

    /// A child that replays output on a schedule and answers keystrokes
    struct ScriptedTerminal {
        started: Instant,
        script: VecDeque<(Duration, &'static str)>,
        replies: Vec<(&'static str, &'static str)>,
        queued: VecDeque<Vec<u8>>,
        written: Vec<u8>,
        exit_on: Option<&'static str>,
        fail_writes: bool,
        alive: bool,
        shutdowns: u32,
    }

    impl ScriptedTerminal {
        fn new() -> Self {
            Self {
                started: Instant::now(),
                script: VecDeque::new(),
                replies: Vec::new(),
                queued: VecDeque::new(),
                written: Vec::new(),
                exit_on: None,
                fail_writes: false,
                alive: true,
                shutdowns: 0,
            }
        }

        fn emit_at(mut self, ms: u64, text: &'static str) -> Self {
            self.script.push_back((Duration::from_millis(ms), text));
            self
        }

        fn reply(mut self, on: &'static str, text: &'static str) -> Self {
            self.replies.push((on, text));
            self
        }

        fn exits_on(mut self, on: &'static str) -> Self {
            self.exit_on = Some(on);
            self
        }

        fn count_written(&self, needle: &str) -> usize {
            String::from_utf8_lossy(&self.written).matches(needle).count()
        }
    }

    impl Terminal for ScriptedTerminal {
        fn read_available(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, SessionError> {
            if let Some(bytes) = self.queued.pop_front() {
                return Ok(Some(bytes));
            }
            let due = self
                .script
                .front()
                .is_some_and(|(at, _)| self.started.elapsed() >= *at);
            if due {
                if let Some((_, text)) = self.script.pop_front() {
                    return Ok(Some(text.as_bytes().to_vec()));
                }
            }
            if !self.alive {
                return Err(SessionError::Closed);
            }
            thread::sleep(timeout.min(Duration::from_millis(5)));
            Ok(None)
        }

        fn write(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
            if self.fail_writes {
                return Err(SessionError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "child hung up",
                )));
            }
            self.written.extend_from_slice(bytes);
            let text = String::from_utf8_lossy(bytes).into_owned();
            for (on, reply) in &self.replies {
                if text.contains(on) {
                    self.queued.push_back(reply.as_bytes().to_vec());
                }
            }
            if self.exit_on.is_some_and(|on| text.contains(on)) {
                self.alive = false;
            }
            Ok(())
        }

        fn is_alive(&mut self) -> bool {
            self.alive
        }

        fn shutdown(&mut self) {
            self.shutdowns += 1;
            self.alive = false;
        }
    }

    fn fast_config() -> DriverConfig {
        DriverConfig {
            initial_wait_sec: 0.2,
            ready_settle_sec: 0.0,
            command_ack_wait_sec: 0.05,
            submit_delay_sec: 0.01,
            tab_grace_sec: 0.5,
            tab_interval_sec: 0.1,
            fallback_grace_sec: 0.5,
            detail_settle_sec: 0.05,
            hard_ceiling_sec: 5.0,
            exit_settle_sec: 0.1,
            poll_interval_ms: 10,
            ..DriverConfig::default()
        }
    }

    const STATUS_SCREEN: &str = "/status  Show Claude Code status\r\n\
        \x1b[1mSettings:\x1b[0m  Status   Config   Usage\r\n\
        Current session\r\n\x1b[38;5;75m███▌\x1b[39m 45% used\r\n\
        Resets in 3 hours\r\n\
        Current week (all models)\r\n10% used\r\nResets in 5 days\r\n";

    #[test]
    fn test_drive_captures_status_screen() {
        let mut terminal = ScriptedTerminal::new()
            .emit_at(0, "\x1b]0;claude\x07\x1b[2J\x1b[1m❯\x1b[0m Try \"fix lint errors\"\r\n")
            .reply("/status", STATUS_SCREEN)
            .exits_on("/exit");
        let config = fast_config();
        let mut driver = Driver::new(&config, Instant::now());

        let outcome = drive(&mut terminal, &mut driver, config.poll_interval());

        assert_eq!(outcome.end, LoopEnd::ChildExited);
        assert_eq!(terminal.count_written("/status"), 1);
        assert_eq!(terminal.count_written("/exit\r"), 1);
        assert_eq!(terminal.shutdowns, 1);
        assert!(!outcome.transcript.contains('\x1b'));

        match parse_usage_output(&outcome.transcript, Utc::now()) {
            Extraction::Summary(summary) => {
                let session = summary.get(SectionKind::CurrentSession).unwrap();
                assert_eq!(session.percent_used, Some(45));
                assert_eq!(session.reset_text.as_deref(), Some("Resets in 3 hours"));
                assert!(summary.get(SectionKind::CurrentWeekAll).is_some());
            }
            Extraction::Diagnostic(d) => panic!("expected summary, got {:?}", d.tail),
        }
    }

    #[test]
    fn test_drive_answers_folder_prompt() {
        let mut terminal = ScriptedTerminal::new()
            .emit_at(0, "Do you want to work in this folder?\r\n❯ 1. Yes, continue\r\n")
            .reply("\r", "Welcome back!\r\n")
            .reply("/status", STATUS_SCREEN)
            .exits_on("/exit");
        let config = fast_config();
        let mut driver = Driver::new(&config, Instant::now());

        let outcome = drive(&mut terminal, &mut driver, config.poll_interval());

        assert_eq!(outcome.end, LoopEnd::ChildExited);
        assert!(terminal.written.starts_with(b"\r"));
        assert_eq!(terminal.count_written("/status"), 1);
        assert_eq!(terminal.count_written("/exit\r"), 1);
    }

    #[test]
    fn test_drive_ceiling_stops_unresponsive_child() {
        let mut terminal = ScriptedTerminal::new();
        let config = DriverConfig {
            hard_ceiling_sec: 0.3,
            ..fast_config()
        };
        let start = Instant::now();
        let mut driver = Driver::new(&config, start);

        let outcome = drive(&mut terminal, &mut driver, config.poll_interval());

        // The exit grace and the ceiling's own grace end on the same tick
        assert!(matches!(outcome.end, LoopEnd::Driver(_)));
        assert_eq!(driver.state(), DriverState::Terminated);
        assert_eq!(terminal.count_written("/exit\r"), 1);
        assert_eq!(terminal.shutdowns, 1);
        assert!(start.elapsed() < Duration::from_secs(3));
        assert!(outcome.transcript.is_empty());
    }

    #[test]
    fn test_drive_stops_on_write_failure() {
        let mut terminal = ScriptedTerminal::new().emit_at(0, "? for shortcuts\r\n");
        terminal.fail_writes = true;
        let config = fast_config();
        let mut driver = Driver::new(&config, Instant::now());

        let outcome = drive(&mut terminal, &mut driver, config.poll_interval());

        assert_eq!(outcome.end, LoopEnd::WriteFailed);
        assert_eq!(terminal.shutdowns, 1);
        assert_eq!(outcome.transcript, "? for shortcuts\r\n");
    }

    #[test]
    fn test_drive_child_exits_immediately() {
        let mut terminal = ScriptedTerminal::new().emit_at(0, "error: not logged in\r\n");
        terminal.alive = false;
        let config = fast_config();
        let mut driver = Driver::new(&config, Instant::now());

        let outcome = drive(&mut terminal, &mut driver, config.poll_interval());

        assert_eq!(outcome.end, LoopEnd::ChildExited);
        assert!(terminal.written.is_empty());
        assert!(matches!(
            parse_usage_output(&outcome.transcript, Utc::now()),
            Extraction::Diagnostic(_)
        ));
    }

    /// A dead child whose last output arrives after the first empty read
    struct LaggingTerminal {
        reads: usize,
        backlog: VecDeque<&'static str>,
    }

    impl Terminal for LaggingTerminal {
        fn read_available(&mut self, _timeout: Duration) -> Result<Option<Vec<u8>>, SessionError> {
            self.reads += 1;
            if self.reads == 1 {
                return Ok(None);
            }
            match self.backlog.pop_front() {
                Some(text) => Ok(Some(text.as_bytes().to_vec())),
                None => Err(SessionError::Closed),
            }
        }

        fn write(&mut self, _bytes: &[u8]) -> Result<(), SessionError> {
            Ok(())
        }

        fn is_alive(&mut self) -> bool {
            false
        }

        fn shutdown(&mut self) {}
    }

    #[test]
    fn test_drive_keeps_output_buffered_after_exit() {
        let mut terminal = LaggingTerminal {
            reads: 0,
            backlog: VecDeque::from(["Current session\r\n45% used\r\n", "Resets in 1 hour\r\n"]),
        };
        let config = fast_config();
        let mut driver = Driver::new(&config, Instant::now());

        let outcome = drive(&mut terminal, &mut driver, config.poll_interval());

        assert_eq!(outcome.end, LoopEnd::ChildExited);
        assert!(outcome.transcript.contains("Resets in 1 hour"));
        let Extraction::Summary(summary) = parse_usage_output(&outcome.transcript, Utc::now())
        else {
            panic!("expected a summary");
        };
        let session = summary.get(SectionKind::CurrentSession).unwrap();
        assert_eq!(session.percent_used, Some(45));
        assert_eq!(session.reset_text.as_deref(), Some("Resets in 1 hour"));
    }

    #[test]
    fn test_decode_chunk_holds_split_utf8() {
        let glyph = "❯".as_bytes();
        let mut pending = Vec::new();
        assert_eq!(decode_chunk(&mut pending, &glyph[..1]), "");
        assert_eq!(pending.len(), 1);
        assert_eq!(decode_chunk(&mut pending, &glyph[1..]), "❯");
        assert!(pending.is_empty());
    }
}
