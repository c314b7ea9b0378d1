//! Interaction driver state machine.
//!
//! The driver never sleeps and never touches the terminal itself. Each call
//! to [`Driver::on_tick`] feeds it the current time and any new output; it
//! answers with the keystrokes to write and whether to stop. Keystroke pacing
//! is a queue of due times checked on every tick.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::config::{secs, DriverConfig};
use super::markers::{MarkerScanner, Observed};

const SUBMIT: &[u8] = b"\r";
const TAB: &[u8] = b"\t";

/// Driver states. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Init,
    AwaitingReady,
    /// Interrupt: answering the folder-confirmation prompt
    AwaitingFolderConfirm,
    CommandTyped,
    CommandSent,
    AwaitingDetail,
    Exiting,
    Terminated,
}

impl DriverState {
    /// Exit requested or already done; no new interaction starts
    pub fn is_winding_down(self) -> bool {
        matches!(self, DriverState::Exiting | DriverState::Terminated)
    }
}

/// Why the driver asked for the session to end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateReason {
    /// The exit command was sent and its grace period elapsed
    ExitSettled,
    /// The hard wall-clock ceiling was reached
    CeilingReached,
    /// The folder-confirmation prompt would not go away
    FolderConfirmStuck,
}

/// What the driver wants done this tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Write bytes to the child's input
    Write(Vec<u8>),
    /// Stop the loop and terminate the child if it still runs
    Terminate(TerminateReason),
}

/// Durations resolved from [`DriverConfig`]
#[derive(Debug, Clone, Copy)]
struct Timings {
    initial_wait: Duration,
    ready_settle: Duration,
    command_ack_wait: Duration,
    submit_delay: Duration,
    key_interval: Duration,
    tab_grace: Duration,
    tab_interval: Duration,
    fallback_grace: Duration,
    detail_settle: Duration,
    folder_retry_interval: Duration,
    folder_window: Duration,
    hard_ceiling: Duration,
    exit_settle: Duration,
}

impl From<&DriverConfig> for Timings {
    fn from(c: &DriverConfig) -> Self {
        Self {
            initial_wait: secs(c.initial_wait_sec),
            ready_settle: secs(c.ready_settle_sec),
            command_ack_wait: secs(c.command_ack_wait_sec),
            submit_delay: secs(c.submit_delay_sec),
            key_interval: secs(c.key_interval_sec),
            tab_grace: secs(c.tab_grace_sec),
            tab_interval: secs(c.tab_interval_sec),
            fallback_grace: secs(c.fallback_grace_sec),
            detail_settle: secs(c.detail_settle_sec),
            folder_retry_interval: secs(c.folder_confirm_retry_interval_sec),
            folder_window: secs(c.folder_confirm_window_sec),
            hard_ceiling: secs(c.hard_ceiling_sec),
            exit_settle: secs(c.exit_settle_sec),
        }
    }
}

/// A keystroke waiting for its due time
#[derive(Debug)]
struct Keystroke {
    due: Instant,
    bytes: Vec<u8>,
}

/// Active folder-confirmation interrupt
#[derive(Debug, Clone, Copy)]
struct FolderInterrupt {
    first_seen: Instant,
    last_attempt: Option<Instant>,
    resume: DriverState,
}

/// Sticky observations since the markers were last reset
#[derive(Debug, Default)]
struct Seen {
    ready: bool,
    settings: bool,
    command_ack: bool,
    usage_data_at: Option<Instant>,
}

/// Keystroke driver for the target program's status screen
#[derive(Debug)]
pub struct Driver {
    timings: Timings,
    command: String,
    fallback_command: String,
    exit_keys: Vec<u8>,
    type_keys_individually: bool,
    folder_retry_limit: u32,

    state: DriverState,
    /// Session start; the ceiling is measured from here
    started_at: Instant,
    /// Session clock for the startup checkpoints, reset when the folder prompt clears
    baseline: Instant,
    entered_at: Instant,

    scanner: MarkerScanner,
    seen: Seen,
    outbox: VecDeque<Keystroke>,
    folder: Option<FolderInterrupt>,
    folder_attempts: u32,
    last_tab: Option<Instant>,
    tabs_sent: u32,
    fallback_sent_at: Option<Instant>,
    exit_sent_at: Option<Instant>,
}

impl Driver {
    /// Create a driver whose clocks start at `now`
    pub fn new(config: &DriverConfig, now: Instant) -> Self {
        let mut exit_keys = config.exit_command.clone().into_bytes();
        exit_keys.extend_from_slice(SUBMIT);

        Self {
            timings: Timings::from(config),
            command: config.command.clone(),
            fallback_command: config.fallback_command.clone(),
            exit_keys,
            type_keys_individually: config.type_keys_individually,
            folder_retry_limit: config.folder_confirm_retry_limit,
            state: DriverState::Init,
            started_at: now,
            baseline: now,
            entered_at: now,
            scanner: MarkerScanner::new(),
            seen: Seen::default(),
            outbox: VecDeque::new(),
            folder: None,
            folder_attempts: 0,
            last_tab: None,
            tabs_sent: 0,
            fallback_sent_at: None,
            exit_sent_at: None,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.state == DriverState::Terminated
    }

    pub fn tabs_sent(&self) -> u32 {
        self.tabs_sent
    }

    pub fn fallback_sent(&self) -> bool {
        self.fallback_sent_at.is_some()
    }

    /// How long the loop may wait for output before the next scheduled keystroke
    pub fn poll_timeout(&self, now: Instant, poll: Duration) -> Duration {
        self.outbox
            .front()
            .map(|k| k.due.saturating_duration_since(now).min(poll))
            .unwrap_or(poll)
    }

    /// Advance the machine by one tick
    pub fn on_tick(&mut self, now: Instant, chunk: Option<&str>) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.state == DriverState::Terminated {
            return actions;
        }
        if self.state == DriverState::Init {
            self.transition(DriverState::AwaitingReady, now);
        }

        if let Some(text) = chunk {
            let observed = self.scanner.scan(text);
            if observed.any() {
                self.observe(observed, now);
            }
        }

        if self.state == DriverState::AwaitingFolderConfirm {
            self.confirm_folder(now, &mut actions);
        } else {
            self.flush_due(now, &mut actions);
            self.advance(now, &mut actions);
        }
        self.enforce_ceiling(now, &mut actions);

        actions
    }

    fn observe(&mut self, observed: Observed, now: Instant) {
        if observed.folder_prompt && !self.state.is_winding_down() {
            self.interrupt_for_folder(now);
        }

        if self.state == DriverState::AwaitingFolderConfirm {
            if observed.folder_cleared && self.folder_attempts > 0 {
                self.resume_after_folder(now);
            } else {
                // Glyphs on the confirmation screen say nothing about readiness
                return;
            }
        }

        if observed.ready {
            self.seen.ready = true;
        }
        if observed.settings {
            self.seen.settings = true;
        }
        if observed.command_ack {
            self.seen.command_ack = true;
        }
        if observed.usage_data && self.seen.usage_data_at.is_none() {
            debug!("Driver: usage data on screen");
            self.seen.usage_data_at = Some(now);
        }
    }

    fn interrupt_for_folder(&mut self, now: Instant) {
        if self.state == DriverState::AwaitingFolderConfirm {
            return;
        }
        // Keys typed into the prompt would be lost; retype from scratch
        let resume = match self.state {
            DriverState::CommandTyped => DriverState::AwaitingReady,
            other => other,
        };
        info!("Driver: folder confirmation prompt detected");
        self.outbox.clear();
        self.seen.ready = false;
        self.folder = Some(FolderInterrupt {
            first_seen: now,
            last_attempt: None,
            resume,
        });
        self.transition(DriverState::AwaitingFolderConfirm, now);
    }

    fn resume_after_folder(&mut self, now: Instant) {
        let resume = self
            .folder
            .take()
            .map_or(DriverState::AwaitingReady, |f| f.resume);
        info!("Driver: folder confirmed, resuming {:?}", resume);
        self.baseline = now;
        self.transition(resume, now);
    }

    fn confirm_folder(&mut self, now: Instant, actions: &mut Vec<Action>) {
        let Some(folder) = self.folder else {
            self.transition(DriverState::AwaitingReady, now);
            return;
        };

        if now.duration_since(folder.first_seen) >= self.timings.folder_window {
            warn!("Driver: folder prompt still shown after confirmation window, aborting");
            self.terminate(TerminateReason::FolderConfirmStuck, actions, now);
            return;
        }

        let retry_due = folder
            .last_attempt
            .is_none_or(|t| now.duration_since(t) >= self.timings.folder_retry_interval);
        if !retry_due {
            return;
        }

        if self.folder_attempts >= self.folder_retry_limit {
            warn!(
                "Driver: folder prompt persists after {} attempts, aborting",
                self.folder_attempts
            );
            self.terminate(TerminateReason::FolderConfirmStuck, actions, now);
            return;
        }

        self.folder_attempts += 1;
        debug!("Driver: confirming folder (attempt {})", self.folder_attempts);
        actions.push(Action::Write(SUBMIT.to_vec()));
        self.folder = Some(FolderInterrupt {
            last_attempt: Some(now),
            ..folder
        });
    }

    fn advance(&mut self, now: Instant, actions: &mut Vec<Action>) {
        match self.state {
            DriverState::AwaitingReady => {
                let waited = now.duration_since(self.baseline);
                if self.seen.ready || waited >= self.timings.initial_wait {
                    if !self.seen.ready {
                        debug!("Driver: no ready marker after {:?}, typing anyway", waited);
                    }
                    self.seen.command_ack = false;
                    let command = self.command.clone();
                    let last = self.schedule_typed(now + self.timings.ready_settle, &command);
                    self.schedule(last + self.timings.submit_delay, SUBMIT);
                    self.transition(DriverState::CommandTyped, now);
                }
            }
            DriverState::CommandTyped => {
                if self.outbox.is_empty() {
                    self.transition(DriverState::CommandSent, now);
                }
            }
            DriverState::CommandSent => {
                let waited = now.duration_since(self.entered_at);
                if self.seen.command_ack || waited >= self.timings.command_ack_wait {
                    // Some UIs swallow the first newline while the command menu is open
                    actions.push(Action::Write(SUBMIT.to_vec()));
                    self.transition(DriverState::AwaitingDetail, now);
                }
            }
            DriverState::AwaitingDetail => self.await_detail(now, actions),
            DriverState::Exiting => {
                let settled = self
                    .exit_sent_at
                    .is_some_and(|t| now.duration_since(t) >= self.timings.exit_settle);
                if settled {
                    self.terminate(TerminateReason::ExitSettled, actions, now);
                }
            }
            DriverState::Init | DriverState::AwaitingFolderConfirm | DriverState::Terminated => {}
        }
    }

    fn await_detail(&mut self, now: Instant, actions: &mut Vec<Action>) {
        if let Some(seen_at) = self.seen.usage_data_at {
            if now.duration_since(seen_at) >= self.timings.detail_settle {
                self.request_exit(now, actions);
            }
            return;
        }

        if !self.outbox.is_empty() {
            return;
        }

        let waiting = now.duration_since(self.entered_at);
        if self.fallback_sent_at.is_none() && waiting >= self.timings.fallback_grace {
            info!("Driver: no usage data yet, trying {}", self.fallback_command);
            let command = self.fallback_command.clone();
            let last = self.schedule_typed(now, &command);
            self.schedule(last + self.timings.submit_delay, SUBMIT);
            self.schedule(last + self.timings.submit_delay.saturating_mul(2), SUBMIT);
            self.fallback_sent_at = Some(now);
            return;
        }

        let tab_allowed = self.seen.settings || waiting >= self.timings.tab_grace;
        let tab_due = self
            .last_tab
            .is_none_or(|t| now.duration_since(t) >= self.timings.tab_interval);
        if tab_allowed && tab_due {
            actions.push(Action::Write(TAB.to_vec()));
            self.last_tab = Some(now);
            self.tabs_sent += 1;
        }
    }

    fn enforce_ceiling(&mut self, now: Instant, actions: &mut Vec<Action>) {
        if self.state == DriverState::Terminated {
            return;
        }
        let elapsed = now.duration_since(self.started_at);
        if elapsed >= self.timings.hard_ceiling && self.exit_sent_at.is_none() {
            warn!("Driver: hard ceiling reached in {:?}, requesting exit", self.state);
            self.request_exit(now, actions);
        }
        if elapsed >= self.timings.hard_ceiling.saturating_add(self.timings.exit_settle) {
            self.terminate(TerminateReason::CeilingReached, actions, now);
        }
    }

    /// Send the exit command. Guarded so it is written at most once.
    fn request_exit(&mut self, now: Instant, actions: &mut Vec<Action>) {
        if self.exit_sent_at.is_some() {
            return;
        }
        self.outbox.clear();
        actions.push(Action::Write(self.exit_keys.clone()));
        self.exit_sent_at = Some(now);
        self.transition(DriverState::Exiting, now);
    }

    fn terminate(&mut self, reason: TerminateReason, actions: &mut Vec<Action>, now: Instant) {
        self.outbox.clear();
        actions.push(Action::Terminate(reason));
        self.transition(DriverState::Terminated, now);
    }

    fn transition(&mut self, next: DriverState, now: Instant) {
        if self.state != next {
            debug!("Driver: {:?} -> {:?}", self.state, next);
        }
        self.state = next;
        self.entered_at = now;
    }

    /// Queue `text` starting at `start`; returns when its last key is due
    fn schedule_typed(&mut self, start: Instant, text: &str) -> Instant {
        if !self.type_keys_individually {
            self.schedule(start, text.as_bytes());
            return start;
        }
        let mut due = start;
        for (i, ch) in text.chars().enumerate() {
            due = start + self.timings.key_interval.saturating_mul(u32::try_from(i).unwrap_or(u32::MAX));
            let mut buf = [0u8; 4];
            self.schedule(due, ch.encode_utf8(&mut buf).as_bytes());
        }
        due
    }

    fn schedule(&mut self, due: Instant, bytes: &[u8]) {
        self.outbox.push_back(Keystroke {
            due,
            bytes: bytes.to_vec(),
        });
    }

    fn flush_due(&mut self, now: Instant, actions: &mut Vec<Action>) {
        while self.outbox.front().is_some_and(|k| k.due <= now) {
            if let Some(key) = self.outbox.pop_front() {
                actions.push(Action::Write(key.bytes));
            }
        }
    }
}
