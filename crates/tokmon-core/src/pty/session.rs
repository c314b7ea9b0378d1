//! PTY session controller.
//!
//! Owns the pseudo-terminal pair and the child process. A reader thread
//! forwards master-side output into a channel so the caller's loop can wait
//! on it with a bounded timeout; every write happens on the caller's thread.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tracing::debug;

use super::resolver::{ResolutionSource, ResolvedExecutable};
use crate::error::SessionError;

/// How long to wait for the child to exit after SIGTERM before killing it
const REAP_TIMEOUT: Duration = Duration::from_millis(500);

/// How long to wait for the reader thread on shutdown
const READER_JOIN_TIMEOUT: Duration = Duration::from_millis(200);

/// Terminal window size in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
}

impl Default for WindowSize {
    fn default() -> Self {
        Self { rows: 40, cols: 120 }
    }
}

impl From<WindowSize> for PtySize {
    fn from(size: WindowSize) -> Self {
        PtySize {
            rows: size.rows,
            cols: size.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

/// Capability for applying the window size to an open terminal.
///
/// Applied optimistically after spawn; errors are never fatal.
pub trait WindowSizer {
    fn apply(&self, master: &dyn MasterPty, size: WindowSize) -> anyhow::Result<()>;
}

/// Resize through the PTY master (TIOCSWINSZ on unix)
#[derive(Debug, Default, Clone, Copy)]
pub struct PtyResize;

impl WindowSizer for PtyResize {
    fn apply(&self, master: &dyn MasterPty, size: WindowSize) -> anyhow::Result<()> {
        master.resize(size.into())
    }
}

/// No-op sizer for platforms or tests where resizing is unsupported
#[derive(Debug, Default, Clone, Copy)]
pub struct NoResize;

impl WindowSizer for NoResize {
    fn apply(&self, _master: &dyn MasterPty, _size: WindowSize) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Byte-level terminal interface used by the interaction loop
pub trait Terminal {
    /// Wait up to `timeout` for output. `Ok(None)` means nothing arrived;
    /// `Err(SessionError::Closed)` means the terminal reached end of file.
    fn read_available(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, SessionError>;

    /// Write bytes to the child's input
    fn write(&mut self, bytes: &[u8]) -> Result<(), SessionError>;

    /// Whether the child process is still running
    fn is_alive(&mut self) -> bool;

    /// Close descriptors and signal the child. Must be idempotent.
    fn shutdown(&mut self);
}

/// What the target program should be launched with
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub executable: ResolvedExecutable,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub window: WindowSize,
    pub env: Vec<(String, String)>,
}

impl SpawnSpec {
    /// Launch `executable` with no arguments and the default window
    pub fn new(executable: ResolvedExecutable) -> Self {
        Self {
            executable,
            args: Vec::new(),
            working_dir: None,
            window: WindowSize::default(),
            env: Vec::new(),
        }
    }
}

/// Messages from the reader thread
enum ReadEvent {
    Data(Vec<u8>),
    Eof,
    Failed(std::io::Error),
}

/// A child process attached to a pseudo-terminal
pub struct PtySession {
    child: Box<dyn Child + Send + Sync>,
    master: Option<Box<dyn MasterPty + Send>>,
    writer: Option<Box<dyn Write + Send>>,
    output: Receiver<ReadEvent>,
    reader: Option<JoinHandle<()>>,
    pid: Option<u32>,
    started_at: Instant,
    closed: bool,
}

impl PtySession {
    /// Open a PTY, spawn the child on its slave side and start the reader thread
    pub fn open(spec: &SpawnSpec, sizer: &dyn WindowSizer) -> Result<Self, SessionError> {
        let pair = native_pty_system()
            .openpty(spec.window.into())
            .map_err(SessionError::Pty)?;

        if let Err(e) = sizer.apply(&*pair.master, spec.window) {
            debug!("Ignoring failure to set window size: {}", e);
        }

        let program = spec.executable.path.display().to_string();
        let mut cmd = CommandBuilder::new(&spec.executable.path);
        cmd.args(&spec.args);
        if let Some(dir) = &spec.working_dir {
            cmd.cwd(dir);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            if spec.executable.source == ResolutionSource::Bare {
                SessionError::ExecutableNotFound {
                    program: program.clone(),
                    reason: e.to_string(),
                }
            } else {
                SessionError::Spawn {
                    program: program.clone(),
                    source: e,
                }
            }
        })?;
        // Only the child keeps the slave open, so its exit surfaces as EOF
        drop(pair.slave);

        let pid = child.process_id();
        debug!("Spawned {} with PID {:?}", program, pid);

        let reader = pair.master.try_clone_reader().map_err(SessionError::Pty)?;
        let writer = pair.master.take_writer().map_err(SessionError::Pty)?;

        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || forward_output(reader, tx));

        Ok(Self {
            child,
            master: Some(pair.master),
            writer: Some(writer),
            output: rx,
            reader: Some(handle),
            pid,
            started_at: Instant::now(),
            closed: false,
        })
    }

    /// Process ID of the child, if known
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn signal_child(&mut self) {
        if let Some(pid) = self.pid.and_then(|p| i32::try_from(p).ok()) {
            if let Err(e) = signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
                debug!("SIGTERM to {} failed: {}", pid, e);
            }
        }

        let deadline = Instant::now() + REAP_TIMEOUT;
        while Instant::now() < deadline {
            match self.child.try_wait() {
                Ok(Some(_)) | Err(_) => return,
                Ok(None) => thread::sleep(Duration::from_millis(20)),
            }
        }

        debug!("Child did not exit after SIGTERM, killing");
        let _ = self.child.kill();
        let _ = self.child.try_wait();
    }
}

impl Terminal for PtySession {
    fn read_available(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        match self.output.recv_timeout(timeout) {
            Ok(ReadEvent::Data(bytes)) => Ok(Some(bytes)),
            Ok(ReadEvent::Eof) | Err(RecvTimeoutError::Disconnected) => Err(SessionError::Closed),
            Ok(ReadEvent::Failed(e)) => Err(SessionError::Io(e)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        let writer = self.writer.as_mut().ok_or(SessionError::Closed)?;
        writer.write_all(bytes)?;
        writer.flush()?;
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        !self.closed && matches!(self.child.try_wait(), Ok(None))
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        let alive = self.is_alive();
        self.closed = true;

        self.writer.take();
        self.master.take();

        if alive {
            self.signal_child();
        }

        if let Some(handle) = self.reader.take() {
            join_thread_with_timeout(handle, READER_JOIN_TIMEOUT);
        }
        debug!(
            "PTY session closed after {:.1}s",
            self.started_at.elapsed().as_secs_f32()
        );
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Reader thread body: forward chunks until EOF, error, or the receiver goes away
fn forward_output(mut reader: Box<dyn Read + Send>, tx: mpsc::Sender<ReadEvent>) {
    let mut buf = [0u8; 4096];
    loop {
        let event = match reader.read(&mut buf) {
            Ok(0) => ReadEvent::Eof,
            Ok(n) => ReadEvent::Data(buf[..n].to_vec()),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            // Linux reports a hung-up PTY master as EIO
            Err(e) if e.raw_os_error() == Some(nix::libc::EIO) => ReadEvent::Eof,
            Err(e) => ReadEvent::Failed(e),
        };
        let done = !matches!(event, ReadEvent::Data(_));
        if tx.send(event).is_err() || done {
            return;
        }
    }
}

/// Join a thread with a timeout, abandoning it if it doesn't finish in time
fn join_thread_with_timeout<T>(handle: JoinHandle<T>, timeout: Duration) {
    let start = Instant::now();
    loop {
        if handle.is_finished() {
            let _ = handle.join();
            return;
        }
        if start.elapsed() >= timeout {
            debug!("Reader thread still blocked, abandoning it");
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

/// Launch the target in its working directory
pub fn open_session(
    executable: ResolvedExecutable,
    working_dir: Option<&Path>,
    window: WindowSize,
    env: Vec<(String, String)>,
) -> Result<PtySession, SessionError> {
    let spec = SpawnSpec {
        executable,
        args: Vec::new(),
        working_dir: working_dir.map(Path::to_path_buf),
        window,
        env,
    };
    PtySession::open(&spec, &PtyResize)
}
