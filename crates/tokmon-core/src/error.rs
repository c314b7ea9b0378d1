//! Error type for PTY session operations.

use thiserror::Error;

/// Errors raised while opening or talking to the target program's terminal
#[derive(Debug, Error)]
pub enum SessionError {
    /// Resolution fell through to the bare program name and the spawn failed
    #[error("executable not found: {program} ({reason})")]
    ExecutableNotFound { program: String, reason: String },

    /// The pseudo-terminal pair could not be created
    #[error("failed to open pseudo-terminal: {0}")]
    Pty(anyhow::Error),

    /// The child process could not be created
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: anyhow::Error,
    },

    /// The terminal reached end of file (child exited or descriptor closed)
    #[error("terminal closed")]
    Closed,

    /// Reading from or writing to the terminal failed
    #[error("terminal I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Short machine-readable code used in structured error payloads
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::ExecutableNotFound { .. } => "executable_not_found",
            SessionError::Spawn { .. } => "spawn_failed",
            SessionError::Pty(_) | SessionError::Closed | SessionError::Io(_) => "session_failed",
        }
    }
}
