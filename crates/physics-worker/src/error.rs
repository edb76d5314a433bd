use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// Result type for worker bridge operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Why a worker process stopped being usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationCause {
    /// The process exited on its own. `code` is `None` when a signal ended it.
    Exited { code: Option<i32> },
    /// The process was killed by the bridge (shutdown or restart).
    Killed,
    /// Waiting on the process failed.
    WaitFailed(String),
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited { code: Some(code) } => write!(f, "exited with status {code}"),
            Self::Exited { code: None } => write!(f, "exited by signal"),
            Self::Killed => write!(f, "killed"),
            Self::WaitFailed(message) => write!(f, "wait failed: {message}"),
        }
    }
}

/// Errors surfaced by the worker connection and client.
#[derive(Debug, Clone, Error)]
pub enum WorkerError {
    #[error("no usable worker executable found (tried: {})", .tried.join(", "))]
    Configuration { tried: Vec<String> },
    #[error("failed to spawn worker '{program}': {message}")]
    Spawn { program: String, message: String },
    #[error("worker process terminated: {0}")]
    Terminated(TerminationCause),
    #[error("worker process is not running")]
    NotRunning,
    #[error("failed to write request to worker: {0}")]
    Write(String),
    #[error("failed to encode worker request: {0}")]
    Encode(String),
    #[error("worker client was shut down")]
    Shutdown,
    #[error("worker call '{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },
    #[error("worker error: {message}")]
    Remote {
        message: String,
        code: Option<i64>,
        data: Option<Value>,
    },
}

impl WorkerError {
    /// Stable category label used in logs and error envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::Spawn { .. }
            | Self::Terminated(_)
            | Self::NotRunning
            | Self::Write(_)
            | Self::Encode(_) => "transport",
            Self::Shutdown => "shutdown",
            Self::Timeout { .. } => "timeout",
            Self::Remote { .. } => "worker",
        }
    }
}
