//! Bridge to the out-of-process compute worker.
//!
//! The worker is a long-lived child process speaking newline-delimited JSON
//! over stdio. [`WorkerConnection`] owns the process and its framing,
//! [`WorkerClient`] layers id-correlated concurrent calls on top, and
//! [`ExecutableResolver`] locates an interpreter to run the worker script.

pub mod client;
pub mod connection;
pub mod error;
pub mod executable;
pub mod protocol;

use async_trait::async_trait;
use serde_json::Value;

pub use client::{WorkerClient, WorkerClientConfig};
pub use connection::{ConnectionHandler, ConnectionStatus, WorkerConnection};
pub use error::{TerminationCause, WorkerError, WorkerResult};
pub use executable::{
    host_platform_candidates, ExecutableResolver, PlatformCandidates, ProcessVersionProbe,
    PythonWorkerLauncher, UnixCandidates, VersionProbe, WindowsCandidates, WorkerCommand,
    WorkerLauncher, WORKER_PYTHON_ENV,
};
pub use protocol::{classify_worker_message, decode_worker_line, WorkerReply, WorkerRequest};

/// Request/response surface the router dispatches through.
#[async_trait]
pub trait WorkerRpc: Send + Sync {
    async fn call(&self, method: &str, params: Value) -> WorkerResult<Value>;
    async fn shutdown(&self);
}
