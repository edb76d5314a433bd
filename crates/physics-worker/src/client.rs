//! Id-correlated request/response client on top of [`WorkerConnection`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::connection::{ConnectionHandler, ConnectionStatus, WorkerConnection};
use crate::error::{TerminationCause, WorkerError, WorkerResult};
use crate::executable::WorkerLauncher;
use crate::protocol::{classify_worker_message, WorkerReply, WorkerRequest};
use crate::WorkerRpc;

const DEFAULT_CALL_TIMEOUT_MS: u64 = 120_000;

/// Tuning knobs for [`WorkerClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerClientConfig {
    /// Per-call deadline; `None` waits until a reply or termination.
    pub call_timeout: Option<Duration>,
    /// Let the next call respawn a worker that terminated.
    pub restart_on_demand: bool,
    /// Log request params verbatim instead of redacting them.
    pub log_payloads: bool,
}

impl Default for WorkerClientConfig {
    fn default() -> Self {
        Self {
            call_timeout: Some(Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS)),
            restart_on_demand: true,
            log_payloads: false,
        }
    }
}

struct PendingCall {
    generation: u64,
    method: String,
    responder: oneshot::Sender<WorkerResult<Value>>,
}

#[derive(Default)]
struct PendingCalls {
    calls: Mutex<HashMap<String, PendingCall>>,
}

impl PendingCalls {
    fn register(&self, id: String, call: PendingCall) {
        lock_or_recover(&self.calls).insert(id, call);
    }

    fn take(&self, id: &str) -> Option<PendingCall> {
        lock_or_recover(&self.calls).remove(id)
    }

    fn len(&self) -> usize {
        lock_or_recover(&self.calls).len()
    }

    fn reject_where<F>(&self, error: &WorkerError, predicate: F) -> usize
    where
        F: Fn(&PendingCall) -> bool,
    {
        let drained = {
            let mut calls = lock_or_recover(&self.calls);
            let ids = calls
                .iter()
                .filter(|(_, call)| predicate(call))
                .map(|(id, _)| id.clone())
                .collect::<Vec<_>>();
            ids.into_iter()
                .filter_map(|id| calls.remove(&id).map(|call| (id, call)))
                .collect::<Vec<_>>()
        };
        let count = drained.len();
        for (id, call) in drained {
            tracing::debug!(id = %id, method = %call.method, %error, "rejecting pending worker call");
            let _ = call.responder.send(Err(error.clone()));
        }
        count
    }

    fn resolve(&self, id: &str, outcome: WorkerResult<Value>) {
        match self.take(id) {
            Some(call) => {
                if call.responder.send(outcome).is_err() {
                    tracing::debug!(id, method = %call.method, "worker reply arrived after caller stopped waiting");
                }
            }
            None => tracing::debug!(id, "ignoring worker reply with unknown id"),
        }
    }
}

impl ConnectionHandler for PendingCalls {
    fn on_line(&self, message: Value) {
        match classify_worker_message(message) {
            WorkerReply::Success { id, result } => self.resolve(&id, Ok(result)),
            WorkerReply::Failure { id, error } => self.resolve(&id, Err(error)),
            WorkerReply::Uncorrelated => {
                tracing::debug!("ignoring worker message without correlation id");
            }
        }
    }

    fn on_terminated(&self, generation: u64, cause: TerminationCause) {
        let error = WorkerError::Terminated(cause);
        let rejected = self.reject_where(&error, |call| call.generation <= generation);
        if rejected > 0 {
            tracing::warn!(generation, rejected, "rejected pending worker calls after termination");
        }
    }
}

/// Concurrent, id-correlated RPC client for the worker process.
pub struct WorkerClient {
    connection: WorkerConnection,
    pending: Arc<PendingCalls>,
    next_call: AtomicU64,
    id_prefix: String,
    config: WorkerClientConfig,
}

impl WorkerClient {
    pub fn new(launcher: Arc<dyn WorkerLauncher>, config: WorkerClientConfig) -> Self {
        let pending = Arc::new(PendingCalls::default());
        let simple = uuid::Uuid::new_v4().simple().to_string();
        Self {
            connection: WorkerConnection::new(launcher, pending.clone()),
            pending,
            next_call: AtomicU64::new(0),
            id_prefix: format!("req-{}", &simple[..8]),
            config,
        }
    }

    pub fn config(&self) -> &WorkerClientConfig {
        &self.config
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.connection.status().await
    }

    /// Number of calls still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Sends `method(params)` to the worker and waits for the matching reply.
    pub async fn call(&self, method: &str, params: Value) -> WorkerResult<Value> {
        let generation = self.ensure_connection().await?;
        let id = self.next_call_id();
        let (responder, receiver) = oneshot::channel();
        self.pending.register(
            id.clone(),
            PendingCall {
                generation,
                method: method.to_string(),
                responder,
            },
        );

        let request = WorkerRequest::new(id.clone(), method, params);
        self.log_request(&request);
        let exchange = async {
            if let Err(error) = self.connection.send(generation, &request).await {
                self.pending.take(&id);
                tracing::error!(id = %id, method, %error, "failed to send worker request");
                return Err(error);
            }
            receiver.await.unwrap_or(Err(WorkerError::Shutdown))
        };

        let outcome = match self.config.call_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, exchange).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.pending.take(&id);
                    let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                    tracing::warn!(id = %id, method, timeout_ms, "worker call timed out");
                    return Err(WorkerError::Timeout {
                        method: method.to_string(),
                        timeout_ms,
                    });
                }
            },
            None => exchange.await,
        };
        match &outcome {
            Ok(_) => tracing::debug!(id = %id, method, "worker call resolved"),
            Err(error) => tracing::debug!(id = %id, method, %error, "worker call rejected"),
        }
        outcome
    }

    /// Rejects every pending call with [`WorkerError::Shutdown`] and kills the worker.
    pub async fn shutdown(&self) {
        let rejected = self.pending.reject_where(&WorkerError::Shutdown, |_| true);
        let killed = self.connection.kill().await;
        if killed || rejected > 0 {
            tracing::info!(rejected, killed, "worker client shut down");
        }
    }

    /// Shuts the current worker down and spawns a fresh one.
    pub async fn restart(&self) -> WorkerResult<u64> {
        self.shutdown().await;
        self.connection.start().await
    }

    async fn ensure_connection(&self) -> WorkerResult<u64> {
        match self.connection.status().await {
            ConnectionStatus::Running { generation, .. } => Ok(generation),
            ConnectionStatus::Idle => self.connection.start().await,
            ConnectionStatus::Terminated(cause) if !self.config.restart_on_demand => {
                Err(WorkerError::Terminated(cause))
            }
            ConnectionStatus::Terminated(cause) => {
                tracing::warn!(%cause, "re-establishing worker connection after termination");
                self.connection.start().await
            }
        }
    }

    fn next_call_id(&self) -> String {
        let sequence = self.next_call.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{sequence}", self.id_prefix)
    }

    fn log_request(&self, request: &WorkerRequest) {
        if self.config.log_payloads {
            tracing::debug!(
                id = %request.id,
                method = %request.method,
                params = %request.params,
                "sending worker request"
            );
        } else {
            let bytes = request.params.to_string().len();
            tracing::debug!(
                id = %request.id,
                method = %request.method,
                params = %format!("<redacted {bytes} bytes>"),
                "sending worker request"
            );
        }
    }
}

#[async_trait]
impl WorkerRpc for WorkerClient {
    async fn call(&self, method: &str, params: Value) -> WorkerResult<Value> {
        WorkerClient::call(self, method, params).await
    }

    async fn shutdown(&self) {
        WorkerClient::shutdown(self).await
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
