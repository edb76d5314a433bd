//! Routes, executes, persists and records one tool call.

use std::sync::Arc;

use physics_artifacts::ArtifactPersister;
use physics_session::{SessionResult, SessionStore, SessionStoreError};
use physics_worker::{WorkerError, WorkerRpc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::catalog::Execution;
use crate::report::generate_session_report;
use crate::route::{RoutedCall, ToolRouter};

const CONTENT_TYPE_TEXT: &str = "text";

/// Inbound `tools/call` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

/// Outbound `tools/call` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResultEnvelope {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolResultEnvelope {
    pub fn success(result: &Value) -> Self {
        Self::text(result, false)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::text(&json!({ "error": message.into() }), true)
    }

    fn text(value: &Value, is_error: bool) -> Self {
        let text = serde_json::to_string_pretty(value)
            .unwrap_or_else(|_| "{\"error\":\"failed to serialize tool result\"}".to_string());
        Self {
            content: vec![ToolContent {
                kind: CONTENT_TYPE_TEXT.to_string(),
                text,
            }],
            is_error,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({"content": [], "isError": true}))
    }
}

/// Failure of a routed call after it passed routing.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error(transparent)]
    Session(#[from] SessionStoreError),
    #[error("report generation failed: {0}")]
    Report(String),
    #[error("tool '{0}' requires a session but none is available")]
    NoSession(String),
    #[error("no local handler for '{0}'")]
    NoLocalHandler(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Session used when a call does not carry `session_id`. Generated when unset.
    pub default_session_id: Option<String>,
}

/// Front door for tool calls: route, execute, persist, record.
pub struct ToolDispatcher {
    router: ToolRouter,
    worker: Arc<dyn WorkerRpc>,
    store: SessionStore,
    artifacts: ArtifactPersister,
    default_session_id: String,
}

impl ToolDispatcher {
    pub fn new(
        router: ToolRouter,
        worker: Arc<dyn WorkerRpc>,
        store: SessionStore,
        artifacts: ArtifactPersister,
        config: DispatcherConfig,
    ) -> SessionResult<Self> {
        let default_session_id = store.ensure_session(config.default_session_id.as_deref())?;
        tracing::info!(session_id = %default_session_id, "default session ready");
        Ok(Self {
            router,
            worker,
            store,
            artifacts,
            default_session_id,
        })
    }

    pub fn router(&self) -> &ToolRouter {
        &self.router
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn default_session_id(&self) -> &str {
        &self.default_session_id
    }

    /// `tools/list` descriptors for the available tools.
    pub fn tool_descriptors(&self) -> Vec<Value> {
        self.router.capabilities().tool_descriptors()
    }

    pub async fn handle(&self, call: ToolCall) -> ToolResultEnvelope {
        let routed = match self.router.route(&call.name, &call.arguments) {
            Ok(routed) => routed,
            Err(error) => {
                tracing::warn!(tool = %call.name, %error, "rejected tool call");
                return ToolResultEnvelope::error(error.to_string());
            }
        };

        let session_id = match self.ensure_call_session(routed.session_id.as_deref()) {
            Ok(session_id) => session_id,
            Err(SessionStoreError::InvalidSessionId(id)) => {
                return ToolResultEnvelope::error(format!("invalid session_id '{id}'"));
            }
            Err(error) => {
                tracing::error!(tool = routed.tool.name, %error, "session store unavailable");
                None
            }
        };

        tracing::debug!(
            tool = routed.tool.name,
            method = routed.method.unwrap_or("-"),
            worker_method = %routed.worker_method,
            session_id = session_id.as_deref().unwrap_or("-"),
            "dispatching tool call"
        );

        let outcome = self.execute(&routed, session_id.as_deref()).await;
        let (envelope, output) = match outcome {
            Ok(result) => {
                let result = match session_id.as_deref() {
                    Some(session_id) => self.artifacts.persist(session_id, routed.tool.name, result),
                    None => result,
                };
                (ToolResultEnvelope::success(&result), result)
            }
            Err(error) => {
                let message = error.to_string();
                let kind = match &error {
                    ExecutionError::Worker(worker_error) => worker_error.kind(),
                    _ => "local",
                };
                tracing::warn!(tool = routed.tool.name, kind, error = %message, "tool call failed");
                (
                    ToolResultEnvelope::error(message.clone()),
                    json!({ "error": message }),
                )
            }
        };

        if let Some(session_id) = session_id.as_deref() {
            let input = Value::Object(routed.arguments.clone());
            if let Err(error) =
                self.store
                    .record_event(session_id, routed.tool.name, &input, &output)
            {
                tracing::error!(session_id, tool = routed.tool.name, %error, "failed to record event");
            }
        }
        envelope
    }

    /// Stops the worker; pending calls are rejected.
    pub async fn shutdown(&self) {
        self.worker.shutdown().await;
    }

    fn ensure_call_session(&self, requested: Option<&str>) -> SessionResult<Option<String>> {
        match requested {
            Some(id) => self.store.ensure_session(Some(id)).map(Some),
            None => Ok(Some(self.default_session_id.clone())),
        }
    }

    async fn execute(
        &self,
        routed: &RoutedCall,
        session_id: Option<&str>,
    ) -> Result<Value, ExecutionError> {
        match routed.execution() {
            Execution::Worker => {
                let params = Value::Object(routed.params.clone());
                Ok(self.worker.call(&routed.worker_method, params).await?)
            }
            Execution::Local => {
                let session_id =
                    session_id.ok_or_else(|| ExecutionError::NoSession(routed.tool.name.into()))?;
                self.execute_local(routed, session_id)
            }
        }
    }

    fn execute_local(&self, routed: &RoutedCall, session_id: &str) -> Result<Value, ExecutionError> {
        match (routed.tool.name, routed.method) {
            ("report", Some("generate")) => {
                Ok(generate_session_report(&self.store, session_id)?.to_value())
            }
            _ => Err(ExecutionError::NoLocalHandler(routed.worker_method.clone())),
        }
    }
}

#[cfg(test)]
mod tests;
