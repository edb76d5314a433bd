use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use physics_artifacts::{ArtifactPersister, ArtifactPersisterConfig};
use physics_session::SessionStore;
use physics_worker::{TerminationCause, WorkerError, WorkerResult, WorkerRpc};
use serde_json::{json, Value};
use tempfile::TempDir;

use super::{DispatcherConfig, ToolCall, ToolDispatcher, ToolResultEnvelope};
use crate::capabilities::CapabilityRegistry;
use crate::route::ToolRouter;

#[derive(Default)]
struct StubWorker {
    replies: Mutex<HashMap<String, WorkerResult<Value>>>,
    calls: Mutex<Vec<(String, Value)>>,
    shutdowns: Mutex<usize>,
}

impl StubWorker {
    fn reply(self, method: &str, outcome: WorkerResult<Value>) -> Self {
        self.replies
            .lock()
            .expect("replies lock")
            .insert(method.to_string(), outcome);
        self
    }

    fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl WorkerRpc for StubWorker {
    async fn call(&self, method: &str, params: Value) -> WorkerResult<Value> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((method.to_string(), params));
        self.replies
            .lock()
            .expect("replies lock")
            .get(method)
            .cloned()
            .unwrap_or_else(|| Ok(Value::Null))
    }

    async fn shutdown(&self) {
        *self.shutdowns.lock().expect("shutdown lock") += 1;
    }
}

fn dispatcher_with(
    temp: &TempDir,
    worker: Arc<StubWorker>,
    registry: CapabilityRegistry,
) -> ToolDispatcher {
    let store = SessionStore::open_in(temp.path()).expect("store");
    let artifacts = ArtifactPersister::new(store.clone(), ArtifactPersisterConfig::default());
    ToolDispatcher::new(
        ToolRouter::new(registry),
        worker,
        store,
        artifacts,
        DispatcherConfig {
            default_session_id: Some("default".to_string()),
        },
    )
    .expect("dispatcher")
}

fn envelope_json(envelope: &ToolResultEnvelope) -> Value {
    serde_json::from_str(&envelope.content[0].text).expect("envelope text is json")
}

#[tokio::test]
async fn integration_cas_evaluate_returns_result_and_records_event() {
    let temp = tempfile::tempdir().expect("tempdir");
    let worker = Arc::new(StubWorker::default().reply("cas_evaluate", Ok(json!(14))));
    let dispatcher = dispatcher_with(&temp, worker.clone(), CapabilityRegistry::default());

    let envelope = dispatcher
        .handle(ToolCall::new(
            "cas",
            json!({"action": "evaluate", "expr": "2 + 3 * 4"}),
        ))
        .await;

    assert!(!envelope.is_error);
    assert_eq!(envelope_json(&envelope), json!(14));
    assert_eq!(
        worker.calls(),
        vec![(
            "cas_evaluate".to_string(),
            json!({"action": "evaluate", "expr": "2 + 3 * 4"})
        )]
    );

    let events = dispatcher
        .store()
        .get_session_events("default")
        .expect("events");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].tool_name, "cas");
    assert_eq!(events[0].output, json!(14));
    assert_eq!(events[0].input["expr"], "2 + 3 * 4");
}

#[tokio::test]
async fn regression_unknown_tool_never_reaches_worker_or_store() {
    let temp = tempfile::tempdir().expect("tempdir");
    let worker = Arc::new(StubWorker::default());
    let dispatcher = dispatcher_with(&temp, worker.clone(), CapabilityRegistry::default());

    let envelope = dispatcher
        .handle(ToolCall::new("frobnicate", json!({"x": 1})))
        .await;

    assert!(envelope.is_error);
    assert!(envelope.content[0].text.contains("unknown tool 'frobnicate'"));
    assert!(worker.calls().is_empty());
    assert!(dispatcher
        .store()
        .get_session_events("default")
        .expect("events")
        .is_empty());
}

#[tokio::test]
async fn regression_placeholder_discriminator_makes_zero_worker_calls() {
    let temp = tempfile::tempdir().expect("tempdir");
    let worker = Arc::new(StubWorker::default());
    let dispatcher = dispatcher_with(&temp, worker.clone(), CapabilityRegistry::default());

    for arguments in [
        json!({"action": "undefined"}),
        json!({"action": ""}),
        json!({}),
    ] {
        let envelope = dispatcher.handle(ToolCall::new("cas", arguments)).await;
        assert!(envelope.is_error);
    }
    assert!(worker.calls().is_empty());
}

#[tokio::test]
async fn functional_worker_error_is_recorded_as_error_event() {
    let temp = tempfile::tempdir().expect("tempdir");
    let worker = Arc::new(StubWorker::default().reply(
        "quantum_solve",
        Err(WorkerError::Remote {
            message: "potential must be callable".to_string(),
            code: Some(-32603),
            data: None,
        }),
    ));
    let dispatcher = dispatcher_with(&temp, worker, CapabilityRegistry::default());

    let envelope = dispatcher
        .handle(ToolCall::new(
            "quantum",
            json!({"action": "solve", "session_id": "qm-1"}),
        ))
        .await;
    assert!(envelope.is_error);
    assert_eq!(
        envelope_json(&envelope),
        json!({"error": "worker error: potential must be callable"})
    );

    let events = dispatcher.store().get_session_events("qm-1").expect("events");
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].output,
        json!({"error": "worker error: potential must be callable"})
    );
}

#[tokio::test]
async fn functional_transport_failure_returns_error_envelope() {
    let temp = tempfile::tempdir().expect("tempdir");
    let worker = Arc::new(StubWorker::default().reply(
        "data_fft",
        Err(WorkerError::Terminated(TerminationCause::Exited { code: Some(1) })),
    ));
    let dispatcher = dispatcher_with(&temp, worker, CapabilityRegistry::default());
    let envelope = dispatcher
        .handle(ToolCall::new("data_fft", json!({"signal": [1, 2, 3]})))
        .await;
    assert!(envelope.is_error);
    assert!(envelope.content[0].text.contains("exited with status 1"));
}

#[tokio::test]
async fn integration_plot_payload_is_persisted_as_artifact() {
    use base64::Engine;

    let temp = tempfile::tempdir().expect("tempdir");
    let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
    png.extend_from_slice(b"fake-ihdr");
    let encoded = base64::engine::general_purpose::STANDARD.encode(&png);
    let worker = Arc::new(
        StubWorker::default().reply("plot_function_2d", Ok(json!({"image_png_b64": encoded}))),
    );
    let dispatcher = dispatcher_with(&temp, worker, CapabilityRegistry::default());

    let envelope = dispatcher
        .handle(ToolCall::new(
            "plot",
            json!({"plot_type": "function_2d", "f": "sin(x)"}),
        ))
        .await;
    assert!(!envelope.is_error);
    let result = envelope_json(&envelope);
    let path = result["artifacts"][0]["path"].as_str().expect("artifact path");
    assert_eq!(std::fs::read(path).expect("artifact bytes"), png);

    let events = dispatcher
        .store()
        .get_session_events("default")
        .expect("events");
    assert_eq!(events[0].output["artifacts"][0]["kind"], "image");
}

#[tokio::test]
async fn functional_report_generate_runs_locally() {
    let temp = tempfile::tempdir().expect("tempdir");
    let worker = Arc::new(StubWorker::default().reply("units_convert", Ok(json!({"value": 1000}))));
    let dispatcher = dispatcher_with(&temp, worker.clone(), CapabilityRegistry::default());

    dispatcher
        .handle(ToolCall::new("units_convert", json!({"value": 1, "from": "km", "to": "m"})))
        .await;
    let envelope = dispatcher
        .handle(ToolCall::new("report", json!({"action": "generate"})))
        .await;

    assert!(!envelope.is_error);
    let summary = envelope_json(&envelope);
    assert_eq!(summary["event_count"], 1);
    assert_eq!(summary["artifact_count"], 0);
    assert!(std::path::Path::new(summary["path"].as_str().expect("path")).exists());
    assert_eq!(worker.calls().len(), 1);

    let events = dispatcher
        .store()
        .get_session_events("default")
        .expect("events");
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].tool_name, "report");
}

#[tokio::test]
async fn regression_disabled_tool_and_invalid_session_are_rejected_early() {
    let temp = tempfile::tempdir().expect("tempdir");
    let worker = Arc::new(StubWorker::default());
    let dispatcher = dispatcher_with(
        &temp,
        worker.clone(),
        CapabilityRegistry::from_disabled(["api"]),
    );

    let disabled = dispatcher
        .handle(ToolCall::new("api", json!({"action": "arxiv"})))
        .await;
    assert!(disabled.is_error);

    let invalid = dispatcher
        .handle(ToolCall::new(
            "cas",
            json!({"action": "evaluate", "session_id": "../../etc"}),
        ))
        .await;
    assert!(invalid.is_error);
    assert!(worker.calls().is_empty());
    assert!(dispatcher
        .tool_descriptors()
        .iter()
        .all(|descriptor| descriptor["name"] != "api"));
}

#[tokio::test]
async fn unit_shutdown_delegates_to_worker() {
    let temp = tempfile::tempdir().expect("tempdir");
    let worker = Arc::new(StubWorker::default());
    let dispatcher = dispatcher_with(&temp, worker.clone(), CapabilityRegistry::default());
    dispatcher.shutdown().await;
    assert_eq!(*worker.shutdowns.lock().expect("shutdown lock"), 1);
}

#[test]
fn unit_envelope_serializes_mcp_shape() {
    let success = ToolResultEnvelope::success(&json!({"value": 14})).to_value();
    assert_eq!(success["content"][0]["type"], "text");
    assert!(success.get("isError").is_none());

    let failure = ToolResultEnvelope::error("boom").to_value();
    assert_eq!(failure["isError"], true);
}
