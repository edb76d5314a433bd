#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use physics_artifacts::{ArtifactPersister, ArtifactPersisterConfig};
use physics_router::{
    CapabilityRegistry, DispatcherConfig, ToolCall, ToolDispatcher, ToolRouter,
};
use physics_server::McpServer;
use physics_session::SessionStore;
use physics_worker::{WorkerClient, WorkerClientConfig, WorkerCommand};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, BufReader};

const PNG_MAGIC_B64: &str = "iVBORw0KGgo=";

struct Harness {
    _temp: TempDir,
    request_log: PathBuf,
    dispatcher: Arc<ToolDispatcher>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(WorkerClientConfig {
            call_timeout: Some(Duration::from_secs(10)),
            restart_on_demand: true,
            log_payloads: false,
        })
    }

    fn with_config(config: WorkerClientConfig) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let request_log = temp.path().join("requests.log");
        let crash_marker = temp.path().join("crashed");
        let script = write_worker_script(temp.path(), &request_log, &crash_marker);
        let worker = WorkerClient::new(Arc::new(WorkerCommand::new("sh").arg(script)), config);

        let store = SessionStore::open_in(temp.path().join("state")).expect("store");
        let artifacts = ArtifactPersister::new(store.clone(), ArtifactPersisterConfig::default());
        let dispatcher = ToolDispatcher::new(
            ToolRouter::new(CapabilityRegistry::default()),
            Arc::new(worker),
            store,
            artifacts,
            DispatcherConfig {
                default_session_id: Some("e2e".to_string()),
            },
        )
        .expect("dispatcher");
        Self {
            _temp: temp,
            request_log,
            dispatcher: Arc::new(dispatcher),
        }
    }

    fn worker_requests(&self) -> Vec<Value> {
        std::fs::read_to_string(&self.request_log)
            .unwrap_or_default()
            .lines()
            .map(|line| serde_json::from_str(line).expect("logged request json"))
            .collect()
    }

    fn events(&self) -> Vec<physics_session::EventRecord> {
        self.dispatcher
            .store()
            .get_session_events("e2e")
            .expect("events")
    }
}

fn write_worker_script(dir: &Path, request_log: &Path, crash_marker: &Path) -> String {
    let script = dir.join("worker.sh");
    let body = format!(
        r#"#!/bin/sh
log="{log}"
marker="{marker}"
while IFS= read -r line; do
  printf '%s\n' "$line" >> "$log"
  id=$(printf '%s' "$line" | sed -n 's/^{{"id":"\([^"]*\)".*/\1/p')
  case "$line" in
    *'"method":"cas_evaluate"'*)
      printf '{{"id":"%s","result":14}}\n' "$id" ;;
    *'"method":"plot_function_2d"'*)
      printf '{{"id":"%s","result":{{"image_png_b64":"{png}","title":"f"}}}}\n' "$id" ;;
    *'"method":"accel_caps"'*)
      if [ ! -f "$marker" ]; then
        : > "$marker"
        exit 9
      fi
      printf '{{"id":"%s","result":{{"device":"cpu"}}}}\n' "$id" ;;
    *)
      printf '{{"id":"%s","error":{{"code":-32603,"message":"Unknown method"}}}}\n' "$id" ;;
  esac
done
"#,
        log = request_log.display(),
        marker = crash_marker.display(),
        png = PNG_MAGIC_B64,
    );
    std::fs::write(&script, body).expect("write worker script");
    script.display().to_string()
}

fn envelope_payload(envelope: &physics_router::ToolResultEnvelope) -> Value {
    serde_json::from_str(&envelope.content[0].text).expect("envelope json")
}

#[tokio::test]
async fn integration_cas_evaluate_reaches_worker_once_and_records_event() {
    let harness = Harness::new();
    let envelope = harness
        .dispatcher
        .handle(ToolCall::new(
            "cas",
            json!({"action": "evaluate", "expr": "2 + 3 * 4"}),
        ))
        .await;

    assert!(!envelope.is_error);
    assert_eq!(envelope_payload(&envelope), json!(14));

    let requests = harness.worker_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["method"], "cas_evaluate");
    assert_eq!(requests[0]["params"]["expr"], "2 + 3 * 4");

    let events = harness.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].tool_name, "cas");
    assert_eq!(events[0].output, json!(14));
    harness.dispatcher.shutdown().await;
}

#[tokio::test]
async fn integration_unknown_tool_sends_nothing_and_records_nothing() {
    let harness = Harness::new();
    let envelope = harness
        .dispatcher
        .handle(ToolCall::new("frobnicate", json!({"action": "evaluate"})))
        .await;

    assert!(envelope.is_error);
    assert!(harness.worker_requests().is_empty());
    assert!(harness.events().is_empty());
    harness.dispatcher.shutdown().await;
}

#[tokio::test]
async fn integration_plot_png_lands_in_session_directory() {
    let harness = Harness::new();
    let envelope = harness
        .dispatcher
        .handle(ToolCall::new("plot_function_2d", json!({"f": "sin(x)"})))
        .await;

    assert!(!envelope.is_error);
    let payload = envelope_payload(&envelope);
    let path = PathBuf::from(payload["artifacts"][0]["path"].as_str().expect("path"));
    assert_eq!(
        std::fs::read(&path).expect("artifact bytes"),
        b"\x89PNG\r\n\x1a\n".to_vec()
    );
    let session_dir = harness.dispatcher.store().session_dir("e2e").expect("dir");
    assert!(path.starts_with(&session_dir));

    let artifacts = harness
        .dispatcher
        .store()
        .get_session_artifacts("e2e")
        .expect("artifacts");
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].path, path);
    assert_eq!(harness.worker_requests()[0]["params"]["plot_type"], "function_2d");
    harness.dispatcher.shutdown().await;
}

#[tokio::test]
async fn integration_worker_crash_fails_call_then_next_call_respawns() {
    let harness = Harness::new();
    let crashed = harness
        .dispatcher
        .handle(ToolCall::new("accel_caps", json!({})))
        .await;
    assert!(crashed.is_error);
    assert!(crashed.content[0].text.contains("exited with status 9"));

    let recovered = harness
        .dispatcher
        .handle(ToolCall::new("accel_caps", json!({})))
        .await;
    assert!(!recovered.is_error);
    assert_eq!(envelope_payload(&recovered), json!({"device": "cpu"}));

    let events = harness.events();
    assert_eq!(events.len(), 2);
    assert!(events[0].output.get("error").is_some());
    harness.dispatcher.shutdown().await;
}

#[tokio::test]
async fn integration_worker_error_surfaces_as_error_envelope() {
    let harness = Harness::new();
    let envelope = harness
        .dispatcher
        .handle(ToolCall::new("statmech_partition", json!({"levels": [0, 1]})))
        .await;
    assert!(envelope.is_error);
    assert_eq!(
        envelope_payload(&envelope),
        json!({"error": "worker error: Unknown method"})
    );
    harness.dispatcher.shutdown().await;
}

#[tokio::test]
async fn integration_mcp_frames_drive_the_full_stack() {
    let harness = Harness::new();
    let server = McpServer::new(harness.dispatcher.clone());
    let frames = [
        json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
        json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call",
               "params": {"name": "cas", "arguments": {"action": "cas_evaluate", "expr": "2 + 3 * 4"}}}),
        json!({"jsonrpc": "2.0", "id": 3, "method": "tools/call",
               "params": {"name": "cas", "arguments": {"action": "undefined"}}}),
    ];
    let input = frames
        .iter()
        .map(|frame| format!("{frame}\n"))
        .collect::<String>();

    let (writer, mut reader) = tokio::io::duplex(1 << 20);
    let report = server
        .serve(BufReader::new(input.as_bytes()), writer)
        .await
        .expect("serve");
    assert_eq!(report.processed_frames, 3);

    let mut output = String::new();
    reader.read_to_string(&mut output).await.expect("output");
    let responses = output
        .lines()
        .map(|line| serde_json::from_str::<Value>(line).expect("frame"))
        .collect::<Vec<_>>();
    let by_id = |id: i64| {
        responses
            .iter()
            .find(|response| response["id"] == id)
            .expect("response")
    };
    assert_eq!(by_id(1)["result"]["serverInfo"]["name"], "physics-mcp");
    assert!(by_id(2)["result"].get("isError").is_none());
    assert!(by_id(2)["result"]["content"][0]["text"]
        .as_str()
        .expect("text")
        .contains("14"));
    assert_eq!(by_id(3)["result"]["isError"], true);
    assert_eq!(harness.worker_requests().len(), 1);
}
