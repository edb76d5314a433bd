//! Newline-delimited JSON-RPC 2.0 MCP server over async stdio.

use std::sync::Arc;

use anyhow::{Context, Result};
use physics_router::{ToolCall, ToolDispatcher};
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};

const MCP_JSONRPC_VERSION: &str = "2.0";
const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
const MCP_SERVER_NAME: &str = "physics-mcp";
const MCP_ERROR_PARSE: i64 = -32700;
const MCP_ERROR_INVALID_REQUEST: i64 = -32600;
const MCP_ERROR_METHOD_NOT_FOUND: i64 = -32601;
const MCP_ERROR_INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct McpServeReport {
    pub processed_frames: usize,
    pub error_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
struct McpJsonRpcRequest {
    /// `None` for notifications, which never get a response.
    id: Option<Value>,
    method: String,
    params: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
struct McpDispatchError {
    id: Value,
    code: i64,
    message: String,
}

impl McpDispatchError {
    fn new(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            code,
            message: message.into(),
        }
    }
}

pub struct McpServer {
    dispatcher: Arc<ToolDispatcher>,
}

impl McpServer {
    pub fn new(dispatcher: Arc<ToolDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Serves frames until `reader` hits EOF, then drains in-flight calls and
    /// shuts the worker down.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<McpServeReport>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel::<Value>();
        let writer_task = tokio::spawn(write_frames(writer, frames_rx));
        let mut in_flight = JoinSet::new();
        let mut report = McpServeReport::default();
        let mut lines = reader.lines();

        let read_outcome = loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break Ok(()),
                Err(error) => break Err(error),
            };
            reap_finished_calls(&mut in_flight);
            if line.trim().is_empty() {
                continue;
            }
            report.processed_frames = report.processed_frames.saturating_add(1);

            let request = match decode_frame(&line) {
                Ok(request) => request,
                Err(error) => {
                    report.error_count = report.error_count.saturating_add(1);
                    tracing::warn!(code = error.code, message = %error.message, "rejected mcp frame");
                    let _ = frames_tx.send(jsonrpc_error_frame(error.id, error.code, error.message));
                    continue;
                }
            };
            let Some(id) = request.id.clone() else {
                tracing::debug!(method = %request.method, "ignoring mcp notification");
                continue;
            };

            if request.method == "tools/call" {
                let call = match parse_tool_call(&request.params) {
                    Ok(call) => call,
                    Err(message) => {
                        report.error_count = report.error_count.saturating_add(1);
                        let _ = frames_tx.send(jsonrpc_error_frame(
                            id,
                            MCP_ERROR_INVALID_PARAMS,
                            message,
                        ));
                        continue;
                    }
                };
                let dispatcher = self.dispatcher.clone();
                let frames_tx = frames_tx.clone();
                in_flight.spawn(async move {
                    let envelope = dispatcher.handle(call).await;
                    let _ = frames_tx.send(jsonrpc_result_frame(id, envelope.to_value()));
                });
                continue;
            }

            let response = match self.dispatch_sync(&request.method) {
                Ok(result) => jsonrpc_result_frame(id, result),
                Err((code, message)) => {
                    report.error_count = report.error_count.saturating_add(1);
                    jsonrpc_error_frame(id, code, message)
                }
            };
            let _ = frames_tx.send(response);
        };

        while let Some(joined) = in_flight.join_next().await {
            log_call_task(joined);
        }
        self.dispatcher.shutdown().await;
        drop(frames_tx);
        writer_task
            .await
            .context("mcp writer task panicked")?
            .context("failed to write mcp response")?;
        read_outcome.context("failed to read mcp frame")?;
        Ok(report)
    }

    fn dispatch_sync(&self, method: &str) -> Result<Value, (i64, String)> {
        match method {
            "initialize" => Ok(handle_initialize()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.dispatcher.tool_descriptors() })),
            other => Err((
                MCP_ERROR_METHOD_NOT_FOUND,
                format!("unsupported method '{other}'"),
            )),
        }
    }
}

/// Drops tool-call tasks that already finished. Returns how many were reaped.
fn reap_finished_calls(in_flight: &mut JoinSet<()>) -> usize {
    let mut reaped = 0;
    while let Some(joined) = in_flight.try_join_next() {
        log_call_task(joined);
        reaped += 1;
    }
    reaped
}

fn log_call_task(joined: Result<(), JoinError>) {
    if let Err(error) = joined {
        tracing::error!(%error, "tool call task failed");
    }
}

async fn write_frames<W>(mut writer: W, mut frames: mpsc::UnboundedReceiver<Value>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        let mut encoded = serde_json::to_vec(&frame).context("failed to encode mcp frame")?;
        encoded.push(b'\n');
        writer
            .write_all(&encoded)
            .await
            .context("failed to write mcp frame")?;
        writer.flush().await.context("failed to flush mcp output")?;
    }
    Ok(())
}

fn decode_frame(line: &str) -> Result<McpJsonRpcRequest, McpDispatchError> {
    let value = serde_json::from_str::<Value>(line).map_err(|error| {
        McpDispatchError::new(
            Value::Null,
            MCP_ERROR_PARSE,
            format!("failed to parse mcp JSON frame: {error}"),
        )
    })?;
    parse_jsonrpc_request(&value)
}

fn parse_jsonrpc_request(value: &Value) -> Result<McpJsonRpcRequest, McpDispatchError> {
    let Some(object) = value.as_object() else {
        return Err(McpDispatchError::new(
            Value::Null,
            MCP_ERROR_INVALID_REQUEST,
            "jsonrpc request must be an object",
        ));
    };
    let id = object.get("id").cloned();
    let error_id = id.clone().unwrap_or(Value::Null);
    let jsonrpc = object
        .get("jsonrpc")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if jsonrpc != MCP_JSONRPC_VERSION {
        return Err(McpDispatchError::new(
            error_id,
            MCP_ERROR_INVALID_REQUEST,
            format!("jsonrpc must be '{MCP_JSONRPC_VERSION}'"),
        ));
    }
    let method = object
        .get("method")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            McpDispatchError::new(
                error_id.clone(),
                MCP_ERROR_INVALID_REQUEST,
                "jsonrpc request must include non-empty method",
            )
        })?;
    let params = match object.get("params") {
        Some(Value::Object(params)) => params.clone(),
        Some(Value::Null) | None => Map::new(),
        Some(_) => {
            return Err(McpDispatchError::new(
                error_id,
                MCP_ERROR_INVALID_PARAMS,
                "jsonrpc request params must be an object",
            ))
        }
    };
    Ok(McpJsonRpcRequest {
        id,
        method: method.to_string(),
        params,
    })
}

fn parse_tool_call(params: &Map<String, Value>) -> Result<ToolCall, String> {
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| "tools/call requires a non-empty 'name'".to_string())?;
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
    Ok(ToolCall::new(name, arguments))
}

fn handle_initialize() -> Value {
    json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "serverInfo": {
            "name": MCP_SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        },
        "capabilities": {
            "tools": {
                "listChanged": false
            }
        }
    })
}

fn jsonrpc_result_frame(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": MCP_JSONRPC_VERSION,
        "id": id,
        "result": result,
    })
}

fn jsonrpc_error_frame(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": MCP_JSONRPC_VERSION,
        "id": id,
        "error": {
            "code": code,
            "message": message.into(),
        }
    })
}
