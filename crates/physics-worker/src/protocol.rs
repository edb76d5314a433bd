//! Newline-delimited JSON wire format spoken by the worker process.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WorkerError;

/// One request line written to the worker's stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub id: String,
    pub method: String,
    pub params: Value,
}

impl WorkerRequest {
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// Classified view of one message read from the worker's stdout.
#[derive(Debug, Clone)]
pub enum WorkerReply {
    Success { id: String, result: Value },
    Failure { id: String, error: WorkerError },
    /// Message without a usable correlation id.
    Uncorrelated,
}

/// Decodes one raw stdout line. Returns `None` for blank lines.
pub fn decode_worker_line(line: &str) -> Option<Result<Value, serde_json::Error>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(serde_json::from_str::<Value>(trimmed))
}

/// Splits a decoded message into a correlated success, failure, or noise.
pub fn classify_worker_message(message: Value) -> WorkerReply {
    let Value::Object(mut object) = message else {
        return WorkerReply::Uncorrelated;
    };
    let id = match object.get("id") {
        Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
        Some(Value::Number(number)) => number.to_string(),
        _ => return WorkerReply::Uncorrelated,
    };

    match object.remove("error") {
        Some(Value::Null) | None => {}
        Some(error) => {
            return WorkerReply::Failure {
                id,
                error: remote_error_from_payload(error),
            }
        }
    }

    let result = object.remove("result").unwrap_or(Value::Null);
    WorkerReply::Success { id, result }
}

fn remote_error_from_payload(payload: Value) -> WorkerError {
    match payload {
        Value::Object(mut object) => {
            let message = object
                .remove("message")
                .and_then(|value| match value {
                    Value::String(text) => Some(text),
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
                .filter(|text| !text.trim().is_empty())
                .unwrap_or_else(|| "worker returned an error without a message".to_string());
            let code = object.get("code").and_then(Value::as_i64);
            let data = object.remove("data").filter(|value| !value.is_null());
            WorkerError::Remote {
                message,
                code,
                data,
            }
        }
        Value::String(message) => WorkerError::Remote {
            message,
            code: None,
            data: None,
        },
        other => WorkerError::Remote {
            message: other.to_string(),
            code: None,
            data: None,
        },
    }
}
