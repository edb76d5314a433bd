//! Extracts embedded payloads from tool results into session artifact files.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use physics_core::write_bytes_atomic;
use physics_session::{SessionStore, SessionStoreError};
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadEncoding {
    Base64Png,
    Text,
    Svg,
}

/// Key under which results carry artifacts, either as descriptors or as a
/// worker-side map of payloads and file paths.
pub const ARTIFACTS_KEY: &str = "artifacts";
/// Descriptor key used inside a worker-side `artifacts` map.
pub const PERSISTED_KEY: &str = "persisted";

struct PayloadField {
    name: &'static str,
    encoding: PayloadEncoding,
    kind: &'static str,
    extension: &'static str,
}

const PAYLOAD_FIELDS: &[PayloadField] = &[
    PayloadField {
        name: "image_png_b64",
        encoding: PayloadEncoding::Base64Png,
        kind: "image",
        extension: "png",
    },
    PayloadField {
        name: "png_b64",
        encoding: PayloadEncoding::Base64Png,
        kind: "image",
        extension: "png",
    },
    PayloadField {
        name: "csv_data",
        encoding: PayloadEncoding::Text,
        kind: "csv",
        extension: "csv",
    },
    PayloadField {
        name: "svg",
        encoding: PayloadEncoding::Svg,
        kind: "svg",
        extension: "svg",
    },
];

/// Result type used by artifact extraction.
pub type ArtifactResult<T> = Result<T, ArtifactError>;

/// Reasons a single payload could not be persisted.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("field '{0}' is not a string")]
    NotAString(&'static str),
    #[error("field '{0}' is empty")]
    EmptyPayload(&'static str),
    #[error("field '{field}' is not valid base64: {source}")]
    Base64 {
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },
    #[error("field '{0}' does not decode to a PNG image")]
    NotPng(&'static str),
    #[error("field '{0}' does not contain an <svg> element")]
    NotSvg(&'static str),
    #[error("failed to write artifact {path}: {message}")]
    Write { path: String, message: String },
    #[error(transparent)]
    Store(#[from] SessionStoreError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactPersisterConfig {
    /// Replace persisted inline payloads with a short file reference.
    pub strip_inline_payloads: bool,
}

/// Descriptor appended to a result's `artifacts` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistedArtifact {
    pub kind: String,
    pub path: PathBuf,
}

/// Writes recognized payload fields to disk and registers them with the store.
#[derive(Debug, Clone)]
pub struct ArtifactPersister {
    store: SessionStore,
    config: ArtifactPersisterConfig,
}

impl ArtifactPersister {
    pub fn new(store: SessionStore, config: ArtifactPersisterConfig) -> Self {
        Self { store, config }
    }

    /// Persists every recognized payload in `result`, including the ones a
    /// worker nests under an `artifacts` object, and returns the augmented
    /// result. Individual failures are logged and skipped.
    pub fn persist(&self, session_id: &str, tool_name: &str, result: Value) -> Value {
        let Value::Object(mut object) = result else {
            return result;
        };

        let session_dir = match self.store.session_dir(session_id) {
            Ok(dir) => dir,
            Err(error) => {
                tracing::warn!(session_id, tool_name, %error, "skipping artifact extraction");
                return Value::Object(object);
            }
        };
        let target = ArtifactTarget {
            session_dir: &session_dir,
            session_id,
            tool_name,
        };

        let mut persisted = self.persist_fields(&target, None, &mut object);
        if let Some(Value::Object(nested)) = object.get_mut(ARTIFACTS_KEY) {
            persisted.extend(self.persist_fields(&target, Some(ARTIFACTS_KEY), nested));
        }

        if !persisted.is_empty() {
            append_descriptors(&mut object, &persisted);
        }
        Value::Object(object)
    }

    fn persist_fields(
        &self,
        target: &ArtifactTarget<'_>,
        scope: Option<&str>,
        object: &mut Map<String, Value>,
    ) -> Vec<PersistedArtifact> {
        let mut persisted = Vec::new();
        for payload_field in PAYLOAD_FIELDS {
            let Some(payload) = object.get(payload_field.name) else {
                continue;
            };
            let location = match scope {
                Some(scope) => format!("{scope}.{}", payload_field.name),
                None => payload_field.name.to_string(),
            };
            match self.persist_one(target, payload_field, &location, payload) {
                Ok(artifact) => {
                    tracing::info!(
                        session_id = target.session_id,
                        tool_name = target.tool_name,
                        field = %location,
                        path = %artifact.path.display(),
                        "persisted artifact"
                    );
                    if self.config.strip_inline_payloads {
                        object.insert(
                            payload_field.name.to_string(),
                            Value::String(format!("[saved to {}]", artifact.path.display())),
                        );
                    }
                    persisted.push(artifact);
                }
                Err(error) => {
                    tracing::warn!(
                        session_id = target.session_id,
                        tool_name = target.tool_name,
                        field = %location,
                        %error,
                        "skipping artifact"
                    );
                }
            }
        }
        persisted
    }

    fn persist_one(
        &self,
        target: &ArtifactTarget<'_>,
        payload_field: &PayloadField,
        location: &str,
        payload: &Value,
    ) -> ArtifactResult<PersistedArtifact> {
        let bytes = decode_payload(payload_field.name, payload_field.encoding, payload)?;
        let path = target
            .session_dir
            .join(artifact_file_name(target.tool_name, payload_field.extension));
        write_bytes_atomic(&path, &bytes).map_err(|error| ArtifactError::Write {
            path: path.display().to_string(),
            message: format!("{error:#}"),
        })?;

        let metadata = json!({
            "field": location,
            "bytes": bytes.len(),
            "tool": target.tool_name,
        });
        if let Err(error) =
            self.store
                .record_artifact(target.session_id, payload_field.kind, &path, &metadata)
        {
            if let Err(remove_error) = std::fs::remove_file(&path) {
                tracing::debug!(path = %path.display(), %remove_error, "failed to remove orphaned artifact");
            }
            return Err(error.into());
        }

        Ok(PersistedArtifact {
            kind: payload_field.kind.to_string(),
            path,
        })
    }
}

struct ArtifactTarget<'a> {
    session_dir: &'a Path,
    session_id: &'a str,
    tool_name: &'a str,
}

fn decode_payload(
    field: &'static str,
    encoding: PayloadEncoding,
    payload: &Value,
) -> ArtifactResult<Vec<u8>> {
    let text = payload.as_str().ok_or(ArtifactError::NotAString(field))?;
    if text.trim().is_empty() {
        return Err(ArtifactError::EmptyPayload(field));
    }
    match encoding {
        PayloadEncoding::Base64Png => {
            let encoded = strip_data_url_prefix(text)
                .chars()
                .filter(|ch| !ch.is_ascii_whitespace())
                .collect::<String>();
            let bytes = BASE64
                .decode(encoded.as_bytes())
                .map_err(|source| ArtifactError::Base64 { field, source })?;
            if !bytes.starts_with(PNG_MAGIC) {
                return Err(ArtifactError::NotPng(field));
            }
            Ok(bytes)
        }
        PayloadEncoding::Svg => {
            if !text.contains("<svg") {
                return Err(ArtifactError::NotSvg(field));
            }
            Ok(text.as_bytes().to_vec())
        }
        PayloadEncoding::Text => Ok(text.as_bytes().to_vec()),
    }
}

fn strip_data_url_prefix(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.starts_with("data:") {
        if let Some((_, data)) = trimmed.split_once(',') {
            return data;
        }
    }
    trimmed
}

fn artifact_file_name(tool_name: &str, extension: &str) -> String {
    let stem = tool_name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect::<String>();
    let stem = if stem.is_empty() { "tool".to_string() } else { stem };
    format!("{stem}-{}.{extension}", uuid::Uuid::new_v4().simple())
}

// A worker-side `artifacts` map keeps its own entries and gains a
// `persisted` list; otherwise descriptors live in a top-level array.
fn append_descriptors(object: &mut Map<String, Value>, persisted: &[PersistedArtifact]) {
    let descriptors = persisted
        .iter()
        .map(|artifact| {
            json!({
                "kind": artifact.kind,
                "path": artifact.path.display().to_string(),
            })
        })
        .collect::<Vec<_>>();
    match object.get_mut(ARTIFACTS_KEY) {
        None => {
            object.insert(ARTIFACTS_KEY.to_string(), Value::Array(descriptors));
        }
        Some(Value::Array(existing)) => existing.extend(descriptors),
        Some(Value::Object(worker_map)) => match worker_map.get_mut(PERSISTED_KEY) {
            Some(Value::Array(existing)) => existing.extend(descriptors),
            Some(_) => {
                tracing::warn!("worker artifacts map has a non-list 'persisted' entry; leaving it");
                object.insert(
                    format!("{PERSISTED_KEY}_{ARTIFACTS_KEY}"),
                    Value::Array(descriptors),
                );
            }
            None => {
                worker_map.insert(PERSISTED_KEY.to_string(), Value::Array(descriptors));
            }
        },
        Some(_) => {
            object.insert(
                format!("{PERSISTED_KEY}_{ARTIFACTS_KEY}"),
                Value::Array(descriptors),
            );
        }
    }
}
