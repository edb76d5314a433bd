//! Durable record of sessions, tool-call events, and persisted artifacts.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

mod sqlite;

pub use sqlite::SessionStore;

/// Result type used by the session store.
pub type SessionResult<T> = Result<T, SessionStoreError>;

/// Errors returned by [`SessionStore`].
#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("session '{0}' not found")]
    SessionNotFound(String),
    #[error("invalid session id '{0}': expected 1-128 ASCII letters, digits, '-' or '_'")]
    InvalidSessionId(String),
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Chrono(#[from] chrono::ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

/// One completed or failed tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub tool_name: String,
    pub input: Value,
    pub output: Value,
}

/// A file produced during a session and owned by the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub path: PathBuf,
    pub metadata: Value,
}

/// Accepts ids that are safe to use as a single path component.
pub fn validate_session_id(id: &str) -> SessionResult<()> {
    let valid = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
    if valid {
        Ok(())
    } else {
        Err(SessionStoreError::InvalidSessionId(id.to_string()))
    }
}
