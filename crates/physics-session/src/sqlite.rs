//! SQLite-backed session store.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use physics_core::utc_now;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::{
    validate_session_id, ArtifactRecord, EventRecord, SessionRecord, SessionResult,
    SessionStoreError,
};

const DATABASE_FILE_NAME: &str = "sessions.db";
const ARTIFACTS_DIR_NAME: &str = "artifacts";

/// Persistent store for sessions, events, and artifact rows.
///
/// A fresh connection is opened per operation; SQLite serializes writers and
/// the busy timeout absorbs short lock contention between concurrent calls.
#[derive(Debug, Clone)]
pub struct SessionStore {
    db_path: PathBuf,
    artifacts_root: PathBuf,
}

impl SessionStore {
    /// Creates a store at `db_path`, creating parent directories and schema if needed.
    pub fn new(db_path: impl AsRef<Path>, artifacts_root: impl AsRef<Path>) -> SessionResult<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let artifacts_root = artifacts_root.as_ref().to_path_buf();
        std::fs::create_dir_all(&artifacts_root)?;

        let store = Self {
            db_path,
            artifacts_root,
        };
        let connection = store.open_connection()?;
        initialize_schema(&connection)?;
        Ok(store)
    }

    /// Lays the database and artifact tree out under one state directory.
    pub fn open_in(state_dir: impl AsRef<Path>) -> SessionResult<Self> {
        let state_dir = state_dir.as_ref();
        Self::new(
            state_dir.join(DATABASE_FILE_NAME),
            state_dir.join(ARTIFACTS_DIR_NAME),
        )
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn artifacts_root(&self) -> &Path {
        &self.artifacts_root
    }

    /// Directory holding one session's artifact files. Not created here.
    pub fn session_dir(&self, session_id: &str) -> SessionResult<PathBuf> {
        validate_session_id(session_id)?;
        Ok(self.artifacts_root.join(session_id))
    }

    /// Returns `session_id`, inserting the row if absent, or a new UUID v4 session.
    pub fn ensure_session(&self, session_id: Option<&str>) -> SessionResult<String> {
        let id = match session_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => {
                validate_session_id(id)?;
                id.to_string()
            }
            None => uuid::Uuid::new_v4().to_string(),
        };
        let connection = self.open_connection()?;
        let inserted = connection.execute(
            "INSERT OR IGNORE INTO sessions (id, created_at) VALUES (?1, ?2)",
            params![id, timestamp_to_db(utc_now())],
        )?;
        if inserted > 0 {
            tracing::info!(session_id = %id, "created session");
        }
        Ok(id)
    }

    pub fn get_session(&self, session_id: &str) -> SessionResult<Option<SessionRecord>> {
        let connection = self.open_connection()?;
        let row = connection
            .query_row(
                "SELECT id, created_at FROM sessions WHERE id = ?1",
                params![session_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        row.map(|(id, created_at)| {
            Ok(SessionRecord {
                id,
                created_at: timestamp_from_db(&created_at)?,
            })
        })
        .transpose()
    }

    /// Appends one immutable event row and returns its id.
    pub fn record_event(
        &self,
        session_id: &str,
        tool_name: &str,
        input: &Value,
        output: &Value,
    ) -> SessionResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let connection = self.open_connection()?;
        connection
            .execute(
                r#"
                INSERT INTO events (id, session_id, ts, tool_name, input_json, output_json)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    id,
                    session_id,
                    timestamp_to_db(utc_now()),
                    tool_name,
                    serde_json::to_string(input)?,
                    serde_json::to_string(output)?,
                ],
            )
            .map_err(|error| map_foreign_key_error(error, session_id))?;
        tracing::debug!(session_id, event_id = %id, tool_name, "recorded event");
        Ok(id)
    }

    /// Registers a file owned by the session and returns the artifact id.
    pub fn record_artifact(
        &self,
        session_id: &str,
        kind: &str,
        path: &Path,
        metadata: &Value,
    ) -> SessionResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let connection = self.open_connection()?;
        connection
            .execute(
                r#"
                INSERT INTO artifacts (id, session_id, ts, kind, path, meta_json)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    id,
                    session_id,
                    timestamp_to_db(utc_now()),
                    kind,
                    path.to_string_lossy(),
                    serde_json::to_string(metadata)?,
                ],
            )
            .map_err(|error| map_foreign_key_error(error, session_id))?;
        tracing::debug!(session_id, artifact_id = %id, kind, "recorded artifact");
        Ok(id)
    }

    /// Events oldest first; insertion order breaks timestamp ties.
    pub fn get_session_events(&self, session_id: &str) -> SessionResult<Vec<EventRecord>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(
            r#"
            SELECT id, session_id, ts, tool_name, input_json, output_json
            FROM events
            WHERE session_id = ?1
            ORDER BY ts ASC, rowid ASC
            "#,
        )?;
        let rows = statement.query_map(params![session_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, session_id, ts, tool_name, input_json, output_json) = row?;
            events.push(EventRecord {
                id,
                session_id,
                timestamp: timestamp_from_db(&ts)?,
                tool_name,
                input: serde_json::from_str(&input_json)?,
                output: serde_json::from_str(&output_json)?,
            });
        }
        Ok(events)
    }

    /// Artifacts most recent first.
    pub fn get_session_artifacts(&self, session_id: &str) -> SessionResult<Vec<ArtifactRecord>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(
            r#"
            SELECT id, session_id, ts, kind, path, meta_json
            FROM artifacts
            WHERE session_id = ?1
            ORDER BY ts DESC, rowid DESC
            "#,
        )?;
        let rows = statement.query_map(params![session_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut artifacts = Vec::new();
        for row in rows {
            let (id, session_id, ts, kind, path, meta_json) = row?;
            artifacts.push(ArtifactRecord {
                id,
                session_id,
                timestamp: timestamp_from_db(&ts)?,
                kind,
                path: PathBuf::from(path),
                metadata: serde_json::from_str(&meta_json)?,
            });
        }
        Ok(artifacts)
    }

    fn open_connection(&self) -> SessionResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;
        Ok(connection)
    }
}

fn initialize_schema(connection: &Connection) -> SessionResult<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            ts TEXT NOT NULL,
            tool_name TEXT NOT NULL,
            input_json TEXT NOT NULL,
            output_json TEXT NOT NULL,
            FOREIGN KEY(session_id) REFERENCES sessions(id)
        );

        CREATE INDEX IF NOT EXISTS idx_events_session_ts ON events (session_id, ts);

        CREATE TABLE IF NOT EXISTS artifacts (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            ts TEXT NOT NULL,
            kind TEXT NOT NULL,
            path TEXT NOT NULL,
            meta_json TEXT NOT NULL,
            FOREIGN KEY(session_id) REFERENCES sessions(id)
        );

        CREATE INDEX IF NOT EXISTS idx_artifacts_session_ts ON artifacts (session_id, ts);
        "#,
    )?;
    Ok(())
}

fn map_foreign_key_error(error: rusqlite::Error, session_id: &str) -> SessionStoreError {
    match &error {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
        {
            SessionStoreError::SessionNotFound(session_id.to_string())
        }
        _ => SessionStoreError::Sqlite(error),
    }
}

// Fixed-width fractional seconds keep lexical order equal to time order.
fn timestamp_to_db(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn timestamp_from_db(value: &str) -> SessionResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}
