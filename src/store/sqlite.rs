//! SQLite-backed store.
//!
//! Raw SQL with rusqlite, no ORM. Sessions are stored as a JSON body next
//! to the columns needed for ordering and the optimistic version check.
//! The layout version lives in `PRAGMA user_version`.

use anyhow::{anyhow, Context};
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::{StateStore, SCHEMA_VERSION};
use crate::error::{OrchestratorError, Result};
use crate::session::ApprovalSession;

pub struct SqliteStateStore {
    conn: Mutex<Connection>,
}

impl SqliteStateStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(db_path).context("Failed to open database connection")?;
        prepare_schema(&conn, Some(db_path))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        prepare_schema(&conn, None)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("State database connection lock poisoned").into())
    }
}

/// Check the stored layout version and create tables as needed.
fn prepare_schema(conn: &Connection, db_path: Option<&Path>) -> Result<()> {
    let found: u32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .context("Failed to read schema version")?;

    if found > SCHEMA_VERSION {
        return Err(OrchestratorError::SchemaVersionMismatch {
            record: "state database",
            found,
            supported: SCHEMA_VERSION,
        });
    }

    if found < SCHEMA_VERSION && has_tables(conn)? {
        if let Some(path) = db_path {
            let backup = backup_path(path, found);
            std::fs::copy(path, &backup)
                .with_context(|| format!("Failed to back up {:?}", path))?;
            warn!(
                "State database {:?} has schema version {} (expected {}); copied to {:?} and starting empty",
                path, found, SCHEMA_VERSION, backup
            );
        } else {
            warn!(
                "State database has schema version {} (expected {}); starting empty",
                found, SCHEMA_VERSION
            );
        }
        conn.execute_batch(
            "DROP TABLE IF EXISTS sessions;
             DROP TABLE IF EXISTS processed_meetings;",
        )
        .context("Failed to reset state tables")?;
    }

    migrate(conn)?;
    Ok(())
}

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS processed_meetings (
            meeting_id TEXT PRIMARY KEY,
            processed_at TEXT NOT NULL
        )",
        [],
    )
    .context("Failed to create processed_meetings table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions (
            session_id TEXT PRIMARY KEY,
            meeting_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 0,
            body TEXT NOT NULL
        )",
        [],
    )
    .context("Failed to create sessions table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_created_at ON sessions(created_at)",
        [],
    )
    .context("Failed to create index on created_at")?;

    conn.execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
        .context("Failed to record schema version")?;

    Ok(())
}

fn has_tables(conn: &Connection) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('sessions', 'processed_meetings')",
            [],
            |row| row.get(0),
        )
        .context("Failed to inspect state tables")?;
    Ok(count > 0)
}

fn backup_path(path: &Path, found: u32) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("state.db");
    let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
    path.with_file_name(format!("{}.v{}-{}.bak", name, found, timestamp))
}

fn decode_session(body: &str, version: i64) -> Result<ApprovalSession> {
    let mut session: ApprovalSession =
        serde_json::from_str(body).context("Failed to decode stored session")?;
    session.version = version as u64;
    Ok(session)
}

impl StateStore for SqliteStateStore {
    fn is_processed(&self, meeting_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM processed_meetings WHERE meeting_id = ?1",
                params![meeting_id],
                |_| Ok(()),
            )
            .optional()
            .context("Failed to query processed meetings")?;
        Ok(found.is_some())
    }

    fn mark_processed(&self, meeting_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO processed_meetings (meeting_id, processed_at) VALUES (?1, ?2)",
                params![meeting_id, Utc::now().to_rfc3339()],
            )
            .context("Failed to record processed meeting")?;
        if inserted == 1 {
            debug!("Recorded meeting {} as processed", meeting_id);
        }
        Ok(inserted == 1)
    }

    fn processed_meetings(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT meeting_id FROM processed_meetings ORDER BY meeting_id")
            .context("Failed to prepare processed meetings query")?;
        let ids = stmt
            .query_map([], |row| row.get(0))
            .context("Failed to query processed meetings")?
            .collect::<std::result::Result<Vec<String>, _>>()
            .context("Failed to map processed meetings")?;
        Ok(ids)
    }

    fn insert_session(&self, session: &ApprovalSession) -> Result<()> {
        let body = serde_json::to_string(session).context("Failed to serialize session")?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sessions (session_id, meeting_id, created_at, version, body) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.session_id,
                session.meeting_id,
                session.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                session.version as i64,
                body,
            ],
        )
        .with_context(|| format!("Failed to insert session {}", session.session_id))?;
        Ok(())
    }

    fn load_session(&self, session_id: &str) -> Result<Option<ApprovalSession>> {
        let conn = self.conn()?;
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT body, version FROM sessions WHERE session_id = ?1",
                params![session_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("Failed to query session")?;

        row.map(|(body, version)| decode_session(&body, version))
            .transpose()
    }

    fn save_session(&self, session: &mut ApprovalSession) -> Result<()> {
        let mut updated = session.clone();
        updated.version += 1;
        let body = serde_json::to_string(&updated).context("Failed to serialize session")?;

        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE sessions SET body = ?1, version = ?2 WHERE session_id = ?3 AND version = ?4",
                params![
                    body,
                    updated.version as i64,
                    session.session_id,
                    session.version as i64,
                ],
            )
            .context("Failed to update session")?;

        if changed == 0 {
            let stored: Option<i64> = conn
                .query_row(
                    "SELECT version FROM sessions WHERE session_id = ?1",
                    params![session.session_id],
                    |row| row.get(0),
                )
                .optional()
                .context("Failed to query session version")?;

            return Err(match stored {
                Some(found) => OrchestratorError::StaleVersion {
                    session_id: session.session_id.clone(),
                    expected: session.version,
                    found: found as u64,
                },
                None => OrchestratorError::SessionNotFound(session.session_id.clone()),
            });
        }

        session.version = updated.version;
        Ok(())
    }

    fn list_sessions(&self) -> Result<Vec<ApprovalSession>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT body, version FROM sessions ORDER BY created_at ASC, session_id ASC")
            .context("Failed to prepare sessions query")?;

        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .context("Failed to list sessions")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to map sessions")?;

        rows.iter()
            .map(|(body, version)| decode_session(body, *version))
            .collect()
    }
}
