//! Durable state store.
//!
//! Two independent record families live under one "state" namespace:
//! the set of processed meeting ids and the approval sessions. Both are
//! tagged with [`SCHEMA_VERSION`]. A stored layout older than this build is
//! backed up and reset with a warning; a newer one is refused.

pub mod json;
pub mod sqlite;

pub use json::JsonStateStore;
pub use sqlite::SqliteStateStore;

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::config::{StateBackend, StateConfig};
use crate::error::Result;
use crate::session::ApprovalSession;

/// Layout version of the persisted records.
pub const SCHEMA_VERSION: u32 = 1;

/// Persistence for processed meetings and approval sessions.
///
/// There is no multi-record transaction. `save_session` is the only
/// conditional write: it fails with `StaleVersion` when the stored session
/// changed since it was loaded.
pub trait StateStore: Send + Sync {
    fn is_processed(&self, meeting_id: &str) -> Result<bool>;

    /// Returns `true` when the id was not present before.
    fn mark_processed(&self, meeting_id: &str) -> Result<bool>;

    fn processed_meetings(&self) -> Result<Vec<String>>;

    /// Fails if a session with the same id already exists.
    fn insert_session(&self, session: &ApprovalSession) -> Result<()>;

    fn load_session(&self, session_id: &str) -> Result<Option<ApprovalSession>>;

    /// Writes the session if its `version` matches the stored one, then
    /// bumps `session.version`.
    fn save_session(&self, session: &mut ApprovalSession) -> Result<()>;

    /// All sessions, oldest first.
    fn list_sessions(&self) -> Result<Vec<ApprovalSession>>;
}

/// Open the configured backend.
pub fn open_store(config: &StateConfig) -> Result<Arc<dyn StateStore>> {
    let dir = match &config.dir {
        Some(dir) => PathBuf::from(dir),
        None => crate::global::state_dir()?,
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create state directory {:?}", dir))?;

    let store: Arc<dyn StateStore> = match config.backend {
        StateBackend::Json => Arc::new(JsonStateStore::open(&dir)?),
        StateBackend::Sqlite => Arc::new(SqliteStateStore::open(&dir.join("state.db"))?),
    };

    info!("Opened {:?} state store at {:?}", config.backend, dir);
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_store_json_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = StateConfig {
            backend: StateBackend::Json,
            dir: Some(dir.path().to_string_lossy().to_string()),
        };

        let store = open_store(&config).unwrap();
        assert!(store.mark_processed("M1").unwrap());
        assert!(store.is_processed("M1").unwrap());
    }

    #[test]
    fn test_open_store_sqlite_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = StateConfig {
            backend: StateBackend::Sqlite,
            dir: Some(dir.path().join("nested").to_string_lossy().to_string()),
        };

        let store = open_store(&config).unwrap();
        assert!(!store.is_processed("M1").unwrap());
        assert!(dir.path().join("nested").join("state.db").exists());
    }
}
