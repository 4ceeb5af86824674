//! File-backed store: one JSON document per record family.
//!
//! Every operation runs under an exclusive `fs2` lock on `state.lock`, and
//! documents are replaced atomically (temp file + rename), so concurrent
//! processes serialize their read-modify-write cycles.

use anyhow::{anyhow, Context};
use chrono::Utc;
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{StateStore, SCHEMA_VERSION};
use crate::error::{OrchestratorError, Result};
use crate::session::ApprovalSession;

const PROCESSED_FILE: &str = "processed_meetings.json";
const SESSIONS_FILE: &str = "sessions.json";
const LOCK_FILE: &str = "state.lock";

#[derive(Debug, Serialize, Deserialize)]
struct ProcessedDocument {
    schema_version: u32,
    #[serde(default)]
    meetings: BTreeSet<String>,
}

impl Default for ProcessedDocument {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            meetings: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionsDocument {
    schema_version: u32,
    #[serde(default)]
    sessions: BTreeMap<String, ApprovalSession>,
}

impl Default for SessionsDocument {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            sessions: BTreeMap::new(),
        }
    }
}

pub struct JsonStateStore {
    dir: PathBuf,
}

impl JsonStateStore {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create state directory {:?}", dir))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn lock(&self) -> Result<StateLock> {
        let path = self.dir.join(LOCK_FILE);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to open state lock {:?}", path))?;
        file.lock_exclusive()
            .with_context(|| "Failed to acquire state lock")?;
        Ok(StateLock { file })
    }

    fn load_processed(&self) -> Result<ProcessedDocument> {
        load_document(&self.dir.join(PROCESSED_FILE), "processed meetings")
    }

    fn load_sessions(&self) -> Result<SessionsDocument> {
        load_document(&self.dir.join(SESSIONS_FILE), "sessions")
    }
}

impl StateStore for JsonStateStore {
    fn is_processed(&self, meeting_id: &str) -> Result<bool> {
        let _lock = self.lock()?;
        Ok(self.load_processed()?.meetings.contains(meeting_id))
    }

    fn mark_processed(&self, meeting_id: &str) -> Result<bool> {
        let _lock = self.lock()?;
        let mut doc = self.load_processed()?;
        if !doc.meetings.insert(meeting_id.to_string()) {
            return Ok(false);
        }
        write_document(&self.dir.join(PROCESSED_FILE), &doc)?;
        debug!("Recorded meeting {} as processed", meeting_id);
        Ok(true)
    }

    fn processed_meetings(&self) -> Result<Vec<String>> {
        let _lock = self.lock()?;
        Ok(self.load_processed()?.meetings.into_iter().collect())
    }

    fn insert_session(&self, session: &ApprovalSession) -> Result<()> {
        let _lock = self.lock()?;
        let mut doc = self.load_sessions()?;
        if doc.sessions.contains_key(&session.session_id) {
            return Err(anyhow!("Session {} already exists", session.session_id).into());
        }
        doc.sessions
            .insert(session.session_id.clone(), session.clone());
        write_document(&self.dir.join(SESSIONS_FILE), &doc)
    }

    fn load_session(&self, session_id: &str) -> Result<Option<ApprovalSession>> {
        let _lock = self.lock()?;
        Ok(self.load_sessions()?.sessions.remove(session_id))
    }

    fn save_session(&self, session: &mut ApprovalSession) -> Result<()> {
        let _lock = self.lock()?;
        let mut doc = self.load_sessions()?;

        let stored_version = doc
            .sessions
            .get(&session.session_id)
            .map(|stored| stored.version)
            .ok_or_else(|| OrchestratorError::SessionNotFound(session.session_id.clone()))?;

        if stored_version != session.version {
            return Err(OrchestratorError::StaleVersion {
                session_id: session.session_id.clone(),
                expected: session.version,
                found: stored_version,
            });
        }

        let mut updated = session.clone();
        updated.version += 1;
        doc.sessions.insert(updated.session_id.clone(), updated);
        write_document(&self.dir.join(SESSIONS_FILE), &doc)?;

        session.version += 1;
        Ok(())
    }

    fn list_sessions(&self) -> Result<Vec<ApprovalSession>> {
        let _lock = self.lock()?;
        let mut sessions: Vec<ApprovalSession> =
            self.load_sessions()?.sessions.into_values().collect();
        sessions.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(sessions)
    }
}

/// Read a versioned document. Missing file yields the empty default.
fn load_document<T>(path: &Path, record: &'static str) -> Result<T>
where
    T: DeserializeOwned + Default + Serialize,
{
    if !path.exists() {
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {:?}", path))?;
    let raw: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {:?}", path))?;

    let found = raw
        .get("schema_version")
        .and_then(|v| v.as_u64())
        .map_or(0, |v| u32::try_from(v).unwrap_or(u32::MAX));

    if found > SCHEMA_VERSION {
        return Err(OrchestratorError::SchemaVersionMismatch {
            record,
            found,
            supported: SCHEMA_VERSION,
        });
    }

    if found < SCHEMA_VERSION {
        let backup = backup_path(path, found);
        std::fs::rename(path, &backup)
            .with_context(|| format!("Failed to back up {:?}", path))?;
        warn!(
            "{} file {:?} has schema version {} (expected {}); moved to {:?} and starting empty",
            record, path, found, SCHEMA_VERSION, backup
        );
        let fresh = T::default();
        write_document(path, &fresh)?;
        return Ok(fresh);
    }

    let doc = serde_json::from_value(raw)
        .with_context(|| format!("Failed to decode {} from {:?}", record, path))?;
    Ok(doc)
}

fn write_document<T: Serialize>(path: &Path, doc: &T) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("State file {:?} has no parent directory", path))?;
    let content = serde_json::to_string_pretty(doc).context("Failed to serialize state")?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temp file in {:?}", parent))?;
    tmp.write_all(content.as_bytes())
        .context("Failed to write state")?;
    tmp.as_file()
        .sync_all()
        .context("Failed to flush state")?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to replace {:?}", path))?;
    Ok(())
}

fn backup_path(path: &Path, found: u32) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("state");
    let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
    path.with_file_name(format!("{}.v{}-{}.bak", name, found, timestamp))
}

struct StateLock {
    file: File,
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            debug!("Failed to release state lock: {err:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{CandidateTask, ChannelRef, Priority, TrackedTask};

    fn setup() -> (tempfile::TempDir, JsonStateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn session(meeting_id: &str) -> ApprovalSession {
        ApprovalSession::new(
            meeting_id,
            "Weekly sync",
            ChannelRef::new("T1", "C1"),
            Utc::now(),
        )
    }

    #[test]
    fn test_mark_processed_is_monotonic() {
        let (_dir, store) = setup();

        assert!(!store.is_processed("M1").unwrap());
        assert!(store.mark_processed("M1").unwrap());
        assert!(!store.mark_processed("M1").unwrap());
        assert!(store.is_processed("M1").unwrap());
        assert_eq!(store.processed_meetings().unwrap(), vec!["M1".to_string()]);
    }

    #[test]
    fn test_processed_set_survives_reopen() {
        let (dir, store) = setup();
        store.mark_processed("M1").unwrap();
        drop(store);

        let reopened = JsonStateStore::open(dir.path()).unwrap();
        assert!(reopened.is_processed("M1").unwrap());
    }

    #[test]
    fn test_insert_and_load_session() {
        let (_dir, store) = setup();
        let s = session("M1");
        store.insert_session(&s).unwrap();

        let loaded = store.load_session(&s.session_id).unwrap().unwrap();
        assert_eq!(loaded, s);
        assert!(store.load_session("missing").unwrap().is_none());
    }

    #[test]
    fn test_insert_duplicate_session_fails() {
        let (_dir, store) = setup();
        let s = session("M1");
        store.insert_session(&s).unwrap();
        assert!(store.insert_session(&s).is_err());
    }

    #[test]
    fn test_save_session_bumps_version() {
        let (_dir, store) = setup();
        let mut s = session("M1");
        store.insert_session(&s).unwrap();

        s.tasks.insert(
            "d1".into(),
            TrackedTask::posted(
                "d1",
                &CandidateTask::new("Book venue", Priority::Normal),
                "msg-1",
                Utc::now(),
            ),
        );
        store.save_session(&mut s).unwrap();
        assert_eq!(s.version, 1);

        let loaded = store.load_session(&s.session_id).unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        assert!(loaded.tasks.contains_key("d1"));
    }

    #[test]
    fn test_save_session_rejects_stale_version() {
        let (_dir, store) = setup();
        let s = session("M1");
        store.insert_session(&s).unwrap();

        let mut first = store.load_session(&s.session_id).unwrap().unwrap();
        let mut second = first.clone();

        store.save_session(&mut first).unwrap();
        let err = store.save_session(&mut second).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::StaleVersion {
                expected: 0,
                found: 1,
                ..
            }
        ));
        assert_eq!(second.version, 0);
    }

    #[test]
    fn test_save_unknown_session_fails() {
        let (_dir, store) = setup();
        let mut s = session("M1");
        let err = store.save_session(&mut s).unwrap_err();
        assert!(matches!(err, OrchestratorError::SessionNotFound(_)));
    }

    #[test]
    fn test_list_sessions_oldest_first() {
        let (_dir, store) = setup();
        let mut older = session("M1");
        older.created_at = Utc::now() - chrono::Duration::hours(1);
        older.session_id = crate::session::session_id_for("M1", older.created_at);
        let newer = session("M2");

        store.insert_session(&newer).unwrap();
        store.insert_session(&older).unwrap();

        let listed = store.list_sessions().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].meeting_id, "M1");
        assert_eq!(listed[1].meeting_id, "M2");
    }

    #[test]
    fn test_older_schema_is_backed_up_and_reset() {
        let (dir, store) = setup();
        let path = dir.path().join(PROCESSED_FILE);
        std::fs::write(&path, r#"{"meetings":["legacy"]}"#).unwrap();

        assert!(!store.is_processed("legacy").unwrap());

        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".bak"))
            .collect();
        assert_eq!(backups.len(), 1);
        let backed_up = std::fs::read_to_string(backups[0].path()).unwrap();
        assert!(backed_up.contains("legacy"));
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let (dir, store) = setup();
        let path = dir.path().join(SESSIONS_FILE);
        std::fs::write(&path, r#"{"schema_version":99,"sessions":{}}"#).unwrap();

        let err = store.list_sessions().unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::SchemaVersionMismatch {
                record: "sessions",
                found: 99,
                supported: SCHEMA_VERSION
            }
        ));
        // Untouched.
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("99"));
    }

    #[test]
    fn test_out_of_range_schema_is_refused_as_newer() {
        let (dir, store) = setup();
        let path = dir.path().join(SESSIONS_FILE);
        // 2^32 + 1 would read as version 1 if truncated
        std::fs::write(&path, r#"{"schema_version":4294967297,"sessions":{}}"#).unwrap();

        let err = store.list_sessions().unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::SchemaVersionMismatch {
                record: "sessions",
                found: u32::MAX,
                ..
            }
        ));
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("4294967297"));
    }

    #[test]
    fn test_documents_carry_schema_version() {
        let (dir, store) = setup();
        store.mark_processed("M1").unwrap();
        store.insert_session(&session("M1")).unwrap();

        for file in [PROCESSED_FILE, SESSIONS_FILE] {
            let content = std::fs::read_to_string(dir.path().join(file)).unwrap();
            let value: serde_json::Value = serde_json::from_str(&content).unwrap();
            assert_eq!(value["schema_version"], SCHEMA_VERSION);
        }
    }
}
