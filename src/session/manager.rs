//! Sole owner of approval session records.
//!
//! Every mutation goes through [`SessionManager::update`], which reloads the
//! session, applies the change and saves it against the loaded version. A
//! concurrent writer shows up as `StaleVersion`; the manager reloads and
//! reapplies a bounded number of times before giving up.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::types::{ApprovalSession, CandidateTask, ChannelRef, TaskStatus, TrackedTask};
use crate::error::{OrchestratorError, Result};
use crate::store::StateStore;

const MAX_UPDATE_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn StateStore>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Allocate an empty session for a meeting and return its id.
    pub fn create_session(
        &self,
        meeting_id: &str,
        meeting_title: &str,
        channel_ref: ChannelRef,
    ) -> Result<String> {
        let mut session = ApprovalSession::new(meeting_id, meeting_title, channel_ref, Utc::now());

        // Two sessions for the same meeting in the same millisecond.
        let base_id = session.session_id.clone();
        let mut suffix = 1;
        while self.store.load_session(&session.session_id)?.is_some() {
            session.session_id = format!("{}-{}", base_id, suffix);
            suffix += 1;
        }

        self.store.insert_session(&session)?;
        info!(
            "Created approval session {} for meeting {}",
            session.session_id, meeting_id
        );
        Ok(session.session_id)
    }

    /// Record a task whose approval message was delivered. A draft id that
    /// is already tracked is refused; the existing record is left as is.
    pub fn add_task(
        &self,
        session_id: &str,
        board_draft_id: &str,
        candidate: &CandidateTask,
        message_ref: &str,
    ) -> Result<()> {
        let task = TrackedTask::posted(board_draft_id, candidate, message_ref, Utc::now());
        self.update(session_id, |session| {
            if session.tasks.contains_key(board_draft_id) {
                return Err(OrchestratorError::DuplicateTask {
                    session_id: session.session_id.clone(),
                    task_id: board_draft_id.to_string(),
                });
            }
            session
                .tasks
                .insert(board_draft_id.to_string(), task.clone());
            Ok(())
        })?;
        debug!(
            "Session {}: task {} posted as message {}",
            session_id, board_draft_id, message_ref
        );
        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> Result<ApprovalSession> {
        self.store
            .load_session(session_id)?
            .ok_or_else(|| OrchestratorError::SessionNotFound(session_id.to_string()))
    }

    /// Most recently created session, if any.
    pub fn get_latest_session(&self) -> Result<Option<ApprovalSession>> {
        Ok(self.store.list_sessions()?.into_iter().max_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        }))
    }

    /// Newest first.
    pub fn list_sessions(&self, limit: Option<usize>) -> Result<Vec<ApprovalSession>> {
        let mut sessions = self.store.list_sessions()?;
        sessions.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.session_id.cmp(&a.session_id))
        });
        if let Some(limit) = limit {
            sessions.truncate(limit);
        }
        Ok(sessions)
    }

    /// Sessions with at least one task not yet committed, oldest first.
    pub fn open_sessions(&self) -> Result<Vec<ApprovalSession>> {
        Ok(self
            .store
            .list_sessions()?
            .into_iter()
            .filter(|session| !session.is_complete())
            .collect())
    }

    /// Store the latest reaction tally for a task still awaiting approval.
    /// Nothing is written when the tally did not change.
    pub fn record_approval_count(&self, session_id: &str, task_id: &str, count: u32) -> Result<()> {
        let current = self.get_session(session_id)?;
        let task = find_task(&current, task_id)?;
        if task.approval_count == Some(count) {
            return Ok(());
        }

        self.update(session_id, |session| {
            let task = find_task_mut(session, task_id)?;
            task.approval_count = Some(count);
            Ok(())
        })
    }

    pub fn mark_approved(&self, session_id: &str, task_id: &str, count: u32) -> Result<()> {
        self.update(session_id, |session| {
            find_task_mut(session, task_id)?.approve(count, Utc::now())
        })
    }

    /// Status and downstream id land in the same write.
    pub fn mark_committed(
        &self,
        session_id: &str,
        task_id: &str,
        committed_task_id: &str,
    ) -> Result<()> {
        self.update(session_id, |session| {
            find_task_mut(session, task_id)?.commit(committed_task_id, Utc::now())
        })
    }

    pub fn tasks_with_status(&self, session_id: &str, status: TaskStatus) -> Result<Vec<TrackedTask>> {
        let session = self.get_session(session_id)?;
        Ok(session
            .tasks_with_status(status)
            .into_iter()
            .cloned()
            .collect())
    }

    fn update<F>(&self, session_id: &str, mut apply: F) -> Result<()>
    where
        F: FnMut(&mut ApprovalSession) -> Result<()>,
    {
        let mut attempt = 1;
        loop {
            let mut session = self.get_session(session_id)?;
            apply(&mut session)?;

            match self.store.save_session(&mut session) {
                Ok(()) => return Ok(()),
                Err(err @ OrchestratorError::StaleVersion { .. })
                    if attempt < MAX_UPDATE_ATTEMPTS =>
                {
                    warn!("{}; retrying ({}/{})", err, attempt, MAX_UPDATE_ATTEMPTS);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn find_task<'a>(session: &'a ApprovalSession, task_id: &str) -> Result<&'a TrackedTask> {
    session
        .tasks
        .get(task_id)
        .ok_or_else(|| OrchestratorError::TaskNotFound {
            session_id: session.session_id.clone(),
            task_id: task_id.to_string(),
        })
}

fn find_task_mut<'a>(
    session: &'a mut ApprovalSession,
    task_id: &str,
) -> Result<&'a mut TrackedTask> {
    let session_id = session.session_id.clone();
    session
        .tasks
        .get_mut(task_id)
        .ok_or_else(|| OrchestratorError::TaskNotFound {
            session_id,
            task_id: task_id.to_string(),
        })
}
