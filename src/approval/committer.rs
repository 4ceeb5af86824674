use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::adapters::{self, Collaborators, TaskBoard};
use crate::error::Result;
use crate::session::{SessionManager, TaskStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedTask {
    pub task_id: String,
    pub committed_task_id: String,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub committed: Vec<CommittedTask>,
    /// Approved tasks left for the next pass.
    pub failed: usize,
}

/// Creates board tasks for approved tasks, one at a time.
///
/// A task reaches `committed` only together with the id the board returned.
/// When the board call fails the task stays `approved` and is retried on the
/// next pass. Board creation has no dedup key, so a task whose board call
/// succeeded but whose state write failed will be created again.
#[derive(Clone)]
pub struct DownstreamCommitter {
    sessions: SessionManager,
    board: Arc<dyn TaskBoard>,
    list_ref: String,
    call_timeout: Duration,
}

impl DownstreamCommitter {
    pub fn new(sessions: SessionManager, collaborators: &Collaborators) -> Self {
        Self {
            sessions,
            board: collaborators.board.clone(),
            list_ref: collaborators.list_ref.clone(),
            call_timeout: collaborators.call_timeout,
        }
    }

    pub async fn commit(&self, session_id: &str) -> Result<Vec<CommittedTask>> {
        Ok(self.commit_with_report(session_id).await?.committed)
    }

    pub async fn commit_with_report(&self, session_id: &str) -> Result<CommitReport> {
        let approved = self
            .sessions
            .tasks_with_status(session_id, TaskStatus::Approved)?;
        let mut report = CommitReport::default();

        for task in approved {
            let task_id = task.board_draft_id.clone();

            let committed_task_id = match adapters::call(
                "create_task",
                self.call_timeout,
                self.board.create_task(&self.list_ref, &task),
            )
            .await
            {
                Ok(id) => id,
                Err(err) => {
                    warn!(
                        "Board creation failed for task {} ({:?}, session {}, list {}); will retry: {}",
                        task_id, task.title, session_id, self.list_ref, err
                    );
                    report.failed += 1;
                    continue;
                }
            };

            if let Err(err) = self
                .sessions
                .mark_committed(session_id, &task_id, &committed_task_id)
            {
                error!(
                    "Board task {} was created for task {} (session {}) but could not be recorded: {}",
                    committed_task_id, task_id, session_id, err
                );
                report.failed += 1;
                continue;
            }

            info!(
                "Committed task {} ({:?}) as board task {}",
                task_id, task.title, committed_task_id
            );
            report.committed.push(CommittedTask {
                task_id,
                committed_task_id,
                title: task.title,
            });
        }

        Ok(report)
    }
}
