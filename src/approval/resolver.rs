use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::adapters::{self, Collaborators, MessagingChannel};
use crate::error::Result;
use crate::session::{SessionManager, TaskStatus};

/// What one resolver pass did to a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Tasks moved from posted to approved in this pass.
    pub approved: Vec<String>,
    /// Tasks still waiting for an approving reaction.
    pub pending: usize,
    /// Tasks whose reactions could not be read or whose approval could not
    /// be stored. They stay posted.
    pub failed: usize,
}

/// Number of reactions that match the approving symbol exactly.
pub fn approving_count(reactions: &[String], approve_reaction: &str) -> u32 {
    reactions
        .iter()
        .filter(|reaction| reaction.as_str() == approve_reaction)
        .count() as u32
}

/// Turns reactions on posted messages into approvals.
///
/// Only `posted` tasks are examined. A task is approved once at least one
/// reaction equal to the configured symbol is present; anything else leaves
/// it posted for the next pass.
#[derive(Clone)]
pub struct ReactionResolver {
    sessions: SessionManager,
    messaging: Arc<dyn MessagingChannel>,
    approve_reaction: String,
    call_timeout: Duration,
}

impl ReactionResolver {
    pub fn new(
        sessions: SessionManager,
        collaborators: &Collaborators,
        approve_reaction: impl Into<String>,
    ) -> Self {
        Self {
            sessions,
            messaging: collaborators.messaging.clone(),
            approve_reaction: approve_reaction.into(),
            call_timeout: collaborators.call_timeout,
        }
    }

    /// Ids of the tasks newly approved in this pass.
    pub async fn resolve_approvals(&self, session_id: &str) -> Result<Vec<String>> {
        Ok(self.resolve(session_id).await?.approved)
    }

    pub async fn resolve(&self, session_id: &str) -> Result<Resolution> {
        let session = self.sessions.get_session(session_id)?;
        let mut resolution = Resolution::default();

        for task in session.tasks_with_status(TaskStatus::Posted) {
            let task_id = task.board_draft_id.as_str();

            let reactions = match adapters::call(
                "get_reactions",
                self.call_timeout,
                self.messaging
                    .get_reactions(&session.channel_ref, &task.message_ref),
            )
            .await
            {
                Ok(reactions) => reactions,
                Err(err) => {
                    warn!(
                        "Could not read reactions for task {} (session {}, message {}): {}",
                        task_id, session_id, task.message_ref, err
                    );
                    resolution.failed += 1;
                    continue;
                }
            };

            let count = approving_count(&reactions, &self.approve_reaction);
            if count == 0 {
                debug!(
                    "Task {} has {} reaction(s), none approving",
                    task_id,
                    reactions.len()
                );
                if let Err(err) = self.sessions.record_approval_count(session_id, task_id, 0) {
                    warn!("Could not record tally for task {}: {}", task_id, err);
                }
                resolution.pending += 1;
                continue;
            }

            match self.sessions.mark_approved(session_id, task_id, count) {
                Ok(()) => {
                    info!(
                        "Task {} ({:?}) approved with {} reaction(s)",
                        task_id, task.title, count
                    );
                    resolution.approved.push(task_id.to_string());
                }
                Err(err) => {
                    warn!(
                        "Could not store approval for task {} in session {}: {}",
                        task_id, session_id, err
                    );
                    resolution.failed += 1;
                }
            }
        }

        Ok(resolution)
    }
}
