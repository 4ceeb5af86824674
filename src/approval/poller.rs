use anyhow::Context;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::committer::{CommittedTask, DownstreamCommitter};
use super::resolver::ReactionResolver;
use crate::error::{OrchestratorError, Result};
use crate::session::{SessionManager, TaskStatus};

/// Outcome of one resolve-and-commit pass over a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollReport {
    pub session_id: String,
    pub newly_approved: Vec<String>,
    pub committed: Vec<CommittedTask>,
    /// Posted tasks still waiting for an approving reaction.
    pub awaiting_approval: usize,
    /// Approved tasks whose board creation has not succeeded yet.
    pub awaiting_commit: usize,
    /// Tasks that hit an adapter or storage failure in this pass.
    pub failures: usize,
    pub complete: bool,
}

/// Runs the resolver and then the committer for a session.
///
/// Only one pass runs at a time across processes sharing the same lock file.
/// A pass that finds the lock held fails with `PollInProgress` instead of
/// waiting.
#[derive(Clone)]
pub struct ApprovalPoller {
    sessions: SessionManager,
    resolver: ReactionResolver,
    committer: DownstreamCommitter,
    lock_file: PathBuf,
}

struct PollLock {
    file: File,
}

impl Drop for PollLock {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            debug!("Failed to release poll lock: {err:?}");
        }
    }
}

fn try_acquire_lock(path: &Path) -> Result<PollLock> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("Failed to open poll lock {:?}", path))?;

    match file.try_lock_exclusive() {
        Ok(()) => Ok(PollLock { file }),
        Err(err) if err.kind() == fs2::lock_contended_error().kind() => {
            Err(OrchestratorError::PollInProgress)
        }
        Err(err) => Err(anyhow::Error::new(err)
            .context("Failed to acquire poll lock")
            .into()),
    }
}

impl ApprovalPoller {
    pub fn new(
        sessions: SessionManager,
        resolver: ReactionResolver,
        committer: DownstreamCommitter,
        lock_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            sessions,
            resolver,
            committer,
            lock_file: lock_file.into(),
        }
    }

    /// Poll one session, or the latest one when no id is given. Returns
    /// `None` when there is no session at all.
    pub async fn poll_session(&self, session_id: Option<&str>) -> Result<Option<PollReport>> {
        let session_id = match session_id {
            Some(id) => id.to_string(),
            None => match self.sessions.get_latest_session()? {
                Some(session) => session.session_id,
                None => {
                    info!("No approval sessions to poll");
                    return Ok(None);
                }
            },
        };

        let _lock = try_acquire_lock(&self.lock_file)?;
        let run_id = uuid::Uuid::new_v4();
        let report = self
            .run_pass(&session_id)
            .instrument(info_span!("poll", %run_id))
            .await?;
        Ok(Some(report))
    }

    /// Poll every session that still has uncommitted tasks, oldest first.
    /// A failing session is logged and does not stop the others.
    pub async fn poll_open_sessions(&self) -> Result<Vec<PollReport>> {
        let _lock = try_acquire_lock(&self.lock_file)?;
        let run_id = uuid::Uuid::new_v4();

        async {
            let open = self.sessions.open_sessions()?;
            debug!("{} open session(s)", open.len());

            let mut reports = Vec::with_capacity(open.len());
            for session in open {
                match self.run_pass(&session.session_id).await {
                    Ok(report) => reports.push(report),
                    Err(err) => error!("Polling session {} failed: {}", session.session_id, err),
                }
            }
            Ok::<_, OrchestratorError>(reports)
        }
        .instrument(info_span!("poll", %run_id))
        .await
    }

    /// Poll open sessions every `interval` until the task is aborted.
    pub fn spawn_background(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Starting approval polling (interval={}s)",
                interval.as_secs()
            );
            loop {
                match self.poll_open_sessions().await {
                    Ok(reports) => {
                        let committed: usize = reports.iter().map(|r| r.committed.len()).sum();
                        if !reports.is_empty() {
                            info!(
                                "Polled {} session(s), committed {} task(s)",
                                reports.len(),
                                committed
                            );
                        }
                    }
                    Err(OrchestratorError::PollInProgress) => {
                        debug!("Skipping scheduled poll, another pass holds the lock");
                    }
                    Err(err) => warn!("Scheduled approval poll failed: {err:?}"),
                }
                tokio::time::sleep(interval).await;
            }
        })
    }

    async fn run_pass(&self, session_id: &str) -> Result<PollReport> {
        let resolution = self.resolver.resolve(session_id).await?;
        let commit = self.committer.commit_with_report(session_id).await?;

        let session = self.sessions.get_session(session_id)?;
        let report = PollReport {
            session_id: session_id.to_string(),
            newly_approved: resolution.approved,
            committed: commit.committed,
            awaiting_approval: session.count_with_status(TaskStatus::Posted),
            awaiting_commit: session.count_with_status(TaskStatus::Approved),
            failures: resolution.failed + commit.failed,
            complete: session.is_complete(),
        };

        info!(
            "Session {}: {} approved, {} committed, {} awaiting approval, {} awaiting commit",
            session_id,
            report.newly_approved.len(),
            report.committed.len(),
            report.awaiting_approval,
            report.awaiting_commit
        );
        Ok(report)
    }
}
