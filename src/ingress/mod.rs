//! Meeting admission.
//!
//! A meeting is processed at most once: every terminal path (tasks posted,
//! nothing extracted, extraction failed) adds the meeting to the processed
//! set before `admit` returns. Concurrent admissions of the same meeting in
//! this process are refused by an in-flight claim held for the duration of
//! processing.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

use crate::adapters::{self, Collaborators};
use crate::error::{AdapterError, ExtractionError, Result};
use crate::session::{CandidateTask, ChannelRef, SessionManager};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingRequest {
    pub meeting_id: String,
    #[serde(default)]
    pub title: Option<String>,
    /// Transcript text supplied by the caller; fetched from the transcript
    /// source when absent.
    #[serde(default)]
    pub content: Option<String>,
}

impl MeetingRequest {
    pub fn new(meeting_id: impl Into<String>) -> Self {
        Self {
            meeting_id: meeting_id.into(),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessingOutcome {
    SessionOpened {
        session_id: String,
        posted: usize,
        failed: usize,
    },
    NoTasks,
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Refusal {
    AlreadyProcessed,
    InFlight,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admission {
    pub admitted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refusal: Option<Refusal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ProcessingOutcome>,
}

impl Admission {
    fn refused(refusal: Refusal) -> Self {
        Self {
            admitted: false,
            refusal: Some(refusal),
            outcome: None,
        }
    }

    fn processed(outcome: ProcessingOutcome) -> Self {
        Self {
            admitted: true,
            refusal: None,
            outcome: Some(outcome),
        }
    }
}

type ClaimSet = Arc<Mutex<HashSet<String>>>;

/// Held while a meeting is being processed; released on drop.
struct InFlightClaim {
    claims: ClaimSet,
    meeting_id: String,
}

impl InFlightClaim {
    fn acquire(claims: &ClaimSet, meeting_id: &str) -> Option<Self> {
        let inserted = claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(meeting_id.to_string());
        inserted.then(|| Self {
            claims: claims.clone(),
            meeting_id: meeting_id.to_string(),
        })
    }
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        self.claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.meeting_id);
    }
}

#[derive(Clone)]
pub struct IngressGuard {
    sessions: SessionManager,
    collaborators: Collaborators,
    channel: ChannelRef,
    in_flight: ClaimSet,
}

impl IngressGuard {
    pub fn new(sessions: SessionManager, collaborators: Collaborators, channel: ChannelRef) -> Self {
        Self {
            sessions,
            collaborators,
            channel,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn is_processed(&self, meeting_id: &str) -> Result<bool> {
        self.sessions.store().is_processed(meeting_id)
    }

    pub fn is_in_flight(&self, meeting_id: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(meeting_id)
    }

    /// Process a meeting unless it was already processed or is being
    /// processed right now. Errors only when the processed set itself
    /// cannot be read or written.
    pub async fn admit(&self, request: MeetingRequest) -> Result<Admission> {
        let meeting_id = request.meeting_id.clone();

        let Some(_claim) = InFlightClaim::acquire(&self.in_flight, &meeting_id) else {
            info!("Meeting {} is already being processed, skipping", meeting_id);
            return Ok(Admission::refused(Refusal::InFlight));
        };

        if self.is_processed(&meeting_id)? {
            info!("Meeting {} was already processed, skipping", meeting_id);
            return Ok(Admission::refused(Refusal::AlreadyProcessed));
        }

        info!("Admitted meeting {}", meeting_id);
        let outcome = match self.process(&request).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!("Processing meeting {} failed: {}", meeting_id, err);
                ProcessingOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        };

        self.sessions.store().mark_processed(&meeting_id)?;
        debug!("Marked meeting {} as processed", meeting_id);

        Ok(Admission::processed(outcome))
    }

    async fn process(&self, request: &MeetingRequest) -> Result<ProcessingOutcome> {
        let meeting_id = request.meeting_id.as_str();
        let timeout = self.collaborators.call_timeout;

        let (content, fetched_title) = match &request.content {
            Some(content) => (content.clone(), None),
            None => {
                let fetched = adapters::call(
                    "fetch_transcript",
                    timeout,
                    self.collaborators.transcripts.fetch_transcript(meeting_id),
                )
                .await;
                match fetched {
                    Ok(transcript) => (transcript.content, transcript.title),
                    Err(err) => {
                        return Ok(extraction_failed(
                            meeting_id,
                            ExtractionError::Transcript(err),
                        ))
                    }
                }
            }
        };

        let title = request
            .title
            .clone()
            .or(fetched_title)
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| meeting_id.to_string());

        let extracted = match tokio::time::timeout(
            timeout,
            self.collaborators.extractor.extract_tasks(&content),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ExtractionError::Model(AdapterError::Timeout {
                operation: "extract_tasks",
                after: timeout,
            })),
        };

        let candidates = match extracted {
            Ok(candidates) => candidates,
            Err(err) => return Ok(extraction_failed(meeting_id, err)),
        };

        if candidates.is_empty() {
            info!("No tasks extracted from meeting {}", meeting_id);
            return Ok(ProcessingOutcome::NoTasks);
        }

        let session_id = self
            .sessions
            .create_session(meeting_id, &title, self.channel.clone())?;

        let mut posted = 0;
        let mut failed = 0;
        for candidate in &candidates {
            match self.post_candidate(&session_id, candidate).await {
                Ok(()) => posted += 1,
                Err(err) => {
                    failed += 1;
                    warn!(
                        "Failed to post task {:?} (meeting {}, session {}, priority {}): {}",
                        candidate.title, meeting_id, session_id, candidate.priority, err
                    );
                }
            }
        }

        info!(
            "Session {} opened for meeting {}: {} posted, {} failed",
            session_id, meeting_id, posted, failed
        );
        Ok(ProcessingOutcome::SessionOpened {
            session_id,
            posted,
            failed,
        })
    }

    async fn post_candidate(&self, session_id: &str, candidate: &CandidateTask) -> Result<()> {
        let timeout = self.collaborators.call_timeout;

        let draft_id = adapters::call(
            "create_draft_task",
            timeout,
            self.collaborators
                .planning
                .create_draft_task(&self.collaborators.plan_ref, candidate),
        )
        .await?;

        let message_ref = adapters::call(
            "post_task",
            timeout,
            self.collaborators
                .messaging
                .post_task(&self.channel, &draft_id, candidate),
        )
        .await
        .inspect_err(|err| {
            warn!(
                "Draft {} has no approval message and will not be tracked: {}",
                draft_id, err
            )
        })?;

        self.sessions
            .add_task(session_id, &draft_id, candidate, &message_ref)
    }
}

fn extraction_failed(meeting_id: &str, err: ExtractionError) -> ProcessingOutcome {
    error!("Extraction failed for meeting {}: {}", meeting_id, err);
    ProcessingOutcome::Failed {
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryAdapters;
    use crate::session::{Priority, TaskStatus};
    use crate::store::SqliteStateStore;
    use std::time::Duration;

    fn guard_with(fakes: &MemoryAdapters) -> IngressGuard {
        let store = Arc::new(SqliteStateStore::open_in_memory().unwrap());
        IngressGuard::new(
            SessionManager::new(store),
            fakes.collaborators(),
            ChannelRef::new("T1", "C1"),
        )
    }

    fn two_tasks() -> Vec<CandidateTask> {
        vec![
            CandidateTask::new("Send contract", Priority::High),
            CandidateTask::new("Book venue", Priority::Normal),
        ]
    }

    #[tokio::test]
    async fn test_admit_opens_session_and_posts_tasks() {
        let fakes = MemoryAdapters::new();
        fakes.extractor.set_default(two_tasks()).await;
        let guard = guard_with(&fakes);

        let admission = guard
            .admit(MeetingRequest::new("M1").with_content("transcript"))
            .await
            .unwrap();

        assert!(admission.admitted);
        let Some(ProcessingOutcome::SessionOpened { session_id, posted, failed }) =
            admission.outcome
        else {
            panic!("expected a session, got {:?}", admission.outcome);
        };
        assert_eq!((posted, failed), (2, 0));

        let session = guard.sessions.get_session(&session_id).unwrap();
        assert_eq!(session.meeting_title, "M1");
        assert_eq!(session.count_with_status(TaskStatus::Posted), 2);
        assert_eq!(fakes.messaging.posts().await.len(), 2);
        assert!(guard.is_processed("M1").unwrap());
    }

    #[tokio::test]
    async fn test_second_admission_is_a_no_op() {
        let fakes = MemoryAdapters::new();
        fakes.extractor.set_default(two_tasks()).await;
        let guard = guard_with(&fakes);

        guard
            .admit(MeetingRequest::new("M1").with_content("transcript"))
            .await
            .unwrap();
        let second = guard
            .admit(MeetingRequest::new("M1").with_content("transcript"))
            .await
            .unwrap();

        assert!(!second.admitted);
        assert_eq!(second.refusal, Some(Refusal::AlreadyProcessed));
        assert_eq!(fakes.extractor.call_count(), 1);
        assert_eq!(fakes.messaging.posts().await.len(), 2);
    }

    #[tokio::test]
    async fn test_zero_tasks_still_marks_processed() {
        let fakes = MemoryAdapters::new();
        let guard = guard_with(&fakes);

        let admission = guard
            .admit(MeetingRequest::new("M1").with_content("small talk"))
            .await
            .unwrap();
        assert_eq!(admission.outcome, Some(ProcessingOutcome::NoTasks));
        assert!(guard.sessions.list_sessions(None).unwrap().is_empty());

        let again = guard.admit(MeetingRequest::new("M1")).await.unwrap();
        assert!(!again.admitted);
    }

    #[tokio::test]
    async fn test_extraction_failure_marks_processed() {
        let fakes = MemoryAdapters::new();
        fakes.extractor.fail_malformed("garbled", "not json").await;
        let guard = guard_with(&fakes);

        let admission = guard
            .admit(MeetingRequest::new("M1").with_content("garbled"))
            .await
            .unwrap();
        assert!(admission.admitted);
        assert!(matches!(
            admission.outcome,
            Some(ProcessingOutcome::Failed { .. })
        ));
        assert!(guard.is_processed("M1").unwrap());
        assert!(guard.sessions.list_sessions(None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_transcript_is_terminal() {
        let fakes = MemoryAdapters::new();
        let guard = guard_with(&fakes);

        let admission = guard.admit(MeetingRequest::new("M404")).await.unwrap();
        assert!(matches!(
            admission.outcome,
            Some(ProcessingOutcome::Failed { reason }) if reason.contains("transcript")
        ));
        assert!(guard.is_processed("M404").unwrap());
        assert_eq!(fakes.extractor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_fetched_transcript_supplies_title() {
        let fakes = MemoryAdapters::new();
        fakes
            .transcripts
            .insert("M1", Some("Weekly sync"), "Ana: send the contract")
            .await;
        fakes
            .extractor
            .script("Ana: send the contract", vec![CandidateTask::new("Send contract", Priority::High)])
            .await;
        let guard = guard_with(&fakes);

        guard.admit(MeetingRequest::new("M1")).await.unwrap();
        let session = guard.sessions.get_latest_session().unwrap().unwrap();
        assert_eq!(session.meeting_title, "Weekly sync");
        assert_eq!(session.tasks.len(), 1);
    }

    #[tokio::test]
    async fn test_post_failure_does_not_stop_siblings() {
        let fakes = MemoryAdapters::new();
        fakes.extractor.set_default(two_tasks()).await;
        fakes.messaging.fail_posts_for("Send contract").await;
        let guard = guard_with(&fakes);

        let admission = guard
            .admit(MeetingRequest::new("M1").with_content("transcript"))
            .await
            .unwrap();
        let Some(ProcessingOutcome::SessionOpened { session_id, posted, failed }) =
            admission.outcome
        else {
            panic!("expected a session");
        };
        assert_eq!((posted, failed), (1, 1));

        let session = guard.sessions.get_session(&session_id).unwrap();
        let titles: Vec<&str> = session.tasks.values().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["Book venue"]);
    }

    #[tokio::test]
    async fn test_concurrent_admission_is_refused_while_in_flight() {
        let fakes = MemoryAdapters::new();
        fakes.extractor.set_default(two_tasks()).await;
        fakes.extractor.set_delay(Duration::from_millis(200)).await;
        let guard = guard_with(&fakes);

        let first = {
            let guard = guard.clone();
            tokio::spawn(async move {
                guard
                    .admit(MeetingRequest::new("M1").with_content("transcript"))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(guard.is_in_flight("M1"));

        let second = guard
            .admit(MeetingRequest::new("M1").with_content("transcript"))
            .await
            .unwrap();
        assert_eq!(second.refusal, Some(Refusal::InFlight));

        assert!(first.await.unwrap().unwrap().admitted);
        assert!(!guard.is_in_flight("M1"));
        assert_eq!(fakes.extractor.call_count(), 1);
    }

    #[tokio::test]
    async fn test_slow_extraction_times_out() {
        let fakes = MemoryAdapters::new();
        fakes.extractor.set_default(two_tasks()).await;
        fakes.extractor.set_delay(Duration::from_secs(5)).await;
        let store = Arc::new(SqliteStateStore::open_in_memory().unwrap());
        let guard = IngressGuard::new(
            SessionManager::new(store),
            fakes
                .collaborators()
                .with_call_timeout(Duration::from_millis(20)),
            ChannelRef::new("T1", "C1"),
        );

        let admission = guard
            .admit(MeetingRequest::new("M1").with_content("transcript"))
            .await
            .unwrap();
        assert!(matches!(
            admission.outcome,
            Some(ProcessingOutcome::Failed { reason }) if reason.contains("timed out")
        ));
        assert!(guard.is_processed("M1").unwrap());
    }
}
