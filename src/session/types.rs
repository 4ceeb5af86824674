//! Session and task records plus the per-task state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{OrchestratorError, Result};

/// Task urgency as proposed by extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Urgent,
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }

    /// Ordinal rank, 1 (urgent) through 4 (low).
    pub fn rank(&self) -> u8 {
        match self {
            Self::Urgent => 1,
            Self::High => 2,
            Self::Normal => 3,
            Self::Low => 4,
        }
    }

    /// Lenient parse used on model output. Accepts common synonyms.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "urgent" | "critical" | "asap" => Some(Self::Urgent),
            "high" | "important" => Some(Self::High),
            "normal" | "medium" | "default" => Some(Self::Normal),
            "low" | "minor" => Some(Self::Low),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task proposed by extraction, not yet posted anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
}

impl CandidateTask {
    pub fn new(title: impl Into<String>, priority: Priority) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            priority,
            due_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_due_at(mut self, due_at: DateTime<Utc>) -> Self {
        self.due_at = Some(due_at);
        self
    }
}

/// Locator of the approval channel: a team/workspace plus a channel in it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRef {
    pub team_id: String,
    pub channel_id: String,
}

impl ChannelRef {
    pub fn new(team_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            team_id: team_id.into(),
            channel_id: channel_id.into(),
        }
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.team_id, self.channel_id)
    }
}

/// Lifecycle of a tracked task: posted → approved → committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Posted,
    Approved,
    Committed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Posted => "posted",
            Self::Approved => "approved",
            Self::Committed => "committed",
        }
    }

    /// Only single forward steps are legal.
    pub fn can_advance_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Posted, Self::Approved) | (Self::Approved, Self::Committed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task once it has been posted for approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedTask {
    pub board_draft_id: String,
    pub message_ref: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committed_task_id: Option<String>,
    pub posted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl TrackedTask {
    /// Build the record for a task whose approval message was just delivered.
    pub fn posted(
        board_draft_id: impl Into<String>,
        candidate: &CandidateTask,
        message_ref: impl Into<String>,
        posted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            board_draft_id: board_draft_id.into(),
            message_ref: message_ref.into(),
            title: candidate.title.clone(),
            description: candidate.description.clone(),
            priority: candidate.priority,
            due_at: candidate.due_at,
            status: TaskStatus::Posted,
            approval_count: None,
            committed_task_id: None,
            posted_at,
            processed_at: None,
        }
    }

    pub fn approve(&mut self, approval_count: u32, now: DateTime<Utc>) -> Result<()> {
        self.advance(TaskStatus::Approved)?;
        self.approval_count = Some(approval_count);
        self.processed_at = Some(now);
        Ok(())
    }

    /// The status change and the downstream id are written together; a task
    /// never reaches `committed` without one.
    pub fn commit(&mut self, committed_task_id: &str, now: DateTime<Utc>) -> Result<()> {
        if committed_task_id.trim().is_empty() {
            return Err(OrchestratorError::MissingCommittedId {
                task_id: self.board_draft_id.clone(),
            });
        }
        self.advance(TaskStatus::Committed)?;
        self.committed_task_id = Some(committed_task_id.to_string());
        self.processed_at = Some(now);
        Ok(())
    }

    fn advance(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_advance_to(next) {
            return Err(OrchestratorError::InvalidTransition {
                task_id: self.board_draft_id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

/// One meeting's batch of tasks awaiting human approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalSession {
    pub session_id: String,
    pub meeting_id: String,
    pub meeting_title: String,
    pub created_at: DateTime<Utc>,
    pub channel_ref: ChannelRef,
    /// Keyed by board draft id.
    #[serde(default)]
    pub tasks: BTreeMap<String, TrackedTask>,
    /// Optimistic concurrency token, bumped by the store on every save.
    #[serde(default)]
    pub version: u64,
}

impl ApprovalSession {
    pub fn new(
        meeting_id: impl Into<String>,
        meeting_title: impl Into<String>,
        channel_ref: ChannelRef,
        created_at: DateTime<Utc>,
    ) -> Self {
        let meeting_id = meeting_id.into();
        Self {
            session_id: session_id_for(&meeting_id, created_at),
            meeting_id,
            meeting_title: meeting_title.into(),
            created_at,
            channel_ref,
            tasks: BTreeMap::new(),
            version: 0,
        }
    }

    /// Derived, never stored: every task has been committed downstream.
    pub fn is_complete(&self) -> bool {
        self.tasks
            .values()
            .all(|task| task.status == TaskStatus::Committed)
    }

    /// Tasks in the given status, oldest post first.
    pub fn tasks_with_status(&self, status: TaskStatus) -> Vec<&TrackedTask> {
        let mut tasks: Vec<&TrackedTask> = self
            .tasks
            .values()
            .filter(|task| task.status == status)
            .collect();
        tasks.sort_by(|a, b| {
            a.posted_at
                .cmp(&b.posted_at)
                .then_with(|| a.board_draft_id.cmp(&b.board_draft_id))
        });
        tasks
    }

    pub fn count_with_status(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status == status).count()
    }
}

/// Per-status counts for listing sessions without their task bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub meeting_id: String,
    pub meeting_title: String,
    pub created_at: DateTime<Utc>,
    pub posted: usize,
    pub approved: usize,
    pub committed: usize,
    pub complete: bool,
}

impl From<&ApprovalSession> for SessionSummary {
    fn from(session: &ApprovalSession) -> Self {
        Self {
            session_id: session.session_id.clone(),
            meeting_id: session.meeting_id.clone(),
            meeting_title: session.meeting_title.clone(),
            created_at: session.created_at,
            posted: session.count_with_status(TaskStatus::Posted),
            approved: session.count_with_status(TaskStatus::Approved),
            committed: session.count_with_status(TaskStatus::Committed),
            complete: session.is_complete(),
        }
    }
}

/// Session ids sort lexicographically in creation order: a zero-padded
/// millisecond timestamp followed by the meeting id.
pub fn session_id_for(meeting_id: &str, created_at: DateTime<Utc>) -> String {
    let sanitized: String = meeting_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{:013}-{}", created_at.timestamp_millis().max(0), sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn posted_task(id: &str) -> TrackedTask {
        TrackedTask::posted(
            id,
            &CandidateTask::new("Send contract", Priority::High),
            "msg-1",
            ts(1_700_000_000),
        )
    }

    #[test]
    fn test_priority_as_str_and_rank() {
        assert_eq!(Priority::Urgent.as_str(), "urgent");
        assert_eq!(Priority::Low.as_str(), "low");
        assert_eq!(Priority::Urgent.rank(), 1);
        assert_eq!(Priority::Normal.rank(), 3);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!(Priority::parse("HIGH"), Some(Priority::High));
        assert_eq!(Priority::parse(" medium "), Some(Priority::Normal));
        assert_eq!(Priority::parse("asap"), Some(Priority::Urgent));
        assert_eq!(Priority::parse("whenever"), None);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&TaskStatus::Approved).unwrap();
        assert_eq!(json, "\"approved\"");

        let parsed: TaskStatus = serde_json::from_str("\"committed\"").unwrap();
        assert_eq!(parsed, TaskStatus::Committed);
    }

    #[test]
    fn test_status_only_moves_forward_one_step() {
        assert!(TaskStatus::Posted.can_advance_to(TaskStatus::Approved));
        assert!(TaskStatus::Approved.can_advance_to(TaskStatus::Committed));
        assert!(!TaskStatus::Posted.can_advance_to(TaskStatus::Committed));
        assert!(!TaskStatus::Committed.can_advance_to(TaskStatus::Approved));
        assert!(!TaskStatus::Approved.can_advance_to(TaskStatus::Posted));
        assert!(!TaskStatus::Posted.can_advance_to(TaskStatus::Posted));
    }

    #[test]
    fn test_task_lifecycle() {
        let mut task = posted_task("draft-1");
        assert_eq!(task.status, TaskStatus::Posted);

        task.approve(1, ts(1_700_000_100)).unwrap();
        assert_eq!(task.status, TaskStatus::Approved);
        assert_eq!(task.approval_count, Some(1));

        task.commit("cu-42", ts(1_700_000_200)).unwrap();
        assert_eq!(task.status, TaskStatus::Committed);
        assert_eq!(task.committed_task_id.as_deref(), Some("cu-42"));
        assert_eq!(task.processed_at, Some(ts(1_700_000_200)));
    }

    #[test]
    fn test_commit_requires_approval_first() {
        let mut task = posted_task("draft-1");
        let err = task.commit("cu-42", ts(1)).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::InvalidTransition {
                from: TaskStatus::Posted,
                to: TaskStatus::Committed,
                ..
            }
        ));
        assert_eq!(task.status, TaskStatus::Posted);
        assert!(task.committed_task_id.is_none());
    }

    #[test]
    fn test_commit_requires_downstream_id() {
        let mut task = posted_task("draft-1");
        task.approve(1, ts(1)).unwrap();

        let err = task.commit("  ", ts(2)).unwrap_err();
        assert!(matches!(err, OrchestratorError::MissingCommittedId { .. }));
        assert_eq!(task.status, TaskStatus::Approved);
    }

    #[test]
    fn test_committed_task_cannot_be_reapproved() {
        let mut task = posted_task("draft-1");
        task.approve(1, ts(1)).unwrap();
        task.commit("cu-1", ts(2)).unwrap();

        assert!(task.approve(2, ts(3)).is_err());
        assert_eq!(task.status, TaskStatus::Committed);
        assert_eq!(task.approval_count, Some(1));
    }

    #[test]
    fn test_session_id_sorts_by_creation() {
        let earlier = session_id_for("zzz", ts(1_000));
        let later = session_id_for("aaa", ts(2_000));
        assert!(earlier < later);
        assert_eq!(earlier, "0000001000000-zzz");
    }

    #[test]
    fn test_session_id_sanitizes_meeting_id() {
        let id = session_id_for("team/meet ing:1", ts(0));
        assert_eq!(id, "0000000000000-team_meet_ing_1");
    }

    #[test]
    fn test_session_completion_is_derived() {
        let mut session =
            ApprovalSession::new("M1", "Weekly sync", ChannelRef::new("T1", "C1"), ts(10));
        session.tasks.insert("a".into(), posted_task("a"));
        session.tasks.insert("b".into(), posted_task("b"));
        assert!(!session.is_complete());

        for task in session.tasks.values_mut() {
            task.approve(1, ts(11)).unwrap();
            task.commit("x", ts(12)).unwrap();
        }
        assert!(session.is_complete());
    }

    #[test]
    fn test_tasks_with_status_ordered_by_post_time() {
        let mut session =
            ApprovalSession::new("M1", "Weekly sync", ChannelRef::new("T1", "C1"), ts(10));
        let mut late = posted_task("a-late");
        late.posted_at = ts(500);
        let mut early = posted_task("z-early");
        early.posted_at = ts(100);
        session.tasks.insert(late.board_draft_id.clone(), late);
        session.tasks.insert(early.board_draft_id.clone(), early);

        let ids: Vec<&str> = session
            .tasks_with_status(TaskStatus::Posted)
            .iter()
            .map(|t| t.board_draft_id.as_str())
            .collect();
        assert_eq!(ids, vec!["z-early", "a-late"]);
    }

    #[test]
    fn test_session_json_uses_camel_case() {
        let session =
            ApprovalSession::new("M1", "Weekly sync", ChannelRef::new("T1", "C1"), ts(10));
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["meetingId"], "M1");
        assert_eq!(json["channelRef"]["teamId"], "T1");
        assert!(json.get("sessionId").is_some());
    }
}
