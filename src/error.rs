//! Error taxonomy for the approval orchestrator.
//!
//! - `AdapterError`: a call to an external system failed. Retried on the
//!   next scheduled pass.
//! - `ExtractionError`: the meeting content could not be turned into
//!   candidate tasks. Terminal for the meeting.
//! - `OrchestratorError`: everything the orchestrator surfaces, including
//!   data-integrity faults that are never retried automatically.

use std::time::Duration;
use thiserror::Error;

use crate::session::TaskStatus;

/// Failure talking to the messaging, board, planning, transcript or model
/// systems.
#[derive(Debug, Error, Clone)]
pub enum AdapterError {
    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("{operation} transport failure: {reason}")]
    Transport {
        operation: &'static str,
        reason: String,
    },

    #[error("{operation} rejected with status {status}: {body}")]
    Rejected {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("{operation} returned an unreadable response: {reason}")]
    Decode {
        operation: &'static str,
        reason: String,
    },

    #[error("{operation} rate limited, retry after {}s", .retry_after.as_secs())]
    RateLimited {
        operation: &'static str,
        retry_after: Duration,
    },
}

impl AdapterError {
    /// Whether a later pass has a reasonable chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Transport { .. } | Self::RateLimited { .. } => true,
            Self::Rejected { status, .. } => *status >= 500 || *status == 408,
            Self::Decode { .. } => false,
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            Self::Timeout { operation, .. }
            | Self::Transport { operation, .. }
            | Self::Rejected { operation, .. }
            | Self::Decode { operation, .. }
            | Self::RateLimited { operation, .. } => operation,
        }
    }

    pub(crate) fn from_reqwest(operation: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout {
                operation,
                after: Duration::ZERO,
            };
        }
        if err.is_decode() {
            return Self::Decode {
                operation,
                reason: err.to_string(),
            };
        }
        Self::Transport {
            operation,
            reason: err.to_string(),
        }
    }
}

/// Failure turning meeting content into candidate tasks.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("failed to fetch transcript: {0}")]
    Transcript(#[source] AdapterError),

    #[error("task extraction call failed: {0}")]
    Model(#[source] AdapterError),

    #[error("model output is not a valid task list: {0}")]
    MalformedOutput(String),
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("task {task_id} not found in session {session_id}")]
    TaskNotFound { session_id: String, task_id: String },

    #[error("task {task_id} is already tracked in session {session_id}")]
    DuplicateTask { session_id: String, task_id: String },

    #[error("{record} uses schema version {found}, this build supports {supported}")]
    SchemaVersionMismatch {
        record: &'static str,
        found: u32,
        supported: u32,
    },

    #[error("task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("task {task_id} cannot be committed without a downstream task id")]
    MissingCommittedId { task_id: String },

    #[error("session {session_id} was modified concurrently (expected version {expected}, found {found})")]
    StaleVersion {
        session_id: String,
        expected: u64,
        found: u64,
    },

    #[error("another approval poll is already running")]
    PollInProgress,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;
