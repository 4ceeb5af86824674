//! Boundaries to the external systems the orchestrator talks to.
//!
//! Each system sits behind a narrow async trait. [`Collaborators`] owns one
//! handle per system and is passed into the orchestrator components; it is
//! opened once from config and closed explicitly on shutdown.

pub mod clickup;
pub mod fireflies;
mod http;
pub mod llm;
pub mod memory;
pub mod planner;
pub mod teams;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{AdapterMode, Config};
use crate::error::{AdapterError, ExtractionError};
use crate::session::{CandidateTask, ChannelRef, TrackedTask};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub title: Option<String>,
    pub content: String,
}

#[async_trait]
pub trait TranscriptSource: Send + Sync {
    async fn fetch_transcript(&self, meeting_id: &str) -> Result<Transcript, AdapterError>;
}

/// Turns free-form meeting content into candidate tasks.
#[async_trait]
pub trait TaskExtractor: Send + Sync {
    async fn extract_tasks(&self, content: &str) -> Result<Vec<CandidateTask>, ExtractionError>;
}

/// Intermediate planning system; its ids key the session task map.
#[async_trait]
pub trait PlanningBoard: Send + Sync {
    async fn create_draft_task(
        &self,
        plan_ref: &str,
        task: &CandidateTask,
    ) -> Result<String, AdapterError>;
}

#[async_trait]
pub trait MessagingChannel: Send + Sync {
    /// Post a task for approval and return the message id.
    async fn post_task(
        &self,
        channel: &ChannelRef,
        board_draft_id: &str,
        task: &CandidateTask,
    ) -> Result<String, AdapterError>;

    /// Reaction symbols currently on a message, one entry per reaction.
    async fn get_reactions(
        &self,
        channel: &ChannelRef,
        message_ref: &str,
    ) -> Result<Vec<String>, AdapterError>;
}

/// Terminal task board.
#[async_trait]
pub trait TaskBoard: Send + Sync {
    async fn create_task(&self, list_ref: &str, task: &TrackedTask)
        -> Result<String, AdapterError>;
}

/// Bound an external call by `limit`, surfacing expiry as a retryable
/// `AdapterError::Timeout`.
pub async fn call<T, F>(operation: &'static str, limit: Duration, fut: F) -> Result<T, AdapterError>
where
    F: Future<Output = Result<T, AdapterError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(AdapterError::Timeout {
            operation,
            after: limit,
        }),
    }
}

/// Explicitly owned handles to every external system.
#[derive(Clone)]
pub struct Collaborators {
    pub transcripts: Arc<dyn TranscriptSource>,
    pub extractor: Arc<dyn TaskExtractor>,
    pub planning: Arc<dyn PlanningBoard>,
    pub messaging: Arc<dyn MessagingChannel>,
    pub board: Arc<dyn TaskBoard>,
    /// Plan that draft tasks are created in.
    pub plan_ref: String,
    /// Board list that approved tasks are committed to.
    pub list_ref: String,
    pub call_timeout: Duration,
}

impl Collaborators {
    pub fn new(
        transcripts: Arc<dyn TranscriptSource>,
        extractor: Arc<dyn TaskExtractor>,
        planning: Arc<dyn PlanningBoard>,
        messaging: Arc<dyn MessagingChannel>,
        board: Arc<dyn TaskBoard>,
    ) -> Self {
        Self {
            transcripts,
            extractor,
            planning,
            messaging,
            board,
            plan_ref: String::new(),
            list_ref: String::new(),
            call_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_targets(mut self, plan_ref: impl Into<String>, list_ref: impl Into<String>) -> Self {
        self.plan_ref = plan_ref.into();
        self.list_ref = list_ref.into();
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// HTTP adapters for every system, all sending through `client`.
    pub fn over_http(config: &Config, client: Client) -> Result<Self> {
        Ok(Self::new(
            Arc::new(fireflies::FirefliesClient::new(&config.transcripts, client.clone())),
            Arc::new(llm::OpenAiExtractor::new(&config.extraction, client.clone())?),
            Arc::new(planner::PlannerClient::new(&config.planning, client.clone())),
            Arc::new(teams::TeamsChannel::new(&config.messaging, client.clone())),
            Arc::new(clickup::ClickUpBoard::new(&config.board, client)),
        ))
    }

    /// Build the handles described by `config`.
    pub fn open(config: &Config) -> Result<Self> {
        let call_timeout = config.approval.call_timeout();

        let collaborators = match config.adapters.mode {
            AdapterMode::Http => Self::over_http(config, http::client(call_timeout)?)?,
            AdapterMode::Memory => {
                let fakes = memory::MemoryAdapters::new();
                Self::new(
                    fakes.transcripts,
                    fakes.extractor,
                    fakes.planning,
                    fakes.messaging,
                    fakes.board,
                )
            }
        };

        info!("Opened {:?} adapters", config.adapters.mode);
        Ok(collaborators
            .with_targets(&config.planning.plan_id, &config.board.list_id)
            .with_call_timeout(call_timeout))
    }

    /// Release every handle. Clones held elsewhere keep their own references.
    pub fn close(self) {
        info!("Closing adapter handles");
        drop(self);
    }
}
