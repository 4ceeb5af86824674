//! In-process fakes for every external system.
//!
//! Used by `adapters.mode = "memory"` for local runs and by the test suite.
//! Each fake counts its calls and can be scripted to fail so retry paths can
//! be exercised deterministically.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    Collaborators, MessagingChannel, PlanningBoard, TaskBoard, TaskExtractor, Transcript,
    TranscriptSource,
};
use crate::error::{AdapterError, ExtractionError};
use crate::session::{CandidateTask, ChannelRef, TrackedTask};

/// One handle per fake, kept concrete so callers can script and inspect them.
#[derive(Clone)]
pub struct MemoryAdapters {
    pub transcripts: Arc<MemoryTranscripts>,
    pub extractor: Arc<ScriptedExtractor>,
    pub planning: Arc<MemoryPlanner>,
    pub messaging: Arc<MemoryChannel>,
    pub board: Arc<MemoryBoard>,
}

impl MemoryAdapters {
    pub fn new() -> Self {
        Self {
            transcripts: Arc::new(MemoryTranscripts::default()),
            extractor: Arc::new(ScriptedExtractor::default()),
            planning: Arc::new(MemoryPlanner::default()),
            messaging: Arc::new(MemoryChannel::default()),
            board: Arc::new(MemoryBoard::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators::new(
            self.transcripts.clone(),
            self.extractor.clone(),
            self.planning.clone(),
            self.messaging.clone(),
            self.board.clone(),
        )
        .with_targets("memory-plan", "memory-list")
    }
}

impl Default for MemoryAdapters {
    fn default() -> Self {
        Self::new()
    }
}

fn unavailable(operation: &'static str) -> AdapterError {
    AdapterError::Transport {
        operation,
        reason: "scripted failure".to_string(),
    }
}

#[derive(Default)]
pub struct MemoryTranscripts {
    transcripts: Mutex<HashMap<String, Transcript>>,
    fetch_count: AtomicU32,
}

impl MemoryTranscripts {
    pub async fn insert(&self, meeting_id: &str, title: Option<&str>, content: &str) {
        self.transcripts.lock().await.insert(
            meeting_id.to_string(),
            Transcript {
                title: title.map(str::to_string),
                content: content.to_string(),
            },
        );
    }

    pub fn fetch_count(&self) -> u32 {
        self.fetch_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TranscriptSource for MemoryTranscripts {
    async fn fetch_transcript(&self, meeting_id: &str) -> Result<Transcript, AdapterError> {
        self.fetch_count.fetch_add(1, Ordering::Relaxed);
        self.transcripts
            .lock()
            .await
            .get(meeting_id)
            .cloned()
            .ok_or_else(|| AdapterError::Rejected {
                operation: "memory.transcript",
                status: 404,
                body: format!("no transcript for {}", meeting_id),
            })
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Tasks(Vec<CandidateTask>),
    Malformed(String),
    Unavailable,
}

impl Default for Reply {
    fn default() -> Self {
        Self::Tasks(Vec::new())
    }
}

/// Extractor that answers from a script keyed by content, falling back to a
/// default reply (no tasks unless changed).
#[derive(Default)]
pub struct ScriptedExtractor {
    replies: Mutex<HashMap<String, Reply>>,
    default_reply: Mutex<Reply>,
    delay: Mutex<Duration>,
    call_count: AtomicU32,
}

impl ScriptedExtractor {
    pub async fn set_default(&self, tasks: Vec<CandidateTask>) {
        *self.default_reply.lock().await = Reply::Tasks(tasks);
    }

    pub async fn script(&self, content: &str, tasks: Vec<CandidateTask>) {
        self.replies
            .lock()
            .await
            .insert(content.to_string(), Reply::Tasks(tasks));
    }

    pub async fn fail_malformed(&self, content: &str, reason: &str) {
        self.replies
            .lock()
            .await
            .insert(content.to_string(), Reply::Malformed(reason.to_string()));
    }

    pub async fn fail_unavailable(&self, content: &str) {
        self.replies
            .lock()
            .await
            .insert(content.to_string(), Reply::Unavailable);
    }

    /// Hold every call for `delay` before answering.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.lock().await = delay;
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TaskExtractor for ScriptedExtractor {
    async fn extract_tasks(&self, content: &str) -> Result<Vec<CandidateTask>, ExtractionError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);

        let delay = *self.delay.lock().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let reply = match self.replies.lock().await.get(content) {
            Some(reply) => reply.clone(),
            None => self.default_reply.lock().await.clone(),
        };

        match reply {
            Reply::Tasks(tasks) => Ok(tasks),
            Reply::Malformed(reason) => Err(ExtractionError::MalformedOutput(reason)),
            Reply::Unavailable => Err(ExtractionError::Model(unavailable("memory.extract"))),
        }
    }
}

#[derive(Default)]
pub struct MemoryPlanner {
    drafts: Mutex<Vec<(String, CandidateTask)>>,
    failing_titles: Mutex<HashSet<String>>,
    next_id: AtomicU32,
}

impl MemoryPlanner {
    pub async fn fail_for(&self, title: &str) {
        self.failing_titles.lock().await.insert(title.to_string());
    }

    pub async fn drafts(&self) -> Vec<(String, CandidateTask)> {
        self.drafts.lock().await.clone()
    }
}

#[async_trait]
impl PlanningBoard for MemoryPlanner {
    async fn create_draft_task(
        &self,
        plan_ref: &str,
        task: &CandidateTask,
    ) -> Result<String, AdapterError> {
        if self.failing_titles.lock().await.contains(&task.title) {
            return Err(unavailable("memory.create_draft"));
        }
        let id = format!("draft-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.drafts
            .lock()
            .await
            .push((plan_ref.to_string(), task.clone()));
        debug!("Memory planner created {} for {:?}", id, task.title);
        Ok(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    pub channel: ChannelRef,
    pub board_draft_id: String,
    pub message_ref: String,
    pub title: String,
}

#[derive(Default)]
pub struct MemoryChannel {
    posts: Mutex<Vec<PostedMessage>>,
    reactions: Mutex<HashMap<String, Vec<String>>>,
    failing_posts: Mutex<HashSet<String>>,
    failing_reactions: Mutex<HashSet<String>>,
    next_id: AtomicU32,
    reaction_calls: AtomicU32,
}

impl MemoryChannel {
    pub async fn add_reaction(&self, message_ref: &str, symbol: &str) {
        self.reactions
            .lock()
            .await
            .entry(message_ref.to_string())
            .or_default()
            .push(symbol.to_string());
    }

    pub async fn fail_posts_for(&self, title: &str) {
        self.failing_posts.lock().await.insert(title.to_string());
    }

    pub async fn fail_reactions_for(&self, message_ref: &str) {
        self.failing_reactions
            .lock()
            .await
            .insert(message_ref.to_string());
    }

    pub async fn clear_failures(&self) {
        self.failing_posts.lock().await.clear();
        self.failing_reactions.lock().await.clear();
    }

    pub async fn posts(&self) -> Vec<PostedMessage> {
        self.posts.lock().await.clone()
    }

    /// Message posted for the task with this title, if any.
    pub async fn message_ref_for(&self, title: &str) -> Option<String> {
        self.posts
            .lock()
            .await
            .iter()
            .find(|post| post.title == title)
            .map(|post| post.message_ref.clone())
    }

    pub fn reaction_calls(&self) -> u32 {
        self.reaction_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MessagingChannel for MemoryChannel {
    async fn post_task(
        &self,
        channel: &ChannelRef,
        board_draft_id: &str,
        task: &CandidateTask,
    ) -> Result<String, AdapterError> {
        if self.failing_posts.lock().await.contains(&task.title) {
            return Err(unavailable("memory.post_message"));
        }
        let message_ref = format!("msg-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.posts.lock().await.push(PostedMessage {
            channel: channel.clone(),
            board_draft_id: board_draft_id.to_string(),
            message_ref: message_ref.clone(),
            title: task.title.clone(),
        });
        Ok(message_ref)
    }

    async fn get_reactions(
        &self,
        _channel: &ChannelRef,
        message_ref: &str,
    ) -> Result<Vec<String>, AdapterError> {
        self.reaction_calls.fetch_add(1, Ordering::Relaxed);
        if self.failing_reactions.lock().await.contains(message_ref) {
            return Err(unavailable("memory.get_reactions"));
        }
        Ok(self
            .reactions
            .lock()
            .await
            .get(message_ref)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardTask {
    pub list_ref: String,
    pub task_id: String,
    pub board_draft_id: String,
    pub title: String,
}

#[derive(Default)]
pub struct MemoryBoard {
    created: Mutex<Vec<BoardTask>>,
    failing_titles: Mutex<HashSet<String>>,
    next_id: AtomicU32,
    call_count: AtomicU32,
}

impl MemoryBoard {
    pub async fn fail_for(&self, title: &str) {
        self.failing_titles.lock().await.insert(title.to_string());
    }

    pub async fn recover(&self, title: &str) {
        self.failing_titles.lock().await.remove(title);
    }

    pub async fn created(&self) -> Vec<BoardTask> {
        self.created.lock().await.clone()
    }

    /// Every create attempt, failed ones included.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TaskBoard for MemoryBoard {
    async fn create_task(&self, list_ref: &str, task: &TrackedTask) -> Result<String, AdapterError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        if self.failing_titles.lock().await.contains(&task.title) {
            return Err(unavailable("memory.create_task"));
        }
        let task_id = format!("task-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.created.lock().await.push(BoardTask {
            list_ref: list_ref.to_string(),
            task_id: task_id.clone(),
            board_draft_id: task.board_draft_id.clone(),
            title: task.title.clone(),
        });
        Ok(task_id)
    }
}
