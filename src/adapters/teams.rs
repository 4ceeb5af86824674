//! Approval channel in Microsoft Teams through the Graph API.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use super::{http, MessagingChannel};
use crate::config::MessagingConfig;
use crate::error::AdapterError;
use crate::session::{CandidateTask, ChannelRef};

const POST_OPERATION: &str = "teams.post_message";
const REACTIONS_OPERATION: &str = "teams.get_reactions";

#[derive(Debug, Deserialize)]
struct PostedMessage {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ChannelMessage {
    #[serde(default)]
    reactions: Vec<Reaction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Reaction {
    reaction_type: String,
}

pub struct TeamsChannel {
    client: Client,
    endpoint: String,
    token: String,
}

impl TeamsChannel {
    pub fn new(config: &MessagingConfig, client: Client) -> Self {
        info!("Initialized Teams client with endpoint: {}", config.endpoint);
        Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        }
    }

    fn messages_url(&self, channel: &ChannelRef) -> String {
        format!(
            "{}/teams/{}/channels/{}/messages",
            self.endpoint, channel.team_id, channel.channel_id
        )
    }
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn render_task(board_draft_id: &str, task: &CandidateTask) -> String {
    let mut html = format!("<h3>{}</h3>", escape_html(&task.title));
    if !task.description.is_empty() {
        html.push_str(&format!("<p>{}</p>", escape_html(&task.description)));
    }
    html.push_str(&format!("<p><b>Priority:</b> {}", task.priority));
    if let Some(due_at) = task.due_at {
        html.push_str(&format!(" &middot; <b>Due:</b> {}", due_at.format("%Y-%m-%d")));
    }
    html.push_str("</p>");
    html.push_str(&format!(
        "<p><i>React to approve. Draft {}</i></p>",
        escape_html(board_draft_id)
    ));
    html
}

#[async_trait]
impl MessagingChannel for TeamsChannel {
    async fn post_task(
        &self,
        channel: &ChannelRef,
        board_draft_id: &str,
        task: &CandidateTask,
    ) -> Result<String, AdapterError> {
        let body = serde_json::json!({
            "body": {
                "contentType": "html",
                "content": render_task(board_draft_id, task),
            }
        });

        let response = self
            .client
            .post(self.messages_url(channel))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| AdapterError::from_reqwest(POST_OPERATION, e))?;

        let posted: PostedMessage = http::read_json(POST_OPERATION, response).await?;
        debug!("Posted draft {} to {} as {}", board_draft_id, channel, posted.id);
        Ok(posted.id)
    }

    async fn get_reactions(
        &self,
        channel: &ChannelRef,
        message_ref: &str,
    ) -> Result<Vec<String>, AdapterError> {
        let response = self
            .client
            .get(format!("{}/{}", self.messages_url(channel), message_ref))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| AdapterError::from_reqwest(REACTIONS_OPERATION, e))?;

        let message: ChannelMessage = http::read_json(REACTIONS_OPERATION, response).await?;
        Ok(message
            .reactions
            .into_iter()
            .map(|reaction| reaction.reaction_type)
            .collect())
    }
}
