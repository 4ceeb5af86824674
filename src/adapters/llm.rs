//! Task extraction through an OpenAI-compatible chat completions endpoint.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{http, TaskExtractor};
use crate::config::ExtractionConfig;
use crate::error::{AdapterError, ExtractionError};
use crate::session::{CandidateTask, Priority};

const OPERATION: &str = "llm.extract_tasks";

const SYSTEM_PROMPT: &str = "You extract action items from meeting transcripts. \
Reply with a JSON array only. Each element has the fields \
\"title\" (short imperative sentence), \"description\" (one or two sentences of context), \
\"priority\" (one of urgent, high, normal, low) and \"dueDate\" (ISO 8601 date or null). \
Reply with [] when the meeting produced no action items.";

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TaskList {
    Bare(Vec<RawTask>),
    Wrapped { tasks: Vec<RawTask> },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTask {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default, alias = "due_date", alias = "dueAt")]
    due_date: Option<String>,
}

pub struct OpenAiExtractor {
    client: Client,
    endpoint: String,
    token: String,
    model: String,
    parser: ReplyParser,
}

impl OpenAiExtractor {
    pub fn new(config: &ExtractionConfig, client: Client) -> Result<Self> {
        info!(
            "Initialized task extractor with model {} at {}",
            config.model, config.endpoint
        );
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            model: config.model.clone(),
            parser: ReplyParser::new()?,
        })
    }
}

#[async_trait]
impl TaskExtractor for OpenAiExtractor {
    async fn extract_tasks(&self, content: &str) -> Result<Vec<CandidateTask>, ExtractionError> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": content },
            ],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExtractionError::Model(AdapterError::from_reqwest(OPERATION, e)))?;

        let chat: ChatResponse = http::read_json(OPERATION, response)
            .await
            .map_err(ExtractionError::Model)?;

        let reply = chat
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ExtractionError::MalformedOutput("empty completion".to_string()))?;

        debug!("Model reply: {}", reply);
        self.parser.parse(&reply)
    }
}

/// Turns a model reply into candidate tasks.
pub struct ReplyParser {
    fence_regex: Regex,
}

impl ReplyParser {
    pub fn new() -> Result<Self> {
        // First ```json ... ``` block anywhere in the reply, language tag optional
        let fence_regex = Regex::new(r"(?s)```[A-Za-z0-9_-]*\s*(.*?)\s*```")?;
        Ok(Self { fence_regex })
    }

    /// Accepts a bare JSON array or an object with a `tasks` array, optionally
    /// wrapped in a markdown code fence. Entries without a title are dropped.
    pub fn parse(&self, reply: &str) -> Result<Vec<CandidateTask>, ExtractionError> {
        let json = match self.fence_regex.captures(reply) {
            Some(captures) => captures.get(1).map_or("", |m| m.as_str()),
            None => reply.trim(),
        };

        let list: TaskList = serde_json::from_str(json)
            .map_err(|e| ExtractionError::MalformedOutput(e.to_string()))?;
        let raw = match list {
            TaskList::Bare(tasks) | TaskList::Wrapped { tasks } => tasks,
        };

        let mut tasks = Vec::with_capacity(raw.len());
        for entry in raw {
            let title = entry.title.trim();
            if title.is_empty() {
                warn!("Dropping extracted task without a title");
                continue;
            }

            let priority = entry
                .priority
                .as_deref()
                .and_then(Priority::parse)
                .unwrap_or_default();

            let mut task = CandidateTask::new(title, priority)
                .with_description(entry.description.unwrap_or_default().trim());
            if let Some(due_at) = entry.due_date.as_deref().and_then(parse_due_date) {
                task = task.with_due_at(due_at);
            }
            tasks.push(task);
        }

        Ok(tasks)
    }
}

fn parse_due_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(date) => date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc()),
        Err(_) => {
            debug!("Ignoring unparseable due date {:?}", raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use chrono::TimeZone;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn parse_task_list(reply: &str) -> Result<Vec<CandidateTask>, ExtractionError> {
        ReplyParser::new().unwrap().parse(reply)
    }

    #[test]
    fn test_parse_bare_array() {
        let tasks = parse_task_list(
            r#"[{"title":"Send contract","priority":"high","dueDate":"2026-03-01"},
                {"title":"Book venue","description":"Somewhere central"}]"#,
        )
        .unwrap();

        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].title, "Send contract");
        assert_eq!(tasks[0].priority, Priority::High);
        assert_eq!(
            tasks[0].due_at,
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(tasks[1].priority, Priority::Normal);
        assert_eq!(tasks[1].description, "Somewhere central");
        assert_eq!(tasks[1].due_at, None);
    }

    #[test]
    fn test_parse_fenced_wrapped_object() {
        let reply = "```json\n{\"tasks\": [{\"title\": \"Ship it\", \"priority\": \"URGENT\"}]}\n```";
        let tasks = parse_task_list(reply).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].priority, Priority::Urgent);
    }

    #[test]
    fn test_parse_empty_list_is_valid() {
        assert!(parse_task_list("[]").unwrap().is_empty());
        assert!(parse_task_list("```\n[]\n```").unwrap().is_empty());
    }

    #[test]
    fn test_parse_fence_surrounded_by_prose() {
        let reply = "Here are the action items I found:\n\n```json\n[{\"title\": \"Book venue\"}]\n```\nLet me know if anything is missing.";
        let tasks = parse_task_list(reply).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Book venue");
        assert_eq!(tasks[0].priority, Priority::Normal);
    }

    #[test]
    fn test_parse_drops_untitled_entries() {
        let tasks = parse_task_list(r#"[{"title":"  "},{"title":"Keep"}]"#).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Keep");
    }

    #[test]
    fn test_parse_rejects_prose() {
        let err = parse_task_list("Sure! Here are the tasks: none.").unwrap_err();
        assert!(matches!(err, ExtractionError::MalformedOutput(_)));
    }

    #[test]
    fn test_parse_due_date_formats() {
        assert_eq!(
            parse_due_date("2026-03-01T12:30:00+02:00"),
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 10, 30, 0).unwrap())
        );
        assert_eq!(parse_due_date("next friday"), None);
        assert_eq!(parse_due_date(""), None);
    }

    fn extractor_for(server: &MockServer) -> OpenAiExtractor {
        let config = ExtractionConfig {
            endpoint: format!("{}/v1/", server.uri()),
            token: "sk-test".to_string(),
            model: "gpt-test".to_string(),
        };
        OpenAiExtractor::new(&config, http::client(Duration::from_secs(5)).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_extract_tasks_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({ "model": "gpt-test" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": {
                    "role": "assistant",
                    "content": "```json\n[{\"title\":\"Send contract\",\"priority\":\"high\"}]\n```"
                }}]
            })))
            .mount(&server)
            .await;

        let tasks = extractor_for(&server)
            .extract_tasks("Ana: send the contract")
            .await
            .unwrap();
        assert_eq!(tasks, vec![CandidateTask::new("Send contract", Priority::High)]);
    }

    #[tokio::test]
    async fn test_extract_tasks_server_error_is_model_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = extractor_for(&server).extract_tasks("hi").await.unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::Model(AdapterError::Rejected { status: 503, .. })
        ));
    }
}
