//! Terminal task board in ClickUp.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use super::{http, TaskBoard};
use crate::config::BoardConfig;
use crate::error::AdapterError;
use crate::session::TrackedTask;

const OPERATION: &str = "clickup.create_task";

#[derive(Debug, Deserialize)]
struct CreatedTask {
    id: String,
}

pub struct ClickUpBoard {
    client: Client,
    endpoint: String,
    token: String,
}

impl ClickUpBoard {
    pub fn new(config: &BoardConfig, client: Client) -> Self {
        info!("Initialized ClickUp client with endpoint: {}", config.endpoint);
        Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        }
    }
}

#[async_trait]
impl TaskBoard for ClickUpBoard {
    async fn create_task(
        &self,
        list_ref: &str,
        task: &TrackedTask,
    ) -> Result<String, AdapterError> {
        // ClickUp priorities run 1 (urgent) to 4 (low), same as ours.
        let mut body = serde_json::json!({
            "name": task.title,
            "description": task.description,
            "priority": task.priority.rank(),
        });
        if let Some(due_at) = task.due_at {
            body["due_date"] = serde_json::Value::from(due_at.timestamp_millis());
        }

        // Personal tokens go in the header as-is, without a scheme.
        let response = self
            .client
            .post(format!("{}/list/{}/task", self.endpoint, list_ref))
            .header(reqwest::header::AUTHORIZATION, &self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| AdapterError::from_reqwest(OPERATION, e))?;

        let created: CreatedTask = http::read_json(OPERATION, response).await?;
        debug!(
            "Committed draft {} as ClickUp task {}",
            task.board_draft_id, created.id
        );
        Ok(created.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::session::{CandidateTask, Priority};
    use chrono::{TimeZone, Utc};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn board_for(server: &MockServer) -> ClickUpBoard {
        let config = BoardConfig {
            endpoint: server.uri(),
            token: "pk_test".to_string(),
            list_id: "list-1".to_string(),
        };
        ClickUpBoard::new(&config, http::client(Duration::from_secs(5)).unwrap())
    }

    fn approved_task() -> TrackedTask {
        let due = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let candidate = CandidateTask::new("Send contract", Priority::High)
            .with_description("to the venue")
            .with_due_at(due);
        TrackedTask::posted("draft-1", &candidate, "msg-1", Utc::now())
    }

    #[tokio::test]
    async fn test_create_task() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/list/list-1/task"))
            .and(header("Authorization", "pk_test"))
            .and(body_partial_json(serde_json::json!({
                "name": "Send contract",
                "description": "to the venue",
                "priority": 2,
                "due_date": 1772323200000i64
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "cu-9",
                "name": "Send contract"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let id = board_for(&server)
            .create_task("list-1", &approved_task())
            .await
            .unwrap();
        assert_eq!(id, "cu-9");
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = board_for(&server)
            .create_task("list-1", &approved_task())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Rejected { status: 502, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_id_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "ok": true })))
            .mount(&server)
            .await;

        let err = board_for(&server)
            .create_task("list-1", &approved_task())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Decode { .. }));
    }
}
