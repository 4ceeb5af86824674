//! Draft tasks in Microsoft Planner through the Graph API.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use super::{http, PlanningBoard};
use crate::config::PlanningConfig;
use crate::error::AdapterError;
use crate::session::{CandidateTask, Priority};

const OPERATION: &str = "planner.create_task";

#[derive(Debug, Deserialize)]
struct CreatedTask {
    id: String,
}

pub struct PlannerClient {
    client: Client,
    endpoint: String,
    token: String,
    bucket_id: Option<String>,
}

impl PlannerClient {
    pub fn new(config: &PlanningConfig, client: Client) -> Self {
        info!("Initialized Planner client with endpoint: {}", config.endpoint);
        Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            bucket_id: config.bucket_id.clone().filter(|id| !id.is_empty()),
        }
    }
}

/// Planner only distinguishes 0-10 with four named bands.
fn planner_priority(priority: Priority) -> u8 {
    match priority {
        Priority::Urgent => 1,
        Priority::High => 3,
        Priority::Normal => 5,
        Priority::Low => 9,
    }
}

#[async_trait]
impl PlanningBoard for PlannerClient {
    async fn create_draft_task(
        &self,
        plan_ref: &str,
        task: &CandidateTask,
    ) -> Result<String, AdapterError> {
        let mut body = serde_json::json!({
            "planId": plan_ref,
            "title": task.title,
            "priority": planner_priority(task.priority),
        });
        if let Some(bucket_id) = &self.bucket_id {
            body["bucketId"] = serde_json::Value::String(bucket_id.clone());
        }
        if let Some(due_at) = task.due_at {
            body["dueDateTime"] = serde_json::Value::String(due_at.to_rfc3339());
        }

        let response = self
            .client
            .post(format!("{}/planner/tasks", self.endpoint))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| AdapterError::from_reqwest(OPERATION, e))?;

        let created: CreatedTask = http::read_json(OPERATION, response).await?;
        debug!("Created Planner draft {} for {:?}", created.id, task.title);
        Ok(created.id)
    }
}
