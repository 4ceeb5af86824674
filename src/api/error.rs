//! API error handling for consistent JSON error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::error::OrchestratorError;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": true,
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        let status = match &err {
            OrchestratorError::SessionNotFound(_) | OrchestratorError::TaskNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            OrchestratorError::PollInProgress
            | OrchestratorError::StaleVersion { .. }
            | OrchestratorError::DuplicateTask { .. }
            | OrchestratorError::InvalidTransition { .. } => StatusCode::CONFLICT,
            OrchestratorError::Adapter(adapter) if adapter.is_retryable() => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {}", err);
        }
        Self::new(status, err.to_string())
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orchestrator_errors_map_to_status() {
        let not_found: ApiError = OrchestratorError::SessionNotFound("s".to_string()).into();
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let busy: ApiError = OrchestratorError::PollInProgress.into();
        assert_eq!(busy.status(), StatusCode::CONFLICT);

        let duplicate: ApiError = OrchestratorError::DuplicateTask {
            session_id: "s".to_string(),
            task_id: "draft-1".to_string(),
        }
        .into();
        assert_eq!(duplicate.status(), StatusCode::CONFLICT);

        let storage: ApiError = OrchestratorError::Storage(anyhow::anyhow!("disk full")).into();
        assert_eq!(storage.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
