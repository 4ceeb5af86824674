//! Approval session inspection and polling.

use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;

use super::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::approval::PollReport;
use crate::session::{ApprovalSession, SessionSummary};

#[derive(Debug, Deserialize, Default)]
pub struct ListParams {
    /// Maximum results (default 20)
    pub limit: Option<usize>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sessions", get(list_sessions))
        .route("/sessions/latest", get(latest_session))
        .route("/sessions/:id", get(get_session))
        .route("/sessions/:id/poll", post(poll_session))
        .route("/poll", post(poll_open_sessions))
        .with_state(state)
}

/// GET /sessions - newest first.
async fn list_sessions(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<SessionSummary>>> {
    let sessions = state.sessions.list_sessions(Some(params.limit.unwrap_or(20)))?;
    Ok(Json(sessions.iter().map(SessionSummary::from).collect()))
}

async fn latest_session(State(state): State<AppState>) -> ApiResult<Json<ApprovalSession>> {
    let session = state
        .sessions
        .get_latest_session()?
        .ok_or_else(|| ApiError::not_found("No approval sessions yet"))?;
    Ok(Json(session))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApprovalSession>> {
    Ok(Json(state.sessions.get_session(&id)?))
}

/// POST /sessions/:id/poll - resolve reactions and commit approved tasks.
async fn poll_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<PollReport>> {
    let report = state
        .poller
        .poll_session(Some(&id))
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Session {} not found", id)))?;
    Ok(Json(report))
}

/// POST /poll - one pass over every open session.
async fn poll_open_sessions(State(state): State<AppState>) -> ApiResult<Json<Vec<PollReport>>> {
    Ok(Json(state.poller.poll_open_sessions().await?))
}
