//! Meeting ingress endpoints.
//!
//! - POST /webhook/meeting: transcript-ready notification. Answers before
//!   processing finishes.
//! - POST /meetings/:id/process: manual trigger. Waits for the outcome.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, info_span, Instrument};

use super::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::ingress::{Admission, MeetingRequest};

#[derive(Debug, Deserialize)]
pub struct MeetingNotification {
    #[serde(alias = "meetingId")]
    pub meeting_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "eventType")]
    pub event_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProcessRequest {
    pub title: Option<String>,
    pub content: Option<String>,
}

/// Notifications without an event type are treated as transcript-ready.
fn is_transcript_ready(event_type: Option<&str>) -> bool {
    match event_type {
        None => true,
        Some(event) => {
            let event = event.to_ascii_lowercase();
            event.contains("transcri") && (event.contains("complete") || event.contains("ready"))
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhook/meeting", post(meeting_webhook))
        .route("/meetings/:id/process", post(process_meeting))
        .with_state(state)
}

async fn meeting_webhook(
    State(state): State<AppState>,
    Json(notification): Json<MeetingNotification>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let meeting_id = notification.meeting_id.trim().to_string();
    if meeting_id.is_empty() {
        return Err(ApiError::bad_request("meetingId is required"));
    }

    info!(
        "Webhook for meeting {} (event {:?})",
        meeting_id, notification.event_type
    );

    if !is_transcript_ready(notification.event_type.as_deref()) {
        return Ok((
            StatusCode::OK,
            Json(json!({
                "accepted": false,
                "meetingId": meeting_id,
                "status": "ignored",
            })),
        ));
    }

    if state.ingress.is_processed(&meeting_id)? {
        return Ok((
            StatusCode::OK,
            Json(json!({
                "accepted": false,
                "meetingId": meeting_id,
                "status": "already_processed",
            })),
        ));
    }

    if state.ingress.is_in_flight(&meeting_id) {
        return Ok((
            StatusCode::OK,
            Json(json!({
                "accepted": false,
                "meetingId": meeting_id,
                "status": "in_flight",
            })),
        ));
    }

    let mut request = MeetingRequest::new(&meeting_id);
    request.title = notification.title;

    let ingress = state.ingress.clone();
    let run_id = uuid::Uuid::new_v4();
    let span = info_span!("admit", %run_id, meeting_id = %meeting_id);
    tokio::spawn(
        async move {
            match ingress.admit(request).await {
                Ok(admission) => info!("Webhook processing finished: {:?}", admission),
                Err(err) => error!("Webhook processing failed: {}", err),
            }
        }
        .instrument(span),
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "accepted": true,
            "meetingId": meeting_id,
            "status": "accepted",
        })),
    ))
}

async fn process_meeting(
    State(state): State<AppState>,
    Path(meeting_id): Path<String>,
    body: Option<Json<ProcessRequest>>,
) -> ApiResult<Json<Admission>> {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    let request = MeetingRequest {
        meeting_id,
        title: body.title,
        content: body.content,
    };

    info!("Manual processing requested for meeting {}", request.meeting_id);
    let run_id = uuid::Uuid::new_v4();
    let span = info_span!("admit", %run_id, meeting_id = %request.meeting_id);
    let admission = state.ingress.admit(request).instrument(span).await?;
    Ok(Json(admission))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_ready_events() {
        assert!(is_transcript_ready(None));
        assert!(is_transcript_ready(Some("Transcription completed")));
        assert!(is_transcript_ready(Some("transcript_ready")));
        assert!(!is_transcript_ready(Some("meeting.started")));
        assert!(!is_transcript_ready(Some("Transcription started")));
    }

    #[test]
    fn test_notification_accepts_both_casings() {
        let camel: MeetingNotification =
            serde_json::from_value(json!({ "meetingId": "M1", "eventType": "x" })).unwrap();
        let snake: MeetingNotification =
            serde_json::from_value(json!({ "meeting_id": "M1" })).unwrap();
        assert_eq!(camel.meeting_id, "M1");
        assert_eq!(camel.event_type.as_deref(), Some("x"));
        assert_eq!(snake.meeting_id, "M1");
    }
}
