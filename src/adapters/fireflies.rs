//! Transcript source backed by the Fireflies GraphQL API.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use super::{http, Transcript, TranscriptSource};
use crate::config::TranscriptsConfig;
use crate::error::AdapterError;

const OPERATION: &str = "fireflies.transcript";

const TRANSCRIPT_QUERY: &str = "query Transcript($transcriptId: String!) { \
     transcript(id: $transcriptId) { title sentences { speaker_name text } } }";

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<TranscriptData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptData {
    transcript: Option<TranscriptBody>,
}

#[derive(Debug, Deserialize)]
struct TranscriptBody {
    title: Option<String>,
    #[serde(default)]
    sentences: Vec<Sentence>,
}

#[derive(Debug, Deserialize)]
struct Sentence {
    speaker_name: Option<String>,
    text: String,
}

pub struct FirefliesClient {
    client: Client,
    endpoint: String,
    token: String,
}

impl FirefliesClient {
    pub fn new(config: &TranscriptsConfig, client: Client) -> Self {
        info!("Initialized Fireflies client with endpoint: {}", config.endpoint);
        Self {
            client,
            endpoint: config.endpoint.clone(),
            token: config.token.clone(),
        }
    }
}

#[async_trait]
impl TranscriptSource for FirefliesClient {
    async fn fetch_transcript(&self, meeting_id: &str) -> Result<Transcript, AdapterError> {
        debug!("Fetching transcript for meeting {}", meeting_id);

        let body = serde_json::json!({
            "query": TRANSCRIPT_QUERY,
            "variables": { "transcriptId": meeting_id },
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| AdapterError::from_reqwest(OPERATION, e))?;

        let parsed: GraphQlResponse = http::read_json(OPERATION, response).await?;

        if let Some(first) = parsed.errors.first() {
            return Err(AdapterError::Rejected {
                operation: OPERATION,
                status: 200,
                body: first.message.clone(),
            });
        }

        let transcript = parsed
            .data
            .and_then(|data| data.transcript)
            .ok_or_else(|| AdapterError::Decode {
                operation: OPERATION,
                reason: format!("no transcript returned for {}", meeting_id),
            })?;

        Ok(Transcript {
            title: transcript.title,
            content: render_sentences(&transcript.sentences),
        })
    }
}

fn render_sentences(sentences: &[Sentence]) -> String {
    sentences
        .iter()
        .map(|sentence| match &sentence.speaker_name {
            Some(speaker) if !speaker.is_empty() => format!("{}: {}", speaker, sentence.text),
            _ => sentence.text.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> FirefliesClient {
        let config = TranscriptsConfig {
            endpoint: server.uri(),
            token: "ff-token".to_string(),
        };
        FirefliesClient::new(&config, http::client(Duration::from_secs(5)).unwrap())
    }

    #[tokio::test]
    async fn test_fetch_transcript_renders_speakers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("Authorization", "Bearer ff-token"))
            .and(body_partial_json(serde_json::json!({
                "variables": { "transcriptId": "M1" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "transcript": {
                    "title": "Weekly sync",
                    "sentences": [
                        { "speaker_name": "Ana", "text": "Send the contract." },
                        { "speaker_name": null, "text": "Agreed." }
                    ]
                }}
            })))
            .mount(&server)
            .await;

        let transcript = client_for(&server).fetch_transcript("M1").await.unwrap();
        assert_eq!(transcript.title.as_deref(), Some("Weekly sync"));
        assert_eq!(transcript.content, "Ana: Send the contract.\nAgreed.");
    }

    #[tokio::test]
    async fn test_graphql_errors_are_rejections() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": null,
                "errors": [{ "message": "object_not_found" }]
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).fetch_transcript("M1").await.unwrap_err();
        assert!(matches!(err, AdapterError::Rejected { body, .. } if body == "object_not_found"));
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "12"))
            .mount(&server)
            .await;

        let err = client_for(&server).fetch_transcript("M1").await.unwrap_err();
        assert!(matches!(
            err,
            AdapterError::RateLimited { retry_after, .. } if retry_after == Duration::from_secs(12)
        ));
        assert!(err.is_retryable());
    }
}
