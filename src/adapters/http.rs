use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error};

use crate::error::AdapterError;

const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);
const MAX_ERROR_BODY: usize = 512;

pub(crate) fn client(timeout: Duration) -> anyhow::Result<Client> {
    let client = Client::builder()
        .timeout(timeout)
        .user_agent(concat!("meetbridge/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Map a response to its JSON body, or to the matching `AdapterError`.
pub(crate) async fn read_json<T: DeserializeOwned>(
    operation: &'static str,
    response: Response,
) -> Result<T, AdapterError> {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RETRY_AFTER);
        return Err(AdapterError::RateLimited {
            operation,
            retry_after,
        });
    }

    let text = response
        .text()
        .await
        .map_err(|e| AdapterError::from_reqwest(operation, e))?;

    if !status.is_success() {
        error!("{} failed with status {}: {}", operation, status, text);
        return Err(AdapterError::Rejected {
            operation,
            status: status.as_u16(),
            body: truncate(&text),
        });
    }

    debug!("{} succeeded ({} bytes)", operation, text.len());
    serde_json::from_str(&text).map_err(|e| AdapterError::Decode {
        operation,
        reason: e.to_string(),
    })
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
