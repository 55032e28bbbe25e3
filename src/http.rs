//! Shared HTTP plumbing for the embedding and completion services.
//!
//! Requests are JSON `POST`s. Failures are classified into [`ServiceError`]
//! so the web front end can report upstream problems distinctly from bad
//! input. Retries are opt-in (`max_retries`, default 0):
//! - HTTP 429 and 5xx → retry
//! - other HTTP 4xx → fail immediately
//! - transport errors → retry
//! - backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Longest response body excerpt carried in an error.
const BODY_SNIPPET_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{service} request failed: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{service} returned HTTP {status}: {body}")]
    Status {
        service: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("{service} returned an unusable response: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },
}

impl ServiceError {
    pub fn decode(service: &'static str, message: impl Into<String>) -> Self {
        ServiceError::Decode {
            service,
            message: message.into(),
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Transport { .. } => true,
            ServiceError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            ServiceError::Decode { .. } => false,
        }
    }
}

/// Build a client with the given request timeout.
pub fn client_with_timeout(timeout_secs: u64) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Send the request produced by `build` and decode the JSON body as `T`,
/// retrying transient failures up to `max_retries` times.
pub async fn send_json<T, F>(
    service: &'static str,
    max_retries: u32,
    build: F,
) -> Result<T, ServiceError>
where
    T: DeserializeOwned,
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut attempt = 0u32;
    loop {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            debug!(service, attempt, delay_secs = delay.as_secs(), "retrying");
            tokio::time::sleep(delay).await;
        }

        match send_once(service, &build).await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                warn!(service, attempt, error = %e, "transient failure");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn send_once<T, F>(service: &'static str, build: &F) -> Result<T, ServiceError>
where
    T: DeserializeOwned,
    F: Fn() -> reqwest::RequestBuilder,
{
    let response = build()
        .send()
        .await
        .map_err(|source| ServiceError::Transport { service, source })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ServiceError::Status {
            service,
            status,
            body: snippet(&body),
        });
    }

    let text = response
        .text()
        .await
        .map_err(|source| ServiceError::Transport { service, source })?;
    serde_json::from_str(&text).map_err(|e| ServiceError::decode(service, e.to_string()))
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= BODY_SNIPPET_CHARS {
        trimmed.to_string()
    } else {
        let mut s: String = trimmed.chars().take(BODY_SNIPPET_CHARS).collect();
        s.push('…');
        s
    }
}
