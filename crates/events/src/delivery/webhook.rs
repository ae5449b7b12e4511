//! Push delivery through an HTTP gateway with exponential-backoff retry.
//!
//! [`WebhookPushDispatcher`] POSTs `{actor_id, payload, sent_at}` to the
//! configured push gateway. Failed attempts are retried up to three times
//! with exponential backoff (1 s, 2 s, 4 s).

use std::time::Duration;

use async_trait::async_trait;
use jobline_core::collaborators::{CollaboratorError, PushDispatcher};
use jobline_core::types::ActorId;

/// Retry delays in seconds (exponential backoff: 1s, 2s, 4s).
const RETRY_DELAYS_SECS: [u64; 3] = [1, 2, 4];

/// HTTP request timeout for a single delivery attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The gateway returned a non-2xx status code.
    #[error("Push gateway returned HTTP {0}")]
    HttpStatus(u16),
}

// ---------------------------------------------------------------------------
// WebhookPushDispatcher
// ---------------------------------------------------------------------------

pub struct WebhookPushDispatcher {
    client: reqwest::Client,
    url: String,
    retry_delays: Vec<Duration>,
}

impl WebhookPushDispatcher {
    pub fn new(url: impl Into<String>) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
            retry_delays: RETRY_DELAYS_SECS
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
        })
    }

    /// Override the backoff schedule.
    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Deliver a notification with retry. Returns on the first success.
    pub async fn deliver(
        &self,
        actor_id: ActorId,
        payload: &serde_json::Value,
    ) -> Result<(), WebhookError> {
        let body = serde_json::json!({
            "actor_id": actor_id,
            "payload": payload,
            "sent_at": chrono::Utc::now(),
        });

        let mut last_err: Option<WebhookError> = None;

        for (attempt, delay) in self.retry_delays.iter().enumerate() {
            match self.try_send(&body).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        actor_id,
                        error = %e,
                        "Push delivery attempt failed, retrying"
                    );
                    last_err = Some(e);
                    tokio::time::sleep(*delay).await;
                }
            }
        }

        // Final attempt after the last backoff.
        match self.try_send(&body).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(actor_id, error = %e, "Push delivery failed after all retries");
                Err(last_err.unwrap_or(e))
            }
        }
    }

    /// Execute a single POST request and check the response status.
    async fn try_send(&self, body: &serde_json::Value) -> Result<(), WebhookError> {
        let response = self.client.post(&self.url).json(body).send().await?;
        if !response.status().is_success() {
            return Err(WebhookError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl PushDispatcher for WebhookPushDispatcher {
    async fn enqueue(
        &self,
        actor_id: ActorId,
        payload: &serde_json::Value,
    ) -> Result<(), CollaboratorError> {
        self.deliver(actor_id, payload)
            .await
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
