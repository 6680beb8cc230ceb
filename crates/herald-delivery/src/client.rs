//! HTTP client for webhook delivery with configurable timeouts.
//!
//! A sender performs exactly one outbound attempt and reports the outcome as
//! a [`DeliveryResult`]. Transport errors, timeouts and non-2xx responses all
//! become `success = false` results; nothing is raised to the caller.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_core::{Clock, DeliveryAttempt, NotificationEvent};
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};

use crate::error::{DeliveryError, Result};

/// Maximum number of response body bytes kept in error messages.
const MAX_ERROR_BODY_SIZE: usize = 512;

/// Configuration for the webhook delivery client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Per-request timeout.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            user_agent: "Herald-Webhook-Delivery/1.0".to_string(),
        }
    }
}

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    /// Whether the receiver acknowledged with a 2xx status.
    pub success: bool,
    /// HTTP status, absent for transport failures.
    pub status_code: Option<u16>,
    /// Failure description.
    pub error: Option<String>,
    /// When the outcome became known.
    pub timestamp: DateTime<Utc>,
}

impl DeliveryResult {
    /// Successful delivery acknowledged with `status_code`.
    pub fn succeeded(status_code: u16, timestamp: DateTime<Utc>) -> Self {
        Self { success: true, status_code: Some(status_code), error: None, timestamp }
    }

    /// Failed delivery described by `error`.
    pub fn failed(error: &DeliveryError, timestamp: DateTime<Utc>) -> Self {
        Self {
            success: false,
            status_code: error.status_code(),
            error: Some(error.to_string()),
            timestamp,
        }
    }

    /// Converts the result into the attempt record stored with the event.
    pub fn to_attempt(&self) -> DeliveryAttempt {
        if self.success {
            DeliveryAttempt::success(self.timestamp, self.status_code)
        } else {
            DeliveryAttempt::failure(
                self.timestamp,
                self.status_code,
                self.error.clone().unwrap_or_else(|| "delivery failed".to_string()),
            )
        }
    }
}

/// Performs one outbound webhook delivery.
#[async_trait]
pub trait WebhookSender: Send + Sync + 'static {
    /// Delivers `event` to `url`. Never fails; failures are reported in the
    /// returned result.
    async fn deliver(&self, event: &NotificationEvent, url: &str) -> DeliveryResult;
}

/// Webhook sender backed by `reqwest`.
///
/// Posts the full event as JSON with an `X-Event-Id` header receivers can
/// use for deduplication.
#[derive(Debug, Clone)]
pub struct HttpWebhookSender {
    client: reqwest::Client,
    config: ClientConfig,
    clock: Arc<dyn Clock>,
}

impl HttpWebhookSender {
    /// Creates a new sender with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the HTTP client cannot
    /// be configured with the provided settings.
    pub fn new(config: ClientConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config, clock })
    }

    /// Sends the request and classifies the response.
    async fn send(&self, event: &NotificationEvent, url: &str) -> Result<u16> {
        let response = self
            .client
            .post(url)
            .header("X-Event-Id", event.event_id.as_str())
            .json(event)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    let timeout_ms =
                        u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX);
                    DeliveryError::timeout(timeout_ms)
                } else if e.is_connect() {
                    DeliveryError::network(format!("connection failed: {e}"))
                } else {
                    DeliveryError::network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(status.as_u16());
        }

        let body = match response.text().await {
            Ok(text) => truncate(text),
            Err(e) => format!("[failed to read response body: {e}]"),
        };

        let code = status.as_u16();
        if status.is_client_error() {
            Err(DeliveryError::client_error(code, body))
        } else if status.is_server_error() {
            Err(DeliveryError::server_error(code, body))
        } else {
            Err(DeliveryError::unexpected_status(code, body))
        }
    }
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY_SIZE {
        let mut cut = MAX_ERROR_BODY_SIZE;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("... (truncated)");
    }
    body
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn deliver(&self, event: &NotificationEvent, url: &str) -> DeliveryResult {
        let span = info_span!(
            "webhook_delivery",
            event_id = %event.event_id,
            url = %url,
            retry_count = event.retry_count
        );

        async move {
            tracing::debug!("starting webhook delivery");

            match self.send(event, url).await {
                Ok(status_code) => {
                    tracing::info!(status = status_code, "webhook delivered successfully");
                    DeliveryResult::succeeded(status_code, self.clock.now())
                },
                Err(error) => {
                    tracing::warn!(
                        status = error.status_code(),
                        category = %error.category(),
                        error = %error,
                        "webhook delivery failed"
                    );
                    DeliveryResult::failed(&error, self.clock.now())
                },
            }
        }
        .instrument(span)
        .await
    }
}

pub mod mock {
    //! Scripted sender for testing delivery logic without a network.
    //!
    //! Responses are consumed in order; once the script runs out the
    //! fallback response is used. Every call is recorded for assertions.

    use std::{collections::VecDeque, sync::Arc};

    use async_trait::async_trait;
    use herald_core::{Clock, EventId, NotificationEvent};
    use tokio::sync::Mutex;

    use super::{DeliveryResult, WebhookSender};
    use crate::error::DeliveryError;

    /// Canned outcome for one delivery call.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ScriptedResponse {
        /// Receiver answered with this HTTP status.
        Status(u16),
        /// Transport failure with this message.
        NetworkError(String),
        /// Request timed out.
        Timeout,
    }

    /// Sender that replays a script of responses.
    #[derive(Debug, Clone)]
    pub struct ScriptedSender {
        script: Arc<Mutex<VecDeque<ScriptedResponse>>>,
        fallback: ScriptedResponse,
        calls: Arc<Mutex<Vec<(EventId, String)>>>,
        clock: Arc<dyn Clock>,
    }

    impl ScriptedSender {
        /// Sender answering every call with `response`.
        pub fn always(response: ScriptedResponse, clock: Arc<dyn Clock>) -> Self {
            Self {
                script: Arc::new(Mutex::new(VecDeque::new())),
                fallback: response,
                calls: Arc::new(Mutex::new(Vec::new())),
                clock,
            }
        }

        /// Sender answering every call with HTTP 200.
        pub fn succeeding(clock: Arc<dyn Clock>) -> Self {
            Self::always(ScriptedResponse::Status(200), clock)
        }

        /// Queues a response ahead of the fallback.
        pub async fn push(&self, response: ScriptedResponse) {
            self.script.lock().await.push_back(response);
        }

        /// Every `(event_id, url)` pair delivered so far, in call order.
        pub async fn calls(&self) -> Vec<(EventId, String)> {
            self.calls.lock().await.clone()
        }

        /// Number of delivery calls made so far.
        pub async fn call_count(&self) -> usize {
            self.calls.lock().await.len()
        }
    }

    #[async_trait]
    impl WebhookSender for ScriptedSender {
        async fn deliver(&self, event: &NotificationEvent, url: &str) -> DeliveryResult {
            self.calls.lock().await.push((event.event_id.clone(), url.to_string()));

            let response =
                self.script.lock().await.pop_front().unwrap_or_else(|| self.fallback.clone());
            let now = self.clock.now();

            match response {
                ScriptedResponse::Status(code) if (200..300).contains(&code) => {
                    DeliveryResult::succeeded(code, now)
                },
                ScriptedResponse::Status(code) if (400..500).contains(&code) => {
                    DeliveryResult::failed(&DeliveryError::client_error(code, ""), now)
                },
                ScriptedResponse::Status(code) if (500..600).contains(&code) => {
                    DeliveryResult::failed(&DeliveryError::server_error(code, ""), now)
                },
                ScriptedResponse::Status(code) => {
                    DeliveryResult::failed(&DeliveryError::unexpected_status(code, ""), now)
                },
                ScriptedResponse::NetworkError(message) => {
                    DeliveryResult::failed(&DeliveryError::network(message), now)
                },
                ScriptedResponse::Timeout => {
                    DeliveryResult::failed(&DeliveryError::timeout(5000), now)
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use herald_core::AttemptStatus;

    use super::*;

    #[test]
    fn failed_result_keeps_status_code() {
        let now = Utc::now();
        let result = DeliveryResult::failed(&DeliveryError::server_error(502, "bad gateway"), now);

        let attempt = result.to_attempt();
        assert_eq!(attempt.status, AttemptStatus::Failure);
        assert_eq!(attempt.status_code, Some(502));
        assert_eq!(attempt.error_message.as_deref(), Some("server error: HTTP 502"));
        assert_eq!(attempt.attempt_date, now);
    }

    #[test]
    fn timeout_result_has_no_status_code() {
        let result = DeliveryResult::failed(&DeliveryError::timeout(5000), Utc::now());
        assert!(!result.success);
        assert!(result.status_code.is_none());
    }

    #[test]
    fn long_bodies_are_truncated_on_char_boundary() {
        let body = "é".repeat(400);
        let truncated = truncate(body);
        assert!(truncated.ends_with("... (truncated)"));
        assert!(truncated.len() <= MAX_ERROR_BODY_SIZE + "... (truncated)".len());
    }

    #[test]
    fn default_config_uses_five_second_timeout() {
        assert_eq!(ClientConfig::default().timeout, Duration::from_secs(5));
    }
}
