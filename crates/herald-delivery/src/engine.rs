//! Delivery orchestrator.
//!
//! Runs one delivery attempt for one event: resolve the target URL, call the
//! sender, append the attempt, apply the retry policy and persist the new
//! state. Both the pending scanner and the replay service go through
//! [`DeliveryService::deliver`].

use std::sync::Arc;

use herald_core::{
    Clock, DeliveryStatus, EventId, EventStore, NotificationEvent, SubscriptionStore,
};
use tracing::{debug, info, warn};

use crate::{
    client::WebhookSender,
    error::Result,
    retry::{RetryDecision, RetryPolicy},
};

/// Orchestrates single delivery attempts and lifecycle transitions.
#[derive(Clone)]
pub struct DeliveryService {
    events: Arc<dyn EventStore>,
    subscriptions: Option<Arc<dyn SubscriptionStore>>,
    sender: Arc<dyn WebhookSender>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl DeliveryService {
    /// Creates an orchestrator without subscription lookup.
    pub fn new(
        events: Arc<dyn EventStore>,
        sender: Arc<dyn WebhookSender>,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { events, subscriptions: None, sender, policy, clock }
    }

    /// Enables resolving targets from client subscriptions when no explicit
    /// URL is supplied.
    #[must_use]
    pub fn with_subscriptions(mut self, subscriptions: Arc<dyn SubscriptionStore>) -> Self {
        self.subscriptions = Some(subscriptions);
        self
    }

    /// Event store the orchestrator persists through.
    pub fn events(&self) -> Arc<dyn EventStore> {
        self.events.clone()
    }

    /// Clock used for all timestamps and retry scheduling.
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Retry policy applied after failed attempts.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs one delivery attempt for `event_id`.
    ///
    /// Returns `Ok(None)` if the event does not exist. Completed events are
    /// returned unchanged without contacting the receiver. Delivery failures
    /// are recorded on the event and never returned as errors. When no target
    /// can be resolved the event fails terminally without an attempt record.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Persistence` if loading, subscription lookup
    /// or the final update fails, including `CoreError::Conflict` when
    /// another trigger modified the event concurrently.
    pub async fn deliver(
        &self,
        event_id: &EventId,
        webhook_url: Option<&str>,
    ) -> Result<Option<NotificationEvent>> {
        let Some(mut event) = self.events.find_by_id(event_id).await? else {
            debug!(event_id = %event_id, "event not found, nothing to deliver");
            return Ok(None);
        };

        if event.delivery_status == DeliveryStatus::Completed {
            debug!(event_id = %event.event_id, "event already delivered, skipping attempt");
            return Ok(Some(event));
        }

        let Some(url) = self.resolve_target(&event, webhook_url).await? else {
            warn!(
                event_id = %event.event_id,
                status = %DeliveryStatus::Failed,
                "no webhook target resolvable, failing event"
            );
            event.mark_failed();
            event.last_retry_date = Some(self.clock.now());
            return Ok(Some(self.events.update(event).await?));
        };

        let result = self.sender.deliver(&event, &url).await;
        event.record_attempt(url, result.to_attempt());

        if result.success {
            event.mark_completed();
            info!(
                event_id = %event.event_id,
                status = %event.delivery_status,
                status_code = result.status_code,
                "event delivered"
            );
        } else {
            match self.policy.decide(&event, self.clock.now()) {
                RetryDecision::Retry { next_attempt_at, reason } => {
                    event.schedule_retry(next_attempt_at);
                    info!(
                        event_id = %event.event_id,
                        status = %event.delivery_status,
                        retry_count = event.retry_count,
                        next_retry_at = %next_attempt_at,
                        reason = %reason,
                        "delivery failed, retry scheduled"
                    );
                },
                RetryDecision::GiveUp { reason } => {
                    event.mark_failed();
                    warn!(
                        event_id = %event.event_id,
                        status = %event.delivery_status,
                        retry_count = event.retry_count,
                        reason = %reason,
                        "delivery failed permanently"
                    );
                },
            }
        }

        Ok(Some(self.events.update(event).await?))
    }

    /// Explicit URL first, then the first active subscription for the
    /// event's client and type.
    async fn resolve_target(
        &self,
        event: &NotificationEvent,
        explicit: Option<&str>,
    ) -> Result<Option<String>> {
        if let Some(url) = explicit.filter(|url| !url.trim().is_empty()) {
            return Ok(Some(url.to_string()));
        }

        let (Some(subscriptions), Some(client_id)) = (&self.subscriptions, &event.client_id) else {
            return Ok(None);
        };
        if event.event_type.is_empty() {
            return Ok(None);
        }

        let found = subscriptions.find_active_subscriptions(client_id, &event.event_type).await?;
        Ok(found.into_iter().next().map(|subscription| subscription.webhook_url))
    }
}

impl std::fmt::Debug for DeliveryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryService")
            .field("policy", &self.policy)
            .field("subscriptions", &self.subscriptions.is_some())
            .finish_non_exhaustive()
    }
}
