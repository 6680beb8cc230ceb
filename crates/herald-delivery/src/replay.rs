//! Operator-initiated re-delivery of failed events.

use herald_core::{DeliveryStatus, EventId, NotificationEvent};
use tracing::info;

use crate::{
    engine::DeliveryService,
    error::{DeliveryError, Result},
};

/// Puts terminally failed events back into the delivery cycle.
#[derive(Debug, Clone)]
pub struct ReplayService {
    service: DeliveryService,
    fallback_webhook_url: Option<String>,
}

impl ReplayService {
    /// Creates a replay service. `fallback_webhook_url` is used for events
    /// that never recorded a target.
    pub fn new(service: DeliveryService, fallback_webhook_url: Option<String>) -> Self {
        Self { service, fallback_webhook_url }
    }

    /// Resets a failed event to `pending` and immediately attempts delivery.
    ///
    /// `retry_count` and the attempt history are kept, so an event that
    /// failed by exhaustion gets exactly one more attempt.
    ///
    /// Returns `Ok(None)` if the event does not exist.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::InvalidStateTransition` if the event is not
    /// `failed`; the event is left untouched. Returns
    /// `DeliveryError::Persistence` if the reset or the delivery cannot be
    /// persisted.
    pub async fn replay(&self, event_id: &EventId) -> Result<Option<NotificationEvent>> {
        let events = self.service.events();
        let Some(mut event) = events.find_by_id(event_id).await? else {
            return Ok(None);
        };

        if event.delivery_status != DeliveryStatus::Failed {
            return Err(DeliveryError::invalid_state(event.event_id, event.delivery_status));
        }

        event.reset_for_replay();
        let event = events.update(event).await?;
        info!(
            event_id = %event.event_id,
            status = %event.delivery_status,
            retry_count = event.retry_count,
            "event reset for replay"
        );

        let url = event.webhook_url.clone().or_else(|| self.fallback_webhook_url.clone());
        self.service.deliver(&event.event_id, url.as_deref()).await
    }
}
