//! Read-side access to notification events.

use std::sync::Arc;

use herald_core::{EventFilter, EventId, EventStore, NotificationEvent};

use crate::error::Result;

/// Lists and fetches events for the HTTP layer.
#[derive(Clone)]
pub struct EventQueries {
    events: Arc<dyn EventStore>,
}

impl EventQueries {
    /// Creates a query service over `events`.
    pub fn new(events: Arc<dyn EventStore>) -> Self {
        Self { events }
    }

    /// Events matching `filter`, most recent `delivery_date` first.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Persistence` if the store fails.
    pub async fn list(&self, filter: &EventFilter) -> Result<Vec<NotificationEvent>> {
        Ok(self.events.find_all(filter).await?)
    }

    /// One event by id; absence is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Persistence` if the store fails.
    pub async fn get(&self, event_id: &EventId) -> Result<Option<NotificationEvent>> {
        Ok(self.events.find_by_id(event_id).await?)
    }
}

impl std::fmt::Debug for EventQueries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueries").finish_non_exhaustive()
    }
}
