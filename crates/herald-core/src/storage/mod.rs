//! Persistence contracts for notification events and subscriptions.
//!
//! The delivery engine only talks to these traits. Two backends ship with
//! the crate: [`memory`] for tests and database-less deployments, and
//! [`postgres`] for production.
//!
//! `EventStore::update` is a compare-and-swap on [`NotificationEvent::version`].
//! Two triggers racing on the same event cannot silently overwrite each
//! other's attempt records; the loser observes [`CoreError::Conflict`].
//!
//! [`CoreError::Conflict`]: crate::error::CoreError::Conflict

use async_trait::async_trait;

pub mod memory;
pub mod postgres;

use crate::{
    error::Result,
    models::{EventFilter, EventId, EventSubscription, NotificationEvent},
};

pub use memory::{InMemoryEventStore, InMemorySubscriptionStore};
pub use postgres::{PostgresEventStore, PostgresSubscriptionStore};

/// Storage operations for notification events.
#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    /// Lists events matching `filter`, most recent `delivery_date` first.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the backend fails.
    async fn find_all(&self, filter: &EventFilter) -> Result<Vec<NotificationEvent>>;

    /// Loads one event with its full attempt history.
    ///
    /// Absence is `Ok(None)`, never an error.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the backend fails.
    async fn find_by_id(&self, event_id: &EventId) -> Result<Option<NotificationEvent>>;

    /// Inserts or replaces an event.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the backend fails.
    async fn save(&self, event: NotificationEvent) -> Result<NotificationEvent>;

    /// Conditionally replaces an existing event.
    ///
    /// The write only succeeds if the stored version equals `event.version`.
    /// The returned event carries the bumped version.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the event does not exist and
    /// `CoreError::Conflict` if it was modified since it was read.
    async fn update(&self, event: NotificationEvent) -> Result<NotificationEvent>;
}

/// Storage operations for client webhook subscriptions.
#[async_trait]
pub trait SubscriptionStore: Send + Sync + 'static {
    /// Active subscriptions for a client and event type.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the backend fails.
    async fn find_active_subscriptions(
        &self,
        client_id: &str,
        event_type: &str,
    ) -> Result<Vec<EventSubscription>>;

    /// Inserts or replaces the subscription for its `(client_id, event_type)`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the backend fails.
    async fn save(&self, subscription: EventSubscription) -> Result<EventSubscription>;
}

/// Sorts events for listing: newest `delivery_date` first, ties by id.
pub(crate) fn sort_for_listing(events: &mut [NotificationEvent]) {
    events.sort_by(|a, b| {
        b.delivery_date.cmp(&a.delivery_date).then_with(|| a.event_id.cmp(&b.event_id))
    });
}
