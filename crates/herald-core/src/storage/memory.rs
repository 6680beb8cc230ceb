//! In-memory storage backends.
//!
//! Used by tests and by deployments that run without a database. State
//! lives behind tokio `RwLock`s; each store supports injecting a one-shot
//! error to exercise failure paths in callers.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{sort_for_listing, EventStore, SubscriptionStore};
use crate::{
    error::{CoreError, Result},
    models::{EventFilter, EventId, EventSubscription, NotificationEvent},
};

/// Event store backed by a `HashMap`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventStore {
    events: Arc<RwLock<HashMap<EventId, NotificationEvent>>>,
    find_error: Arc<RwLock<Option<CoreError>>>,
    update_error: Arc<RwLock<Option<CoreError>>>,
}

impl InMemoryEventStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `find_all` call fail with `error`.
    pub async fn inject_find_error(&self, error: CoreError) {
        *self.find_error.write().await = Some(error);
    }

    /// Makes the next `update` call fail with `error`.
    pub async fn inject_update_error(&self, error: CoreError) {
        *self.update_error.write().await = Some(error);
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn find_all(&self, filter: &EventFilter) -> Result<Vec<NotificationEvent>> {
        if let Some(error) = self.find_error.write().await.take() {
            return Err(error);
        }

        let mut events: Vec<_> =
            self.events.read().await.values().filter(|e| filter.matches(e)).cloned().collect();
        sort_for_listing(&mut events);
        Ok(events)
    }

    async fn find_by_id(&self, event_id: &EventId) -> Result<Option<NotificationEvent>> {
        Ok(self.events.read().await.get(event_id).cloned())
    }

    async fn save(&self, event: NotificationEvent) -> Result<NotificationEvent> {
        self.events.write().await.insert(event.event_id.clone(), event.clone());
        Ok(event)
    }

    async fn update(&self, mut event: NotificationEvent) -> Result<NotificationEvent> {
        if let Some(error) = self.update_error.write().await.take() {
            return Err(error);
        }

        let mut events = self.events.write().await;
        let stored = events
            .get_mut(&event.event_id)
            .ok_or_else(|| CoreError::NotFound(format!("event {} not found", event.event_id)))?;

        if stored.version != event.version {
            return Err(CoreError::Conflict(format!(
                "event {} was modified concurrently (expected version {}, found {})",
                event.event_id, event.version, stored.version
            )));
        }

        event.version += 1;
        *stored = event.clone();
        Ok(event)
    }
}

/// Subscription store keyed by `(client_id, event_type)`.
#[derive(Debug, Clone, Default)]
pub struct InMemorySubscriptionStore {
    subscriptions: Arc<RwLock<HashMap<(String, String), EventSubscription>>>,
    find_error: Arc<RwLock<Option<CoreError>>>,
}

impl InMemorySubscriptionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next lookup fail with `error`.
    pub async fn inject_find_error(&self, error: CoreError) {
        *self.find_error.write().await = Some(error);
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn find_active_subscriptions(
        &self,
        client_id: &str,
        event_type: &str,
    ) -> Result<Vec<EventSubscription>> {
        if let Some(error) = self.find_error.write().await.take() {
            return Err(error);
        }

        let subscriptions = self.subscriptions.read().await;
        Ok(subscriptions
            .get(&(client_id.to_string(), event_type.to_string()))
            .filter(|s| s.active)
            .cloned()
            .into_iter()
            .collect())
    }

    async fn save(&self, subscription: EventSubscription) -> Result<EventSubscription> {
        let key = (subscription.client_id.clone(), subscription.event_type.clone());
        self.subscriptions.write().await.insert(key, subscription.clone());
        Ok(subscription)
    }
}
