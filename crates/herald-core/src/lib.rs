//! Core domain models and storage contracts.
//!
//! Provides the notification event model and its lifecycle transitions,
//! the storage traits the delivery engine persists through, and the clock
//! abstraction used for every scheduling decision. All other herald crates
//! depend on these foundational types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{
    AttemptStatus, DeliveryAttempt, DeliveryStatus, EventFilter, EventId, EventSubscription,
    NotificationEvent, DEFAULT_MAX_RETRIES,
};
pub use storage::{EventStore, SubscriptionStore};
pub use time::{Clock, RealClock, TestClock};
