//! HTTP surface of the herald webhook delivery service.
//!
//! Exposes read access to notification events, the replay trigger and a
//! health check, plus the layered [`Config`] the binary starts from.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod server;

use std::sync::Arc;

use herald_core::Clock;
use herald_delivery::{EventQueries, ReplayService};

pub use config::Config;
pub use server::{create_router, start_server};

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Read-side event access.
    pub queries: EventQueries,
    /// Replay trigger for failed events.
    pub replay: ReplayService,
    /// Clock for response timestamps.
    pub clock: Arc<dyn Clock>,
    /// Static API key; requests are unauthenticated when absent.
    pub api_key: Option<Arc<str>>,
}

impl AppState {
    /// Creates state without API key protection.
    pub fn new(queries: EventQueries, replay: ReplayService, clock: Arc<dyn Clock>) -> Self {
        Self { queries, replay, clock, api_key: None }
    }

    /// Requires `api_key` on every event route.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<Arc<str>>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}
