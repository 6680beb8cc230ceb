//! Webhook delivery engine with at-least-once retry semantics.
//!
//! This crate implements everything that decides whether and when a
//! notification event is delivered:
//!
//! 1. **Send** - [`client::WebhookSender`] performs one HTTP attempt
//! 2. **Decide** - [`retry::RetryPolicy`] applies exponential backoff with
//!    jitter after a failure
//! 3. **Orchestrate** - [`engine::DeliveryService`] records the attempt and
//!    moves the event through `pending`, `retrying`, `completed` and `failed`
//! 4. **Sweep** - [`scanner::PendingScanner`] periodically feeds due events
//!    to the orchestrator
//! 5. **Replay** - [`replay::ReplayService`] puts failed events back into
//!    the cycle on demand
//!
//! Receivers deduplicate by event id; delivery is at-least-once and events
//! are not ordered relative to each other.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use herald_core::{storage::InMemoryEventStore, RealClock};
//! use herald_delivery::{
//!     client::{ClientConfig, HttpWebhookSender},
//!     DeliveryService, PendingScanner, RetryPolicy, ScannerConfig,
//! };
//!
//! # async fn example() -> herald_delivery::Result<()> {
//! let clock = Arc::new(RealClock::new());
//! let sender = HttpWebhookSender::new(ClientConfig::default(), clock.clone())?;
//! let service = DeliveryService::new(
//!     Arc::new(InMemoryEventStore::new()),
//!     Arc::new(sender),
//!     RetryPolicy::default(),
//!     clock,
//! );
//!
//! let report = PendingScanner::new(service, ScannerConfig::default()).run_once().await?;
//! println!("delivered {} events", report.delivered);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod engine;
pub mod error;
pub mod queries;
pub mod replay;
pub mod retry;
pub mod scanner;

pub use client::{ClientConfig, DeliveryResult, HttpWebhookSender, WebhookSender};
pub use engine::DeliveryService;
pub use error::{DeliveryError, ErrorCategory, Result};
pub use queries::EventQueries;
pub use replay::ReplayService;
pub use retry::{RetryDecision, RetryPolicy};
pub use scanner::{PendingScanner, ScanReport, ScannerConfig};
