//! Periodic sweep over pending and retrying events.
//!
//! Each tick loads every `pending` event followed by every `retrying` event,
//! skips retrying events that are not due yet, and hands the rest to the
//! orchestrator. One event's failure never aborts the sweep. At most one
//! sweep runs at a time; an overlapping call returns immediately.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::{stream, StreamExt};
use herald_core::{DeliveryStatus, EventFilter, NotificationEvent};
use serde::{Deserialize, Serialize};
use tokio::{sync::Mutex, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{engine::DeliveryService, error::Result};

/// Configuration for the pending scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Target used for events without their own `webhook_url`.
    pub fallback_webhook_url: Option<String>,
    /// Maximum deliveries in flight within one sweep. 1 is sequential.
    pub concurrency: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(60), fallback_webhook_url: None, concurrency: 1 }
    }
}

/// Counters describing one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Events loaded from the store.
    pub examined: usize,
    /// Events the orchestrator processed without error.
    pub delivered: usize,
    /// Retrying events whose `next_retry_date` is still in the future.
    pub skipped_not_due: usize,
    /// Events whose processing raised an error.
    pub errors: usize,
    /// Whether the sweep was skipped because another one was running.
    pub overlapped: bool,
}

impl ScanReport {
    /// Report for a sweep that did not run because another was in flight.
    pub fn skipped() -> Self {
        Self { overlapped: true, ..Self::default() }
    }
}

/// Finds due events and drives them through the orchestrator.
#[derive(Debug, Clone)]
pub struct PendingScanner {
    service: DeliveryService,
    config: ScannerConfig,
    in_flight: Arc<Mutex<()>>,
}

impl PendingScanner {
    /// Creates a scanner over `service`.
    pub fn new(service: DeliveryService, config: ScannerConfig) -> Self {
        Self { service, config, in_flight: Arc::new(Mutex::new(())) }
    }

    /// Scanner configuration.
    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Runs a single sweep.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Persistence` if the pending or retrying sets
    /// cannot be loaded. Per-event errors are counted in the report instead.
    pub async fn run_once(&self) -> Result<ScanReport> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("previous scan still running, skipping tick");
            return Ok(ScanReport::skipped());
        };

        let events = self.service.events();
        let mut work = events.find_all(&EventFilter::with_status(DeliveryStatus::Pending)).await?;
        work.extend(events.find_all(&EventFilter::with_status(DeliveryStatus::Retrying)).await?);

        let now = self.service.clock().now();
        let examined = work.len();
        let (due, not_due): (Vec<NotificationEvent>, Vec<NotificationEvent>) =
            work.into_iter().partition(|event| event.is_due(now));

        for event in &not_due {
            debug!(
                event_id = %event.event_id,
                next_retry_at = ?event.next_retry_date,
                "retry not due yet, skipping"
            );
        }

        let delivered = AtomicUsize::new(0);
        let errors = AtomicUsize::new(0);

        stream::iter(due)
            .for_each_concurrent(self.config.concurrency.max(1), |event| {
                let delivered = &delivered;
                let errors = &errors;
                async move {
                    let url = event
                        .webhook_url
                        .as_deref()
                        .or(self.config.fallback_webhook_url.as_deref());

                    match self.service.deliver(&event.event_id, url).await {
                        Ok(Some(_)) => {
                            delivered.fetch_add(1, Ordering::Relaxed);
                        },
                        Ok(None) => {
                            warn!(event_id = %event.event_id, "event vanished during scan");
                        },
                        Err(e) => {
                            errors.fetch_add(1, Ordering::Relaxed);
                            error!(
                                event_id = %event.event_id,
                                category = %e.category(),
                                error = %e,
                                "failed to process event"
                            );
                        },
                    }
                }
            })
            .await;

        let report = ScanReport {
            examined,
            delivered: delivered.into_inner(),
            skipped_not_due: not_due.len(),
            errors: errors.into_inner(),
            overlapped: false,
        };

        if report.examined > 0 {
            info!(
                examined = report.examined,
                delivered = report.delivered,
                skipped_not_due = report.skipped_not_due,
                errors = report.errors,
                "pending scan complete"
            );
        }
        Ok(report)
    }

    /// Sweeps on every interval tick until `cancel` fires.
    ///
    /// The first sweep starts immediately. Ticks missed while a sweep
    /// overruns are dropped. Cancellation stops new sweeps; a sweep already
    /// running completes first.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            interval_ms = u64::try_from(self.config.interval.as_millis()).unwrap_or(u64::MAX),
            concurrency = self.config.concurrency,
            "pending scanner starting"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {},
            }

            if let Err(e) = self.run_once().await {
                error!(category = %e.category(), error = %e, "pending scan failed");
            }
        }

        info!("pending scanner stopped");
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use herald_core::{storage::InMemoryEventStore, Clock, EventStore, TestClock};
    use serde_json::json;

    use super::*;
    use crate::{
        client::mock::{ScriptedResponse, ScriptedSender},
        retry::RetryPolicy,
    };

    fn scanner(store: Arc<InMemoryEventStore>) -> PendingScanner {
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new());
        let sender = ScriptedSender::always(ScriptedResponse::Status(200), clock.clone());
        let service =
            DeliveryService::new(store, Arc::new(sender), RetryPolicy::default(), clock);
        PendingScanner::new(service, ScannerConfig::default())
    }

    #[tokio::test]
    async fn overlapping_scan_is_skipped() {
        let scanner = scanner(Arc::new(InMemoryEventStore::new()));
        let _held = scanner.in_flight.lock().await;

        let report = scanner.run_once().await.unwrap();
        assert_eq!(report, ScanReport::skipped());
    }

    #[tokio::test]
    async fn empty_store_yields_empty_report() {
        let scanner = scanner(Arc::new(InMemoryEventStore::new()));
        let report = scanner.run_once().await.unwrap();
        assert_eq!(report, ScanReport::default());
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let store = Arc::new(InMemoryEventStore::new());
        store
            .save(
                NotificationEvent::new("evt-1", "order.created", json!({}), Utc::now())
                    .with_webhook_url("https://a.test"),
            )
            .await
            .unwrap();
        let scanner = scanner(store.clone());
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let scanner = scanner.clone();
            let cancel = cancel.clone();
            async move { scanner.run(cancel).await }
        });

        // First tick fires immediately.
        for _ in 0..50 {
            let event = store.find_by_id(&"evt-1".into()).await.unwrap().unwrap();
            if event.delivery_status == DeliveryStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        handle.await.unwrap();

        let event = store.find_by_id(&"evt-1".into()).await.unwrap().unwrap();
        assert_eq!(event.delivery_status, DeliveryStatus::Completed);
    }
}
