//! Herald webhook notification delivery service.
//!
//! Main entry point for the Herald server. Initializes all subsystems
//! and coordinates graceful startup and shutdown.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use herald_api::{AppState, Config};
use herald_core::{
    storage::{
        postgres::run_migrations, InMemoryEventStore, InMemorySubscriptionStore,
        PostgresEventStore, PostgresSubscriptionStore,
    },
    Clock, EventStore, RealClock, SubscriptionStore,
};
use herald_delivery::{
    DeliveryService, EventQueries, HttpWebhookSender, PendingScanner, ReplayService,
};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Storage backends selected from configuration.
struct Stores {
    events: Arc<dyn EventStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    pool: Option<sqlx::PgPool>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.rust_log);

    info!(
        database_url = config.database_url_masked().as_deref().unwrap_or("in-memory"),
        host = %config.host,
        port = config.port,
        retry_interval_ms = config.retry_interval_ms,
        enable_retry_job = config.enable_retry_job,
        "Configuration loaded"
    );

    let addr = config.parse_server_addr()?;
    let stores = open_stores(&config).await?;
    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());

    let sender = HttpWebhookSender::new(config.to_client_config(), clock.clone())
        .context("Failed to build webhook client")?;
    let service = DeliveryService::new(
        stores.events.clone(),
        Arc::new(sender),
        config.to_retry_policy(),
        clock.clone(),
    )
    .with_subscriptions(stores.subscriptions.clone());

    let scanner = PendingScanner::new(service.clone(), config.to_scanner_config());
    let replay = ReplayService::new(service, config.fallback_webhook_url.clone());

    let mut state = AppState::new(EventQueries::new(stores.events.clone()), replay, clock);
    if let Some(api_key) = &config.api_key {
        state = state.with_api_key(api_key.as_str());
    }

    let cancel = CancellationToken::new();

    let scanner_handle = if config.enable_retry_job {
        let cancel = cancel.clone();
        Some(tokio::spawn(async move { scanner.run(cancel).await }))
    } else {
        info!("Pending scanner disabled");
        None
    };

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    info!(addr = %addr, "Herald is ready to deliver notifications");

    if let Err(e) = herald_api::start_server(state, addr, cancel.clone().cancelled_owned()).await
    {
        error!(error = %e, "Server failed");
        cancel.cancel();
    }

    if let Some(handle) = scanner_handle {
        match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
            Ok(Ok(())) => info!("Pending scanner stopped"),
            Ok(Err(e)) => error!(error = %e, "Pending scanner task panicked"),
            Err(_) => warn!("Shutdown grace period expired with a scan in flight"),
        }
    }

    if let Some(pool) = stores.pool {
        pool.close().await;
        info!("Database connections closed");
    }

    info!("Herald shutdown complete");
    Ok(())
}

/// Initializes tracing from the configured filter directive.
fn init_tracing(directive: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_new(directive)
        .unwrap_or_else(|_| EnvFilter::new("info,herald=debug,tower_http=debug"));

    let fmt_layer = fmt::layer().with_target(true).with_file(true).with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Picks PostgreSQL when a database URL is configured, in-memory otherwise.
async fn open_stores(config: &Config) -> Result<Stores> {
    let Some(database_url) = &config.database_url else {
        warn!("No DATABASE_URL configured, events are kept in memory only");
        return Ok(Stores {
            events: Arc::new(InMemoryEventStore::new()),
            subscriptions: Arc::new(InMemorySubscriptionStore::new()),
            pool: None,
        });
    };

    let pool = create_database_pool(database_url, config.database_max_connections).await?;
    info!("Database connection pool established");

    run_migrations(&pool).await.context("Failed to run database migrations")?;
    info!("Database migrations completed");

    let shared = Arc::new(pool.clone());
    Ok(Stores {
        events: Arc::new(PostgresEventStore::new(shared.clone())),
        subscriptions: Arc::new(PostgresSubscriptionStore::new(shared)),
        pool: Some(pool),
    })
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(database_url: &str, max_connections: u32) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);
    let mut retries = 0;

    loop {
        match PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("Failed to verify database connection")?;
                return Ok(pool);
            },
            Err(e) if retries < MAX_RETRIES => {
                retries += 1;
                warn!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    error = %e,
                    "Database connection failed, retrying"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C, starting graceful shutdown");
        },
        () = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
