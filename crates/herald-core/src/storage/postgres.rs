//! PostgreSQL storage backends.
//!
//! Events live in `notification_events`; their attempt history lives in the
//! append-only `delivery_attempts` table and is reassembled on read.
//! `update` runs in a transaction that checks the version column and only
//! inserts attempts that are not stored yet.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};
use tracing::debug;

use super::{EventStore, SubscriptionStore};
use crate::{
    error::{CoreError, Result},
    models::{
        AttemptStatus, DeliveryAttempt, EventFilter, EventId, EventSubscription, NotificationEvent,
    },
};

const EVENT_COLUMNS: &str = "event_id, event_type, content, delivery_date, delivery_status, \
     client_id, retry_count, max_retries, last_retry_date, next_retry_date, webhook_url, version";

/// Creates the tables the PostgreSQL stores need.
///
/// Idempotent; safe to call on every startup.
///
/// # Errors
///
/// Returns `CoreError::Database` if any DDL statement fails.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS notification_events (
            event_id TEXT PRIMARY KEY,
            event_type TEXT NOT NULL,
            content JSONB NOT NULL,
            delivery_date TIMESTAMPTZ NOT NULL,
            delivery_status TEXT NOT NULL
                CHECK (delivery_status IN ('pending', 'retrying', 'completed', 'failed')),
            client_id TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL DEFAULT 5,
            last_retry_date TIMESTAMPTZ,
            next_retry_date TIMESTAMPTZ,
            webhook_url TEXT,
            version BIGINT NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE INDEX IF NOT EXISTS idx_notification_events_status
            ON notification_events (delivery_status, delivery_date DESC)
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS delivery_attempts (
            id BIGSERIAL PRIMARY KEY,
            event_id TEXT NOT NULL REFERENCES notification_events (event_id) ON DELETE CASCADE,
            attempt_number INTEGER NOT NULL,
            attempt_date TIMESTAMPTZ NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('success', 'failure')),
            status_code INTEGER,
            error_message TEXT,
            UNIQUE (event_id, attempt_number)
        )
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS event_subscriptions (
            id BIGSERIAL PRIMARY KEY,
            client_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            webhook_url TEXT NOT NULL,
            active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE (client_id, event_type)
        )
        ",
    )
    .execute(pool)
    .await?;

    debug!("notification schema ready");
    Ok(())
}

/// Event row without its attempt history.
struct EventRow(NotificationEvent);

impl sqlx::FromRow<'_, PgRow> for EventRow {
    fn from_row(row: &PgRow) -> std::result::Result<Self, sqlx::Error> {
        let content: sqlx::types::Json<serde_json::Value> = row.try_get("content")?;

        Ok(Self(NotificationEvent {
            event_id: row.try_get("event_id")?,
            event_type: row.try_get("event_type")?,
            content: content.0,
            delivery_date: row.try_get("delivery_date")?,
            delivery_status: row.try_get("delivery_status")?,
            client_id: row.try_get("client_id")?,
            retry_count: non_negative(row.try_get("retry_count")?, "retry_count")?,
            max_retries: non_negative(row.try_get("max_retries")?, "max_retries")?,
            last_retry_date: row.try_get("last_retry_date")?,
            next_retry_date: row.try_get("next_retry_date")?,
            webhook_url: row.try_get("webhook_url")?,
            delivery_attempts: Vec::new(),
            version: row.try_get("version")?,
        }))
    }
}

struct AttemptRow {
    event_id: EventId,
    attempt: DeliveryAttempt,
}

impl sqlx::FromRow<'_, PgRow> for AttemptRow {
    fn from_row(row: &PgRow) -> std::result::Result<Self, sqlx::Error> {
        let status_code: Option<i32> = row.try_get("status_code")?;
        let status_code = status_code
            .map(u16::try_from)
            .transpose()
            .map_err(|_| sqlx::Error::Decode("status_code out of range".into()))?;

        Ok(Self {
            event_id: row.try_get("event_id")?,
            attempt: DeliveryAttempt {
                attempt_date: row.try_get("attempt_date")?,
                status: row.try_get::<AttemptStatus, _>("status")?,
                status_code,
                error_message: row.try_get("error_message")?,
            },
        })
    }
}

fn non_negative(value: i32, column: &str) -> std::result::Result<u32, sqlx::Error> {
    u32::try_from(value).map_err(|_| sqlx::Error::Decode(format!("{column} is negative").into()))
}

fn to_db_int(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Event store backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
}

impl PostgresEventStore {
    /// Creates a store over a shared pool.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    async fn attach_attempts(&self, events: Vec<EventRow>) -> Result<Vec<NotificationEvent>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = events.iter().map(|row| row.0.event_id.0.clone()).collect();
        let rows = sqlx::query_as::<_, AttemptRow>(
            r"
            SELECT event_id, attempt_date, status, status_code, error_message
            FROM delivery_attempts
            WHERE event_id = ANY($1)
            ORDER BY event_id, attempt_number
            ",
        )
        .bind(&ids)
        .fetch_all(&*self.pool)
        .await?;

        let mut by_event: HashMap<EventId, Vec<DeliveryAttempt>> = HashMap::new();
        for row in rows {
            by_event.entry(row.event_id).or_default().push(row.attempt);
        }

        Ok(events
            .into_iter()
            .map(|EventRow(mut event)| {
                event.delivery_attempts = by_event.remove(&event.event_id).unwrap_or_default();
                event
            })
            .collect())
    }
}

async fn insert_attempts(
    tx: &mut Transaction<'_, Postgres>,
    event_id: &EventId,
    first_number: usize,
    attempts: &[DeliveryAttempt],
) -> Result<()> {
    for (offset, attempt) in attempts.iter().enumerate() {
        let attempt_number = i32::try_from(first_number + offset + 1).unwrap_or(i32::MAX);
        sqlx::query(
            r"
            INSERT INTO delivery_attempts (
                event_id, attempt_number, attempt_date, status, status_code, error_message
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(event_id)
        .bind(attempt_number)
        .bind(attempt.attempt_date)
        .bind(attempt.status)
        .bind(attempt.status_code.map(i32::from))
        .bind(&attempt.error_message)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn find_all(&self, filter: &EventFilter) -> Result<Vec<NotificationEvent>> {
        let query = format!(
            r"
            SELECT {EVENT_COLUMNS}
            FROM notification_events
            WHERE ($1::TEXT IS NULL OR client_id = $1)
              AND ($2::TEXT IS NULL OR delivery_status = $2)
              AND ($3::TIMESTAMPTZ IS NULL OR delivery_date >= $3)
              AND ($4::TIMESTAMPTZ IS NULL OR delivery_date <= $4)
            ORDER BY delivery_date DESC, event_id
            "
        );

        let rows = sqlx::query_as::<_, EventRow>(&query)
            .bind(filter.client_id.as_deref())
            .bind(filter.delivery_status)
            .bind(filter.start_date)
            .bind(filter.end_date)
            .fetch_all(&*self.pool)
            .await?;

        self.attach_attempts(rows).await
    }

    async fn find_by_id(&self, event_id: &EventId) -> Result<Option<NotificationEvent>> {
        let query = format!("SELECT {EVENT_COLUMNS} FROM notification_events WHERE event_id = $1");
        let row = sqlx::query_as::<_, EventRow>(&query)
            .bind(event_id)
            .fetch_optional(&*self.pool)
            .await?;

        match row {
            Some(row) => Ok(self.attach_attempts(vec![row]).await?.into_iter().next()),
            None => Ok(None),
        }
    }

    async fn save(&self, event: NotificationEvent) -> Result<NotificationEvent> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r"
            INSERT INTO notification_events (
                event_id, event_type, content, delivery_date, delivery_status, client_id,
                retry_count, max_retries, last_retry_date, next_retry_date, webhook_url, version
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (event_id) DO UPDATE SET
                event_type = EXCLUDED.event_type,
                content = EXCLUDED.content,
                delivery_date = EXCLUDED.delivery_date,
                delivery_status = EXCLUDED.delivery_status,
                client_id = EXCLUDED.client_id,
                retry_count = EXCLUDED.retry_count,
                max_retries = EXCLUDED.max_retries,
                last_retry_date = EXCLUDED.last_retry_date,
                next_retry_date = EXCLUDED.next_retry_date,
                webhook_url = EXCLUDED.webhook_url,
                version = EXCLUDED.version,
                updated_at = NOW()
            ",
        )
        .bind(&event.event_id)
        .bind(&event.event_type)
        .bind(sqlx::types::Json(&event.content))
        .bind(event.delivery_date)
        .bind(event.delivery_status)
        .bind(&event.client_id)
        .bind(to_db_int(event.retry_count))
        .bind(to_db_int(event.max_retries))
        .bind(event.last_retry_date)
        .bind(event.next_retry_date)
        .bind(&event.webhook_url)
        .bind(event.version)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM delivery_attempts WHERE event_id = $1")
            .bind(&event.event_id)
            .execute(&mut *tx)
            .await?;
        insert_attempts(&mut tx, &event.event_id, 0, &event.delivery_attempts).await?;

        tx.commit().await?;
        Ok(event)
    }

    async fn update(&self, mut event: NotificationEvent) -> Result<NotificationEvent> {
        let mut tx = self.pool.begin().await?;

        let new_version: Option<i64> = sqlx::query_scalar(
            r"
            UPDATE notification_events SET
                delivery_status = $3,
                retry_count = $4,
                max_retries = $5,
                last_retry_date = $6,
                next_retry_date = $7,
                webhook_url = $8,
                version = version + 1,
                updated_at = NOW()
            WHERE event_id = $1 AND version = $2
            RETURNING version
            ",
        )
        .bind(&event.event_id)
        .bind(event.version)
        .bind(event.delivery_status)
        .bind(to_db_int(event.retry_count))
        .bind(to_db_int(event.max_retries))
        .bind(event.last_retry_date)
        .bind(event.next_retry_date)
        .bind(&event.webhook_url)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(new_version) = new_version else {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM notification_events WHERE event_id = $1)",
            )
            .bind(&event.event_id)
            .fetch_one(&mut *tx)
            .await?;
            tx.rollback().await?;

            return Err(if exists {
                CoreError::Conflict(format!(
                    "event {} was modified concurrently (expected version {})",
                    event.event_id, event.version
                ))
            } else {
                CoreError::NotFound(format!("event {} not found", event.event_id))
            });
        };

        let stored: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM delivery_attempts WHERE event_id = $1")
                .bind(&event.event_id)
                .fetch_one(&mut *tx)
                .await?;
        let stored = usize::try_from(stored).unwrap_or(0);

        if let Some(new_attempts) = event.delivery_attempts.get(stored..) {
            insert_attempts(&mut tx, &event.event_id, stored, new_attempts).await?;
        }

        tx.commit().await?;
        event.version = new_version;
        Ok(event)
    }
}

/// Subscription store backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PostgresSubscriptionStore {
    pool: Arc<PgPool>,
}

impl PostgresSubscriptionStore {
    /// Creates a store over a shared pool.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionStore for PostgresSubscriptionStore {
    async fn find_active_subscriptions(
        &self,
        client_id: &str,
        event_type: &str,
    ) -> Result<Vec<EventSubscription>> {
        let rows: Vec<(String, String, String, bool)> = sqlx::query_as(
            r"
            SELECT client_id, event_type, webhook_url, active
            FROM event_subscriptions
            WHERE client_id = $1 AND event_type = $2 AND active
            ORDER BY created_at
            ",
        )
        .bind(client_id)
        .bind(event_type)
        .fetch_all(&*self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(client_id, event_type, webhook_url, active)| EventSubscription {
                client_id,
                event_type,
                webhook_url,
                active,
            })
            .collect())
    }

    async fn save(&self, subscription: EventSubscription) -> Result<EventSubscription> {
        sqlx::query(
            r"
            INSERT INTO event_subscriptions (client_id, event_type, webhook_url, active)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (client_id, event_type) DO UPDATE SET
                webhook_url = EXCLUDED.webhook_url,
                active = EXCLUDED.active
            ",
        )
        .bind(&subscription.client_id)
        .bind(&subscription.event_type)
        .bind(&subscription.webhook_url)
        .bind(subscription.active)
        .execute(&*self.pool)
        .await?;

        Ok(subscription)
    }
}
