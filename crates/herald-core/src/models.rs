//! Core domain models and strongly-typed identifiers.
//!
//! Defines notification events, delivery attempts, subscriptions and the
//! listing filter, plus the state transition helpers the delivery engine
//! uses to move an event through its lifecycle. Includes database
//! serialization traits for the string-backed enums.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Default ceiling for `retry_count` when an event does not carry its own.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Strongly-typed notification event identifier.
///
/// Event ids are assigned by the producer at ingestion time and are the
/// deduplication key receivers use, so they are opaque strings rather than
/// generated UUIDs.
///
/// # Example
///
/// ```
/// use herald_core::models::EventId;
/// let event_id = EventId::from("evt-001");
/// assert_eq!(event_id.as_str(), "evt-001");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    /// Creates an event id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrows the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EventId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl sqlx::Type<PgDb> for EventId {
    fn type_info() -> PgTypeInfo {
        <str as sqlx::Type<PgDb>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <str as sqlx::Type<PgDb>>::compatible(ty)
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EventId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let id = <String as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(id))
    }
}

impl sqlx::Encode<'_, PgDb> for EventId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Event delivery lifecycle status.
///
/// ```text
/// Pending ──▶ Retrying ──▶ Completed
///    │           │   ▲
///    │           │   └── failed attempt, retries left
///    │           └─────▶ Failed ──(replay)──▶ Pending
///    └─────────────────▶ Completed | Failed
/// ```
///
/// `Completed` is terminal. `Failed` is terminal unless replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Created and waiting for its first delivery attempt.
    Pending,
    /// At least one attempt failed; another attempt is scheduled.
    Retrying,
    /// Delivered successfully. Never transitions out.
    Completed,
    /// Retries exhausted or no webhook target could be resolved.
    Failed,
}

impl DeliveryStatus {
    /// Returns the canonical lowercase name used on the wire and in storage.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "retrying" => Ok(Self::Retrying),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid delivery status: {s}")),
        }
    }
}

impl sqlx::Type<PgDb> for DeliveryStatus {
    fn type_info() -> PgTypeInfo {
        <str as sqlx::Type<PgDb>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <str as sqlx::Type<PgDb>>::compatible(ty)
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for DeliveryStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        s.parse().map_err(Into::into)
    }
}

impl sqlx::Encode<'_, PgDb> for DeliveryStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <&str as sqlx::Encode<PgDb>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// The receiver acknowledged the webhook.
    Success,
    /// Network error, timeout, or non-success HTTP status.
    Failure,
}

impl AttemptStatus {
    /// Returns the canonical lowercase name used on the wire and in storage.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            _ => Err(format!("invalid attempt status: {s}")),
        }
    }
}

impl sqlx::Type<PgDb> for AttemptStatus {
    fn type_info() -> PgTypeInfo {
        <str as sqlx::Type<PgDb>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <str as sqlx::Type<PgDb>>::compatible(ty)
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for AttemptStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        s.parse().map_err(Into::into)
    }
}

impl sqlx::Encode<'_, PgDb> for AttemptStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <&str as sqlx::Encode<PgDb>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// Immutable record of one delivery try.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    /// When the outcome became known.
    pub attempt_date: DateTime<Utc>,
    /// Success or failure.
    pub status: AttemptStatus,
    /// HTTP status code, if the receiver responded at all.
    pub status_code: Option<u16>,
    /// Failure description; `None` for successful attempts.
    pub error_message: Option<String>,
}

impl DeliveryAttempt {
    /// Successful attempt acknowledged with `status_code`.
    pub fn success(attempt_date: DateTime<Utc>, status_code: Option<u16>) -> Self {
        Self { attempt_date, status: AttemptStatus::Success, status_code, error_message: None }
    }

    /// Failed attempt.
    pub fn failure(
        attempt_date: DateTime<Utc>,
        status_code: Option<u16>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            attempt_date,
            status: AttemptStatus::Failure,
            status_code,
            error_message: Some(error_message.into()),
        }
    }

    /// Whether the receiver acknowledged this attempt.
    pub fn succeeded(&self) -> bool {
        self.status == AttemptStatus::Success
    }
}

/// A unit of work to deliver to a client's webhook.
///
/// Events are created by ingestion with status `pending` and mutated in
/// place by the delivery engine. Use the transition helpers rather than
/// assigning `delivery_status` directly; they keep `next_retry_date` set
/// if and only if the event is `retrying`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Unique, immutable key.
    pub event_id: EventId,
    /// Classification used for subscription matching.
    pub event_type: String,
    /// Opaque payload, delivered verbatim.
    pub content: serde_json::Value,
    /// When the event originally occurred.
    pub delivery_date: DateTime<Utc>,
    /// Current lifecycle state.
    pub delivery_status: DeliveryStatus,
    /// Owning client, used for authorization and subscription lookup.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Number of failed attempts so far.
    #[serde(default)]
    pub retry_count: u32,
    /// Ceiling for `retry_count`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Time of the most recent attempt, whatever its outcome.
    #[serde(default)]
    pub last_retry_date: Option<DateTime<Utc>>,
    /// Earliest time a re-attempt may happen. Only set while `retrying`.
    #[serde(default)]
    pub next_retry_date: Option<DateTime<Utc>>,
    /// Last used or resolved delivery target.
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Attempt history in chronological order. Append-only.
    #[serde(default)]
    pub delivery_attempts: Vec<DeliveryAttempt>,
    /// Optimistic concurrency counter, bumped by the store on every update.
    #[serde(default)]
    pub version: i64,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl NotificationEvent {
    /// Creates a pending event with no delivery history.
    pub fn new(
        event_id: impl Into<EventId>,
        event_type: impl Into<String>,
        content: serde_json::Value,
        delivery_date: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            event_type: event_type.into(),
            content,
            delivery_date,
            delivery_status: DeliveryStatus::Pending,
            client_id: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            last_retry_date: None,
            next_retry_date: None,
            webhook_url: None,
            delivery_attempts: Vec::new(),
            version: 0,
        }
    }

    /// Sets the owning client.
    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Sets the explicit webhook target.
    pub fn with_webhook_url(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = Some(url.into());
        self
    }

    /// Overrides the retry ceiling.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Whether the scanner may hand this event to the delivery engine at
    /// `now`.
    ///
    /// Pending events are always due. Retrying events are due once their
    /// `next_retry_date` has passed (or if it is missing). Terminal events
    /// are never due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.delivery_status {
            DeliveryStatus::Pending => true,
            DeliveryStatus::Retrying => self.next_retry_date.is_none_or(|at| at <= now),
            DeliveryStatus::Completed | DeliveryStatus::Failed => false,
        }
    }

    /// Appends an attempt and updates the bookkeeping fields it drives.
    ///
    /// `retry_count` only moves on failure.
    pub fn record_attempt(&mut self, url: impl Into<String>, attempt: DeliveryAttempt) {
        self.webhook_url = Some(url.into());
        self.last_retry_date = Some(attempt.attempt_date);
        if !attempt.succeeded() {
            self.retry_count = self.retry_count.saturating_add(1);
        }
        self.delivery_attempts.push(attempt);
    }

    /// Transitions to `completed`.
    pub fn mark_completed(&mut self) {
        self.delivery_status = DeliveryStatus::Completed;
        self.next_retry_date = None;
    }

    /// Transitions to `retrying` with the given due time.
    pub fn schedule_retry(&mut self, next_retry_date: DateTime<Utc>) {
        self.delivery_status = DeliveryStatus::Retrying;
        self.next_retry_date = Some(next_retry_date);
    }

    /// Transitions to `failed`.
    pub fn mark_failed(&mut self) {
        self.delivery_status = DeliveryStatus::Failed;
        self.next_retry_date = None;
    }

    /// Puts a failed event back at the start of the delivery cycle.
    ///
    /// `retry_count` and the attempt history are preserved.
    pub fn reset_for_replay(&mut self) {
        self.delivery_status = DeliveryStatus::Pending;
        self.next_retry_date = None;
    }
}

/// A client's standing default webhook for one event type.
///
/// Unique per `(client_id, event_type)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSubscription {
    /// Subscribing client.
    pub client_id: String,
    /// Event type the subscription covers.
    pub event_type: String,
    /// Where matching events are delivered.
    pub webhook_url: String,
    /// Inactive subscriptions are ignored during resolution.
    pub active: bool,
}

impl EventSubscription {
    /// Creates an active subscription.
    pub fn new(
        client_id: impl Into<String>,
        event_type: impl Into<String>,
        webhook_url: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            event_type: event_type.into(),
            webhook_url: webhook_url.into(),
            active: true,
        }
    }
}

/// Conjunctive listing filter. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Owning client.
    pub client_id: Option<String>,
    /// Lifecycle state.
    pub delivery_status: Option<DeliveryStatus>,
    /// Inclusive lower bound on `delivery_date`.
    pub start_date: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `delivery_date`.
    pub end_date: Option<DateTime<Utc>>,
}

impl EventFilter {
    /// Filter selecting every event with the given status.
    pub fn with_status(status: DeliveryStatus) -> Self {
        Self { delivery_status: Some(status), ..Self::default() }
    }

    /// Evaluates the filter against one event.
    pub fn matches(&self, event: &NotificationEvent) -> bool {
        if let Some(client_id) = &self.client_id {
            if event.client_id.as_deref() != Some(client_id.as_str()) {
                return false;
            }
        }
        if let Some(status) = self.delivery_status {
            if event.delivery_status != status {
                return false;
            }
        }
        if let Some(start) = self.start_date {
            if event.delivery_date < start {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            if event.delivery_date > end {
                return false;
            }
        }
        true
    }
}
