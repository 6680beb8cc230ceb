//! Notification event listing, lookup and replay.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use herald_core::{DeliveryStatus, EventFilter, EventId, NotificationEvent};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::{is_valid_identifier, ApiError};
use crate::{middleware::auth::ClientScope, AppState};

/// Query parameters accepted by the listing endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    /// Owning client
    pub client_id: Option<String>,
    /// `pending`, `retrying`, `completed` or `failed`
    pub delivery_status: Option<String>,
    /// Inclusive lower bound, RFC 3339 or `YYYY-MM-DD`
    pub start_date: Option<String>,
    /// Inclusive upper bound, RFC 3339 or `YYYY-MM-DD`
    pub end_date: Option<String>,
}

impl ListParams {
    /// Validates the raw parameters into a store filter.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::BadRequest` naming the first invalid parameter.
    pub fn into_filter(self) -> Result<EventFilter, ApiError> {
        let client_id = match self.client_id {
            Some(id) if !is_valid_identifier(&id) => {
                return Err(ApiError::BadRequest(format!("invalid clientId: {id}")));
            },
            other => other,
        };

        let delivery_status = self
            .delivery_status
            .map(|raw| raw.parse::<DeliveryStatus>())
            .transpose()
            .map_err(ApiError::BadRequest)?;

        Ok(EventFilter {
            client_id,
            delivery_status,
            start_date: self.start_date.map(|raw| parse_date("startDate", &raw)).transpose()?,
            end_date: self.end_date.map(|raw| parse_date("endDate", &raw)).transpose()?,
        })
    }
}

/// Response body for a successful replay.
#[derive(Debug, Serialize)]
pub struct ReplayResponse {
    /// Human-readable outcome
    pub message: String,
    /// Event state after the replay attempt
    pub event: NotificationEvent,
}

/// Lists the caller's events matching the query filter, most recent first.
///
/// # Errors
///
/// Returns 400 for malformed parameters, 403 when `clientId` names another
/// client and 500 if the store fails.
#[instrument(name = "list_events", skip(state), fields(client_id = %scope.0))]
pub async fn list_events(
    State(state): State<AppState>,
    Extension(scope): Extension<ClientScope>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<NotificationEvent>>, ApiError> {
    let mut filter = params.into_filter()?;
    if filter.client_id.as_ref().is_some_and(|requested| *requested != scope.0) {
        return Err(ApiError::Forbidden("cannot access events of other clients".to_string()));
    }
    filter.client_id = Some(scope.0);

    let events = state.queries.list(&filter).await?;

    debug!(count = events.len(), "events listed");
    Ok(Json(events))
}

/// Fetches one of the caller's events by id.
///
/// # Errors
///
/// Returns 400 for a malformed id, 404 if absent or owned by another client
/// and 500 if the store fails.
#[instrument(name = "get_event", skip(state), fields(client_id = %scope.0))]
pub async fn get_event(
    State(state): State<AppState>,
    Extension(scope): Extension<ClientScope>,
    Path(id): Path<String>,
) -> Result<Json<NotificationEvent>, ApiError> {
    let event_id = parse_event_id(id)?;
    owned_event(&state, &scope, &event_id).await.map(Json)
}

/// Replays one of the caller's failed events and returns its state after
/// the new attempt.
///
/// # Errors
///
/// Returns 400 for a malformed id, 404 if absent or owned by another
/// client, 409 if the event is not `failed` or was modified concurrently,
/// and 500 for storage failures.
#[instrument(name = "replay_event", skip(state), fields(client_id = %scope.0))]
pub async fn replay_event(
    State(state): State<AppState>,
    Extension(scope): Extension<ClientScope>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let event_id = parse_event_id(id)?;
    owned_event(&state, &scope, &event_id).await?;

    let Some(event) = state.replay.replay(&event_id).await? else {
        return Err(not_found(&event_id));
    };

    info!(event_id = %event.event_id, status = %event.delivery_status, "event replayed");
    let body = ReplayResponse { message: "event replayed".to_string(), event };
    Ok((StatusCode::OK, Json(body)).into_response())
}

/// Loads `event_id`, hiding events owned by other clients.
async fn owned_event(
    state: &AppState,
    scope: &ClientScope,
    event_id: &EventId,
) -> Result<NotificationEvent, ApiError> {
    match state.queries.get(event_id).await? {
        Some(event) if scope.owns(&event) => Ok(event),
        _ => Err(not_found(event_id)),
    }
}

fn not_found(event_id: &EventId) -> ApiError {
    ApiError::NotFound(format!("event {event_id} not found"))
}

fn parse_event_id(raw: String) -> Result<EventId, ApiError> {
    if is_valid_identifier(&raw) {
        Ok(EventId::new(raw))
    } else {
        Err(ApiError::BadRequest(format!("invalid event id: {raw}")))
    }
}

fn parse_date(name: &str, raw: &str) -> Result<DateTime<Utc>, ApiError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
        .ok_or_else(|| {
            ApiError::BadRequest(format!("invalid {name}: expected RFC 3339 or YYYY-MM-DD"))
        })
}
