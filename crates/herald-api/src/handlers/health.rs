//! Health endpoint for load balancers and orchestration liveness checks.

use std::{collections::BTreeMap, sync::Arc};

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use herald_core::Clock;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::AppState;

/// Health check response structure.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service health status
    pub status: ComponentStatus,
    /// Timestamp when health check was performed
    pub timestamp: DateTime<Utc>,
    /// Service version information
    pub version: String,
    /// Per-component status, keyed by component name
    pub services: BTreeMap<&'static str, ComponentHealth>,
}

/// Health of one component.
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    /// Component status
    pub status: ComponentStatus,
}

/// Component-level health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ComponentStatus {
    /// Component is healthy
    Up,
    /// Component is failing
    Down,
}

/// Builds health reports from the service clock.
#[derive(Debug)]
pub struct HealthService {
    clock: Arc<dyn Clock>,
}

impl HealthService {
    /// Creates a new health service with the given clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Reports the API itself as up. Storage is not checked.
    pub fn health_check(&self) -> HealthResponse {
        let mut services = BTreeMap::new();
        services.insert("api", ComponentHealth { status: ComponentStatus::Up });

        HealthResponse {
            status: ComponentStatus::Up,
            timestamp: self.clock.now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            services,
        }
    }
}

/// Health check endpoint handler. Never requires authentication.
#[instrument(name = "health_check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let response = HealthService::new(state.clock.clone()).health_check();

    let status_code = match response.status {
        ComponentStatus::Up => StatusCode::OK,
        ComponentStatus::Down => StatusCode::INTERNAL_SERVER_ERROR,
    };

    debug!(status = ?response.status, "health check completed");
    (status_code, Json(response))
}
