//! Health endpoints: `/health`, `/ready` and `/live`.
//!
//! Health is judged by whether the queue backend answers a depth query.

use std::{sync::Arc, time::Instant};

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use courier_delivery::{EngineStats, TaskQueue};
use serde::Serialize;
use tracing::{debug, error, instrument};

use crate::AppState;

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall verdict
    pub status: HealthStatus,
    /// When the check ran
    pub timestamp: DateTime<Utc>,
    /// Per-component results
    pub checks: HealthChecks,
    /// Dispatcher counters, when a dispatcher is attached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatcher: Option<EngineStats>,
    /// Crate version
    pub version: String,
}

/// Overall verdict of a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Queue answers and workers are running
    Healthy,
    /// Queue answers but no worker is running
    Degraded,
    /// Queue backend failing
    Unhealthy,
}

/// Component results of a health check.
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    /// Queue backend reachability and depth
    pub queue: QueueHealth,
}

/// Health of the queue backend.
#[derive(Debug, Serialize)]
pub struct QueueHealth {
    /// Component status
    pub status: ComponentStatus,
    /// Backend name (`memory` or `redis`)
    pub backend: &'static str,
    /// Tasks waiting, when the backend could report it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<usize>,
    /// Backend error, when the queue is down
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// How long the depth query took
    pub response_time_ms: u64,
}

/// Whether a component answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Answered
    Up,
    /// Failed or unreachable
    Down,
}

/// Runs the health checks against the queue and dispatcher counters.
pub async fn check_health(state: &AppState) -> HealthResponse {
    debug!("running health check");

    let queue = check_queue_health(&state.queue).await;
    let dispatcher = match &state.stats {
        Some(stats) => Some(stats.read().await.clone()),
        None => None,
    };

    let status = match (queue.status, &dispatcher) {
        (ComponentStatus::Down, _) => HealthStatus::Unhealthy,
        (ComponentStatus::Up, Some(stats)) if stats.active_workers == 0 => HealthStatus::Degraded,
        (ComponentStatus::Up, _) => HealthStatus::Healthy,
    };

    HealthResponse {
        status,
        timestamp: state.clock.now(),
        checks: HealthChecks { queue },
        dispatcher,
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

async fn check_queue_health(queue: &Arc<dyn TaskQueue>) -> QueueHealth {
    let started = Instant::now();
    let result = queue.depth().await;
    let response_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    match result {
        Ok(depth) => {
            debug!(backend = queue.backend(), depth, "Queue health check passed");
            QueueHealth {
                status: ComponentStatus::Up,
                backend: queue.backend(),
                depth: Some(depth),
                message: None,
                response_time_ms,
            }
        },
        Err(e) => {
            error!(backend = queue.backend(), error = %e, "Queue health check failed");
            QueueHealth {
                status: ComponentStatus::Down,
                backend: queue.backend(),
                depth: None,
                message: Some(format!("queue unavailable: {e}")),
                response_time_ms,
            }
        },
    }
}

/// `GET /health`: 200 while the queue answers, 503 otherwise.
#[instrument(name = "health_check", skip(app_state))]
pub async fn health_check(State(app_state): State<AppState>) -> Response {
    let response = check_health(&app_state).await;

    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    debug!(
        status = ?response.status,
        queue_status = ?response.checks.queue.status,
        "Health check completed"
    );

    (status_code, Json(response)).into_response()
}

/// Readiness check endpoint.
///
/// Ready means the queue answers, so intake can accept work.
#[instrument(name = "readiness_check", skip(app_state))]
pub async fn readiness_check(State(app_state): State<AppState>) -> Response {
    let queue = check_queue_health(&app_state.queue).await;

    let status_code = match queue.status {
        ComponentStatus::Up => StatusCode::OK,
        ComponentStatus::Down => StatusCode::SERVICE_UNAVAILABLE,
    };

    let response = serde_json::json!({
        "ready": queue.status == ComponentStatus::Up,
        "timestamp": app_state.clock.now(),
        "queue": queue,
    });

    (status_code, Json(response)).into_response()
}

/// Liveness check endpoint.
///
/// Does not touch the queue; answers as long as the process serves HTTP.
#[instrument(name = "liveness_check", skip(app_state))]
pub async fn liveness_check(State(app_state): State<AppState>) -> Response {
    let response = serde_json::json!({
        "status": "alive",
        "timestamp": app_state.clock.now(),
        "service": "courier-api"
    });

    (StatusCode::OK, Json(response)).into_response()
}
