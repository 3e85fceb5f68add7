//! HTTP server configuration and request routing.
//!
//! Requests flow through middleware in order:
//! 1. Request ID generation
//! 2. Request/response logging
//! 3. Timeout enforcement
//! 4. Handler execution
//!
//! # Graceful Shutdown
//!
//! On SIGTERM or Ctrl-C the server stops accepting connections and lets
//! in-flight requests finish. Stopping the dispatcher is left to the caller.

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use courier_core::{Clock, RealClock, DEFAULT_MAX_RETRIES};
use courier_delivery::{SharedStats, TaskQueue};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::handlers;

/// Default per-request timeout applied by [`create_router`].
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Queue accepted notifications are submitted to.
    pub queue: Arc<dyn TaskQueue>,
    /// Source of `created_at` and health timestamps.
    pub clock: Arc<dyn Clock>,
    /// Retry ceiling stamped on new tasks.
    pub max_retries: u32,
    /// Dispatcher counters reported by `/health`, when a dispatcher runs.
    pub stats: Option<SharedStats>,
}

impl AppState {
    /// Creates state using the system clock and no dispatcher stats.
    pub fn new(queue: Arc<dyn TaskQueue>, max_retries: u32) -> Self {
        Self { queue, clock: Arc::new(RealClock::new()), max_retries, stats: None }
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attaches dispatcher counters for health reporting.
    #[must_use]
    pub fn with_stats(mut self, stats: SharedStats) -> Self {
        self.stats = Some(stats);
        self
    }

    /// State with the default retry ceiling.
    pub fn with_queue(queue: Arc<dyn TaskQueue>) -> Self {
        Self::new(queue, DEFAULT_MAX_RETRIES)
    }
}

/// Creates the Axum router with all routes and middleware, using the
/// default request timeout.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// use courier_api::{create_router, AppState};
/// use courier_delivery::queue::MemoryQueue;
///
/// let app = create_router(AppState::with_queue(Arc::new(MemoryQueue::new(100))));
/// // Serve the app...
/// ```
pub fn create_router(state: AppState) -> Router {
    router_with_timeout(state, DEFAULT_REQUEST_TIMEOUT)
}

/// Creates the router with an explicit per-request timeout.
pub fn router_with_timeout(state: AppState, request_timeout: Duration) -> Router {
    let health_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/live", get(handlers::liveness_check));

    let api_routes = Router::new().route(
        "/notify",
        post(handlers::submit_notification).fallback(handlers::method_not_allowed),
    );

    Router::new()
        .merge(health_routes)
        .merge(api_routes)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(state)
}

/// Middleware to inject request ID into all responses.
///
/// Adds X-Request-Id header for tracing requests across services.
async fn inject_request_id(req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();

    let mut req = req;
    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;

    if let Ok(header_value) = request_id.parse() {
        response.headers_mut().insert("X-Request-Id", header_value);
    }

    response
}

/// Starts the HTTP server and runs it until Ctrl-C or SIGTERM.
///
/// # Errors
///
/// Returns `std::io::Error` if the address cannot be bound.
pub async fn start_server(
    state: AppState,
    addr: SocketAddr,
    request_timeout: Duration,
) -> Result<(), std::io::Error> {
    serve(state, addr, request_timeout, shutdown_signal()).await
}

/// Serves the intake until `shutdown` completes.
///
/// # Errors
///
/// Returns `std::io::Error` if the address cannot be bound.
pub async fn serve<F>(
    state: AppState,
    addr: SocketAddr,
    request_timeout: Duration,
    shutdown: F,
) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router_with_timeout(state, request_timeout);

    info!(%addr, "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!(addr = %actual_addr, "HTTP server listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    info!("HTTP server stopped gracefully");
    Ok(())
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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

    warn!("Waiting for in-flight requests to complete");
}
