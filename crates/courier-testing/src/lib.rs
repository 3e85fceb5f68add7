//! Test infrastructure for courier.
//!
//! Provides a recording queue, a recording event handler, mock delivery
//! targets, an in-process fake Redis, fixture builders and [`TestEnv`], which wires them to a real
//! dispatcher and intake router driven by a [`TestClock`].

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use courier_api::{create_router, AppState};
use courier_core::{TaskId, DEFAULT_MAX_RETRIES};
use courier_delivery::{
    client::ClientConfig, DeliveryError, DeliveryOutcome, Dispatcher, DispatcherConfig,
};
use serde_json::Value;
use tower::ServiceExt;

pub mod events;
pub mod fixtures;
pub mod http;
pub mod queue;
pub mod redis;

pub use courier_core::TestClock;
pub use events::{RecordingEventHandler, DEFAULT_EVENT_TIMEOUT};
pub use fixtures::{notify_payload, parse_task_id, TaskBuilder};
pub use http::MockEndpoint;
pub use queue::RecordingQueue;
pub use redis::FakeRedis;

/// Default capacity of the queue in a [`TestEnv`].
pub const DEFAULT_TEST_QUEUE_CAPACITY: usize = 64;

/// Delivery timeout used by [`TestEnv`].
pub const TEST_DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Wiring of a dispatcher and intake router over test doubles.
///
/// The dispatcher is not started: tests step it with
/// [`process_next`](Self::process_next) so every attempt happens on the
/// test's own task. Retry timers sleep on [`TestClock`], which returns at
/// once and records the requested delay.
pub struct TestEnv {
    /// Deterministic clock shared by intake, workers and retry timers
    pub clock: TestClock,
    /// Queue recording every submission
    pub queue: Arc<RecordingQueue>,
    /// Handler recording every delivery event
    pub events: Arc<RecordingEventHandler>,
    /// Mock delivery targets
    pub http_mock: MockEndpoint,
    /// Dispatcher draining `queue`
    pub dispatcher: Dispatcher,
}

impl TestEnv {
    /// Creates an environment with default capacity and retry ceiling.
    ///
    /// # Panics
    ///
    /// Panics if the dispatcher cannot be built.
    pub async fn new() -> Self {
        Self::with_capacity(DEFAULT_TEST_QUEUE_CAPACITY).await
    }

    /// Creates an environment whose queue holds `capacity` tasks.
    ///
    /// # Panics
    ///
    /// Panics if the dispatcher cannot be built.
    pub async fn with_capacity(capacity: usize) -> Self {
        let config = DispatcherConfig {
            worker_count: 2,
            client_config: ClientConfig { timeout: TEST_DELIVERY_TIMEOUT, ..Default::default() },
            ..Default::default()
        };
        Self::with_config(capacity, config).await
    }

    /// Creates an environment with an explicit dispatcher configuration.
    ///
    /// # Panics
    ///
    /// Panics if the dispatcher cannot be built.
    pub async fn with_config(capacity: usize, config: DispatcherConfig) -> Self {
        let clock = TestClock::new();
        let queue = Arc::new(RecordingQueue::new(capacity));
        let events = Arc::new(RecordingEventHandler::new());
        let http_mock = MockEndpoint::start().await;

        let dispatcher = Dispatcher::with_event_handler(
            queue.clone(),
            config,
            Arc::new(clock.clone()),
            events.clone(),
        )
        .unwrap_or_else(|e| panic!("test dispatcher should build: {e}"));

        Self { clock, queue, events, http_mock, dispatcher }
    }

    /// Intake router over this environment's queue and clock.
    pub fn router(&self) -> Router {
        let state = AppState::new(self.queue.clone(), DEFAULT_MAX_RETRIES)
            .with_clock(Arc::new(self.clock.clone()))
            .with_stats(self.dispatcher.stats_handle());
        create_router(state)
    }

    /// Posts `payload` to `/notify` and returns the status and JSON body.
    ///
    /// # Panics
    ///
    /// Panics if the router fails or answers with a non-JSON body.
    pub async fn post_notify(&self, payload: &Value) -> (StatusCode, Value) {
        self.send_raw("POST", "/notify", payload.to_string()).await
    }

    /// Sends a raw request to the router and returns the status and JSON body.
    ///
    /// # Panics
    ///
    /// Panics if the router fails or answers with a non-JSON body.
    pub async fn send_raw(&self, method: &str, uri: &str, body: String) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap_or_else(|e| panic!("test request should build: {e}"));

        let response = self
            .router()
            .oneshot(request)
            .await
            .unwrap_or_else(|e| panic!("router should not fail: {e}"));
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap_or_else(|e| panic!("response body should be readable: {e}"));
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|e| panic!("response body should be JSON: {e}"));

        (status, body)
    }

    /// Accepts `payload` through the intake and returns the new task's id.
    ///
    /// # Panics
    ///
    /// Panics unless the intake answers `202 Accepted`.
    pub async fn submit(&self, payload: &Value) -> TaskId {
        let (status, body) = self.post_notify(payload).await;
        assert_eq!(status, StatusCode::ACCEPTED, "intake rejected payload: {body}");
        parse_task_id(body["task_id"].as_str().unwrap_or_default())
    }

    /// Takes one task through a delivery attempt.
    ///
    /// # Errors
    ///
    /// Returns error if the queue is closed.
    ///
    /// # Panics
    ///
    /// Panics if no task becomes available within [`DEFAULT_EVENT_TIMEOUT`].
    pub async fn process_next(&self) -> Result<DeliveryOutcome, DeliveryError> {
        tokio::time::timeout(DEFAULT_EVENT_TIMEOUT, self.dispatcher.process_next())
            .await
            .unwrap_or_else(|_| panic!("no task became available within {DEFAULT_EVENT_TIMEOUT:?}"))
    }

    /// Processes tasks until one reaches a terminal outcome, returning every
    /// outcome seen on the way.
    ///
    /// Retry timers re-submit through the queue, so a retried task is picked
    /// up again by a later call.
    ///
    /// # Panics
    ///
    /// Panics if the queue closes or stays empty for too long.
    pub async fn run_until_terminal(&self) -> Vec<DeliveryOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let outcome = self
                .process_next()
                .await
                .unwrap_or_else(|e| panic!("queue failed while processing: {e}"));
            let terminal = outcome.is_terminal();
            outcomes.push(outcome);
            if terminal {
                return outcomes;
            }
        }
    }
}
