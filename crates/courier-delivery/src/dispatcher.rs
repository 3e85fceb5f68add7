//! Dispatcher owning the worker pool and its shared dependencies.
//!
//! ```text
//! ┌────────────┐   ┌─────────────┐   ┌─────────────┐
//! │ Dispatcher │──▶│ Worker Pool │──▶│ HTTP Client │
//! └────────────┘   └─────────────┘   └─────────────┘
//!       │                │                  │
//!       ▼                ▼                  ▼
//! ┌────────────┐   ┌─────────────┐   ┌─────────────┐
//! │ TaskQueue  │◀──│ Retry Timer │   │   Targets   │
//! └────────────┘   └─────────────┘   └─────────────┘
//! ```

use std::{sync::Arc, time::Duration};

use courier_core::{Clock, EventHandler, NoOpEventHandler, RealClock};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    client::{ClientConfig, DeliveryClient},
    error::{DeliveryError, Result},
    queue::TaskQueue,
    retry::RetryPolicy,
    scheduler::RetryScheduler,
    worker::{DeliveryOutcome, DeliveryWorker, WorkerContext},
    worker_pool::WorkerPool,
};

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of concurrent delivery workers.
    pub worker_count: usize,

    /// HTTP client configuration.
    pub client_config: ClientConfig,

    /// Backoff policy for failed attempts.
    pub retry_policy: RetryPolicy,

    /// How long shutdown waits for in-flight deliveries.
    pub shutdown_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: crate::DEFAULT_WORKER_COUNT,
            client_config: ClientConfig::default(),
            retry_policy: RetryPolicy::default(),
            shutdown_timeout: Duration::from_secs(crate::DEFAULT_SHUTDOWN_TIMEOUT_SECONDS),
        }
    }
}

/// Delivery counters since startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Workers currently running.
    pub active_workers: usize,
    /// Tasks taken through a delivery attempt.
    pub tasks_processed: u64,
    /// Attempts answered with 2xx.
    pub successful_deliveries: u64,
    /// Attempts that failed with a status, network error or timeout.
    pub failed_attempts: u64,
    /// Retries handed to a timer.
    pub retries_scheduled: u64,
    /// Timers that have not yet re-submitted their task.
    pub pending_retries: u64,
    /// Tasks given up on.
    pub dead_lettered: u64,
    /// Tasks dropped because their request could not be built.
    pub rejected: u64,
    /// Attempts currently in progress.
    pub in_flight_deliveries: u64,
}

/// Stats shared between the dispatcher, its workers and observers.
pub type SharedStats = Arc<RwLock<EngineStats>>;

/// Owns the workers draining a [`TaskQueue`].
pub struct Dispatcher {
    queue: Arc<dyn TaskQueue>,
    config: DispatcherConfig,
    client: Arc<DeliveryClient>,
    stats: SharedStats,
    cancellation_token: CancellationToken,
    worker_pool: Option<WorkerPool>,
    clock: Arc<dyn Clock>,
    event_handler: Arc<dyn EventHandler>,
}

impl Dispatcher {
    /// Creates a dispatcher using the system clock and discarding events.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is unusable or the HTTP client
    /// cannot be built.
    pub fn new(queue: Arc<dyn TaskQueue>, config: DispatcherConfig) -> Result<Self> {
        Self::with_event_handler(
            queue,
            config,
            Arc::new(RealClock::new()),
            Arc::new(NoOpEventHandler::new()),
        )
    }

    /// Creates a dispatcher with an injected clock and event handler.
    ///
    /// The event handler receives every outcome, including dead-lettered
    /// tasks.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is unusable or the HTTP client
    /// cannot be built.
    pub fn with_event_handler(
        queue: Arc<dyn TaskQueue>,
        config: DispatcherConfig,
        clock: Arc<dyn Clock>,
        event_handler: Arc<dyn EventHandler>,
    ) -> Result<Self> {
        if config.worker_count == 0 {
            return Err(DeliveryError::configuration("worker_count must be greater than 0"));
        }

        let client = Arc::new(DeliveryClient::new(config.client_config.clone())?);

        Ok(Self {
            queue,
            config,
            client,
            stats: Arc::new(RwLock::new(EngineStats::default())),
            cancellation_token: CancellationToken::new(),
            worker_pool: None,
            clock,
            event_handler,
        })
    }

    /// Spawns the worker pool and returns immediately.
    ///
    /// # Errors
    ///
    /// Returns error if the dispatcher is already running.
    pub async fn start(&mut self) -> Result<()> {
        if self.worker_pool.is_some() {
            return Err(DeliveryError::configuration("dispatcher already started"));
        }

        info!(
            worker_count = self.config.worker_count,
            backend = self.queue.backend(),
            max_retries = self.config.retry_policy.max_retries,
            "starting notification dispatcher"
        );

        let mut worker_pool = WorkerPool::new(self.config.worker_count, self.worker_context());
        worker_pool.spawn_workers().await?;
        self.worker_pool = Some(worker_pool);

        info!("notification dispatcher started");
        Ok(())
    }

    /// Stops the workers, letting in-flight attempts finish.
    ///
    /// Retry timers still pending are not awaited.
    ///
    /// # Errors
    ///
    /// Returns error if the workers do not stop within the shutdown timeout.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("shutting down notification dispatcher");

        match self.worker_pool.take() {
            Some(worker_pool) => worker_pool.shutdown_graceful(self.config.shutdown_timeout).await,
            None => {
                info!("dispatcher was not started, shutdown completed immediately");
                Ok(())
            },
        }
    }

    /// Retrieves one task and processes it on the caller's task.
    ///
    /// Waits for a task if the queue is empty. Used for controlled draining
    /// and deterministic tests; does not require [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Queue` if the queue is closed.
    pub async fn process_next(&self) -> Result<DeliveryOutcome> {
        let task = self.queue.retrieve().await?;
        Ok(DeliveryWorker::new(0, self.worker_context()).process_task(task).await)
    }

    /// Snapshot of the delivery counters.
    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }

    /// Live handle to the delivery counters.
    pub fn stats_handle(&self) -> SharedStats {
        self.stats.clone()
    }

    /// Queue the dispatcher drains.
    pub fn queue(&self) -> Arc<dyn TaskQueue> {
        self.queue.clone()
    }

    /// Dispatcher configuration.
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Whether workers are currently running.
    pub fn is_running(&self) -> bool {
        self.worker_pool.as_ref().is_some_and(WorkerPool::has_active_workers)
    }

    fn worker_context(&self) -> WorkerContext {
        WorkerContext {
            queue: self.queue.clone(),
            client: self.client.clone(),
            retry_policy: self.config.retry_policy.clone(),
            scheduler: RetryScheduler::new(
                self.queue.clone(),
                self.clock.clone(),
                self.stats.clone(),
                self.event_handler.clone(),
            ),
            stats: self.stats.clone(),
            cancellation_token: self.cancellation_token.clone(),
            event_handler: self.event_handler.clone(),
            clock: self.clock.clone(),
        }
    }
}
