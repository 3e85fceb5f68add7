//! Courier notification delivery service.
//!
//! Main entry point. Wires configuration, the task queue, the delivery
//! dispatcher and the intake server, and coordinates graceful shutdown.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use courier_api::{start_server, AppState, Config, QueueBackend};
use courier_core::{DeadLetterLogger, MulticastEventHandler, RealClock};
use courier_delivery::{
    queue::{MemoryQueue, RedisQueue},
    Dispatcher, TaskQueue,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    info!("Starting courier notification service");

    let config = Config::load()?;
    let addr = config.parse_server_addr()?;
    info!(
        server_addr = %addr,
        queue_backend = %config.queue_backend,
        redis_url = %config.redis_url_masked(),
        worker_pool_size = config.worker_pool_size,
        max_retries = config.max_retries,
        "Configuration loaded"
    );

    let queue = create_queue(&config).await?;
    info!(backend = queue.backend(), "Task queue ready");

    let mut dispatcher = Dispatcher::with_event_handler(
        queue.clone(),
        config.to_dispatcher_config(),
        Arc::new(RealClock::new()),
        Arc::new(event_handlers()),
    )
    .context("Failed to create dispatcher")?;
    dispatcher.start().await.context("Failed to start dispatcher")?;

    let state = AppState::new(queue, config.max_retries).with_stats(dispatcher.stats_handle());

    info!(addr = %addr, "Courier is ready to accept notifications");

    if let Err(e) = start_server(state, addr, config.request_timeout()).await {
        error!(error = %e, "Server failed");
    }

    if let Err(e) = dispatcher.shutdown().await {
        warn!(error = %e, "Dispatcher did not shut down cleanly");
    }

    info!("Courier shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,courier=debug,tower_http=debug"))
        .context("Invalid RUST_LOG environment variable")?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    Ok(())
}

/// Subscribers notified of every delivery outcome.
fn event_handlers() -> MulticastEventHandler {
    let mut handlers = MulticastEventHandler::new();
    handlers.add_subscriber(Arc::new(DeadLetterLogger::new()));
    handlers
}

/// Builds the configured queue backend, retrying the Redis connection.
async fn create_queue(config: &Config) -> Result<Arc<dyn TaskQueue>> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    match config.queue_backend {
        QueueBackend::Memory => {
            info!(capacity = config.memory_queue_capacity, "Using in-memory task queue");
            Ok(Arc::new(MemoryQueue::new(config.memory_queue_capacity)))
        },
        QueueBackend::Redis => {
            let mut retries = 0;
            loop {
                match RedisQueue::connect(config.to_redis_config()).await {
                    Ok(queue) => {
                        info!(key = queue.key(), "Connected to Redis task queue");
                        return Ok(Arc::new(queue));
                    },
                    Err(e) if retries < MAX_RETRIES => {
                        retries += 1;
                        info!(
                            attempt = retries,
                            max_retries = MAX_RETRIES,
                            error = %e,
                            "Redis connection failed, retrying..."
                        );
                        tokio::time::sleep(RETRY_DELAY).await;
                    },
                    Err(e) => {
                        return Err(e).context("Failed to connect to Redis after retries");
                    },
                }
            }
        },
    }
}
