//! Lifecycle of the dispatcher's worker tasks.
//!
//! Spawns the configured number of workers, and on shutdown cancels them and
//! waits, bounded by a timeout, for in-flight deliveries to finish.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::{
    error::{DeliveryError, Result},
    worker::{DeliveryWorker, WorkerContext},
};

/// Supervised set of delivery workers.
pub(crate) struct WorkerPool {
    worker_count: usize,
    ctx: WorkerContext,
    worker_handles: Vec<JoinHandle<Result<()>>>,
}

impl WorkerPool {
    pub(crate) fn new(worker_count: usize, ctx: WorkerContext) -> Self {
        Self { worker_count, ctx, worker_handles: Vec::with_capacity(worker_count) }
    }

    /// Spawns every worker and returns without waiting for them.
    pub(crate) async fn spawn_workers(&mut self) -> Result<()> {
        info!(worker_count = self.worker_count, "spawning delivery workers");

        {
            let mut stats = self.ctx.stats.write().await;
            stats.active_workers = self.worker_count;
        }

        for worker_id in 0..self.worker_count {
            let worker = DeliveryWorker::new(worker_id, self.ctx.clone());

            let handle = tokio::spawn(async move {
                info!(worker_id, "delivery worker starting");

                let result = worker.run().await;

                if let Err(ref error) = result {
                    error!(worker_id, error = %error, "delivery worker terminated with error");
                } else {
                    info!(worker_id, "delivery worker stopped gracefully");
                }

                result
            });

            self.worker_handles.push(handle);
        }

        info!(spawned_workers = self.worker_handles.len(), "all delivery workers spawned");

        Ok(())
    }

    /// Cancels the workers and waits up to `timeout` for them to exit.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownTimeout` if the workers are still running when the
    /// timeout elapses, or `WorkerFailed` for the first worker that panicked.
    pub(crate) async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            worker_count = self.worker_handles.len(),
            timeout_seconds = timeout.as_secs(),
            "initiating graceful worker shutdown"
        );

        self.ctx.cancellation_token.cancel();

        let handles = std::mem::take(&mut self.worker_handles);
        let stats = self.ctx.stats.clone();

        let shutdown_future = async move {
            let mut first_failure = None;

            for (worker_id, handle) in handles.into_iter().enumerate() {
                match handle.await {
                    Ok(Ok(())) => {},
                    Ok(Err(error)) => {
                        warn!(worker_id, error = %error, "worker completed with error during shutdown");
                    },
                    Err(join_error) => {
                        error!(worker_id, error = %join_error, "worker task panicked during shutdown");
                        first_failure.get_or_insert(DeliveryError::WorkerFailed {
                            worker_id,
                            message: join_error.to_string(),
                        });
                    },
                }
            }

            stats.write().await.active_workers = 0;

            first_failure
        };

        match tokio::time::timeout(timeout, shutdown_future).await {
            Ok(None) => {
                info!("worker pool shutdown completed");
                Ok(())
            },
            Ok(Some(failure)) => Err(failure),
            Err(_elapsed) => {
                error!(
                    timeout_seconds = timeout.as_secs(),
                    "worker shutdown timed out, some workers may still be running"
                );
                Err(DeliveryError::ShutdownTimeout { timeout })
            },
        }
    }

    /// Whether any worker task is still running.
    pub(crate) fn has_active_workers(&self) -> bool {
        self.worker_handles.iter().any(|handle| !handle.is_finished())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let active_count = self.worker_handles.iter().filter(|h| !h.is_finished()).count();

        if active_count > 0 && !self.ctx.cancellation_token.is_cancelled() {
            warn!(
                active_workers = active_count,
                "worker pool dropped without shutdown, cancelling workers"
            );
            self.ctx.cancellation_token.cancel();
        }
    }
}
