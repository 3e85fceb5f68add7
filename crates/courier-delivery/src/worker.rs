//! Delivery workers: the retrieve and deliver loop.
//!
//! A worker owns one task at a time. It delivers it, then either finishes
//! it, hands it to a retry timer, or drops it after reporting why.

use std::{sync::Arc, time::Duration};

use courier_core::{
    Clock, DeadLetteredEvent, DeliveryEvent, DeliveryRejectedEvent, DeliverySucceededEvent,
    EventHandler, RetryScheduledEvent, Task,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    client::DeliveryClient,
    dispatcher::SharedStats,
    error::{DeliveryError, ErrorCategory, QueueError, Result},
    queue::TaskQueue,
    retry::{RetryContext, RetryDecision, RetryPolicy},
    scheduler::RetryScheduler,
};

/// Pause after a queue error other than `Closed` before retrieving again.
const RETRIEVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// What happened to a task after one pass through a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Target answered 2xx; the task is finished.
    Delivered {
        /// Status returned by the target.
        status_code: u16,
    },
    /// Attempt failed; a timer will re-submit the task.
    RetryScheduled {
        /// Retry count the task now carries.
        retry_count: u32,
        /// Backoff before re-submission.
        delay: Duration,
    },
    /// Attempt failed and no retries remain; the task was dropped.
    DeadLettered {
        /// Why the task was given up on.
        reason: String,
    },
    /// Request could not be built; the task was dropped without retrying.
    Rejected {
        /// Construction error.
        reason: String,
    },
}

impl DeliveryOutcome {
    /// Whether the task is finished and will not be seen again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::RetryScheduled { .. })
    }
}

/// Dependencies shared by every worker of a dispatcher.
#[derive(Debug, Clone)]
pub(crate) struct WorkerContext {
    pub(crate) queue: Arc<dyn TaskQueue>,
    pub(crate) client: Arc<DeliveryClient>,
    pub(crate) retry_policy: RetryPolicy,
    pub(crate) scheduler: RetryScheduler,
    pub(crate) stats: SharedStats,
    pub(crate) cancellation_token: CancellationToken,
    pub(crate) event_handler: Arc<dyn EventHandler>,
    pub(crate) clock: Arc<dyn Clock>,
}

/// Single delivery loop.
pub(crate) struct DeliveryWorker {
    id: usize,
    ctx: WorkerContext,
}

impl DeliveryWorker {
    pub(crate) fn new(id: usize, ctx: WorkerContext) -> Self {
        Self { id, ctx }
    }

    /// Retrieves and processes tasks until cancelled or the queue closes.
    ///
    /// Cancellation is only observed between tasks, so an attempt that has
    /// started always runs to completion.
    pub(crate) async fn run(&self) -> Result<()> {
        loop {
            let retrieved = tokio::select! {
                biased;
                () = self.ctx.cancellation_token.cancelled() => {
                    info!(worker_id = self.id, "delivery worker received shutdown signal");
                    break;
                }
                retrieved = self.ctx.queue.retrieve() => retrieved,
            };

            match retrieved {
                Ok(task) => {
                    self.process_task(task).await;
                },
                Err(QueueError::Closed) => {
                    info!(worker_id = self.id, "queue closed, delivery worker exiting");
                    break;
                },
                Err(error) => {
                    error!(worker_id = self.id, error = %error, "failed to retrieve task");
                    tokio::select! {
                        () = tokio::time::sleep(RETRIEVE_ERROR_BACKOFF) => {}
                        () = self.ctx.cancellation_token.cancelled() => break,
                    }
                },
            }
        }

        Ok(())
    }

    /// Runs one task through a delivery attempt and its follow-up.
    pub(crate) async fn process_task(&self, task: Task) -> DeliveryOutcome {
        {
            let mut stats = self.ctx.stats.write().await;
            stats.in_flight_deliveries += 1;
        }

        let outcome = self.attempt_delivery(task).await;

        {
            let mut stats = self.ctx.stats.write().await;
            stats.in_flight_deliveries = stats.in_flight_deliveries.saturating_sub(1);
            stats.tasks_processed += 1;
        }

        outcome
    }

    async fn attempt_delivery(&self, task: Task) -> DeliveryOutcome {
        debug!(
            worker_id = self.id,
            task_id = %task.id,
            attempt_number = task.attempt_number(),
            target_url = %task.request.target_url,
            "attempting notification delivery"
        );

        match self.ctx.client.deliver(&task).await {
            Ok(response) if response.is_success => {
                {
                    let mut stats = self.ctx.stats.write().await;
                    stats.successful_deliveries += 1;
                }

                info!(
                    worker_id = self.id,
                    task_id = %task.id,
                    status_code = response.status_code,
                    duration_ms = response.duration.as_millis(),
                    retry_count = task.retry_count,
                    "notification delivered"
                );

                let event = DeliveryEvent::Succeeded(DeliverySucceededEvent {
                    task_id: task.id,
                    target_url: task.request.target_url.clone(),
                    status_code: response.status_code,
                    attempt_number: task.attempt_number(),
                    delivered_at: self.ctx.clock.now(),
                });
                self.ctx.event_handler.handle_event(event).await;

                DeliveryOutcome::Delivered { status_code: response.status_code }
            },
            Ok(response) => {
                let error = DeliveryError::http_status(response.status_code, response.body);
                self.handle_failed_delivery(task, error).await
            },
            Err(error @ DeliveryError::InvalidRequest { .. }) => self.reject(task, error).await,
            Err(error) => self.handle_failed_delivery(task, error).await,
        }
    }

    async fn handle_failed_delivery(&self, mut task: Task, error: DeliveryError) -> DeliveryOutcome {
        {
            let mut stats = self.ctx.stats.write().await;
            stats.failed_attempts += 1;
        }

        let context = RetryContext::for_task(
            &task,
            error.clone(),
            self.ctx.clock.now(),
            self.ctx.retry_policy.clone(),
        );

        let (delay, next_attempt_at) = match context.decide_retry() {
            RetryDecision::Retry { delay, next_attempt_at, .. } => (delay, next_attempt_at),
            RetryDecision::GiveUp { reason } => return self.dead_letter(task, reason, &error).await,
        };

        let Some(retry_count) = task.record_retry(next_attempt_at) else {
            let reason = format!("maximum retries ({}) exhausted", task.max_retries);
            return self.dead_letter(task, reason, &error).await;
        };

        warn!(
            worker_id = self.id,
            task_id = %task.id,
            retry_count,
            max_retries = task.max_retries,
            remaining_retries = task.remaining_retries(),
            status_code = ?error.status_code(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error_category = %ErrorCategory::from(&error),
            error = %error,
            "delivery failed, retry scheduled"
        );

        {
            let mut stats = self.ctx.stats.write().await;
            stats.retries_scheduled += 1;
        }

        let event = DeliveryEvent::RetryScheduled(RetryScheduledEvent {
            task_id: task.id,
            target_url: task.request.target_url.clone(),
            retry_count,
            delay,
            next_attempt_at,
            error_message: error.to_string(),
        });
        self.ctx.event_handler.handle_event(event).await;

        // The timer owns the task from here; its handle is not kept.
        drop(self.ctx.scheduler.schedule(task, delay).await);

        DeliveryOutcome::RetryScheduled { retry_count, delay }
    }

    async fn dead_letter(&self, task: Task, reason: String, error: &DeliveryError) -> DeliveryOutcome {
        {
            let mut stats = self.ctx.stats.write().await;
            stats.dead_lettered += 1;
        }

        error!(
            worker_id = self.id,
            task_id = %task.id,
            retry_count = task.retry_count,
            target_url = %task.request.target_url,
            status_code = ?error.status_code(),
            error = %error,
            reason = %reason,
            "delivery permanently failed, task dead-lettered"
        );

        let event = DeliveryEvent::DeadLettered(DeadLetteredEvent {
            task_id: task.id,
            target_url: task.request.target_url,
            retry_count: task.retry_count,
            reason: reason.clone(),
            failed_at: self.ctx.clock.now(),
        });
        self.ctx.event_handler.handle_event(event).await;

        DeliveryOutcome::DeadLettered { reason }
    }

    async fn reject(&self, task: Task, error: DeliveryError) -> DeliveryOutcome {
        {
            let mut stats = self.ctx.stats.write().await;
            stats.rejected += 1;
        }

        error!(
            worker_id = self.id,
            task_id = %task.id,
            target_url = %task.request.target_url,
            method = %task.request.method,
            error = %error,
            "task cannot be delivered, dropping without retry"
        );

        let reason = error.to_string();
        let event = DeliveryEvent::Rejected(DeliveryRejectedEvent {
            task_id: task.id,
            target_url: task.request.target_url,
            error_message: reason.clone(),
            rejected_at: self.ctx.clock.now(),
        });
        self.ctx.event_handler.handle_event(event).await;

        DeliveryOutcome::Rejected { reason }
    }
}
