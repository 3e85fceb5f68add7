//! Delayed re-submission of failed tasks.
//!
//! A retry is a detached timer task: it sleeps on the injected clock, then
//! submits the task back to the queue exactly once. The worker that failed
//! the attempt never waits for it. Timers live only in process memory, so a
//! restart loses every retry still pending.

use std::{sync::Arc, time::Duration};

use courier_core::{Clock, DeadLetteredEvent, DeliveryEvent, EventHandler, Task};
use tokio::task::JoinHandle;
use tracing::{debug, error, info_span, Instrument};

use crate::{dispatcher::SharedStats, queue::TaskQueue};

/// Spawns retry timers that feed tasks back into the queue.
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    queue: Arc<dyn TaskQueue>,
    clock: Arc<dyn Clock>,
    stats: SharedStats,
    event_handler: Arc<dyn EventHandler>,
}

impl RetryScheduler {
    /// Creates a scheduler re-submitting into `queue`.
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        clock: Arc<dyn Clock>,
        stats: SharedStats,
        event_handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self { queue, clock, stats, event_handler }
    }

    /// Re-submits `task` after `delay`.
    ///
    /// Returns the timer's handle; dropping it leaves the timer running. If
    /// the queue rejects the re-submission the task is reported as
    /// dead-lettered, since it has no other owner left.
    pub async fn schedule(&self, task: Task, delay: Duration) -> JoinHandle<()> {
        self.stats.write().await.pending_retries += 1;

        let span = info_span!(
            "retry_timer",
            task_id = %task.id,
            retry_count = task.retry_count,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
        );
        let scheduler = self.clone();

        tokio::spawn(async move { scheduler.fire(task, delay).await }.instrument(span))
    }

    async fn fire(self, task: Task, delay: Duration) {
        self.clock.sleep(delay).await;

        let task_id = task.id;
        let retry_count = task.retry_count;
        let target_url = task.request.target_url.clone();

        let result = self.queue.submit(task).await;

        {
            let mut stats = self.stats.write().await;
            stats.pending_retries = stats.pending_retries.saturating_sub(1);
            if result.is_err() {
                stats.dead_lettered += 1;
            }
        }

        match result {
            Ok(()) => debug!(task_id = %task_id, retry_count, "task re-submitted for retry"),
            Err(queue_error) => {
                error!(
                    task_id = %task_id,
                    retry_count,
                    error = %queue_error,
                    "retry re-submission rejected, dropping task"
                );

                let event = DeliveryEvent::DeadLettered(DeadLetteredEvent {
                    task_id,
                    target_url,
                    retry_count,
                    reason: format!("retry re-submission rejected: {queue_error}"),
                    failed_at: self.clock.now(),
                });
                self.event_handler.handle_event(event).await;
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Utc;
    use courier_core::{NotificationRequest, NoOpEventHandler, TestClock};
    use tokio::sync::RwLock;

    use super::*;
    use crate::{dispatcher::EngineStats, queue::MemoryQueue};

    #[derive(Debug, Default)]
    struct CapturingHandler {
        events: Mutex<Vec<DeliveryEvent>>,
    }

    #[async_trait::async_trait]
    impl EventHandler for CapturingHandler {
        async fn handle_event(&self, event: DeliveryEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn task() -> Task {
        Task::new(NotificationRequest::new("http://localhost/retry", "POST"), 3, Utc::now())
    }

    #[tokio::test]
    async fn timer_sleeps_then_submits_once() {
        let queue = Arc::new(MemoryQueue::new(4));
        let clock = TestClock::new();
        let stats: SharedStats = Arc::new(RwLock::new(EngineStats::default()));
        let scheduler = RetryScheduler::new(
            queue.clone(),
            Arc::new(clock.clone()),
            stats.clone(),
            Arc::new(NoOpEventHandler::new()),
        );
        let task = task();

        let handle = scheduler.schedule(task.clone(), Duration::from_secs(4)).await;
        handle.await.unwrap();

        assert_eq!(clock.sleeps(), vec![Duration::from_secs(4)]);
        assert_eq!(queue.depth().await.unwrap(), 1);
        assert_eq!(queue.retrieve().await.unwrap().id, task.id);
        assert_eq!(stats.read().await.pending_retries, 0);
    }

    #[tokio::test]
    async fn rejected_resubmission_is_dead_lettered() {
        let queue = Arc::new(MemoryQueue::new(1));
        queue.submit(task()).await.unwrap();
        let handler = Arc::new(CapturingHandler::default());
        let stats: SharedStats = Arc::new(RwLock::new(EngineStats::default()));
        let scheduler =
            RetryScheduler::new(queue.clone(), Arc::new(TestClock::new()), stats.clone(), handler.clone());
        let task = task();

        scheduler.schedule(task.clone(), Duration::from_secs(2)).await.await.unwrap();

        let events = handler.events.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        match &events[0] {
            DeliveryEvent::DeadLettered(event) => {
                assert_eq!(event.task_id, task.id);
                assert!(event.reason.contains("queue is full"));
            },
            other => panic!("unexpected event: {other:?}"),
        }
        let stats = stats.read().await;
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(stats.pending_retries, 0);
    }
}
