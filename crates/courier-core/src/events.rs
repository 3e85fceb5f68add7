//! Delivery outcome events and the handlers that observe them.
//!
//! Workers and retry timers report every terminal or scheduling decision as
//! a [`DeliveryEvent`]. Handlers subscribe without the delivery path knowing
//! who listens. A task that exhausts its retries is reported as
//! [`DeliveryEvent::DeadLettered`]; a handler for that event is where a
//! durable dead-letter store would plug in.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::TaskId;

/// Events emitted by the delivery path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeliveryEvent {
    /// Target answered with a 2xx status.
    Succeeded(DeliverySucceededEvent),

    /// Attempt failed and the task will be re-submitted after a delay.
    RetryScheduled(RetryScheduledEvent),

    /// Task failed permanently and was dropped.
    DeadLettered(DeadLetteredEvent),

    /// Task could not be turned into an HTTP request and was dropped.
    Rejected(DeliveryRejectedEvent),
}

impl DeliveryEvent {
    /// Task the event refers to.
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::Succeeded(event) => event.task_id,
            Self::RetryScheduled(event) => event.task_id,
            Self::DeadLettered(event) => event.task_id,
            Self::Rejected(event) => event.task_id,
        }
    }

    /// Whether the event ends the task's lifecycle.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::RetryScheduled(_))
    }
}

/// Emitted when a delivery succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverySucceededEvent {
    /// Delivered task.
    pub task_id: TaskId,

    /// URL that received the notification.
    pub target_url: String,

    /// Status returned by the target.
    pub status_code: u16,

    /// One-based attempt that succeeded.
    pub attempt_number: u32,

    /// Completion time.
    pub delivered_at: DateTime<Utc>,
}

/// Emitted when a failed attempt is scheduled for another try.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryScheduledEvent {
    /// Task being retried.
    pub task_id: TaskId,

    /// Target URL of the task.
    pub target_url: String,

    /// Retry count after this scheduling decision.
    pub retry_count: u32,

    /// Backoff before re-submission.
    pub delay: Duration,

    /// When the task becomes due again.
    pub next_attempt_at: DateTime<Utc>,

    /// Failure that triggered the retry.
    pub error_message: String,
}

/// Emitted when a task is permanently given up on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetteredEvent {
    /// Abandoned task.
    pub task_id: TaskId,

    /// Target URL of the task.
    pub target_url: String,

    /// Retries consumed before giving up.
    pub retry_count: u32,

    /// Why the task was abandoned.
    pub reason: String,

    /// When the decision was taken.
    pub failed_at: DateTime<Utc>,
}

/// Emitted when a task is dropped because its request cannot be built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRejectedEvent {
    /// Rejected task.
    pub task_id: TaskId,

    /// Target URL as submitted.
    pub target_url: String,

    /// Construction error.
    pub error_message: String,

    /// When the task was dropped.
    pub rejected_at: DateTime<Utc>,
}

/// Observer of delivery events.
///
/// Handlers must not fail the delivery path. Problems are logged inside the
/// handler and never propagated.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync + std::fmt::Debug {
    /// Handles one delivery event.
    async fn handle_event(&self, event: DeliveryEvent);
}

/// Handler that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpEventHandler;

impl NoOpEventHandler {
    /// Creates a new no-op handler.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl EventHandler for NoOpEventHandler {
    async fn handle_event(&self, _event: DeliveryEvent) {}
}

/// Writes every task the service gives up on to the `courier::dead_letter`
/// log target.
///
/// Dead-lettered and rejected tasks carry enough context to replay them by
/// hand. Other events are ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeadLetterLogger;

impl DeadLetterLogger {
    /// Creates a new dead-letter logger.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl EventHandler for DeadLetterLogger {
    async fn handle_event(&self, event: DeliveryEvent) {
        match event {
            DeliveryEvent::DeadLettered(event) => {
                tracing::error!(
                    target: "courier::dead_letter",
                    task_id = %event.task_id,
                    target_url = %event.target_url,
                    retry_count = event.retry_count,
                    failed_at = %event.failed_at,
                    reason = %event.reason,
                    "task dead-lettered"
                );
            },
            DeliveryEvent::Rejected(event) => {
                tracing::error!(
                    target: "courier::dead_letter",
                    task_id = %event.task_id,
                    target_url = %event.target_url,
                    rejected_at = %event.rejected_at,
                    error = %event.error_message,
                    "task rejected"
                );
            },
            DeliveryEvent::Succeeded(_) | DeliveryEvent::RetryScheduled(_) => {},
        }
    }
}

/// Forwards each event to every registered subscriber concurrently.
#[derive(Debug, Clone, Default)]
pub struct MulticastEventHandler {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl MulticastEventHandler {
    /// Creates a handler with no subscribers.
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Registers a subscriber.
    pub fn add_subscriber(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }
}

#[async_trait::async_trait]
impl EventHandler for MulticastEventHandler {
    async fn handle_event(&self, event: DeliveryEvent) {
        let deliveries = self.handlers.iter().map(|handler| handler.handle_event(event.clone()));
        futures::future::join_all(deliveries).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug, Default)]
    struct CountingHandler {
        seen: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl EventHandler for CountingHandler {
        async fn handle_event(&self, _event: DeliveryEvent) {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn dead_lettered(task_id: TaskId) -> DeliveryEvent {
        DeliveryEvent::DeadLettered(DeadLetteredEvent {
            task_id,
            target_url: "https://example.com/hook".to_string(),
            retry_count: 3,
            reason: "retry budget exhausted".to_string(),
            failed_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn multicast_reaches_every_subscriber() {
        let first = Arc::new(CountingHandler::default());
        let second = Arc::new(CountingHandler::default());
        let mut multicast = MulticastEventHandler::new();
        multicast.add_subscriber(first.clone());
        multicast.add_subscriber(second.clone());

        multicast.handle_event(dead_lettered(TaskId::new())).await;

        assert_eq!(multicast.subscriber_count(), 2);
        assert_eq!(first.seen.load(Ordering::SeqCst), 1);
        assert_eq!(second.seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_op_handler_accepts_events() {
        NoOpEventHandler::new().handle_event(dead_lettered(TaskId::new())).await;
    }

    #[tokio::test]
    async fn dead_letter_logger_sits_beside_other_subscribers() {
        let counter = Arc::new(CountingHandler::default());
        let mut multicast = MulticastEventHandler::new();
        multicast.add_subscriber(Arc::new(DeadLetterLogger::new()));
        multicast.add_subscriber(counter.clone());

        multicast.handle_event(dead_lettered(TaskId::new())).await;
        multicast
            .handle_event(DeliveryEvent::Rejected(DeliveryRejectedEvent {
                task_id: TaskId::new(),
                target_url: "https://example.com/hook".to_string(),
                error_message: "invalid method".to_string(),
                rejected_at: Utc::now(),
            }))
            .await;

        assert_eq!(counter.seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn only_retry_scheduling_is_non_terminal() {
        let task_id = TaskId::new();
        assert!(dead_lettered(task_id).is_terminal());
        assert_eq!(dead_lettered(task_id).task_id(), task_id);

        let retry = DeliveryEvent::RetryScheduled(RetryScheduledEvent {
            task_id,
            target_url: "https://example.com/hook".to_string(),
            retry_count: 1,
            delay: Duration::from_secs(2),
            next_attempt_at: Utc::now(),
            error_message: "HTTP 500".to_string(),
        });
        assert!(!retry.is_terminal());
    }
}
