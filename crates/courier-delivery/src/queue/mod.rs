//! Task queue abstraction and its backends.
//!
//! The dispatcher and intake only see [`TaskQueue`]. The backend is picked
//! once at startup: [`MemoryQueue`] for a single process with fail-fast
//! backpressure, or [`RedisQueue`] for a durable list shared across
//! restarts.

use async_trait::async_trait;
use courier_core::Task;

use crate::error::QueueError;

mod memory;
mod redis_list;

pub use memory::MemoryQueue;
pub use redis_list::{RedisQueue, RedisQueueConfig, DEFAULT_QUEUE_KEY};

/// Work channel between intake, retry timers and delivery workers.
///
/// Implementations are shared behind `Arc<dyn TaskQueue>` and must be safe
/// for any number of concurrent producers and consumers. Each submitted task
/// is handed to at most one consumer.
#[async_trait]
pub trait TaskQueue: Send + Sync + std::fmt::Debug {
    /// Enqueues a task, taking ownership of it.
    async fn submit(&self, task: Task) -> Result<(), QueueError>;

    /// Waits until a task is available and removes it from the queue.
    ///
    /// Only fails with [`QueueError::Closed`], once the queue has been shut
    /// down and drained.
    async fn retrieve(&self) -> Result<Task, QueueError>;

    /// Number of tasks currently waiting.
    ///
    /// Fails when the backend cannot be reached or no longer accepts work,
    /// which health checks report as unavailable.
    async fn depth(&self) -> Result<usize, QueueError>;

    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;
}
