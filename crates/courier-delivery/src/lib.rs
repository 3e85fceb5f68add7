//! Queued webhook delivery with bounded retries.
//!
//! Tasks enter a [`TaskQueue`] (bounded in-memory channel or a Redis list)
//! and are drained by a fixed pool of workers owned by the [`Dispatcher`].
//! Each worker takes one task at a time through the delivery lifecycle:
//!
//! 1. **Retrieve** - wait on the queue for the next task
//! 2. **Deliver** - build and send the HTTP request with a client timeout
//! 3. **Classify** - 2xx finishes the task, a bad request drops it, anything
//!    else is a failed attempt
//! 4. **Retry** - failed attempts under the ceiling are handed to a detached
//!    timer that re-submits after exponential backoff; the rest are
//!    dead-lettered
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use courier_delivery::{queue::MemoryQueue, Dispatcher, DispatcherConfig, DeliveryError};
//!
//! # async fn example() -> std::result::Result<(), DeliveryError> {
//! let queue = Arc::new(MemoryQueue::new(1000));
//! let mut dispatcher = Dispatcher::new(queue, DispatcherConfig::default())?;
//!
//! dispatcher.start().await?;
//! # dispatcher.shutdown().await
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod worker;
mod worker_pool;

pub use dispatcher::{Dispatcher, DispatcherConfig, EngineStats, SharedStats};
pub use error::{DeliveryError, ErrorCategory, QueueError, Result};
pub use queue::TaskQueue;
pub use worker::DeliveryOutcome;

/// Default number of concurrent delivery workers.
pub const DEFAULT_WORKER_COUNT: usize = 5;

/// Default outbound HTTP timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

/// Default grace period for in-flight deliveries on shutdown, in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECONDS: u64 = 30;
