//! Queue double that records every submission.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex, PoisonError,
};

use async_trait::async_trait;
use courier_core::Task;
use courier_delivery::{queue::MemoryQueue, QueueError, TaskQueue};

/// Memory queue that remembers what was submitted to it.
///
/// Every call to `submit` is recorded, including ones the queue refused,
/// so tests can assert both how often and with what a queue was fed.
#[derive(Debug)]
pub struct RecordingQueue {
    inner: MemoryQueue,
    submissions: Mutex<Vec<Task>>,
    retrievals: AtomicUsize,
    forced_error: Mutex<Option<QueueError>>,
}

impl RecordingQueue {
    /// Creates a recording queue over a memory queue of `capacity`.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: MemoryQueue::new(capacity),
            submissions: Mutex::new(Vec::new()),
            retrievals: AtomicUsize::new(0),
            forced_error: Mutex::new(None),
        }
    }

    /// Every task passed to `submit`, in call order.
    pub fn submissions(&self) -> Vec<Task> {
        self.submissions.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of `submit` calls.
    pub fn submit_count(&self) -> usize {
        self.submissions.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Number of tasks handed out by `retrieve`.
    pub fn retrieve_count(&self) -> usize {
        self.retrievals.load(Ordering::SeqCst)
    }

    /// Makes every following `submit` fail with `error`.
    pub fn fail_submissions_with(&self, error: QueueError) {
        *self.forced_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    /// Lets `submit` reach the underlying queue again.
    pub fn clear_failure(&self) {
        *self.forced_error.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Closes the underlying queue.
    pub fn close(&self) {
        self.inner.close();
    }
}

#[async_trait]
impl TaskQueue for RecordingQueue {
    async fn submit(&self, task: Task) -> Result<(), QueueError> {
        self.submissions.lock().unwrap_or_else(PoisonError::into_inner).push(task.clone());

        let forced = self.forced_error.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(error) = forced {
            return Err(error);
        }

        self.inner.submit(task).await
    }

    async fn retrieve(&self) -> Result<Task, QueueError> {
        let task = self.inner.retrieve().await?;
        self.retrievals.fetch_add(1, Ordering::SeqCst);
        Ok(task)
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        self.inner.depth().await
    }

    fn backend(&self) -> &'static str {
        "recording"
    }
}
