//! Bounded in-process queue over a tokio mpsc channel.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use courier_core::Task;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    Mutex,
};
use tracing::debug;

use super::TaskQueue;
use crate::error::QueueError;

/// Fixed-capacity FIFO queue held in memory.
///
/// `submit` never waits: a full buffer is reported as [`QueueError::Full`]
/// so intake can answer with backpressure. Consumers take turns on the
/// receiver, so each task goes to exactly one of them.
#[derive(Debug)]
pub struct MemoryQueue {
    sender: RwLock<Option<mpsc::Sender<Task>>>,
    receiver: Mutex<mpsc::Receiver<Task>>,
    capacity: usize,
}

impl MemoryQueue {
    /// Creates a queue holding at most `capacity` tasks.
    ///
    /// A capacity of zero is raised to one; tokio channels need a slot.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender: RwLock::new(Some(sender)),
            receiver: Mutex::new(receiver),
            capacity,
        }
    }

    /// Maximum number of queued tasks.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stops accepting tasks.
    ///
    /// Tasks already queued can still be retrieved; after that `retrieve`
    /// returns [`QueueError::Closed`].
    pub fn close(&self) {
        let sender = self.sender.write().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(sender) = sender {
            debug!(queued = queued_in(&sender), "memory queue closed");
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.sender.read().unwrap_or_else(PoisonError::into_inner).is_none()
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn submit(&self, task: Task) -> Result<(), QueueError> {
        let guard = self.sender.read().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = guard.as_ref() else {
            return Err(QueueError::Closed);
        };

        match sender.try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(QueueError::Full { capacity: self.capacity }),
            Err(TrySendError::Closed(_)) => Err(QueueError::Closed),
        }
    }

    async fn retrieve(&self) -> Result<Task, QueueError> {
        let mut receiver = self.receiver.lock().await;
        match receiver.recv().await {
            Some(task) => Ok(task),
            None => Err(QueueError::Closed),
        }
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        let guard = self.sender.read().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map(queued_in).ok_or(QueueError::Closed)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Tasks sitting in the channel: its free slots subtracted from its size.
fn queued_in(sender: &mpsc::Sender<Task>) -> usize {
    sender.max_capacity() - sender.capacity()
}
