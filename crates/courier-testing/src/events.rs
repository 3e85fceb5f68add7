//! Event capture for asserting delivery outcomes.
//!
//! Waits are bounded by [`DEFAULT_EVENT_TIMEOUT`] so a missing event fails
//! the test instead of hanging it.

use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use courier_core::{DeliveryEvent, EventHandler, TaskId};
use tokio::sync::Notify;

/// Default timeout for waiting on events in tests.
pub const DEFAULT_EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Event handler that keeps every event it receives.
#[derive(Debug, Default)]
pub struct RecordingEventHandler {
    events: Mutex<Vec<DeliveryEvent>>,
    notify: Notify,
}

impl RecordingEventHandler {
    /// Creates an empty handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far, in arrival order.
    pub fn events(&self) -> Vec<DeliveryEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Events concerning `task_id`.
    pub fn events_for(&self, task_id: TaskId) -> Vec<DeliveryEvent> {
        self.events().into_iter().filter(|event| event.task_id() == task_id).collect()
    }

    /// Number of events received.
    pub fn count(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Waits until at least `count` events have arrived.
    ///
    /// # Panics
    ///
    /// Panics if they do not arrive within [`DEFAULT_EVENT_TIMEOUT`].
    pub async fn wait_for_count(&self, count: usize) -> Vec<DeliveryEvent> {
        self.wait_until(|events| events.len() >= count).await
    }

    /// Waits for the event that finishes `task_id`.
    ///
    /// # Panics
    ///
    /// Panics if no terminal event arrives within [`DEFAULT_EVENT_TIMEOUT`].
    pub async fn wait_for_terminal(&self, task_id: TaskId) -> DeliveryEvent {
        let events = self
            .wait_until(|events| {
                events.iter().any(|event| event.task_id() == task_id && event.is_terminal())
            })
            .await;

        events
            .into_iter()
            .find(|event| event.task_id() == task_id && event.is_terminal())
            .unwrap_or_else(|| unreachable!("terminal event present once the wait succeeds"))
    }

    async fn wait_until(&self, done: impl Fn(&[DeliveryEvent]) -> bool) -> Vec<DeliveryEvent> {
        let result = tokio::time::timeout(DEFAULT_EVENT_TIMEOUT, async {
            loop {
                let notified = self.notify.notified();
                let events = self.events();
                if done(&events) {
                    return events;
                }
                notified.await;
            }
        })
        .await;

        match result {
            Ok(events) => events,
            Err(_) => panic!(
                "expected events did not arrive within {DEFAULT_EVENT_TIMEOUT:?}; received: {:?}",
                self.events()
            ),
        }
    }
}

#[async_trait]
impl EventHandler for RecordingEventHandler {
    async fn handle_event(&self, event: DeliveryEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
        self.notify.notify_waiters();
    }
}
