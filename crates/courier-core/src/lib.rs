//! Core domain model and shared abstractions.
//!
//! Holds the notification request and task types that flow between intake,
//! the queue and the delivery workers, the intake error taxonomy, the
//! delivery event hook used for dead-lettering, and the clock abstraction
//! that keeps retry timing testable.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod models;
pub mod time;

pub use error::{CourierError, Result};
pub use events::{
    DeadLetterLogger, DeadLetteredEvent, DeliveryEvent, DeliveryRejectedEvent,
    DeliverySucceededEvent, EventHandler, MulticastEventHandler, NoOpEventHandler,
    RetryScheduledEvent,
};
pub use models::{NotificationRequest, Task, TaskId, DEFAULT_MAX_RETRIES};
pub use time::{Clock, RealClock, TestClock};
