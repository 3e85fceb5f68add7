//! Notification requests and the queued tasks that carry them.
//!
//! A [`NotificationRequest`] is the immutable description of one outbound
//! HTTP call. A [`Task`] wraps it with identity and retry bookkeeping and is
//! the unit that moves between the queue, a worker and a retry timer.

use std::{collections::HashMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::CourierError;

/// Retry ceiling applied to tasks when no other value is configured.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// HTTP method used when a request leaves `method` empty.
pub const DEFAULT_METHOD: &str = "GET";

/// Unique identifier for a delivery task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generates a fresh random task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TaskId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Outbound HTTP call requested by an intake client.
///
/// Missing or `null` fields deserialize to their empty value so validation,
/// not parsing, decides whether a request is acceptable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    /// Absolute URL the notification is delivered to.
    #[serde(default, deserialize_with = "null_as_default")]
    pub target_url: String,

    /// HTTP method; empty means [`DEFAULT_METHOD`].
    #[serde(default, deserialize_with = "null_as_default")]
    pub method: String,

    /// Headers applied to the outbound request. Later duplicates win.
    #[serde(default, deserialize_with = "null_as_default")]
    pub headers: HashMap<String, String>,

    /// Request body sent verbatim.
    #[serde(default, deserialize_with = "null_as_default")]
    pub body: String,
}

impl NotificationRequest {
    /// Creates a request for `target_url` with the given method and no headers
    /// or body.
    pub fn new(target_url: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
            method: method.into(),
            headers: HashMap::new(),
            body: String::new(),
        }
    }

    /// Adds a header, replacing any previous value for the same name.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Method to send, falling back to `GET` when none was given.
    pub fn effective_method(&self) -> &str {
        if self.method.is_empty() {
            DEFAULT_METHOD
        } else {
            &self.method
        }
    }

    /// Checks the request is acceptable for queueing.
    ///
    /// Only presence of a target is checked here. Whether the URL, method and
    /// headers form a valid HTTP request is decided when the request is built
    /// for delivery.
    pub fn validate(&self) -> crate::Result<()> {
        if self.target_url.is_empty() {
            return Err(CourierError::MissingTargetUrl);
        }
        Ok(())
    }
}

/// A notification request plus identity and retry bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier, reported back to the intake client.
    pub id: TaskId,

    /// The request to deliver.
    pub request: NotificationRequest,

    /// Number of retries already scheduled for this task.
    pub retry_count: u32,

    /// Retry ceiling. Once `retry_count` reaches it, a failed attempt is
    /// terminal.
    pub max_retries: u32,

    /// When the pending retry becomes due; `None` before the first failure.
    #[serde(default)]
    pub next_attempt_at: Option<DateTime<Utc>>,

    /// When intake accepted the task.
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Creates a task for a fresh request.
    pub fn new(request: NotificationRequest, max_retries: u32, created_at: DateTime<Utc>) -> Self {
        Self {
            id: TaskId::new(),
            request,
            retry_count: 0,
            max_retries,
            next_attempt_at: None,
            created_at,
        }
    }

    /// One-based number of the attempt this task is about to make.
    pub fn attempt_number(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }

    /// Whether the retry budget is used up.
    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Retries still available.
    pub fn remaining_retries(&self) -> u32 {
        self.max_retries.saturating_sub(self.retry_count)
    }

    /// Records that a retry has been scheduled for `next_attempt_at`.
    ///
    /// Returns the new retry count, or `None` without touching the task when
    /// the ceiling has already been reached.
    pub fn record_retry(&mut self, next_attempt_at: DateTime<Utc>) -> Option<u32> {
        if self.is_exhausted() {
            return None;
        }
        self.retry_count += 1;
        self.next_attempt_at = Some(next_attempt_at);
        Some(self.retry_count)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
