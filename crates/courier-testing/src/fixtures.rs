//! Builders for tasks and intake payloads.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use courier_core::{NotificationRequest, Task, TaskId, DEFAULT_MAX_RETRIES};
use serde_json::{json, Value};

/// Builder for test tasks.
#[derive(Debug, Clone)]
pub struct TaskBuilder {
    target_url: String,
    method: String,
    headers: HashMap<String, String>,
    body: String,
    retry_count: u32,
    max_retries: u32,
    created_at: DateTime<Utc>,
}

impl TaskBuilder {
    /// Creates a builder for a `POST` to a local URL with the default ceiling.
    pub fn new() -> Self {
        Self {
            target_url: "http://127.0.0.1:9/webhook".to_string(),
            method: "POST".to_string(),
            headers: HashMap::new(),
            body: String::new(),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            created_at: Utc::now(),
        }
    }

    /// Sets the target URL.
    #[must_use]
    pub fn target(mut self, url: impl Into<String>) -> Self {
        self.target_url = url.into();
        self
    }

    /// Sets the HTTP method.
    #[must_use]
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Adds a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets the retries already taken.
    #[must_use]
    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Sets the retry ceiling.
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the creation time.
    #[must_use]
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Builds the task with a fresh id.
    pub fn build(self) -> Task {
        let request = NotificationRequest {
            target_url: self.target_url,
            method: self.method,
            headers: self.headers,
            body: self.body,
        };
        let mut task = Task::new(request, self.max_retries, self.created_at);
        task.retry_count = self.retry_count;
        task
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Intake payload for `target_url` and `method`.
pub fn notify_payload(target_url: &str, method: &str) -> Value {
    json!({
        "target_url": target_url,
        "method": method,
        "headers": {},
        "body": "",
    })
}

/// Parses a task id returned by the intake.
///
/// # Panics
///
/// Panics if `raw` is not a UUID.
pub fn parse_task_id(raw: &str) -> TaskId {
    raw.parse().unwrap_or_else(|e| panic!("intake returned invalid task id {raw:?}: {e}"))
}
