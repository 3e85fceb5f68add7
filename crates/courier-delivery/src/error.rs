//! Error types for queueing and delivery.
//!
//! [`DeliveryError`] classifies a single delivery attempt so the retry
//! policy can tell transient failures from requests that can never succeed.
//! [`QueueError`] covers the queue backends.

use std::{fmt, time::Duration};

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Errors raised while delivering a task or running the workers.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Method, URL or a header could not form a valid HTTP request.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// What was wrong with the request
        message: String,
    },

    /// Connection-level failure reaching the target.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Transport diagnostic
        message: String,
    },

    /// Target did not answer within the client timeout.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Configured client timeout
        timeout_seconds: u64,
    },

    /// Target answered with a non-2xx status.
    #[error("unexpected status: HTTP {status_code}")]
    HttpStatus {
        /// Status returned by the target
        status_code: u16,
        /// Truncated response body
        body: String,
    },

    /// Queue operation failed.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Dispatcher or client configuration is unusable.
    #[error("invalid delivery configuration: {message}")]
    ConfigurationError {
        /// Configuration diagnostic
        message: String,
    },

    /// A worker task panicked or was aborted.
    #[error("worker {worker_id} failed: {message}")]
    WorkerFailed {
        /// Worker that failed
        worker_id: usize,
        /// Join error description
        message: String,
    },

    /// Workers did not stop within the shutdown grace period.
    #[error("workers did not stop within {timeout:?}")]
    ShutdownTimeout {
        /// Grace period that elapsed
        timeout: Duration,
    },
}

impl DeliveryError {
    /// Creates an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest { message: message.into() }
    }

    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates an error for a non-2xx response.
    pub fn http_status(status_code: u16, body: impl Into<String>) -> Self {
        Self::HttpStatus { status_code, body: body.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Whether another attempt could succeed.
    ///
    /// Every failed attempt that reached the network is retryable, whatever
    /// the status code. Requests that cannot be built are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError { .. } | Self::Timeout { .. } | Self::HttpStatus { .. } => true,

            Self::InvalidRequest { .. }
            | Self::Queue(_)
            | Self::ConfigurationError { .. }
            | Self::WorkerFailed { .. }
            | Self::ShutdownTimeout { .. } => false,
        }
    }

    /// Status code returned by the target, if it answered.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }
}

/// Errors raised by queue backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Bounded queue has no free slot.
    #[error("queue is full (capacity {capacity})")]
    Full {
        /// Queue capacity
        capacity: usize,
    },

    /// Queue was closed and has been drained.
    #[error("queue is closed")]
    Closed,

    /// Backend could not be reached or rejected the command.
    #[error("queue backend unavailable: {message}")]
    Backend {
        /// Backend diagnostic
        message: String,
    },

    /// Task could not be encoded for storage.
    #[error("failed to encode task: {message}")]
    Serialization {
        /// Encoder diagnostic
        message: String,
    },
}

impl From<redis::RedisError> for QueueError {
    fn from(error: redis::RedisError) -> Self {
        Self::Backend { message: error.to_string() }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization { message: error.to_string() }
    }
}

/// Category of delivery error for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Request could not be built.
    Request,
    /// Connectivity problems and timeouts.
    Network,
    /// 4xx responses.
    Client,
    /// 5xx and other non-2xx responses.
    Server,
    /// Queue backend problems.
    Queue,
    /// Configuration problems.
    Configuration,
    /// Worker lifecycle problems.
    Internal,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::InvalidRequest { .. } => Self::Request,
            DeliveryError::NetworkError { .. } | DeliveryError::Timeout { .. } => Self::Network,
            DeliveryError::HttpStatus { status_code, .. } if (400..500).contains(status_code) => {
                Self::Client
            },
            DeliveryError::HttpStatus { .. } => Self::Server,
            DeliveryError::Queue(_) => Self::Queue,
            DeliveryError::ConfigurationError { .. } => Self::Configuration,
            DeliveryError::WorkerFailed { .. } | DeliveryError::ShutdownTimeout { .. } => {
                Self::Internal
            },
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => write!(f, "request"),
            Self::Network => write!(f, "network"),
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::Queue => write!(f, "queue"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
