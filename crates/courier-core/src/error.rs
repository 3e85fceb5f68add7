//! Caller-visible error taxonomy for notification intake.
//!
//! Every variant carries a stable code so clients can tell validation
//! problems (E1xxx) apart from capacity and backend problems (E3xxx).

use thiserror::Error;

/// Result type alias using [`CourierError`].
pub type Result<T> = std::result::Result<T, CourierError>;

/// Errors reported to intake clients.
#[derive(Debug, Error)]
pub enum CourierError {
    // Validation errors (E1001-E1003)
    /// Body could not be parsed as a notification request (E1001).
    #[error("[E1001] Invalid JSON: {message}")]
    InvalidJson {
        /// Parser diagnostic
        message: String,
    },

    /// `target_url` missing or empty (E1002).
    #[error("[E1002] Missing target URL: target_url is required")]
    MissingTargetUrl,

    /// Endpoint does not accept the request method (E1003).
    #[error("[E1003] Method not allowed: {method}")]
    MethodNotAllowed {
        /// Method the client used
        method: String,
    },

    // System errors (E3001-E3002)
    /// Queue at capacity (E3001).
    #[error("[E3001] Queue full: notification queue at capacity")]
    QueueFull,

    /// Queue backend could not accept the task (E3002).
    #[error("[E3002] Queue unavailable: {message}")]
    QueueUnavailable {
        /// Backend diagnostic
        message: String,
    },
}

impl CourierError {
    /// Creates an invalid JSON error.
    pub fn invalid_json(message: impl Into<String>) -> Self {
        Self::InvalidJson { message: message.into() }
    }

    /// Creates a queue unavailable error.
    pub fn queue_unavailable(message: impl Into<String>) -> Self {
        Self::QueueUnavailable { message: message.into() }
    }

    /// Returns the stable error code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidJson { .. } => "E1001",
            Self::MissingTargetUrl => "E1002",
            Self::MethodNotAllowed { .. } => "E1003",
            Self::QueueFull => "E3001",
            Self::QueueUnavailable { .. } => "E3002",
        }
    }

    /// Whether the client may resubmit the same request later.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::QueueFull | Self::QueueUnavailable { .. })
    }
}
