//! HTTP request handlers for the courier API.
//!
//! Handlers are grouped by functionality:
//! - `notify` - notification intake
//! - `health` - health, readiness and liveness checks
//!
//! Errors are returned as `{"error":{"code":"E....","message":"..."}}`
//! using the codes of [`CourierError`].

pub mod health;
pub mod notify;

use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use courier_core::CourierError;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use health::{health_check, liveness_check, readiness_check};
pub use notify::submit_notification;

/// Standard error response format.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error details including code and message
    pub error: ErrorDetail,
}

/// Detailed error information.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Error code from the taxonomy (E1001-E3002)
    pub code: String,
    /// Human-readable error description
    pub message: String,
}

/// Builds a JSON error response for `error` with the given status.
pub fn create_error_response(status: StatusCode, error: &CourierError) -> Response {
    let error_response = ErrorResponse {
        error: ErrorDetail { code: error.code().to_string(), message: error.to_string() },
    };

    (status, Json(error_response)).into_response()
}

/// Answers any method a route does not serve.
pub async fn method_not_allowed(method: Method) -> Response {
    debug!(%method, "rejecting unsupported method");

    let error = CourierError::MethodNotAllowed { method: method.to_string() };
    let mut response = create_error_response(StatusCode::METHOD_NOT_ALLOWED, &error);
    response.headers_mut().insert(header::ALLOW, HeaderValue::from_static("POST"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn error_response_includes_code() {
        let response =
            create_error_response(StatusCode::BAD_REQUEST, &CourierError::MissingTargetUrl);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.error.code, "E1002");
        assert!(parsed.error.message.contains("target_url is required"));
    }

    #[tokio::test]
    async fn method_not_allowed_advertises_post() {
        let response = method_not_allowed(Method::PUT).await;

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()["allow"], "POST");
    }
}
