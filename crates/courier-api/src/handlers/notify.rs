//! Notification intake.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use courier_core::{CourierError, NotificationRequest, Task};
use courier_delivery::QueueError;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::create_error_response;
use crate::AppState;

/// Body of a `202 Accepted` intake response.
#[derive(Debug, Serialize, Deserialize)]
pub struct NotifyResponse {
    /// Always `accepted`.
    pub status: String,
    /// Identifier of the queued task.
    pub task_id: String,
}

/// Accepts a notification for asynchronous delivery.
///
/// The body is parsed as JSON whatever its content type. A valid request
/// becomes a new task stamped with the configured retry ceiling and is
/// submitted to the queue once.
///
/// # Errors
///
/// Returns appropriate HTTP status codes:
/// - 400: body is not a notification request, or `target_url` is empty
/// - 503: queue is full or its backend is unavailable
#[instrument(name = "submit_notification", skip(state, body), fields(content_length = body.len()))]
pub async fn submit_notification(State(state): State<AppState>, body: Bytes) -> Response {
    let request: NotificationRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "rejecting malformed notification payload");
            let error = CourierError::invalid_json(e.to_string());
            return create_error_response(StatusCode::BAD_REQUEST, &error);
        },
    };

    if let Err(e) = request.validate() {
        warn!(error = %e, "rejecting invalid notification request");
        return create_error_response(StatusCode::BAD_REQUEST, &e);
    }

    let task = Task::new(request, state.max_retries, state.clock.now());
    let task_id = task.id;
    let target_url = task.request.target_url.clone();

    if let Err(e) = state.queue.submit(task).await {
        let error = intake_error(&e);
        warn!(
            task_id = %task_id,
            backend = state.queue.backend(),
            error = %e,
            "queue refused notification"
        );
        return create_error_response(StatusCode::SERVICE_UNAVAILABLE, &error);
    }

    info!(task_id = %task_id, target_url = %target_url, "notification accepted");

    (
        StatusCode::ACCEPTED,
        Json(NotifyResponse { status: "accepted".to_string(), task_id: task_id.to_string() }),
    )
        .into_response()
}

/// Maps a queue refusal to the error reported to the caller.
fn intake_error(error: &QueueError) -> CourierError {
    match error {
        QueueError::Full { .. } => CourierError::QueueFull,
        other => CourierError::queue_unavailable(other.to_string()),
    }
}
