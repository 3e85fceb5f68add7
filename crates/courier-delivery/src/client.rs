//! HTTP client for notification delivery.
//!
//! Turns a [`Task`] into an outbound request, executes it under the client
//! timeout and reports what happened. Failure to build the request is kept
//! apart from failure to deliver it, since only the latter is worth retrying.

use std::time::{Duration, Instant};

use courier_core::Task;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Method, Response, Url,
};
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};

use crate::error::{DeliveryError, Result};

/// Header carrying the task identifier on every delivery.
pub const TASK_ID_HEADER: &str = "x-courier-task-id";

/// Header carrying the one-based attempt number on every delivery.
pub const ATTEMPT_HEADER: &str = "x-courier-attempt";

const MAX_RESPONSE_BODY_SIZE: usize = 64 * 1024;
const MAX_LOGGED_BODY_SIZE: usize = 1024;

/// Configuration for the delivery client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout covering connect, send and response.
    pub timeout: Duration,
    /// User agent sent unless the task supplies its own.
    pub user_agent: String,
    /// Maximum number of redirects to follow; zero returns the redirect
    /// response itself.
    pub max_redirects: u32,
    /// Whether to verify TLS certificates.
    pub verify_tls: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECONDS),
            user_agent: concat!("courier/", env!("CARGO_PKG_VERSION")).to_string(),
            max_redirects: 10,
            verify_tls: true,
        }
    }
}

/// Shared HTTP client used by every worker.
///
/// Built once; the underlying connection pool is shared by clones.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

/// Outcome of a request that reached the target.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response body, truncated when large.
    pub body: String,
    /// Time from send to fully read response.
    pub duration: Duration,
    /// Whether the status is in the 2xx range.
    pub is_success: bool,
}

impl DeliveryClient {
    /// Creates a client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the HTTP client cannot
    /// be built from the settings.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let redirects = match config.max_redirects {
            0 => reqwest::redirect::Policy::none(),
            max => reqwest::redirect::Policy::limited(max as usize),
        };
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(redirects)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a client with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Client-wide request timeout.
    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// Builds the outbound request for `task` without sending it.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::InvalidRequest` when the method is not a valid
    /// token, the URL does not parse as http(s), or a header name or value is
    /// not valid HTTP.
    pub fn build_request(&self, task: &Task) -> Result<reqwest::Request> {
        let request = &task.request;

        let method = Method::from_bytes(request.effective_method().as_bytes()).map_err(|_| {
            DeliveryError::invalid_request(format!("invalid method {:?}", request.method))
        })?;

        let url = Url::parse(&request.target_url).map_err(|e| {
            DeliveryError::invalid_request(format!("invalid target url {:?}: {e}", request.target_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DeliveryError::invalid_request(format!(
                "unsupported url scheme {:?}",
                url.scheme()
            )));
        }

        let mut headers = HeaderMap::with_capacity(request.headers.len() + 2);
        headers.insert(TASK_ID_HEADER, header_value(&task.id.to_string())?);
        headers.insert(ATTEMPT_HEADER, HeaderValue::from(task.attempt_number()));

        for (name, value) in &request.headers {
            if is_managed_header(name) {
                continue;
            }
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                DeliveryError::invalid_request(format!("invalid header name {name:?}"))
            })?;
            headers.insert(name, header_value(value)?);
        }

        let mut builder = self.client.request(method, url).headers(headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        builder.build().map_err(|e| DeliveryError::invalid_request(e.to_string()))
    }

    /// Delivers `task` to its target.
    ///
    /// A response with any status is returned as `Ok`; callers decide what a
    /// non-2xx status means.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` if the request cannot be built
    /// - `Timeout` if the target does not answer in time
    /// - `NetworkError` for any other transport failure
    pub async fn deliver(&self, task: &Task) -> Result<DeliveryResponse> {
        let span = info_span!(
            "notification_delivery",
            task_id = %task.id,
            url = %task.request.target_url,
            attempt = task.attempt_number()
        );

        async move {
            let http_request = self.build_request(task)?;
            let start_time = Instant::now();

            tracing::debug!(method = %http_request.method(), "sending notification");

            let response = match self.client.execute(http_request).await {
                Ok(response) => response,
                Err(e) => {
                    let duration = start_time.elapsed();
                    tracing::warn!(duration_ms = duration.as_millis(), "request failed: {}", e);

                    if e.is_timeout() {
                        return Err(DeliveryError::timeout(self.config.timeout.as_secs()));
                    }
                    if e.is_connect() {
                        return Err(DeliveryError::network(format!("connection failed: {e}")));
                    }
                    return Err(DeliveryError::network(e.to_string()));
                },
            };

            let delivery_response = read_response(response, start_time).await;

            tracing::debug!(
                status = delivery_response.status_code,
                duration_ms = delivery_response.duration.as_millis(),
                "received response"
            );

            Ok(delivery_response)
        }
        .instrument(span)
        .await
    }
}

async fn read_response(response: Response, start_time: Instant) -> DeliveryResponse {
    let status_code = response.status().as_u16();
    let is_success = response.status().is_success();

    let body = match response.bytes().await {
        Ok(bytes) if bytes.len() > MAX_RESPONSE_BODY_SIZE => {
            let suffix = "... (truncated)";
            let truncated = String::from_utf8_lossy(&bytes[..MAX_LOGGED_BODY_SIZE - suffix.len()]);
            format!("{truncated}{suffix}")
        },
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            tracing::warn!("failed to read response body: {}", e);
            format!("[failed to read response body: {e}]")
        },
    };

    DeliveryResponse { status_code, body, duration: start_time.elapsed(), is_success }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| DeliveryError::invalid_request(format!("invalid header value {value:?}")))
}

/// Headers owned by the HTTP stack; copying them from a task would corrupt
/// the request framing.
fn is_managed_header(header_name: &str) -> bool {
    let lowercase = header_name.to_ascii_lowercase();
    matches!(
        lowercase.as_str(),
        "content-length"
            | "host"
            | "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use courier_core::NotificationRequest;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn task_for(request: NotificationRequest) -> Task {
        Task::new(request, 3, Utc::now())
    }

    #[tokio::test]
    async fn successful_delivery_sends_method_headers_and_body() {
        let mock_server = MockServer::start().await;
        let request = NotificationRequest::new(format!("{}/hook", mock_server.uri()), "PUT")
            .with_header("X-Signature", "abc123")
            .with_body(r#"{"event":"ping"}"#);
        let task = task_for(request);

        Mock::given(matchers::method("PUT"))
            .and(matchers::path("/hook"))
            .and(matchers::header("x-signature", "abc123"))
            .and(matchers::header(TASK_ID_HEADER, task.id.to_string().as_str()))
            .and(matchers::header(ATTEMPT_HEADER, "1"))
            .and(matchers::body_string(r#"{"event":"ping"}"#))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let response = client.deliver(&task).await.unwrap();

        assert_eq!(response.status_code, 200);
        assert!(response.is_success);
        assert_eq!(response.body, "OK");
    }

    #[tokio::test]
    async fn empty_method_defaults_to_get() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/ok"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let task = task_for(NotificationRequest::new(format!("{}/ok", mock_server.uri()), ""));

        let response = client.deliver(&task).await.unwrap();
        assert_eq!(response.status_code, 204);
        assert!(response.is_success);
    }

    #[tokio::test]
    async fn error_status_is_returned_not_raised() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::any())
            .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
            .mount(&mock_server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let task = task_for(NotificationRequest::new(format!("{}/fail", mock_server.uri()), "POST"));

        let response = client.deliver(&task).await.unwrap();
        assert_eq!(response.status_code, 500);
        assert!(!response.is_success);
        assert_eq!(response.body, "Internal Server Error");
    }

    #[tokio::test]
    async fn slow_target_times_out() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::any())
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&mock_server)
            .await;

        let config = ClientConfig { timeout: Duration::from_millis(100), ..Default::default() };
        let client = DeliveryClient::new(config).unwrap();
        let task = task_for(NotificationRequest::new(format!("{}/slow", mock_server.uri()), "POST"));

        let error = client.deliver(&task).await.unwrap_err();
        assert!(matches!(error, DeliveryError::Timeout { .. }));
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn redirects_follow_the_configured_limit() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::path("/moved"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", format!("{}/final", mock_server.uri()).as_str()),
            )
            .mount(&mock_server)
            .await;
        Mock::given(matchers::path("/final"))
            .respond_with(ResponseTemplate::new(200).set_body_string("landed"))
            .mount(&mock_server)
            .await;
        let task = task_for(NotificationRequest::new(format!("{}/moved", mock_server.uri()), "GET"));

        let following = DeliveryClient::with_defaults().unwrap();
        let response = following.deliver(&task).await.unwrap();
        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, "landed");

        let config = ClientConfig { max_redirects: 0, ..Default::default() };
        let response = DeliveryClient::new(config).unwrap().deliver(&task).await.unwrap();
        assert_eq!(response.status_code, 302);
        assert!(!response.is_success);
    }

    #[test]
    fn client_builds_without_tls_verification() {
        let config = ClientConfig { verify_tls: false, ..Default::default() };
        assert!(DeliveryClient::new(config).is_ok());
    }

    #[tokio::test]
    async fn unreachable_target_is_network_error() {
        let client = DeliveryClient::with_defaults().unwrap();
        let task = task_for(NotificationRequest::new("http://127.0.0.1:1/closed", "POST"));

        let error = client.deliver(&task).await.unwrap_err();
        assert!(matches!(error, DeliveryError::NetworkError { .. }));
    }

    #[test]
    fn invalid_method_is_rejected_before_sending() {
        let client = DeliveryClient::with_defaults().unwrap();
        let task = task_for(NotificationRequest::new("http://localhost/hook", "NOT A METHOD"));

        let error = client.build_request(&task).unwrap_err();
        assert!(matches!(error, DeliveryError::InvalidRequest { .. }));
        assert!(!error.is_retryable());
    }

    #[test]
    fn invalid_url_and_scheme_are_rejected() {
        let client = DeliveryClient::with_defaults().unwrap();

        let relative = task_for(NotificationRequest::new("/just/a/path", "POST"));
        assert!(matches!(
            client.build_request(&relative),
            Err(DeliveryError::InvalidRequest { .. })
        ));

        let ftp = task_for(NotificationRequest::new("ftp://files.example.com/drop", "POST"));
        assert!(matches!(client.build_request(&ftp), Err(DeliveryError::InvalidRequest { .. })));
    }

    #[test]
    fn invalid_header_is_rejected() {
        let client = DeliveryClient::with_defaults().unwrap();
        let task = task_for(
            NotificationRequest::new("http://localhost/hook", "POST")
                .with_header("Bad Header", "value"),
        );
        assert!(matches!(client.build_request(&task), Err(DeliveryError::InvalidRequest { .. })));

        let task = task_for(
            NotificationRequest::new("http://localhost/hook", "POST")
                .with_header("X-Ok", "line\nbreak"),
        );
        assert!(matches!(client.build_request(&task), Err(DeliveryError::InvalidRequest { .. })));
    }

    #[test]
    fn managed_headers_are_not_copied() {
        let client = DeliveryClient::with_defaults().unwrap();
        let task = task_for(
            NotificationRequest::new("http://localhost/hook", "POST")
                .with_header("Host", "evil.example")
                .with_header("Content-Length", "999")
                .with_header("User-Agent", "custom-agent/1.0"),
        );

        let request = client.build_request(&task).unwrap();
        assert!(request.headers().get("host").is_none());
        assert!(request.headers().get("content-length").is_none());
        assert_eq!(request.headers().get("user-agent").unwrap(), "custom-agent/1.0");
        assert_eq!(request.headers().get(ATTEMPT_HEADER).unwrap(), "1");
    }

    #[test]
    fn managed_header_check_ignores_case() {
        assert!(is_managed_header("Transfer-Encoding"));
        assert!(is_managed_header("HOST"));
        assert!(!is_managed_header("Authorization"));
        assert!(!is_managed_header("User-Agent"));
    }
}
