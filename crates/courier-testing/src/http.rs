//! Mock delivery targets over wiremock.

use std::time::Duration;

use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

pub use wiremock::Request as ReceivedRequest;

/// Mock HTTP server standing in for notification targets.
#[derive(Debug)]
pub struct MockEndpoint {
    server: MockServer,
}

impl MockEndpoint {
    /// Starts a server on a random local port.
    pub async fn start() -> Self {
        Self { server: MockServer::start().await }
    }

    /// Base URL of the server.
    pub fn base_url(&self) -> String {
        self.server.uri()
    }

    /// Absolute URL for `route` on the server.
    pub fn url(&self, route: &str) -> String {
        format!("{}{route}", self.server.uri())
    }

    /// Answers every request to `route`, whatever the method, with `status`.
    pub async fn respond_with(&self, route: &str, status: u16) {
        Mock::given(path(route))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Answers `http_method` requests to `route` with `status`.
    pub async fn respond_to(&self, http_method: &str, route: &str, status: u16) {
        Mock::given(method(http_method))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Answers `route` with `status` after `delay`.
    pub async fn respond_with_delay(&self, route: &str, status: u16, delay: Duration) {
        Mock::given(path(route))
            .respond_with(ResponseTemplate::new(status).set_delay(delay))
            .mount(&self.server)
            .await;
    }

    /// Fails the first `failures` requests to `route` with `failure_status`,
    /// then answers 200.
    pub async fn fail_then_succeed(&self, route: &str, failures: u64, failure_status: u16) {
        Mock::given(path(route))
            .respond_with(ResponseTemplate::new(failure_status))
            .up_to_n_times(failures)
            .with_priority(1)
            .mount(&self.server)
            .await;
        Mock::given(path(route))
            .respond_with(ResponseTemplate::new(200))
            .with_priority(2)
            .mount(&self.server)
            .await;
    }

    /// Every request the server received.
    pub async fn received_requests(&self) -> Vec<ReceivedRequest> {
        self.server.received_requests().await.unwrap_or_default()
    }

    /// Requests the server received on `route`.
    pub async fn requests_to(&self, route: &str) -> Vec<ReceivedRequest> {
        self.received_requests().await.into_iter().filter(|r| r.url.path() == route).collect()
    }
}
