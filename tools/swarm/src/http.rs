//! The HTTP GET task.

use crate::{
    events::{EventReporter, RequestEvent},
    task::{TaskError, TaskFn},
};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::sleep;

/// The default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// The configuration for an HTTP GET task.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct HttpTaskConfig {
    /// The test name attached to every event.
    #[serde(default = "default_test_name")]
    pub test_name: String,

    /// The request type label attached to every event.
    #[serde(default = "default_request_type")]
    pub request_type: String,

    /// The URL to request.
    #[serde(default = "default_url")]
    pub url: String,

    /// The request timeout, covering the whole request including the body. Requests never time out
    /// when unset.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Option<Duration>,
}

impl Default for HttpTaskConfig {
    fn default() -> Self {
        Self {
            test_name: default_test_name(),
            request_type: default_request_type(),
            url: default_url(),
            timeout: default_timeout(),
        }
    }
}

/// A task that performs a single HTTP GET request and publishes its outcome.
pub struct HttpGetTask {
    config: HttpTaskConfig,
    client: Client,
}

impl HttpGetTask {
    /// Construct a new task using its own HTTP client.
    pub fn new(config: HttpTaskConfig) -> anyhow::Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;
        Ok(Self::with_client(config, client))
    }

    /// Construct a new task over an existing HTTP client.
    pub fn with_client(config: HttpTaskConfig, client: Client) -> Self {
        Self { config, client }
    }

    /// This task's configuration.
    pub fn config(&self) -> &HttpTaskConfig {
        &self.config
    }

    // Returns the content length. The response only exists on success and its body is consumed here,
    // which hands the connection back to the client's pool.
    async fn get(&self) -> Result<u64, reqwest::Error> {
        let response = self.client.get(&self.config.url).send().await?;
        let content_length = response.content_length();
        let body = response.bytes().await?;
        Ok(content_length.unwrap_or(body.len() as u64))
    }
}

#[async_trait]
impl TaskFn for HttpGetTask {
    async fn run(&self, reporter: &dyn EventReporter) -> Result<(), TaskError> {
        let HttpTaskConfig { test_name, request_type, .. } = &self.config;
        let start_time = now_millis();
        let result = self.get().await;
        let end_time = now_millis();

        let event = match result {
            Ok(content_length) => {
                let elapsed = end_time.saturating_sub(start_time) as f64;
                RequestEvent::success(test_name, request_type, elapsed, content_length)
            }
            Err(e) => {
                let message = format!("{:#}", anyhow::Error::from(e));
                debug!("GET {} failed: {message}", self.config.url);
                RequestEvent::failure(test_name, request_type, message)
            }
        };
        reporter.publish(event).await?;
        Ok(())
    }
}

/// Wait until the given URL answers a GET request with any status.
pub async fn wait_until_reachable(client: &Client, url: &str, interval: Duration) {
    loop {
        match client.get(url).send().await {
            Ok(response) => {
                info!("{url} is reachable (status {}), starting test", response.status());
                return;
            }
            Err(e) => {
                info!("Waiting for {url} to be reachable: {e}");
                sleep(interval).await;
            }
        }
    }
}

/// The current time in milliseconds since the epoch.
pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn default_test_name() -> String {
    "demo".to_string()
}

fn default_request_type() -> String {
    "http".to_string()
}

fn default_url() -> String {
    "http://localhost:8080/".to_string()
}

fn default_timeout() -> Option<Duration> {
    Some(DEFAULT_TIMEOUT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventDetail, EventKind, MockEventReporter};
    use mockall::predicate::function;
    use std::net::TcpListener;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn config(url: String) -> HttpTaskConfig {
        HttpTaskConfig { url, ..Default::default() }
    }

    // An address nothing is listening on.
    fn closed_port_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind failed");
        let port = listener.local_addr().expect("no local address").port();
        drop(listener);
        format!("http://127.0.0.1:{port}/")
    }

    #[test]
    fn default_config() {
        let config = HttpTaskConfig::default();
        assert_eq!(config.test_name, "demo");
        assert_eq!(config.request_type, "http");
        assert_eq!(config.url, "http://localhost:8080/");
        assert_eq!(config.timeout, Some(DEFAULT_TIMEOUT));
    }

    #[tokio::test]
    async fn success_publishes_single_event() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'a'; 100]))
            .expect(1)
            .mount(&server)
            .await;

        let mut reporter = MockEventReporter::default();
        reporter
            .expect_publish()
            .with(function(|event: &RequestEvent| {
                event.kind() == EventKind::RequestSuccess
                    && event.test_name == "demo"
                    && event.request_type == "http"
                    && event.measurement() >= 0.0
                    && event.detail() == EventDetail::ContentLength(100)
            }))
            .times(1)
            .returning(|_| Ok(()));

        let task = HttpGetTask::new(config(format!("{}/", server.uri()))).expect("building task failed");
        task.run(&reporter).await.expect("run failed");
    }

    #[tokio::test]
    async fn non_success_status_is_a_success_event() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(500)).mount(&server).await;

        let mut reporter = MockEventReporter::default();
        reporter
            .expect_publish()
            .with(function(|event: &RequestEvent| event.kind() == EventKind::RequestSuccess))
            .times(1)
            .returning(|_| Ok(()));

        let task = HttpGetTask::new(config(server.uri())).expect("building task failed");
        task.run(&reporter).await.expect("run failed");
    }

    #[tokio::test]
    async fn failure_publishes_single_event() {
        let mut reporter = MockEventReporter::default();
        reporter
            .expect_publish()
            .with(function(|event: &RequestEvent| {
                let EventDetail::Error(message) = event.detail() else {
                    return false;
                };
                event.kind() == EventKind::RequestFailure
                    && event.measurement() == 0.0
                    && message.to_lowercase().contains("connect")
            }))
            .times(1)
            .returning(|_| Ok(()));

        let task = HttpGetTask::new(config(closed_port_url())).expect("building task failed");
        task.run(&reporter).await.expect("run failed");
    }

    #[tokio::test]
    async fn timeout_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let mut reporter = MockEventReporter::default();
        reporter
            .expect_publish()
            .with(function(|event: &RequestEvent| event.kind() == EventKind::RequestFailure))
            .times(1)
            .returning(|_| Ok(()));

        let config = HttpTaskConfig { timeout: Some(Duration::from_millis(50)), ..config(server.uri()) };
        let task = HttpGetTask::new(config).expect("building task failed");
        task.run(&reporter).await.expect("run failed");
    }

    #[tokio::test]
    async fn stopped_runner_is_returned() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

        let mut reporter = MockEventReporter::default();
        reporter.expect_publish().times(1).returning(|_| Err(crate::events::PublishError));

        let task = HttpGetTask::new(config(server.uri())).expect("building task failed");
        let result = task.run(&reporter).await;
        assert!(matches!(result, Err(TaskError::RunnerStopped)));
    }

    #[tokio::test]
    async fn wait_until_reachable_returns() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(404)).mount(&server).await;
        wait_until_reachable(&Client::new(), &server.uri(), Duration::from_millis(10)).await;
    }
}
