//! Request events published by tasks.

use async_trait::async_trait;
use futures::{channel::mpsc::Sender, SinkExt};
use serde::Serialize;
use std::fmt;

/// The kind of a request event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    /// A request succeeded.
    RequestSuccess,

    /// A request failed.
    RequestFailure,
}

/// The outcome of a request.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestOutcome {
    /// The request succeeded.
    Success {
        /// The time the request took, in milliseconds.
        response_time: f64,

        /// The response's content length.
        content_length: u64,
    },

    /// The request failed.
    Failure {
        /// The error's message.
        error: String,
    },
}

/// The detail attached to an event.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventDetail {
    /// The content length of a successful response.
    ContentLength(u64),

    /// The error message of a failed request.
    Error(String),
}

impl fmt::Display for EventDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContentLength(length) => write!(f, "{length}"),
            Self::Error(message) => write!(f, "{message}"),
        }
    }
}

/// An event describing the outcome of a single request.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestEvent {
    /// The test name this request belongs to.
    pub test_name: String,

    /// The request type label, e.g. `http`.
    pub request_type: String,

    /// The request's outcome.
    pub outcome: RequestOutcome,
}

impl RequestEvent {
    /// Construct a success event.
    pub fn success(
        test_name: impl Into<String>,
        request_type: impl Into<String>,
        response_time: f64,
        content_length: u64,
    ) -> Self {
        Self {
            test_name: test_name.into(),
            request_type: request_type.into(),
            outcome: RequestOutcome::Success { response_time, content_length },
        }
    }

    /// Construct a failure event.
    pub fn failure(test_name: impl Into<String>, request_type: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            request_type: request_type.into(),
            outcome: RequestOutcome::Failure { error: error.into() },
        }
    }

    /// The kind of this event.
    pub fn kind(&self) -> EventKind {
        match self.outcome {
            RequestOutcome::Success { .. } => EventKind::RequestSuccess,
            RequestOutcome::Failure { .. } => EventKind::RequestFailure,
        }
    }

    /// The event's measurement: the response time for successes, always 0 for failures.
    pub fn measurement(&self) -> f64 {
        match self.outcome {
            RequestOutcome::Success { response_time, .. } => response_time,
            RequestOutcome::Failure { .. } => 0.0,
        }
    }

    /// The event's detail.
    pub fn detail(&self) -> EventDetail {
        match &self.outcome {
            RequestOutcome::Success { content_length, .. } => EventDetail::ContentLength(*content_length),
            RequestOutcome::Failure { error } => EventDetail::Error(error.clone()),
        }
    }
}

/// The event channel is closed.
#[derive(Debug, thiserror::Error)]
#[error("event channel closed")]
pub struct PublishError;

/// Publishes request events.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventReporter: Send + Sync {
    /// Publish an event.
    async fn publish(&self, event: RequestEvent) -> Result<(), PublishError>;
}

/// A reporter that forwards events into a channel.
#[derive(Clone)]
pub struct ChannelReporter {
    sender: Sender<RequestEvent>,
}

impl ChannelReporter {
    /// Construct a new reporter over the given sender.
    pub fn new(sender: Sender<RequestEvent>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl EventReporter for ChannelReporter {
    async fn publish(&self, event: RequestEvent) -> Result<(), PublishError> {
        self.sender.clone().send(event).await.map_err(|_| PublishError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{channel::mpsc::channel, StreamExt};
    use rstest::rstest;
    use std::str::FromStr;

    #[test]
    fn success_event() {
        let event = RequestEvent::success("demo", "http", 5.0, 100);
        assert_eq!(event.kind(), EventKind::RequestSuccess);
        assert_eq!(event.measurement(), 5.0);
        assert_eq!(event.detail(), EventDetail::ContentLength(100));
    }

    #[test]
    fn failure_event() {
        let event = RequestEvent::failure("demo", "http", "connection refused");
        assert_eq!(event.kind(), EventKind::RequestFailure);
        assert_eq!(event.measurement(), 0.0);
        assert_eq!(event.detail(), EventDetail::Error("connection refused".into()));
        assert_eq!(event.detail().to_string(), "connection refused");
    }

    #[rstest]
    #[case(EventKind::RequestSuccess, "request_success")]
    #[case(EventKind::RequestFailure, "request_failure")]
    fn kind_names(#[case] kind: EventKind, #[case] name: &str) {
        assert_eq!(kind.to_string(), name);
        assert_eq!(EventKind::from_str(name).expect("invalid kind"), kind);
    }

    #[tokio::test]
    async fn channel_reporter() {
        let (sender, mut receiver) = channel(10);
        let reporter = ChannelReporter::new(sender);
        let event = RequestEvent::success("demo", "http", 1.0, 2);
        reporter.publish(event.clone()).await.expect("publish failed");
        assert_eq!(receiver.next().await, Some(event));
    }

    #[tokio::test]
    async fn channel_reporter_closed() {
        let (sender, receiver) = channel(10);
        drop(receiver);
        let reporter = ChannelReporter::new(sender);
        let result = reporter.publish(RequestEvent::failure("demo", "http", "boom")).await;
        assert!(result.is_err());
    }
}
