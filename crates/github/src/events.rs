//! Terminal failure notifications.
//!
//! The client publishes a [`FailureEvent`] whenever a call fails for good
//! (retries exhausted or a non-retryable error). Subscribers can forward
//! these to an alerting sink; delivery is best-effort and slow subscribers
//! miss events rather than slowing down API calls.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use crate::error::{ApiError, ErrorCategory};

/// Number of events buffered per subscriber.
pub const FAILURE_CHANNEL_CAPACITY: usize = 64;

/// A call that failed after all retries.
///
/// Carries no credentials: only the operation, the classification, and the
/// error message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureEvent {
    pub request_id: Uuid,
    pub operation: String,
    pub category: ErrorCategory,
    pub status: Option<u16>,
    /// Attempts made, including the first.
    pub attempts: u32,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl From<&ApiError> for FailureEvent {
    fn from(error: &ApiError) -> Self {
        Self {
            request_id: error.context().request_id(),
            operation: error.operation().to_string(),
            category: error.category(),
            status: error.status(),
            attempts: error.attempt(),
            message: error.message().to_string(),
            at: Utc::now(),
        }
    }
}

/// Fan-out of [`FailureEvent`]s.
#[derive(Debug, Clone)]
pub struct FailureEvents {
    sender: broadcast::Sender<FailureEvent>,
}

impl Default for FailureEvents {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);
        Self { sender }
    }
}

impl FailureEvents {
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<FailureEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event. Having no subscribers is not an error.
    pub fn publish(&self, error: &ApiError) {
        let event = FailureEvent::from(error);
        match self.sender.send(event) {
            Ok(receivers) => trace!(receivers, "published failure event"),
            Err(_) => trace!("no failure event subscribers"),
        }
    }
}
