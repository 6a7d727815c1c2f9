//! Request and queue error types.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single attempt at a queued operation.
///
/// The variant decides whether the queue retries: see [`RequestError::is_retryable`].
#[derive(Debug, Clone, Error)]
pub enum RequestError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Rate limited by server")]
    RateLimited { retry_after: Option<Duration> },
    #[error("Server error: HTTP {status}")]
    Server { status: u16 },
    #[error("Chat connection is not established")]
    NotConnected,
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("HTTP {status}: {message}")]
    Client { status: u16, message: String },
    #[error("Rejected by chat: {0}")]
    Rejected(String),
    #[error("{0}")]
    Internal(String),
}

impl RequestError {
    /// Classify an HTTP status that is not a success.
    pub fn from_status(status: u16, message: String, retry_after: Option<Duration>) -> Self {
        match status {
            429 => RequestError::RateLimited { retry_after },
            401 => RequestError::Unauthorized(message),
            403 => RequestError::Forbidden(message),
            404 => RequestError::NotFound(message),
            500..=599 => RequestError::Server { status },
            _ => RequestError::Client { status, message },
        }
    }

    /// Network failures, 429 and 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RequestError::Network(_)
                | RequestError::RateLimited { .. }
                | RequestError::Server { .. }
                | RequestError::NotConnected
        )
    }
}

/// Terminal outcome of a queued operation that did not succeed.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    #[error("{source} (gave up after {attempts} attempts)")]
    Exhausted { attempts: u32, source: RequestError },
    #[error(transparent)]
    Rejected(RequestError),
    #[error("Queue {0} stopped before the operation completed")]
    Closed(String),
}

impl QueueError {
    /// The failure of the last attempt, if the operation ran at all.
    pub fn request_error(&self) -> Option<&RequestError> {
        match self {
            QueueError::Exhausted { source, .. } => Some(source),
            QueueError::Rejected(e) => Some(e),
            QueueError::Closed(_) => None,
        }
    }
}
