use thiserror::Error;

use crate::error::ErrorCode;
use crate::queue::{QueueError, RequestError};

#[derive(Debug, Clone, Error)]
pub enum ChatError {
    #[error("Chat is unavailable: {0}")]
    Unavailable(String),
    #[error("Failed to join #{channel}: {reason}")]
    JoinFailed { channel: String, reason: String },
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Chat in #{channel} rejected the message: {reason}")]
    Restricted { channel: String, reason: String },
    #[error("Sending is disabled: no chat credentials are configured")]
    ReadOnly,
    #[error("Failed to send to #{channel}: {source}")]
    SendFailed { channel: String, source: QueueError },
}

impl ChatError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ChatError::Unavailable(_) => ErrorCode::ChatUnavailable,
            ChatError::JoinFailed { .. } => ErrorCode::JoinFailed,
            ChatError::InvalidInput(_) => ErrorCode::InvalidInput,
            ChatError::Restricted { .. } => ErrorCode::ChatRestricted,
            ChatError::ReadOnly => ErrorCode::Unauthorized,
            ChatError::SendFailed { source, .. } => match source.request_error() {
                Some(RequestError::RateLimited { .. }) => ErrorCode::RateLimited,
                Some(RequestError::Rejected(_)) | Some(RequestError::Forbidden(_)) => {
                    ErrorCode::ChatRestricted
                }
                Some(RequestError::Unauthorized(_)) => ErrorCode::Unauthorized,
                _ => ErrorCode::ChatUnavailable,
            },
        }
    }

    pub fn suggested_action(&self) -> &'static str {
        self.code().suggested_action()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_failure_code_follows_cause() {
        let limited = ChatError::SendFailed {
            channel: "streamer".into(),
            source: QueueError::Exhausted {
                attempts: 4,
                source: RequestError::RateLimited { retry_after: None },
            },
        };
        assert_eq!(limited.code(), ErrorCode::RateLimited);

        let dropped = ChatError::SendFailed {
            channel: "streamer".into(),
            source: QueueError::Exhausted {
                attempts: 4,
                source: RequestError::NotConnected,
            },
        };
        assert_eq!(dropped.code(), ErrorCode::ChatUnavailable);
        assert!(!dropped.suggested_action().is_empty());
    }
}
