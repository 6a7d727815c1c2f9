use thiserror::Error;

use crate::error::ErrorCode;
use crate::queue::{QueueError, RequestError};

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),
    #[error("{0} is not live")]
    ChannelOffline(String),
    #[error("Unexpected response shape: {0}")]
    Decode(String),
    #[error(transparent)]
    Request(#[from] QueueError),
}

impl ApiError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ApiError::InvalidInput(_) => ErrorCode::InvalidInput,
            ApiError::ChannelNotFound(_) => ErrorCode::ChannelNotFound,
            ApiError::ChannelOffline(_) => ErrorCode::ChannelOffline,
            ApiError::Decode(_) => ErrorCode::ServerError,
            ApiError::Request(e) => match e.request_error() {
                Some(RequestError::RateLimited { .. }) => ErrorCode::RateLimited,
                Some(RequestError::Unauthorized(_)) => ErrorCode::Unauthorized,
                Some(RequestError::Forbidden(_)) => ErrorCode::MissingScope,
                Some(RequestError::NotFound(_)) => ErrorCode::ChannelNotFound,
                Some(RequestError::Client { .. }) => ErrorCode::InvalidInput,
                Some(RequestError::Network(_)) | Some(RequestError::NotConnected) => {
                    ErrorCode::NetworkError
                }
                Some(RequestError::Server { .. })
                | Some(RequestError::Rejected(_))
                | Some(RequestError::Internal(_))
                | None => ErrorCode::ServerError,
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
    fn test_codes() {
        let forbidden = ApiError::Request(QueueError::Rejected(RequestError::Forbidden(
            "Missing scope: channel:read:subscriptions".into(),
        )));
        assert_eq!(forbidden.code(), ErrorCode::MissingScope);

        let limited = ApiError::Request(QueueError::Exhausted {
            attempts: 4,
            source: RequestError::RateLimited { retry_after: None },
        });
        assert_eq!(limited.code(), ErrorCode::RateLimited);
        assert_eq!(ApiError::ChannelOffline("x".into()).code(), ErrorCode::ChannelOffline);
    }
}
