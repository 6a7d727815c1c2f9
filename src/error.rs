//! Machine-readable error codes shared by the chat and REST facades.
//!
//! Callers (usually a tool layer relaying guidance to an assistant) match on
//! the code and show the suggested action instead of parsing messages.

use std::fmt;

use serde::Serialize;

/// Stable error code attached to every facade error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    ChannelOffline,
    ChannelNotFound,
    ChatRestricted,
    ChatUnavailable,
    JoinFailed,
    RateLimited,
    Unauthorized,
    MissingScope,
    InvalidInput,
    ServerError,
    NetworkError,
    NotReady,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ChannelOffline => "channel-offline",
            ErrorCode::ChannelNotFound => "channel-not-found",
            ErrorCode::ChatRestricted => "chat-restricted",
            ErrorCode::ChatUnavailable => "chat-unavailable",
            ErrorCode::JoinFailed => "join-failed",
            ErrorCode::RateLimited => "rate-limited",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::MissingScope => "missing-scope",
            ErrorCode::InvalidInput => "invalid-input",
            ErrorCode::ServerError => "server-error",
            ErrorCode::NetworkError => "network-error",
            ErrorCode::NotReady => "not-ready",
        }
    }

    /// Human-readable next step for this code.
    pub fn suggested_action(&self) -> &'static str {
        match self {
            ErrorCode::ChannelOffline => "The channel is not live right now; try again once it starts streaming.",
            ErrorCode::ChannelNotFound => "Check the channel name for typos.",
            ErrorCode::ChatRestricted => {
                "Chat rejected the message (followers-only, subscribers-only, or a ban); check the channel's chat settings."
            }
            ErrorCode::ChatUnavailable => "The chat connection is down; wait for it to reconnect or restart the service.",
            ErrorCode::JoinFailed => "Could not join the channel; verify it exists and that the chat connection is healthy.",
            ErrorCode::RateLimited => "Too many requests; wait a moment before retrying.",
            ErrorCode::Unauthorized => "The access token is missing, expired, or invalid; re-authenticate.",
            ErrorCode::MissingScope => "The access token lacks the scope this call needs; re-authorize with that scope.",
            ErrorCode::InvalidInput => "Fix the request parameters and try again.",
            ErrorCode::ServerError => "The platform returned a server error; retry later.",
            ErrorCode::NetworkError => "Check network connectivity and retry.",
            ErrorCode::NotReady => "Configure credentials for this service and restart.",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
