//! Inbound chat message model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat line as recorded by the buffer. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub channel: String,
    pub username: String,
    pub display_name: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Sent with `/me`.
    pub is_action: bool,
}

/// Canonical channel key: trimmed, without the leading `#`, lowercase.
pub fn normalize_channel(name: &str) -> String {
    name.trim().trim_start_matches('#').to_lowercase()
}

/// Channel logins are 1-25 characters of ASCII letters, digits and underscores.
pub fn is_valid_channel(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 25
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}
