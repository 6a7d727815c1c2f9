//! IRCv3 line codec for the chat protocol.
//!
//! Only the subset the connection needs: tags, prefix, command, params and
//! the outbound commands used for login, membership, sending and liveness.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::message::{normalize_channel, ChatMessage};

/// One parsed protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcMessage {
    pub tags: HashMap<String, String>,
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl IrcMessage {
    /// Parse a raw line. Returns None for blank or truncated lines.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);
        if rest.trim().is_empty() {
            return None;
        }

        let mut tags = HashMap::new();
        if let Some(stripped) = rest.strip_prefix('@') {
            let (raw_tags, remainder) = stripped.split_once(' ')?;
            for pair in raw_tags.split(';').filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                tags.insert(key.to_string(), unescape_tag_value(value));
            }
            rest = remainder.trim_start();
        }

        let prefix = match rest.strip_prefix(':') {
            Some(stripped) => {
                let (prefix, remainder) = stripped.split_once(' ')?;
                rest = remainder.trim_start();
                Some(prefix.to_string())
            }
            None => None,
        };

        let (head, trailing) = match rest.split_once(" :") {
            Some((head, trailing)) => (head, Some(trailing)),
            None => (rest, None),
        };

        let mut parts = head.split_whitespace();
        let command = parts.next()?.to_ascii_uppercase();
        let mut params: Vec<String> = parts.map(str::to_string).collect();
        if let Some(trailing) = trailing {
            params.push(trailing.to_string());
        }

        Some(Self {
            tags,
            prefix,
            command,
            params,
        })
    }

    /// Nickname portion of the prefix (`nick!user@host`).
    pub fn nick(&self) -> Option<&str> {
        self.prefix
            .as_deref()
            .map(|p| p.split('!').next().unwrap_or(p))
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Last parameter, which carries free text for PRIVMSG/NOTICE/PING.
    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }

    /// Channel named by the first parameter, if it is a channel target.
    pub fn channel(&self) -> Option<String> {
        self.params
            .first()
            .filter(|p| p.starts_with('#'))
            .map(|p| normalize_channel(p))
    }

    /// Build a chat message from a PRIVMSG line.
    pub fn to_chat_message(&self, received_at: DateTime<Utc>) -> Option<ChatMessage> {
        if self.command != "PRIVMSG" || self.params.len() < 2 {
            return None;
        }
        let channel = self.channel()?;
        let username = self.nick()?.to_lowercase();
        let raw = self.trailing().unwrap_or_default();

        let (text, is_action) = match raw
            .strip_prefix("\u{1}ACTION ")
            .map(|t| t.trim_end_matches('\u{1}'))
        {
            Some(action) => (action.to_string(), true),
            None => (raw.to_string(), false),
        };

        let display_name = self
            .tag("display-name")
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| username.clone());

        Some(ChatMessage {
            channel,
            username,
            display_name,
            text,
            timestamp: received_at,
            is_action,
        })
    }
}

fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// NOTICE texts the server sends when the login token is rejected.
pub fn is_login_failure(notice: &str) -> bool {
    notice.contains("Login authentication failed")
        || notice.contains("Improperly formatted auth")
        || notice.contains("Invalid NICK")
}

pub fn format_join(channel: &str) -> String {
    format!("JOIN #{}\r\n", normalize_channel(channel))
}

pub fn format_part(channel: &str) -> String {
    format!("PART #{}\r\n", normalize_channel(channel))
}

/// Line breaks would smuggle extra commands onto the wire; flatten them.
pub fn format_privmsg(channel: &str, text: &str) -> String {
    let text: String = text
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect();
    format!("PRIVMSG #{} :{}\r\n", normalize_channel(channel), text)
}

pub fn format_ping(token: &str) -> String {
    format!("PING :{}\r\n", token)
}

pub fn format_pong(token: &str) -> String {
    format!("PONG :{}\r\n", token)
}
