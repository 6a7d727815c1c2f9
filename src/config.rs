//! Configuration management for chatgate using the prefer crate.
//!
//! Every setting is optional in the file; unset values fall back to the
//! platform defaults. Credentials normally come from the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::api::{ApiClientConfig, Credentials};
use crate::chat::{BufferConfig, ConnectionConfig, GatewayConfig, IrcConfig};
use crate::queue::QueueConfig;
use crate::rate_limit::{BackoffPolicy, RateLimitConfig};

pub const DEFAULT_CHAT_HOST: &str = "irc.chat.twitch.tv";
pub const DEFAULT_CHAT_PORT: u16 = 6667;
pub const DEFAULT_API_URL: &str = "https://api.twitch.tv/helix";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse {format} config {path}: {message}")]
    Parse {
        path: PathBuf,
        format: &'static str,
        message: String,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Backoff overrides. Missing fields keep the schedule's default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl BackoffSettings {
    pub fn resolve(&self, default: BackoffPolicy) -> BackoffPolicy {
        BackoffPolicy::new(
            self.initial_ms
                .map(Duration::from_millis)
                .unwrap_or(default.initial),
            self.max_ms.map(Duration::from_millis).unwrap_or(default.max),
            self.max_attempts.unwrap_or(default.max_attempts),
        )
    }
}

/// `[chat]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Login name for sending. Anonymous read-only login when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,
    /// Messages allowed per send window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_quota: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_window_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pacing_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_capacity: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_message_length: Option<usize>,
    #[serde(default)]
    pub reconnect: BackoffSettings,
    #[serde(default)]
    pub retry: BackoffSettings,
}

impl ChatSettings {
    pub fn can_send(&self) -> bool {
        self.username.is_some() && self.oauth_token.is_some()
    }

    pub fn irc_config(&self) -> IrcConfig {
        let defaults = IrcConfig::default();
        let (nickname, token) = if self.can_send() {
            (self.username.clone(), self.oauth_token.clone())
        } else {
            (None, None)
        };
        IrcConfig {
            host: self.host.clone().unwrap_or(defaults.host),
            port: self.port.unwrap_or(defaults.port),
            nickname,
            token,
            connect_timeout: self
                .connect_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            max_message_length: self
                .max_message_length
                .unwrap_or(defaults.max_message_length),
        }
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        let defaults = GatewayConfig::default();
        let send_rate = RateLimitConfig::new(
            self.send_quota.unwrap_or(defaults.send_rate.quota),
            self.send_window_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.send_rate.window),
        );
        GatewayConfig {
            connection: ConnectionConfig {
                reconnect: self.reconnect.resolve(defaults.connection.reconnect),
                join_retry: self.retry.resolve(defaults.connection.join_retry),
                heartbeat_interval: self
                    .heartbeat_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.connection.heartbeat_interval),
            },
            buffer: BufferConfig {
                capacity: self.buffer_capacity.unwrap_or(defaults.buffer.capacity),
                poll_interval: self
                    .poll_interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.buffer.poll_interval),
            },
            send_rate,
            send_queue: QueueConfig {
                retry: self.retry.resolve(defaults.send_queue.retry),
                pacing: self
                    .pacing_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.send_queue.pacing),
            },
            max_message_length: self
                .max_message_length
                .unwrap_or(defaults.max_message_length),
            can_send: self.can_send(),
        }
    }
}

/// `[api]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pacing_ms: Option<u64>,
    #[serde(default)]
    pub retry: BackoffSettings,
}

impl ApiSettings {
    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_API_URL)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(30))
    }

    /// Present only when both the client id and token are set.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.client_id, &self.access_token) {
            (Some(id), Some(token)) if !id.is_empty() && !token.is_empty() => {
                Some(Credentials::new(id, token))
            }
            _ => None,
        }
    }

    pub fn api_client_config(&self) -> ApiClientConfig {
        let defaults = ApiClientConfig::default();
        ApiClientConfig {
            rate: RateLimitConfig::new(
                self.quota.unwrap_or(defaults.rate.quota),
                self.window_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.rate.window),
            ),
            queue: QueueConfig {
                retry: self.retry.resolve(defaults.queue.retry),
                pacing: self
                    .pacing_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.queue.pacing),
            },
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
        }
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub chat: ChatSettings,
    #[serde(default)]
    pub api: ApiSettings,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    /// Falls back to defaults when no file is found or it cannot be parsed.
    /// Environment overrides are applied last and the result is validated.
    pub async fn load() -> Result<Self, ConfigError> {
        let config = match prefer::load("chatgate").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => match Self::load_from_path(path).await {
                    Ok(config) => config,
                    Err(e) => {
                        warn!("Ignoring config file: {}", e);
                        Self::default()
                    }
                },
                None => Self::default(),
            },
            Err(_) => {
                debug!("No chatgate config file found, using defaults");
                Self::default()
            }
        };
        config.with_env_overrides()
    }

    /// Load an explicitly named file, failing if it is missing or invalid.
    pub async fn load_explicit(path: &Path) -> Result<Self, ConfigError> {
        Self::load_explicit_with(path, |key| std::env::var(key).ok()).await
    }

    async fn load_explicit_with(
        path: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        Self::load_from_path(path).await?.with_overrides_from(lookup)
    }

    /// Parse a config file by extension: TOML, YAML, otherwise JSON.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let parse_error = |format: &'static str, message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            format,
            message,
        };

        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents).map_err(|e| parse_error("TOML", e.to_string()))?,
            "yaml" | "yml" => {
                serde_yaml::from_str(&contents).map_err(|e| parse_error("YAML", e.to_string()))?
            }
            _ => serde_json::from_str(&contents).map_err(|e| parse_error("JSON", e.to_string()))?,
        };

        config.validate()?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply credential and endpoint overrides from a variable lookup, then
    /// validate the merged result.
    pub fn with_overrides_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(id) = var("TWITCH_CLIENT_ID") {
            self.api.client_id = Some(id);
        }
        if let Some(token) = var("TWITCH_ACCESS_TOKEN") {
            self.api.access_token = Some(token.trim_start_matches("oauth:").to_string());
        }
        if let Some(url) = var("CHATGATE_API_URL") {
            self.api.base_url = Some(url);
        }
        if let Some(username) = var("TWITCH_USERNAME") {
            self.chat.username = Some(username.to_lowercase());
        }
        if let Some(token) = var("TWITCH_OAUTH_TOKEN") {
            self.chat.oauth_token = Some(token);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.chat.send_quota == Some(0), "chat.send_quota must be positive"),
            (self.chat.send_window_secs == Some(0), "chat.send_window_secs must be positive"),
            (self.chat.buffer_capacity == Some(0), "chat.buffer_capacity must be positive"),
            (self.chat.poll_interval_ms == Some(0), "chat.poll_interval_ms must be positive"),
            (self.chat.heartbeat_secs == Some(0), "chat.heartbeat_secs must be positive"),
            (self.api.quota == Some(0), "api.quota must be positive"),
            (self.api.window_secs == Some(0), "api.window_secs must be positive"),
            (self.api.batch_size == Some(0), "api.batch_size must be positive"),
        ];
        if let Some((_, message)) = checks.iter().find(|(failed, _)| *failed) {
            return Err(ConfigError::Invalid(message.to_string()));
        }

        if let Some(base_url) = &self.api.base_url {
            let parsed = url::Url::parse(base_url)
                .map_err(|e| ConfigError::Invalid(format!("api.base_url {:?}: {}", base_url, e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::Invalid(format!(
                    "api.base_url must be http or https, got {}",
                    parsed.scheme()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        let gateway = config.chat.gateway_config();
        assert_eq!(gateway.send_rate, RateLimitConfig::chat_default());
        assert_eq!(gateway.buffer.capacity, 1000);
        assert_eq!(gateway.connection.reconnect, BackoffPolicy::reconnect());
        assert!(!gateway.can_send);

        let irc = config.chat.irc_config();
        assert_eq!(irc.host, DEFAULT_CHAT_HOST);
        assert_eq!(irc.port, DEFAULT_CHAT_PORT);

        let api = config.api.api_client_config();
        assert_eq!(api.rate, RateLimitConfig::api_default());
        assert_eq!(api.batch_size, 100);
        assert_eq!(config.api.base_url(), DEFAULT_API_URL);
        assert!(config.api.credentials().is_none());
    }

    #[test]
    fn test_parse_toml_sections() {
        let config: Config = toml::from_str(
            r#"
            [chat]
            send_quota = 100
            reconnect = { max_attempts = 5 }

            [api]
            batch_size = 50
            "#,
        )
        .unwrap();

        let gateway = config.chat.gateway_config();
        assert_eq!(gateway.send_rate.quota, 100);
        assert_eq!(gateway.connection.reconnect.max_attempts, 5);
        assert_eq!(gateway.connection.reconnect.initial, Duration::from_secs(1));
        assert_eq!(config.api.api_client_config().batch_size, 50);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("TWITCH_CLIENT_ID", "abc"),
            ("TWITCH_ACCESS_TOKEN", "oauth:xyz"),
            ("TWITCH_USERNAME", "SomeBot"),
            ("TWITCH_OAUTH_TOKEN", "oauth:chat"),
            ("CHATGATE_API_URL", ""),
        ]
        .into_iter()
        .collect();

        let config = Config::default()
            .with_overrides_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        let creds = config.api.credentials().unwrap();
        assert_eq!(creds.client_id, "abc");
        assert_eq!(creds.access_token, "xyz");
        assert_eq!(config.chat.username.as_deref(), Some("somebot"));
        assert!(config.chat.can_send());
        assert_eq!(config.api.base_url(), DEFAULT_API_URL);
    }

    #[test]
    fn test_validate_rejects_zero_quota() {
        let mut config = Config::default();
        config.api.quota = Some(0);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_base_url() {
        let mut config = Config::default();
        config.api.base_url = Some("ftp://example.com".into());
        assert!(config.validate().is_err());
        config.api.base_url = Some("not a url".into());
        assert!(config.validate().is_err());
        config.api.base_url = Some("http://localhost:8080/helix".into());
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatgate.yaml");
        tokio::fs::write(&path, "chat:\n  host: localhost\n  port: 6697\n")
            .await
            .unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        assert_eq!(config.chat.irc_config().host, "localhost");
        assert_eq!(config.chat.irc_config().port, 6697);
        assert_eq!(config.source_path.as_deref(), Some(path.as_path()));
    }

    #[tokio::test]
    async fn test_env_api_url_is_validated_after_file_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatgate.toml");
        tokio::fs::write(&path, "[api]\nbase_url = \"https://api.example.test/helix\"\n")
            .await
            .unwrap();

        let err = Config::load_explicit_with(&path, |key| {
            (key == "CHATGATE_API_URL").then(|| "ftp://mirror.example.test".to_string())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let config = Config::load_explicit_with(&path, |key| {
            (key == "CHATGATE_API_URL").then(|| "http://localhost:8080/helix".to_string())
        })
        .await
        .unwrap();
        assert_eq!(config.api.base_url(), "http://localhost:8080/helix");
    }

    #[tokio::test]
    async fn test_load_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_from_path(&dir.path().join("absent.toml"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
