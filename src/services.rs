//! Long-lived service handles built once at startup.
//!
//! A facade whose credentials are missing is `NotReady` with the reason,
//! and callers check that once through [`Readiness::require`].

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::api::{ApiClient, HelixTransport, StaticCredentials};
use crate::chat::{ChatGateway, IrcTransport};
use crate::config::Config;
use crate::error::ErrorCode;

#[derive(Debug, Clone, Error)]
#[error("{service} is not ready: {reason}")]
pub struct NotReadyError {
    pub service: &'static str,
    pub reason: String,
}

impl NotReadyError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::NotReady
    }

    pub fn suggested_action(&self) -> &'static str {
        self.code().suggested_action()
    }
}

/// A handle that is either usable or carries why it is not.
#[derive(Debug, Clone)]
pub enum Readiness<T> {
    NotReady {
        service: &'static str,
        reason: String,
    },
    Ready(T),
}

impl<T> Readiness<T> {
    pub fn not_ready(service: &'static str, reason: impl Into<String>) -> Self {
        Readiness::NotReady {
            service,
            reason: reason.into(),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready(_))
    }

    pub fn require(&self) -> Result<&T, NotReadyError> {
        match self {
            Readiness::Ready(handle) => Ok(handle),
            Readiness::NotReady { service, reason } => Err(NotReadyError {
                service: *service,
                reason: reason.clone(),
            }),
        }
    }

    pub fn status(&self) -> ServiceStatus {
        match self {
            Readiness::Ready(_) => ServiceStatus {
                ready: true,
                reason: None,
            },
            Readiness::NotReady { reason, .. } => ServiceStatus {
                ready: false,
                reason: Some(reason.clone()),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub struct Services {
    pub chat: Readiness<Arc<ChatGateway>>,
    pub api: Readiness<Arc<ApiClient>>,
}

impl Services {
    /// Build both facades. Chat is always available (read-only without a
    /// chat login); the API needs a client id and access token.
    /// Must be called from within a tokio runtime.
    pub fn from_config(config: &Config) -> Self {
        let transport = Arc::new(IrcTransport::new(config.chat.irc_config()));
        let chat = Readiness::Ready(Arc::new(ChatGateway::new(
            transport,
            config.chat.gateway_config(),
        )));
        if !config.chat.can_send() {
            info!("No chat login configured; chat is read-only");
        }

        let api = match config.api.credentials() {
            None => Readiness::not_ready(
                "api",
                "TWITCH_CLIENT_ID and TWITCH_ACCESS_TOKEN must be set",
            ),
            Some(credentials) => match HelixTransport::new(
                config.api.base_url(),
                config.api.timeout(),
                Box::new(StaticCredentials(credentials)),
            ) {
                Ok(transport) => Readiness::Ready(Arc::new(ApiClient::new(
                    Arc::new(transport),
                    config.api.api_client_config(),
                ))),
                Err(e) => {
                    warn!("API client unavailable: {}", e);
                    Readiness::not_ready("api", e)
                }
            },
        };

        Self { chat, api }
    }
}
