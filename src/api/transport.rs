//! REST transport for the Helix API.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::queue::RequestError;
use crate::rate_limit::{parse_ratelimit_reset, parse_retry_after};

/// Raw outcome of one GET, before any status classification.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    /// Server-requested cooldown from `Retry-After` or `Ratelimit-Reset`.
    pub retry_after: Option<Duration>,
    pub body: Value,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Best-effort error text from a Helix error body.
    pub fn error_message(&self) -> String {
        self.body
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", self.status))
    }
}

#[async_trait]
pub trait ApiTransport: Send + Sync {
    /// GET `path` (relative to the API base) with repeated query pairs.
    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<ApiResponse, RequestError>;
}

/// Client id and user access token for Helix.
#[derive(Clone)]
pub struct Credentials {
    pub client_id: String,
    pub access_token: String,
}

impl Credentials {
    pub fn new(client_id: &str, access_token: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            access_token: access_token.trim_start_matches("oauth:").to_string(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Source of credentials for each request, so tokens can be refreshed
/// without rebuilding the transport.
pub trait CredentialProvider: Send + Sync {
    fn credentials(&self) -> Option<Credentials>;
}

#[derive(Debug, Clone)]
pub struct StaticCredentials(pub Credentials);

impl CredentialProvider for StaticCredentials {
    fn credentials(&self) -> Option<Credentials> {
        Some(self.0.clone())
    }
}

/// reqwest-backed Helix transport.
pub struct HelixTransport {
    client: Client,
    base_url: String,
    credentials: Box<dyn CredentialProvider>,
}

impl HelixTransport {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        credentials: Box<dyn CredentialProvider>,
    ) -> Result<Self, String> {
        let client = Client::builder()
            .user_agent(concat!("chatgate/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }
}

#[async_trait]
impl ApiTransport for HelixTransport {
    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<ApiResponse, RequestError> {
        let credentials = self.credentials.credentials().ok_or_else(|| {
            RequestError::Unauthorized("no API credentials configured".to_string())
        })?;

        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        debug!("GET {} ({} query params)", url, query.len());

        let response = self
            .client
            .get(&url)
            .query(query)
            .bearer_auth(&credentials.access_token)
            .header("Client-Id", &credentials.client_id)
            .send()
            .await
            .map_err(|e| RequestError::Network(e.to_string()))?;

        let status = response.status();
        let headers = response.headers();
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        let retry_after = if status == StatusCode::TOO_MANY_REQUESTS {
            parse_retry_after(header("retry-after"))
                .or_else(|| parse_ratelimit_reset(header("ratelimit-reset"), Utc::now().timestamp()))
        } else {
            None
        };

        let text = response
            .text()
            .await
            .map_err(|e| RequestError::Network(e.to_string()))?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(ApiResponse {
            status: status.as_u16(),
            retry_after,
            body,
        })
    }
}
