//! Rate limiter configuration and types.

use std::time::Duration;

/// Quota for a sliding window limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Operations permitted within one window.
    pub quota: usize,
    /// Length of the trailing window.
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn new(quota: usize, window: Duration) -> Self {
        Self { quota, window }
    }

    /// Chat protocol budget for a regular (non-moderator) account.
    pub fn chat_default() -> Self {
        Self::new(20, Duration::from_secs(30))
    }

    /// REST budget for an app access token.
    pub fn api_default() -> Self {
        Self::new(800, Duration::from_secs(60))
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::api_default()
    }
}

/// Outcome of a capacity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acquire {
    pub allowed: bool,
    /// Zero when allowed; otherwise how long until capacity returns.
    pub retry_after: Duration,
}

impl Acquire {
    pub(crate) fn granted() -> Self {
        Self {
            allowed: true,
            retry_after: Duration::ZERO,
        }
    }

    pub(crate) fn denied(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            retry_after,
        }
    }
}

/// Snapshot of a limiter's budget for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RateUsage {
    pub used: usize,
    pub quota: usize,
    pub window_ms: u64,
    /// Remaining server-imposed cooldown, if one is active.
    pub cooldown_ms: Option<u64>,
}
