//! Rate limiting primitives for chat sends and REST calls.
//!
//! The chat protocol and the REST API each get their own [`RateLimiter`]
//! instance with an independent budget; both share [`BackoffPolicy`] for
//! retry and reconnect schedules.

mod backoff;
mod config;
mod limiter;

pub use backoff::BackoffPolicy;
pub use config::{Acquire, RateLimitConfig, RateUsage};
pub use limiter::RateLimiter;

use std::time::Duration;

/// Parse a `Retry-After` header value (seconds).
/// Returns duration to wait, or None if header is missing/invalid.
pub fn parse_retry_after(header_value: Option<&str>) -> Option<Duration> {
    let value = header_value?.trim();
    value.parse::<u64>().ok().map(Duration::from_secs)
}

/// Parse a `Ratelimit-Reset` header (unix epoch seconds) relative to `now_unix`.
pub fn parse_ratelimit_reset(header_value: Option<&str>, now_unix: i64) -> Option<Duration> {
    let reset = header_value?.trim().parse::<i64>().ok()?;
    let secs = reset.saturating_sub(now_unix).max(0);
    Some(Duration::from_secs(secs as u64))
}
