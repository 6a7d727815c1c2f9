//! Exponential backoff schedules for reconnection and operation retries.

use std::time::Duration;

/// Capped exponential backoff: `min(initial * 2^attempt, max)`.
///
/// Stateless; the caller tracks the attempt number and stops once
/// [`BackoffPolicy::is_exhausted`] reports the ceiling was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            max,
            max_attempts,
        }
    }

    /// Connection recovery: 1s doubling to 30s, 10 attempts.
    pub fn reconnect() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30), 10)
    }

    /// Individual operation retries: 500ms doubling to 5s, 3 attempts.
    pub fn operation() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(5), 3)
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let initial_ms = self.initial.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(initial_ms.saturating_mul(factor).min(max_ms))
    }

    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::operation()
    }
}
