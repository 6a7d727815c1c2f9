//! Sliding window rate limiter.
//!
//! Counts operations inside a trailing window rather than fixed buckets.
//! Acquisition never blocks; callers receive a wait hint and decide how to
//! sleep. A server-supplied cooldown (from `Retry-After`) overrides the local
//! accounting until it expires.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use super::config::{Acquire, RateLimitConfig, RateUsage};

/// Timestamps of recent permitted operations plus any active cooldown.
#[derive(Debug)]
struct RateWindow {
    timestamps: VecDeque<Instant>,
    cooldown_until: Option<Instant>,
}

impl RateWindow {
    /// Drop every timestamp that has left the window ending at `now`.
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
        if matches!(self.cooldown_until, Some(until) if until <= now) {
            self.cooldown_until = None;
        }
    }
}

/// Sliding window limiter shared by a queue and whoever reports server cooldowns.
pub struct RateLimiter {
    name: String,
    config: RateLimitConfig,
    window: Mutex<RateWindow>,
}

impl RateLimiter {
    pub fn new(name: &str, config: RateLimitConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            window: Mutex::new(RateWindow {
                timestamps: VecDeque::with_capacity(config.quota),
                cooldown_until: None,
            }),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Try to take one slot. Records the operation only when allowed.
    pub fn try_acquire(&self) -> Acquire {
        let now = Instant::now();
        let mut window = self.lock();
        window.prune(now, self.config.window);

        let cooldown = window
            .cooldown_until
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO);

        let local_wait = if window.timestamps.len() >= self.config.quota {
            window
                .timestamps
                .front()
                .map(|&oldest| (oldest + self.config.window).saturating_duration_since(now))
                .unwrap_or(self.config.window)
                // A zero quota would otherwise spin forever on a zero wait.
                .max(Duration::from_millis(1))
        } else {
            Duration::ZERO
        };

        let wait = cooldown.max(local_wait);
        if wait > Duration::ZERO {
            debug!("Rate limiter {} denied, retry in {:?}", self.name, wait);
            return Acquire::denied(wait);
        }

        window.timestamps.push_back(now);
        Acquire::granted()
    }

    /// Honor a server-imposed cooldown. Keeps the longer of the existing
    /// and the new deadline.
    pub fn set_retry_after(&self, retry_after: Duration) {
        let until = Instant::now() + retry_after;
        let mut window = self.lock();
        let extended = match window.cooldown_until {
            Some(existing) if existing >= until => false,
            _ => {
                window.cooldown_until = Some(until);
                true
            }
        };
        if extended {
            warn!(
                "Rate limiter {} cooling down for {:?} at server request",
                self.name, retry_after
            );
        }
    }

    /// Current budget usage.
    pub fn usage(&self) -> RateUsage {
        let now = Instant::now();
        let mut window = self.lock();
        window.prune(now, self.config.window);
        RateUsage {
            used: window.timestamps.len(),
            quota: self.config.quota,
            window_ms: self.config.window.as_millis() as u64,
            cooldown_ms: window
                .cooldown_until
                .map(|until| until.saturating_duration_since(now).as_millis() as u64),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RateWindow> {
        // The window holds plain data; a panic mid-update cannot leave it
        // in a state worse than slightly stale timestamps.
        self.window
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(quota: usize, window_ms: u64) -> RateLimiter {
        RateLimiter::new(
            "test",
            RateLimitConfig::new(quota, Duration::from_millis(window_ms)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_allows_up_to_quota() {
        let limiter = limiter(3, 1000);
        for _ in 0..3 {
            assert!(limiter.try_acquire().allowed);
        }
        let denied = limiter.try_acquire();
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_denial_does_not_consume_capacity() {
        let limiter = limiter(1, 1000);
        assert!(limiter.try_acquire().allowed);
        for _ in 0..5 {
            assert!(!limiter.try_acquire().allowed);
        }
        assert_eq!(limiter.usage().used, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_tracks_oldest_timestamp() {
        let limiter = limiter(2, 1000);
        assert!(limiter.try_acquire().allowed);
        tokio::time::advance(Duration::from_millis(300)).await;
        assert!(limiter.try_acquire().allowed);

        let denied = limiter.try_acquire();
        assert_eq!(denied.retry_after, Duration::from_millis(700));

        tokio::time::advance(Duration::from_millis(700)).await;
        assert!(limiter.try_acquire().allowed);
        assert!(!limiter.try_acquire().allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let limiter = limiter(2, 1000);
        assert!(limiter.try_acquire().allowed);
        assert!(limiter.try_acquire().allowed);
        tokio::time::advance(Duration::from_millis(1000)).await;
        assert_eq!(limiter.usage().used, 0);
        assert!(limiter.try_acquire().allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_cooldown_overrides_window() {
        let limiter = limiter(100, 60_000);
        assert!(limiter.try_acquire().allowed);

        limiter.set_retry_after(Duration::from_secs(10));

        let denied = limiter.try_acquire();
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(4)).await;
        let denied = limiter.try_acquire();
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Duration::from_secs(6));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(limiter.try_acquire().allowed);
        assert_eq!(limiter.usage().cooldown_ms, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shorter_cooldown_does_not_shrink_existing() {
        let limiter = limiter(10, 1000);
        limiter.set_retry_after(Duration::from_secs(10));
        limiter.set_retry_after(Duration::from_secs(2));
        assert_eq!(limiter.try_acquire().retry_after, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_and_full_window_takes_longer_wait() {
        let limiter = limiter(1, 30_000);
        assert!(limiter.try_acquire().allowed);
        limiter.set_retry_after(Duration::from_secs(5));
        assert_eq!(limiter.try_acquire().retry_after, Duration::from_secs(30));
    }
}
