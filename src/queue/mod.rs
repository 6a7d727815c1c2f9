//! FIFO request queue drained by a single task under a rate limiter.
//!
//! Each queue owns its pending operations and spawns at most one drainer at
//! a time. The drainer consults the [`RateLimiter`] before every attempt,
//! retries transient failures with backoff by reinserting the item at the
//! head, and resolves the caller's future with the final outcome.

mod error;

pub use error::{QueueError, RequestError};

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::rate_limit::{BackoffPolicy, RateLimiter, RateUsage};

/// A retryable unit of work. Called once per attempt.
pub type Operation<T> = Box<dyn FnMut() -> BoxFuture<'static, Result<T, RequestError>> + Send>;

/// An operation waiting in the queue together with its continuation.
pub struct QueuedOperation<T> {
    label: String,
    operation: Operation<T>,
    created_at: Instant,
    retry_count: u32,
    reply: oneshot::Sender<Result<T, QueueError>>,
}

/// Tuning for one queue instance.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Retry schedule; `max_attempts` is the number of retries after the first try.
    pub retry: BackoffPolicy,
    /// Pause after each successful operation, even when under quota.
    pub pacing: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            retry: BackoffPolicy::operation(),
            pacing: Duration::from_millis(50),
        }
    }
}

/// Queue depth and counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub name: String,
    pub pending: usize,
    pub draining: bool,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub oldest_pending_ms: Option<u64>,
    pub rate: RateUsage,
}

struct QueueState<T> {
    items: VecDeque<QueuedOperation<T>>,
    draining: bool,
    completed: u64,
    failed: u64,
    retried: u64,
}

struct Shared<T> {
    name: String,
    limiter: Arc<RateLimiter>,
    config: QueueConfig,
    state: Mutex<QueueState<T>>,
}

/// Handle to a rate-limited FIFO queue. Cheap to clone.
pub struct RequestQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for RequestQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> RequestQueue<T> {
    pub fn new(name: &str, limiter: Arc<RateLimiter>, config: QueueConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.to_string(),
                limiter,
                config,
                state: Mutex::new(QueueState {
                    items: VecDeque::new(),
                    draining: false,
                    completed: 0,
                    failed: 0,
                    retried: 0,
                }),
            }),
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.shared.limiter
    }

    /// Queue an operation and wait for its final outcome.
    pub async fn enqueue<F, Fut>(&self, label: &str, operation: F) -> Result<T, QueueError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, RequestError>> + Send + 'static,
    {
        self.submit(label, operation).await
    }

    /// Queue an operation immediately and return a future for its outcome.
    ///
    /// The item takes its place in line when `submit` is called, not when the
    /// returned future is first polled. Dropping the future abandons the
    /// operation if it has not started yet.
    pub fn submit<F, Fut>(
        &self,
        label: &str,
        mut operation: F,
    ) -> impl Future<Output = Result<T, QueueError>> + Send + 'static
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, RequestError>> + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let item = QueuedOperation {
            label: label.to_string(),
            operation: Box::new(move || operation().boxed()),
            created_at: Instant::now(),
            retry_count: 0,
            reply,
        };

        let start_drain = {
            let mut state = self.shared.lock();
            state.items.push_back(item);
            !std::mem::replace(&mut state.draining, true)
        };

        if start_drain {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(shared.drain());
        }

        let name = self.shared.name.clone();
        async move { rx.await.unwrap_or(Err(QueueError::Closed(name))) }
    }

    pub fn status(&self) -> QueueStatus {
        let rate = self.shared.limiter.usage();
        let state = self.shared.lock();
        QueueStatus {
            name: self.shared.name.clone(),
            pending: state.items.len(),
            draining: state.draining,
            completed: state.completed,
            failed: state.failed,
            retried: state.retried,
            oldest_pending_ms: state
                .items
                .front()
                .map(|item| item.created_at.elapsed().as_millis() as u64),
            rate,
        }
    }

    pub fn len(&self) -> usize {
        self.shared.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Send + 'static> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// True if there is a live item at the head. Clears `draining` otherwise,
    /// under the same lock `submit` uses, so no item is ever stranded.
    fn has_work(&self) -> bool {
        let mut state = self.lock();
        while let Some(front) = state.items.front() {
            if !front.reply.is_closed() {
                return true;
            }
            if let Some(abandoned) = state.items.pop_front() {
                debug!("Queue {}: dropping abandoned {}", self.name, abandoned.label);
            }
        }
        state.draining = false;
        false
    }

    async fn drain(self: Arc<Self>) {
        debug!("Queue {} draining", self.name);

        while self.has_work() {
            let acquire = self.limiter.try_acquire();
            if !acquire.allowed {
                debug!(
                    "Queue {} waiting {:?} for rate limit",
                    self.name, acquire.retry_after
                );
                tokio::time::sleep(acquire.retry_after).await;
                continue;
            }

            let next = self.lock().items.pop_front();
            let Some(mut item) = next else {
                continue;
            };

            let result = AssertUnwindSafe((item.operation)())
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(RequestError::Internal("operation panicked".to_string())));

            match result {
                Ok(value) => {
                    self.lock().completed += 1;
                    let _ = item.reply.send(Ok(value));
                    if !self.config.pacing.is_zero() {
                        tokio::time::sleep(self.config.pacing).await;
                    }
                }
                Err(error)
                    if error.is_retryable() && !self.config.retry.is_exhausted(item.retry_count) =>
                {
                    let delay = self.config.retry.delay(item.retry_count);
                    item.retry_count += 1;
                    self.lock().retried += 1;
                    warn!(
                        "Queue {}: {} failed ({}), retry {}/{} in {:?}",
                        self.name,
                        item.label,
                        error,
                        item.retry_count,
                        self.config.retry.max_attempts,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    self.lock().items.push_front(item);
                }
                Err(error) => {
                    let attempts = item.retry_count + 1;
                    self.lock().failed += 1;
                    let outcome = if error.is_retryable() {
                        QueueError::Exhausted {
                            attempts,
                            source: error,
                        }
                    } else {
                        QueueError::Rejected(error)
                    };
                    warn!("Queue {}: {} failed: {}", self.name, item.label, outcome);
                    let _ = item.reply.send(Err(outcome));
                }
            }
        }

        debug!("Queue {} idle", self.name);
    }
}
