use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};
use tokio::time::{Instant, sleep_until};
use tracing::debug;

use crate::{Result, SyncError};

/// Configuration for a rate limiter instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum tasks running at once.
    pub max_concurrent: usize,
    /// Minimum gap between dispatches from the queue, in milliseconds.
    /// Zero disables pacing.
    pub min_interval_ms: u64,
}

impl Default for RateLimitConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            min_interval_ms: 0,
        }
    }
}

/// Snapshot of limiter occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterStats {
    pub running: usize,
    pub queued: usize,
}

/// Bounded-concurrency admission queue for one downstream resource.
///
/// At most `max_concurrent` submissions run simultaneously; the rest wait in
/// FIFO order on the semaphore. An optional minimum interval paces
/// dispatches from the queue independent of slot availability.
#[derive(Debug)]
pub struct RateLimiter {
    semaphore: Semaphore,
    max_concurrent: usize,
    min_interval: Option<Duration>,
    next_dispatch: Mutex<Instant>,
    queued: AtomicUsize,
}

impl RateLimiter {
    #[inline]
    pub fn new(config: &RateLimitConfig) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        Self {
            semaphore: Semaphore::new(max_concurrent),
            max_concurrent,
            min_interval: (config.min_interval_ms > 0)
                .then(|| Duration::from_millis(config.min_interval_ms)),
            next_dispatch: Mutex::new(Instant::now()),
            queued: AtomicUsize::new(0),
        }
    }

    /// Run `op` once admission is granted.
    #[inline]
    pub async fn run<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.queued.fetch_add(1, Ordering::SeqCst);
        let permit = self.semaphore.acquire().await;
        self.queued.fetch_sub(1, Ordering::SeqCst);

        let _permit = permit
            .map_err(|_| SyncError::Workflow("rate limiter has been shut down".to_string()))?;

        if let Some(interval) = self.min_interval {
            self.pace(interval).await;
        }

        op().await
    }

    /// Counts of running and queued submissions.
    #[inline]
    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            running: self.max_concurrent - self.semaphore.available_permits(),
            queued: self.queued.load(Ordering::SeqCst),
        }
    }

    /// Hold dispatch until the pacing slot arrives, then claim the next one.
    async fn pace(&self, interval: Duration) {
        let slot = {
            let mut next = self.next_dispatch.lock().await;
            let now = Instant::now();
            let slot = (*next).max(now);
            *next = slot + interval;
            slot
        };
        if slot > Instant::now() {
            debug!("Rate limiter pacing dispatch for {:?}", slot - Instant::now());
        }
        sleep_until(slot).await;
    }
}
