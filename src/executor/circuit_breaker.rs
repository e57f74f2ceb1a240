use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{Result, SyncError};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Configuration for a circuit breaker instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to trip the breaker.
    pub failure_threshold: u32,
    /// Cooldown before a trial call is allowed through, in milliseconds.
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    #[inline]
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
        }
    }
}

/// Observability snapshot exposed by `stats()`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitStats {
    pub state: CircuitState,
    pub failures: u32,
    pub last_failure_time: Option<Instant>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
}

/// Failure-tripped gate protecting one unreliable dependency.
///
/// Closed until `failure_threshold` consecutive failures, then Open: calls
/// fail fast with `SyncError::CircuitOpen` until `reset_timeout_ms` has
/// elapsed. The next call after the cooldown runs as a HalfOpen trial; its
/// success closes the breaker, its failure reopens it and restarts the
/// timer. State is shared across all callers targeting the dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    #[inline]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: None,
            }),
        }
    }

    /// Run `op` through the breaker.
    ///
    /// The lock is never held across the awaited operation; concurrent
    /// HalfOpen trials are possible and both report their outcome.
    #[inline]
    pub async fn call<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.check_admission()?;

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                self.record_failure();
                Err(error)
            }
        }
    }

    /// Current state snapshot for observability.
    #[inline]
    pub fn stats(&self) -> CircuitStats {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        CircuitStats {
            state: inner.state,
            failures: inner.failure_count,
            last_failure_time: inner.last_failure_time,
        }
    }

    fn check_admission(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        if inner.state == CircuitState::Open {
            let cooldown = Duration::from_millis(self.config.reset_timeout_ms);
            let elapsed = inner
                .last_failure_time
                .map(|t| t.elapsed())
                .unwrap_or(cooldown);

            if elapsed < cooldown {
                return Err(SyncError::CircuitOpen(format!(
                    "circuit '{}' is open, retry after {:?}",
                    self.name,
                    cooldown - elapsed
                )));
            }

            debug!("Circuit '{}' entering half-open trial", self.name);
            inner.state = CircuitState::HalfOpen;
        }

        Ok(())
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.state == CircuitState::HalfOpen {
            debug!("Circuit '{}' closed after successful trial", self.name);
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.failure_count += 1;
        inner.last_failure_time = Some(Instant::now());

        match inner.state {
            CircuitState::HalfOpen => {
                warn!("Circuit '{}' reopened by failed trial call", self.name);
                inner.state = CircuitState::Open;
            }
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                warn!(
                    "Circuit '{}' opened after {} consecutive failures",
                    self.name, inner.failure_count
                );
                inner.state = CircuitState::Open;
            }
            _ => {}
        }
    }
}
