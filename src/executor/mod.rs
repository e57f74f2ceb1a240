// Step execution module
// Retryable, checkpointed units of work plus the primitives that protect
// the external services they call.

pub mod backoff;
pub mod checkpoint;
pub mod circuit_breaker;
pub mod rate_limit;


use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::{Result, SyncError};

pub use backoff::BackoffPolicy;
pub use checkpoint::{CheckpointStore, MemoryCheckpointStore, run_once};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitStats};
pub use rate_limit::{RateLimitConfig, RateLimiter, RateLimiterStats};

/// Observer invoked before each retry wait: `(retry_number, error, delay)`.
pub type RetryObserver = Box<dyn Fn(u32, &SyncError, Duration) + Send + Sync>;

/// Retry behavior for a step.
pub struct RetryOptions {
    /// Total invocation budget. Zero means the step is never attempted and
    /// fails immediately; callers should guard against configuring this.
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub on_retry: Option<RetryObserver>,
}

impl Default for RetryOptions {
    #[inline]
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
            on_retry: None,
        }
    }
}

/// Options controlling one step execution.
pub struct StepOptions {
    /// Retry the step on failure. `None` means a single attempt.
    pub retry: Option<RetryOptions>,
    /// When true (the default), a failure after exhausting retries is
    /// escalated as a fatal workflow error. When false the failure comes
    /// back as an unsuccessful `StepResult` without aborting the caller.
    pub critical: bool,
    /// Per-attempt deadline. A timed-out attempt counts as a failure for
    /// retry accounting, but the underlying future is only abandoned, not
    /// preempted: an operation that is not cancel-safe may still run to
    /// completion in the background.
    pub timeout: Option<Duration>,
}

impl Default for StepOptions {
    #[inline]
    fn default() -> Self {
        Self {
            retry: None,
            critical: true,
            timeout: None,
        }
    }
}

/// Outcome of a step execution.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub retry_count: u32,
}

impl<T> StepResult<T> {
    fn completed(data: T, retry_count: u32) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            retry_count,
        }
    }

    fn failed(error: &SyncError, retry_count: u32) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
            retry_count,
        }
    }
}

/// Serialized form of a completed step, so replays restore the retry count
/// alongside the data.
#[derive(Serialize, Deserialize)]
struct StepRecord<T> {
    data: T,
    retry_count: u32,
}

/// Runs named steps exactly-once-durable for one job instance.
///
/// Execution is delegated to the [`CheckpointStore`]: a step already
/// recorded as complete replays its stored result without re-invoking the
/// operation. Failures are retried per [`RetryOptions`] using the backoff
/// policy, and are never checkpointed.
pub struct StepExecutor {
    job_id: String,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl StepExecutor {
    #[inline]
    pub fn new(job_id: impl Into<String>, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            job_id: job_id.into(),
            checkpoints,
        }
    }

    #[inline]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Execute a named step.
    #[inline]
    pub async fn execute<T, F, Fut>(
        &self,
        step_name: &str,
        mut op: F,
        options: StepOptions,
    ) -> Result<StepResult<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let retries_used = AtomicU32::new(0);

        let outcome = run_once(&*self.checkpoints, &self.job_id, step_name, || {
            self.run_attempts(step_name, &mut op, &options, &retries_used)
        })
        .await;

        match outcome {
            Ok(record) => {
                debug!("Step '{}' completed for job {}", step_name, self.job_id);
                Ok(StepResult::completed(record.data, record.retry_count))
            }
            Err(error) if options.critical => {
                warn!(
                    "Critical step '{}' failed for job {}: {}",
                    step_name, self.job_id, error
                );
                Err(SyncError::Workflow(format!(
                    "critical step '{step_name}' failed: {error}"
                )))
            }
            Err(error) => {
                warn!(
                    "Step '{}' failed for job {} (non-critical): {}",
                    step_name, self.job_id, error
                );
                Ok(StepResult::failed(&error, retries_used.load(Ordering::SeqCst)))
            }
        }
    }

    async fn run_attempts<T, F, Fut>(
        &self,
        step_name: &str,
        op: &mut F,
        options: &StepOptions,
        retries_used: &AtomicU32,
    ) -> Result<StepRecord<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let single_attempt = RetryOptions {
            max_attempts: 1,
            ..RetryOptions::default()
        };
        let retry = options.retry.as_ref().unwrap_or(&single_attempt);

        if retry.max_attempts == 0 {
            return Err(SyncError::Validation(format!(
                "step '{step_name}' is configured with zero attempts"
            )));
        }

        let mut last_error: Option<SyncError> = None;

        for attempt in 1..=retry.max_attempts {
            if attempt > 1 {
                let retry_number = attempt - 1;
                let delay = retry.backoff.delay_for(retry_number);
                if let (Some(observer), Some(error)) = (&retry.on_retry, &last_error) {
                    observer(retry_number, error, delay);
                }
                debug!(
                    "Retrying step '{}' (attempt {}/{}) after {:?}",
                    step_name, attempt, retry.max_attempts, delay
                );
                sleep(delay).await;
                retries_used.store(retry_number, Ordering::SeqCst);
            }

            let result = match options.timeout {
                Some(limit) => match timeout(limit, op()).await {
                    Ok(result) => result,
                    Err(_) => Err(SyncError::Timeout(format!(
                        "step '{step_name}' exceeded {limit:?}"
                    ))),
                },
                None => op().await,
            };

            match result {
                Ok(data) => {
                    return Ok(StepRecord {
                        data,
                        retry_count: attempt - 1,
                    });
                }
                Err(error) => {
                    warn!(
                        "Step '{}' attempt {}/{} failed: {}",
                        step_name, attempt, retry.max_attempts, error
                    );
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            SyncError::Workflow(format!("step '{step_name}' failed without an error"))
        }))
    }
}
