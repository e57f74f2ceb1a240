// Error recovery module
// Classifies failures as transient or fatal, retries with backoff, runs
// fallbacks, and aggregates partial successes across batches.


use std::future::Future;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::executor::BackoffPolicy;
use crate::{Result, SyncError};

/// Retry/fallback policy for one manager instance. Replaced wholesale via
/// [`ErrorRecoveryManager::set_strategy`], never mutated field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryStrategy {
    /// Total invocation budget for `execute_with_retry`.
    pub max_retries: u32,
    /// Base delay between retries, in milliseconds.
    pub retry_delay_ms: u64,
    /// Whether a supplied fallback operation may run.
    pub fallback_enabled: bool,
    /// Return an empty result instead of an error when no fallback applies.
    pub skip_on_error: bool,
}

impl Default for RecoveryStrategy {
    #[inline]
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1000,
            fallback_enabled: true,
            skip_on_error: false,
        }
    }
}

/// One entry in the append-only error ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: String,
    pub message: String,
    pub step_name: String,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
    pub recoverable: bool,
}

/// A failed item from a partial-success batch, tagged with its position.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedItem {
    pub index: usize,
    pub error: String,
}

/// Partition of a heterogeneous batch outcome.
#[derive(Debug)]
pub struct PartialOutcome<T> {
    pub successful: Vec<T>,
    pub failed: Vec<FailedItem>,
    pub has_errors: bool,
}

/// Wraps operations with transient-error classification, bounded retry,
/// fallback execution, and partial-success aggregation.
///
/// The ledger is append-only; records are never mutated after creation.
pub struct ErrorRecoveryManager {
    strategy: Mutex<RecoveryStrategy>,
    ledger: Mutex<Vec<ErrorRecord>>,
}

impl Default for ErrorRecoveryManager {
    #[inline]
    fn default() -> Self {
        Self::new(RecoveryStrategy::default())
    }
}

impl ErrorRecoveryManager {
    #[inline]
    pub fn new(strategy: RecoveryStrategy) -> Self {
        Self {
            strategy: Mutex::new(strategy),
            ledger: Mutex::new(Vec::new()),
        }
    }

    /// Replace the whole strategy.
    #[inline]
    pub fn set_strategy(&self, strategy: RecoveryStrategy) {
        *self
            .strategy
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = strategy;
    }

    #[inline]
    pub fn strategy(&self) -> RecoveryStrategy {
        self.strategy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Snapshot of the error ledger.
    #[inline]
    pub fn error_log(&self) -> Vec<ErrorRecord> {
        self.ledger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the most recent error recorded for `step_name` permits
    /// another attempt.
    #[inline]
    pub fn can_retry(&self, step_name: &str) -> bool {
        let max_retries = self.strategy().max_retries;
        self.ledger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|r| r.step_name == step_name)
            .is_some_and(|r| r.recoverable && r.retry_count < max_retries)
    }

    /// Append an error record for `step_name`.
    #[inline]
    pub fn record_error(&self, step_name: &str, error: &SyncError, retry_count: u32) {
        let record = ErrorRecord {
            kind: error.kind().to_string(),
            message: error.to_string(),
            step_name: step_name.to_string(),
            timestamp: Utc::now(),
            retry_count,
            recoverable: error.is_recoverable(),
        };
        warn!(
            "Recorded {} error for step '{}' (retry {}): {}",
            record.kind, step_name, retry_count, record.message
        );
        self.ledger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    /// Invoke `op` up to `max_retries` times, sleeping per the backoff
    /// schedule before every attempt after the first. Non-recoverable
    /// errors propagate immediately; the last error is returned once the
    /// budget is exhausted.
    #[inline]
    pub async fn execute_with_retry<T, F, Fut>(&self, step_name: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let strategy = self.strategy();
        let backoff = BackoffPolicy {
            initial_delay_ms: strategy.retry_delay_ms,
            ..BackoffPolicy::default()
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            if attempt > 1 {
                let delay = backoff.delay_for(attempt - 1);
                debug!(
                    "Waiting {:?} before attempt {}/{} of step '{}'",
                    delay, attempt, strategy.max_retries, step_name
                );
                sleep(delay).await;
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    self.record_error(step_name, &error, attempt);
                    if !self.can_retry(step_name) {
                        return Err(error);
                    }
                }
            }
        }
    }

    /// Run the primary operation with retries; on failure, run the fallback
    /// when one is supplied and enabled. The primary error is rethrown if
    /// the fallback also fails. With no applicable fallback,
    /// `skip_on_error` converts the failure into `Ok(None)`.
    #[inline]
    pub async fn execute_with_fallback<T, F, Fut, G, GFut>(
        &self,
        step_name: &str,
        op: F,
        fallback: Option<G>,
    ) -> Result<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T>>,
    {
        let primary_error = match self.execute_with_retry(step_name, op).await {
            Ok(value) => return Ok(Some(value)),
            Err(error) => error,
        };

        let strategy = self.strategy();

        if let Some(fallback) = fallback {
            if strategy.fallback_enabled {
                info!("Running fallback for step '{}'", step_name);
                match fallback().await {
                    Ok(value) => return Ok(Some(value)),
                    Err(fallback_error) => {
                        self.record_error(
                            &format!("{step_name}:fallback"),
                            &fallback_error,
                            0,
                        );
                        return Err(primary_error);
                    }
                }
            }
        }

        if strategy.skip_on_error {
            warn!(
                "Skipping failed step '{}' per strategy: {}",
                step_name, primary_error
            );
            return Ok(None);
        }

        Err(primary_error)
    }

    /// Partition a batch outcome into successes and indexed failures,
    /// recording one ledger entry per failed item.
    #[inline]
    pub fn handle_partial_success<T>(
        &self,
        step_name: &str,
        results: Vec<Result<T>>,
    ) -> PartialOutcome<T> {
        let mut successful = Vec::new();
        let mut failed = Vec::new();

        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(value) => successful.push(value),
                Err(error) => {
                    self.record_error(&format!("{step_name}[{index}]"), &error, 0);
                    failed.push(FailedItem {
                        index,
                        error: error.to_string(),
                    });
                }
            }
        }

        let has_errors = !failed.is_empty();
        if has_errors {
            warn!(
                "Step '{}' finished with partial success: {} ok, {} failed",
                step_name,
                successful.len(),
                failed.len()
            );
        }

        PartialOutcome {
            successful,
            failed,
            has_errors,
        }
    }
}
