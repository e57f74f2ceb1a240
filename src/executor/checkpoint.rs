use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::{Result, SyncError};

/// Durable step-result log keyed by `(job_id, step_name)`.
///
/// Records are append-only: the first successful result for a key wins and
/// later writes for the same key are ignored. This is the contract that
/// makes step replay idempotent; a step recorded complete is never
/// re-executed for the same job instance.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Fetch the recorded result for a step, if any.
    async fn get(&self, job_id: &str, step_name: &str) -> Result<Option<Value>>;

    /// Record a step result. Must be a no-op if a result already exists.
    async fn put(&self, job_id: &str, step_name: &str, value: Value) -> Result<()>;

    /// Remove every result recorded for the job, including entries scoped
    /// under it as `"{job_id}/suffix"`. Returns the number removed.
    async fn remove_job(&self, job_id: &str) -> Result<usize>;
}

/// Run `f` at most once per `(job_id, step_name)`.
///
/// A previously recorded result is deserialized and returned without
/// invoking `f`; otherwise `f` runs and its successful result is recorded
/// before being returned. Failures are never recorded, so a failed step is
/// re-attempted on replay.
#[inline]
pub async fn run_once<S, F, Fut, T>(store: &S, job_id: &str, step_name: &str, f: F) -> Result<T>
where
    S: CheckpointStore + ?Sized,
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if let Some(recorded) = store.get(job_id, step_name).await? {
        debug!("Replaying recorded result for step '{}' of job {}", step_name, job_id);
        return serde_json::from_value(recorded).map_err(|e| {
            SyncError::Workflow(format!(
                "recorded result for step '{step_name}' could not be decoded: {e}"
            ))
        });
    }

    let result = f().await?;

    let value = serde_json::to_value(&result).map_err(|e| {
        SyncError::Workflow(format!("result for step '{step_name}' could not be encoded: {e}"))
    })?;
    store.put(job_id, step_name, value).await?;

    Ok(result)
}

/// In-memory checkpoint log. Suitable for tests and single-process runs;
/// durability across process restarts requires a persistent implementation.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    log: Mutex<HashMap<(String, String), Value>>,
}

impl MemoryCheckpointStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded step results.
    #[inline]
    pub fn len(&self) -> usize {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, job_id: &str, step_name: &str) -> Result<Option<Value>> {
        Ok(self
            .log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(job_id.to_string(), step_name.to_string()))
            .cloned())
    }

    async fn put(&self, job_id: &str, step_name: &str, value: Value) -> Result<()> {
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.entry((job_id.to_string(), step_name.to_string()))
            .or_insert(value);
        Ok(())
    }

    async fn remove_job(&self, job_id: &str) -> Result<usize> {
        let scope_prefix = format!("{job_id}/");
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        let before = log.len();
        log.retain(|(owner, _), _| owner.as_str() != job_id && !owner.starts_with(&scope_prefix));
        let removed = before - log.len();
        debug!("Removed {} checkpoint entries for job {}", removed, job_id);
        Ok(removed)
    }
}
