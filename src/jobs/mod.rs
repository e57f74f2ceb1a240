// Job registry module
// Directory of in-flight and completed jobs. All mutation goes through the
// registry's methods; external callers only ever observe snapshots.


use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::{Result, SyncError};
use uuid::Uuid;

/// Discriminant of a job's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Create,
    Delete,
    Sync,
    BulkSync,
}

/// Strongly-typed payload per job kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    /// Ingest a raw document: chunk, embed, persist.
    Create {
        document_id: String,
        text: String,
        namespace: String,
    },
    /// Remove a document's vectors from the index.
    Delete {
        document_id: String,
        namespace: String,
        vector_ids: Vec<String>,
    },
    /// Synchronize one page from the content source.
    Sync {
        page_id: String,
        namespace: String,
        include_properties: bool,
        include_blocks: bool,
    },
    /// Synchronize many pages, tolerating per-page failure.
    BulkSync {
        page_ids: Vec<String>,
        namespace: String,
    },
}

impl JobPayload {
    #[inline]
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Create { .. } => JobKind::Create,
            JobPayload::Delete { .. } => JobKind::Delete,
            JobPayload::Sync { .. } => JobKind::Sync,
            JobPayload::BulkSync { .. } => JobKind::BulkSync,
        }
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Whether this status ends the job's lifecycle.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// A tracked asynchronous unit of execution.
///
/// `completed_at` is set exactly when the status is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result: Option<Value>,
}

impl Job {
    #[inline]
    pub fn kind(&self) -> JobKind {
        self.payload.kind()
    }
}

/// Fields applied alongside a status change.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub error: Option<String>,
    pub result: Option<Value>,
}

/// Actor-owned directory of jobs.
///
/// The map lives behind a mutex; every mutation goes through a registry
/// method, so concurrent readers only ever see consistent snapshots.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl JobRegistry {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new pending job and return its id.
    #[inline]
    pub fn create(&self, payload: JobPayload) -> Uuid {
        let job = Job {
            id: Uuid::new_v4(),
            payload,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
            result: None,
        };
        let id = job.id;
        debug!("Created {:?} job {}", job.kind(), id);
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, job);
        id
    }

    /// Change a job's status, applying any error/result updates. Sets or
    /// clears `completed_at` so it is present exactly for terminal states.
    #[inline]
    pub fn update_status(&self, job_id: Uuid, status: JobStatus, update: JobUpdate) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| SyncError::NotFound(format!("job {job_id} does not exist")))?;

        job.status = status;
        job.completed_at = status.is_terminal().then(Utc::now);
        if let Some(error) = update.error {
            job.error = Some(error);
        }
        if let Some(result) = update.result {
            job.result = Some(result);
        }

        debug!("Job {} moved to {:?}", job_id, status);
        Ok(())
    }

    #[inline]
    pub fn get(&self, job_id: Uuid) -> Option<Job> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&job_id)
            .cloned()
    }

    /// All jobs, newest first.
    #[inline]
    pub fn list_all(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Jobs whose status is not terminal.
    #[inline]
    pub fn list_active(&self) -> Vec<Job> {
        self.list_all()
            .into_iter()
            .filter(|j| !j.status.is_terminal())
            .collect()
    }

    /// Remove completed/failed jobs older than the cutoff, returning the
    /// ids of the removed jobs so callers can release per-job state of
    /// their own. Jobs still processing are never removed, regardless of
    /// age; cancelled jobs are kept for inspection.
    #[inline]
    pub fn cleanup(&self, older_than_hours: i64) -> Vec<Uuid> {
        let cutoff = Utc::now() - Duration::hours(older_than_hours);
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);

        let expired: Vec<Uuid> = jobs
            .values()
            .filter(|job| {
                job.created_at < cutoff
                    && matches!(job.status, JobStatus::Completed | JobStatus::Failed)
            })
            .map(|job| job.id)
            .collect();

        for id in &expired {
            jobs.remove(id);
        }

        if !expired.is_empty() {
            info!(
                "Cleaned up {} finished jobs older than {}h",
                expired.len(),
                older_than_hours
            );
        }
        expired
    }

    /// Shift a job's creation time into the past to exercise age cutoffs.
    #[cfg(test)]
    pub(crate) fn backdate(&self, job_id: Uuid, hours: i64) {
        if let Some(job) = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&job_id)
        {
            job.created_at -= Duration::hours(hours);
        }
    }
}
