// Sync engine facade
// Wires the registry, recovery manager, step executor, state machine, and
// vector pipeline together. Every entry point allocates a job, drives the
// work to a terminal status, and leaves the outcome in the registry; no
// error escapes past the job record.

#[cfg(test)]
mod tests;

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunking::chunk_text;
use crate::config::Config;
use crate::executor::{
    CheckpointStore, MemoryCheckpointStore, RetryOptions, StepExecutor, StepOptions,
};
use crate::jobs::{JobPayload, JobRegistry, JobStatus, JobUpdate};
use crate::pipeline::{VectorPipeline, VectorReport};
use crate::recovery::ErrorRecoveryManager;
use crate::services::{ContentSource, EmbeddingProvider, Page, VectorIndex};
use crate::Result;
use crate::sync::{PhaseOutcome, SyncContext, SyncStateMachine, SyncSummary};

/// Facade over the whole sync subsystem.
///
/// Owns the job registry, the recovery ledger, and the checkpoint store;
/// external services come in as trait handles. Entry points mirror the job
/// kinds and always return the job id, with success or failure recorded on
/// the job itself.
pub struct SyncEngine {
    config: Config,
    registry: Arc<JobRegistry>,
    recovery: Arc<ErrorRecoveryManager>,
    checkpoints: Arc<dyn CheckpointStore>,
    source: Arc<dyn ContentSource>,
    index: Arc<dyn VectorIndex>,
    pipeline: VectorPipeline,
}

impl SyncEngine {
    /// Build an engine backed by an in-process checkpoint log. Replay
    /// protection then lasts for the engine's lifetime only; use
    /// [`SyncEngine::with_checkpoints`] to supply a durable store.
    #[inline]
    pub fn new(
        config: Config,
        source: Arc<dyn ContentSource>,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self::with_checkpoints(
            config,
            source,
            embedder,
            index,
            Arc::new(MemoryCheckpointStore::new()),
        )
    }

    /// Build an engine whose step results are recorded in the supplied
    /// checkpoint store.
    #[inline]
    pub fn with_checkpoints(
        config: Config,
        source: Arc<dyn ContentSource>,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        let pipeline = VectorPipeline::with_protection(
            Arc::clone(&embedder),
            Arc::clone(&index),
            config.pipeline.clone(),
            &config.rate_limit,
            &config.circuit_breaker,
        );
        let recovery = Arc::new(ErrorRecoveryManager::new(config.retry.strategy.clone()));

        Self {
            registry: Arc::new(JobRegistry::new()),
            recovery,
            checkpoints,
            source,
            index,
            pipeline,
            config,
        }
    }

    #[inline]
    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    #[inline]
    pub fn recovery(&self) -> &ErrorRecoveryManager {
        &self.recovery
    }

    /// Sync a single page into the vector index.
    #[inline]
    pub async fn sync_page(
        &self,
        page_id: &str,
        namespace: &str,
        include_properties: bool,
        include_blocks: bool,
    ) -> Uuid {
        let job_id = self.registry.create(JobPayload::Sync {
            page_id: page_id.to_string(),
            namespace: namespace.to_string(),
            include_properties,
            include_blocks,
        });
        self.mark(job_id, JobStatus::Processing, JobUpdate::default());

        let scope = job_id.to_string();
        match self
            .run_page_sync(&scope, page_id, namespace, include_properties, include_blocks)
            .await
        {
            Ok(summary) => {
                info!(
                    "Sync job {} completed: {} vectors for page {}",
                    job_id, summary.vectors_created, page_id
                );
                self.mark(
                    job_id,
                    JobStatus::Completed,
                    JobUpdate {
                        result: serde_json::to_value(&summary).ok(),
                        ..JobUpdate::default()
                    },
                );
            }
            Err(error) => {
                warn!("Sync job {} failed for page {}: {}", job_id, page_id, error);
                self.mark(
                    job_id,
                    JobStatus::Failed,
                    JobUpdate {
                        error: Some(error.to_string()),
                        ..JobUpdate::default()
                    },
                );
            }
        }

        job_id
    }

    /// Sync many pages, tolerating per-page failure. The job fails only
    /// when pages were requested and every one of them failed.
    #[inline]
    pub async fn bulk_sync(&self, page_ids: &[String], namespace: &str) -> Uuid {
        let job_id = self.registry.create(JobPayload::BulkSync {
            page_ids: page_ids.to_vec(),
            namespace: namespace.to_string(),
        });
        self.mark(job_id, JobStatus::Processing, JobUpdate::default());

        let mut results: Vec<Result<SyncSummary>> = Vec::with_capacity(page_ids.len());
        for page_id in page_ids {
            let scope = format!("{job_id}/{page_id}");
            results.push(
                self.run_page_sync(&scope, page_id, namespace, true, true)
                    .await,
            );
        }

        let outcome = self.recovery.handle_partial_success("bulk_sync", results);
        let total_vectors: usize = outcome.successful.iter().map(|s| s.vectors_created).sum();
        let failures: Vec<Value> = outcome
            .failed
            .iter()
            .map(|f| json!({ "page_id": page_ids.get(f.index), "error": f.error }))
            .collect();

        let result = json!({
            "pages_synced": outcome.successful.len(),
            "pages_failed": outcome.failed.len(),
            "total_vectors": total_vectors,
            "failures": failures,
        });

        let all_failed =
            !page_ids.is_empty() && outcome.successful.is_empty() && outcome.has_errors;
        if all_failed {
            self.mark(
                job_id,
                JobStatus::Failed,
                JobUpdate {
                    error: Some(format!("all {} pages failed to sync", page_ids.len())),
                    result: Some(result),
                },
            );
        } else {
            info!(
                "Bulk sync job {} completed: {}/{} pages, {} vectors",
                job_id,
                outcome.successful.len(),
                page_ids.len(),
                total_vectors
            );
            self.mark(
                job_id,
                JobStatus::Completed,
                JobUpdate {
                    result: Some(result),
                    ..JobUpdate::default()
                },
            );
        }

        job_id
    }

    /// Ingest a raw document: chunk its text, embed, and persist.
    #[inline]
    pub async fn create_document(&self, document_id: &str, text: &str, namespace: &str) -> Uuid {
        let job_id = self.registry.create(JobPayload::Create {
            document_id: document_id.to_string(),
            text: text.to_string(),
            namespace: namespace.to_string(),
        });
        self.mark(job_id, JobStatus::Processing, JobUpdate::default());

        let chunks = chunk_text(text, Some(document_id), &self.config.chunking);
        let report = self
            .pipeline
            .vectorize(&chunks, namespace, &self.recovery)
            .await;

        self.finish_with_report(job_id, report);
        job_id
    }

    /// Remove a document's vectors from the index.
    #[inline]
    pub async fn delete_document(
        &self,
        document_id: &str,
        namespace: &str,
        vector_ids: &[String],
    ) -> Uuid {
        let job_id = self.registry.create(JobPayload::Delete {
            document_id: document_id.to_string(),
            namespace: namespace.to_string(),
            vector_ids: vector_ids.to_vec(),
        });
        self.mark(job_id, JobStatus::Processing, JobUpdate::default());

        let outcome = self
            .recovery
            .execute_with_retry("delete_document", || {
                self.index.delete_by_ids(namespace, vector_ids)
            })
            .await;

        match outcome {
            Ok(removed) => {
                info!(
                    "Delete job {} removed {} vectors for document {}",
                    job_id, removed, document_id
                );
                self.mark(
                    job_id,
                    JobStatus::Completed,
                    JobUpdate {
                        result: Some(json!({ "vectors_deleted": removed })),
                        ..JobUpdate::default()
                    },
                );
            }
            Err(error) => {
                warn!("Delete job {} failed: {}", job_id, error);
                self.mark(
                    job_id,
                    JobStatus::Failed,
                    JobUpdate {
                        error: Some(error.to_string()),
                        ..JobUpdate::default()
                    },
                );
            }
        }

        job_id
    }

    /// Remove finished jobs older than the configured cleanup age, along
    /// with the checkpoints recorded under them.
    #[inline]
    pub async fn cleanup_jobs(&self) -> usize {
        let removed = self.registry.cleanup(self.config.jobs.cleanup_age_hours);
        for job_id in &removed {
            let scope = job_id.to_string();
            if let Err(error) = self.checkpoints.remove_job(&scope).await {
                warn!("Failed to remove checkpoints for job {}: {}", job_id, error);
            }
        }
        removed.len()
    }

    /// Drive one page through the sync state machine. Fetches run as
    /// checkpointed, retried steps scoped to `scope`; vectorization failures
    /// are tolerated per chunk by the pipeline.
    async fn run_page_sync(
        &self,
        scope: &str,
        page_id: &str,
        namespace: &str,
        include_properties: bool,
        include_blocks: bool,
    ) -> Result<SyncSummary> {
        let executor = StepExecutor::new(scope, Arc::clone(&self.checkpoints));
        let mut machine = SyncStateMachine::new(
            SyncContext::new(page_id, namespace).with_includes(include_properties, include_blocks),
        );

        machine.initialize()?;

        let page = machine
            .fetch_page(|| async {
                let step = executor
                    .execute(
                        "fetch_page",
                        || self.source.fetch_page(page_id),
                        self.step_options(),
                    )
                    .await?;
                Ok(step.data.flatten())
            })
            .await?;

        machine
            .process_properties(|| async {
                let text = property_text(&page);
                if text.trim().is_empty() {
                    return Ok(PhaseOutcome::default());
                }
                let source = format!("{page_id}#properties");
                let chunks = chunk_text(&text, Some(&source), &self.config.chunking);
                let report = self
                    .pipeline
                    .vectorize(&chunks, namespace, &self.recovery)
                    .await;
                Ok(PhaseOutcome {
                    items_processed: page.properties.len(),
                    vectors_created: report.total_vectors,
                })
            })
            .await?;

        machine
            .process_blocks(|| async {
                let step = executor
                    .execute(
                        "fetch_blocks",
                        || self.source.fetch_blocks(page_id),
                        self.step_options(),
                    )
                    .await?;
                let blocks = step.data.unwrap_or_default();

                let text = blocks
                    .iter()
                    .map(|b| b.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n");
                let chunks = chunk_text(&text, Some(page_id), &self.config.chunking);
                let report = self
                    .pipeline
                    .vectorize(&chunks, namespace, &self.recovery)
                    .await;
                Ok(PhaseOutcome {
                    items_processed: blocks.len(),
                    vectors_created: report.total_vectors,
                })
            })
            .await?;

        machine.complete()
    }

    fn step_options(&self) -> StepOptions {
        StepOptions {
            retry: Some(RetryOptions {
                max_attempts: self.config.retry.strategy.max_retries,
                backoff: self.config.retry.backoff.clone(),
                on_retry: None,
            }),
            ..StepOptions::default()
        }
    }

    fn finish_with_report(&self, job_id: Uuid, report: VectorReport) {
        let result = serde_json::to_value(&report).ok();
        let total_failed = report.failed_chunks > 0 && report.total_vectors == 0;

        if total_failed {
            self.mark(
                job_id,
                JobStatus::Failed,
                JobUpdate {
                    error: Some(format!("all {} chunks failed", report.failed_chunks)),
                    result,
                },
            );
        } else {
            info!(
                "Job {} completed with {} vectors ({} chunk failures)",
                job_id, report.total_vectors, report.failed_chunks
            );
            self.mark(
                job_id,
                JobStatus::Completed,
                JobUpdate {
                    result,
                    ..JobUpdate::default()
                },
            );
        }
    }

    /// Registry updates for jobs the engine just created cannot miss; a
    /// failure here still must not escape past the job boundary.
    fn mark(&self, job_id: Uuid, status: JobStatus, update: JobUpdate) {
        if let Err(error) = self.registry.update_status(job_id, status, update) {
            warn!("Failed to update job {}: {}", job_id, error);
        }
    }
}

/// Flatten a page's title and properties into embeddable text.
fn property_text(page: &Page) -> String {
    let mut lines = vec![format!("title: {}", page.title)];
    for (key, value) in &page.properties {
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        lines.push(format!("{key}: {rendered}"));
    }
    lines.join("\n")
}
