use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::json;

use super::*;
use crate::SyncError;
use crate::jobs::JobKind;
use crate::services::{
    Block, HashingEmbedder, MemoryContentSource, MemoryVectorIndex, QueryMatch, QueryOptions,
    VectorRecord,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn seeded_source() -> MemoryContentSource {
    let source = MemoryContentSource::new();
    let mut properties = serde_json::Map::new();
    properties.insert("status".to_string(), json!("published"));
    properties.insert("owner".to_string(), json!("docs-team"));

    source.add_page(
        Page {
            id: "page-1".to_string(),
            title: "Team Handbook".to_string(),
            properties,
        },
        vec![
            Block {
                id: "block-1".to_string(),
                text: "Welcome to the team handbook. It covers onboarding.".to_string(),
                kind: "paragraph".to_string(),
            },
            Block {
                id: "block-2".to_string(),
                text: "Escalation paths are described in the runbook section.".to_string(),
                kind: "paragraph".to_string(),
            },
        ],
    );
    source
}

fn engine_with(source: Arc<dyn ContentSource>, index: Arc<dyn VectorIndex>) -> SyncEngine {
    SyncEngine::new(
        Config::default(),
        source,
        Arc::new(HashingEmbedder::new(8)),
        index,
    )
}

/// Content source that fails `failures` fetches before succeeding.
struct FlakySource {
    inner: MemoryContentSource,
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl ContentSource for FlakySource {
    async fn fetch_page(&self, page_id: &str) -> crate::Result<Option<Page>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(SyncError::ServiceUnavailable(
                "content api briefly down".to_string(),
            ));
        }
        self.inner.fetch_page(page_id).await
    }

    async fn fetch_blocks(&self, page_id: &str) -> crate::Result<Vec<Block>> {
        self.inner.fetch_blocks(page_id).await
    }

    async fn search(&self, query: &str) -> crate::Result<Vec<Page>> {
        self.inner.search(query).await
    }
}

/// Index whose deletes always fail.
#[derive(Default)]
struct BrokenDeleteIndex {
    inner: MemoryVectorIndex,
}

#[async_trait]
impl VectorIndex for BrokenDeleteIndex {
    async fn insert(&self, records: &[VectorRecord]) -> crate::Result<()> {
        self.inner.insert(records).await
    }

    async fn query(&self, vector: &[f32], opts: &QueryOptions) -> crate::Result<Vec<QueryMatch>> {
        self.inner.query(vector, opts).await
    }

    async fn get_by_ids(&self, namespace: &str, ids: &[String]) -> crate::Result<Vec<VectorRecord>> {
        self.inner.get_by_ids(namespace, ids).await
    }

    async fn delete_by_ids(&self, _namespace: &str, _ids: &[String]) -> crate::Result<usize> {
        Err(SyncError::ServiceUnavailable("index is read-only".to_string()))
    }
}

#[tokio::test]
async fn sync_page_completes_and_persists_vectors() {
    init_tracing();
    let index = Arc::new(MemoryVectorIndex::new());
    let engine = engine_with(
        Arc::new(seeded_source()),
        Arc::<MemoryVectorIndex>::clone(&index),
    );

    let job_id = engine.sync_page("page-1", "workspace", true, true).await;

    let job = engine.registry().get(job_id).expect("job exists");
    assert_eq!(job.kind(), JobKind::Sync);
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.completed_at.is_some());
    assert!(job.error.is_none());

    let result = job.result.expect("job result");
    assert_eq!(result["page_id"], "page-1");
    assert_eq!(result["blocks_processed"], 2);
    assert_eq!(result["properties_processed"], 2);
    assert!(result["vectors_created"].as_u64().expect("count") > 0);
    assert!(!index.is_empty());
}

#[tokio::test]
async fn sync_page_without_blocks_skips_block_vectors() {
    let index = Arc::new(MemoryVectorIndex::new());
    let engine = engine_with(
        Arc::new(seeded_source()),
        Arc::<MemoryVectorIndex>::clone(&index),
    );

    let job_id = engine.sync_page("page-1", "workspace", true, false).await;

    let job = engine.registry().get(job_id).expect("job exists");
    assert_eq!(job.status, JobStatus::Completed);
    let result = job.result.expect("job result");
    assert_eq!(result["blocks_processed"], 0);
    // Only the property text was vectorized
    assert_eq!(index.len(), result["vectors_created"].as_u64().expect("count") as usize);
}

#[tokio::test]
async fn missing_page_fails_the_job() {
    let engine = engine_with(Arc::new(seeded_source()), Arc::new(MemoryVectorIndex::new()));

    let job_id = engine.sync_page("no-such-page", "workspace", true, true).await;

    let job = engine.registry().get(job_id).expect("job exists");
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.completed_at.is_some());
    assert!(job.error.expect("error").contains("does not exist"));
}

#[tokio::test(start_paused = true)]
async fn transient_fetch_failures_are_retried() {
    let source = FlakySource {
        inner: seeded_source(),
        failures: 2,
        calls: AtomicUsize::new(0),
    };
    let engine = engine_with(Arc::new(source), Arc::new(MemoryVectorIndex::new()));

    let job_id = engine.sync_page("page-1", "workspace", true, true).await;

    let job = engine.registry().get(job_id).expect("job exists");
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn exhausted_fetch_retries_fail_the_job() {
    let source = FlakySource {
        inner: seeded_source(),
        failures: usize::MAX,
        calls: AtomicUsize::new(0),
    };
    let engine = engine_with(Arc::new(source), Arc::new(MemoryVectorIndex::new()));

    let job_id = engine.sync_page("page-1", "workspace", true, true).await;

    let job = engine.registry().get(job_id).expect("job exists");
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.expect("error").contains("fetch_page"));
}

#[tokio::test]
async fn bulk_sync_tolerates_per_page_failure() {
    let engine = engine_with(Arc::new(seeded_source()), Arc::new(MemoryVectorIndex::new()));

    let pages = vec!["page-1".to_string(), "missing-page".to_string()];
    let job_id = engine.bulk_sync(&pages, "workspace").await;

    let job = engine.registry().get(job_id).expect("job exists");
    assert_eq!(job.kind(), JobKind::BulkSync);
    assert_eq!(job.status, JobStatus::Completed);

    let result = job.result.expect("job result");
    assert_eq!(result["pages_synced"], 1);
    assert_eq!(result["pages_failed"], 1);
    assert_eq!(result["failures"][0]["page_id"], "missing-page");
    assert!(result["total_vectors"].as_u64().expect("count") > 0);
}

#[tokio::test]
async fn bulk_sync_fails_when_every_page_fails() {
    let engine = engine_with(Arc::new(seeded_source()), Arc::new(MemoryVectorIndex::new()));

    let pages = vec!["missing-1".to_string(), "missing-2".to_string()];
    let job_id = engine.bulk_sync(&pages, "workspace").await;

    let job = engine.registry().get(job_id).expect("job exists");
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.expect("error").contains("all 2 pages"));
    let result = job.result.expect("job result");
    assert_eq!(result["pages_synced"], 0);
    assert_eq!(result["pages_failed"], 2);
}

#[tokio::test]
async fn empty_bulk_sync_completes() {
    let engine = engine_with(Arc::new(seeded_source()), Arc::new(MemoryVectorIndex::new()));

    let job_id = engine.bulk_sync(&[], "workspace").await;

    let job = engine.registry().get(job_id).expect("job exists");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result.expect("job result")["pages_synced"], 0);
}

#[tokio::test]
async fn create_document_chunks_and_persists() {
    let index = Arc::new(MemoryVectorIndex::new());
    let engine = engine_with(
        Arc::new(MemoryContentSource::new()),
        Arc::<MemoryVectorIndex>::clone(&index),
    );

    let text = "An architecture overview. ".repeat(100);
    let job_id = engine.create_document("doc-1", &text, "docs").await;

    let job = engine.registry().get(job_id).expect("job exists");
    assert_eq!(job.kind(), JobKind::Create);
    assert_eq!(job.status, JobStatus::Completed);

    let result = job.result.expect("job result");
    let total = result["total_vectors"].as_u64().expect("count") as usize;
    assert!(total > 0);
    assert_eq!(index.len(), total);
}

#[tokio::test]
async fn create_document_with_blank_text_completes_empty() {
    let engine = engine_with(
        Arc::new(MemoryContentSource::new()),
        Arc::new(MemoryVectorIndex::new()),
    );

    let job_id = engine.create_document("doc-1", "   \n  ", "docs").await;

    let job = engine.registry().get(job_id).expect("job exists");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result.expect("job result")["total_vectors"], 0);
}

#[tokio::test]
async fn delete_document_removes_vectors() {
    let index = Arc::new(MemoryVectorIndex::new());
    index
        .insert(&[
            VectorRecord {
                id: "v-1".to_string(),
                values: vec![1.0],
                namespace: "docs".to_string(),
                metadata: json!({}),
            },
            VectorRecord {
                id: "v-2".to_string(),
                values: vec![1.0],
                namespace: "docs".to_string(),
                metadata: json!({}),
            },
        ])
        .await
        .expect("seed index");

    let engine = engine_with(
        Arc::new(MemoryContentSource::new()),
        Arc::<MemoryVectorIndex>::clone(&index),
    );

    let ids = vec!["v-1".to_string(), "v-2".to_string(), "v-3".to_string()];
    let job_id = engine.delete_document("doc-1", "docs", &ids).await;

    let job = engine.registry().get(job_id).expect("job exists");
    assert_eq!(job.kind(), JobKind::Delete);
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result.expect("job result")["vectors_deleted"], 2);
    assert!(index.is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_delete_marks_the_job_failed() {
    let engine = engine_with(
        Arc::new(MemoryContentSource::new()),
        Arc::new(BrokenDeleteIndex::default()),
    );

    let job_id = engine
        .delete_document("doc-1", "docs", &["v-1".to_string()])
        .await;

    let job = engine.registry().get(job_id).expect("job exists");
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.expect("error").contains("read-only"));
    // Each attempt landed in the recovery ledger
    assert_eq!(engine.recovery().error_log().len(), 3);
}

#[tokio::test]
async fn cleanup_uses_configured_age() {
    let engine = engine_with(
        Arc::new(MemoryContentSource::new()),
        Arc::new(MemoryVectorIndex::new()),
    );

    engine.create_document("doc-1", "short text", "docs").await;
    // Fresh jobs are younger than the cleanup age
    assert_eq!(engine.cleanup_jobs().await, 0);
    assert_eq!(engine.registry().list_all().len(), 1);
}

#[tokio::test]
async fn cleanup_purges_checkpoints_of_removed_jobs() {
    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let engine = SyncEngine::with_checkpoints(
        Config::default(),
        Arc::new(seeded_source()),
        Arc::new(HashingEmbedder::new(8)),
        Arc::new(MemoryVectorIndex::new()),
        Arc::<MemoryCheckpointStore>::clone(&checkpoints),
    );

    let sync_job = engine.sync_page("page-1", "workspace", true, true).await;
    let bulk_job = engine
        .bulk_sync(&["page-1".to_string()], "workspace")
        .await;
    // Both job kinds left step checkpoints behind
    assert!(!checkpoints.is_empty());

    engine.registry().backdate(sync_job, 25);
    engine.registry().backdate(bulk_job, 25);

    assert_eq!(engine.cleanup_jobs().await, 2);
    assert!(engine.registry().get(sync_job).is_none());
    assert!(engine.registry().get(bulk_job).is_none());
    // The per-page scoped entries from the bulk job are gone too
    assert!(checkpoints.is_empty());
}
