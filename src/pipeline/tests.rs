use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::*;
use crate::SyncError;
use crate::chunking::{ChunkingConfig, chunk_text};
use crate::services::{HashingEmbedder, MemoryVectorIndex};

/// Embedder that fails for chunks whose text contains a poison marker, and
/// otherwise delegates to the deterministic hashing embedder.
struct FlakyEmbedder {
    inner: HashingEmbedder,
    poison: String,
    calls: AtomicUsize,
}

impl FlakyEmbedder {
    fn new(poison: &str) -> Self {
        Self {
            inner: HashingEmbedder::new(8),
            poison: poison.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FlakyEmbedder {
    async fn embed(&self, text: &str, model: &str) -> crate::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains(&self.poison) {
            return Err(SyncError::ExternalService(
                "embedding model rejected input".to_string(),
            ));
        }
        self.inner.embed(text, model).await
    }
}

/// Index whose insert fails for ids in the deny set.
#[derive(Default)]
struct RejectingIndex {
    inner: MemoryVectorIndex,
    deny: Mutex<HashSet<String>>,
}

impl RejectingIndex {
    fn deny(&self, id: &str) {
        self.deny
            .lock()
            .expect("deny lock")
            .insert(id.to_string());
    }
}

#[async_trait]
impl VectorIndex for RejectingIndex {
    async fn insert(&self, records: &[VectorRecord]) -> crate::Result<()> {
        let rejected = {
            let denied = self.deny.lock().expect("deny lock");
            records.iter().any(|r| denied.contains(&r.id))
        };
        if rejected {
            return Err(SyncError::ServiceUnavailable(
                "index write rejected".to_string(),
            ));
        }
        self.inner.insert(records).await
    }

    async fn query(
        &self,
        vector: &[f32],
        opts: &crate::services::QueryOptions,
    ) -> crate::Result<Vec<crate::services::QueryMatch>> {
        self.inner.query(vector, opts).await
    }

    async fn get_by_ids(&self, namespace: &str, ids: &[String]) -> crate::Result<Vec<VectorRecord>> {
        self.inner.get_by_ids(namespace, ids).await
    }

    async fn delete_by_ids(&self, namespace: &str, ids: &[String]) -> crate::Result<usize> {
        self.inner.delete_by_ids(namespace, ids).await
    }
}

fn pipeline_with(
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    batch_size: usize,
) -> VectorPipeline {
    VectorPipeline::new(
        embedder,
        index,
        PipelineConfig {
            batch_size,
            ..PipelineConfig::default()
        },
    )
}

fn make_chunks(count: usize) -> Vec<TextChunk> {
    let text = "A sentence about indexing. ".repeat(count * 40);
    let config = ChunkingConfig {
        chunk_size: 1000,
        chunk_overlap: 0,
        ..ChunkingConfig::default()
    };
    let mut chunks = chunk_text(&text, Some("doc"), &config);
    chunks.truncate(count);
    chunks
}

#[tokio::test]
async fn all_chunks_vectorized_on_happy_path() {
    let index = Arc::new(MemoryVectorIndex::new());
    let pipeline = pipeline_with(
        Arc::new(HashingEmbedder::new(8)),
        Arc::<MemoryVectorIndex>::clone(&index),
        2,
    );
    let recovery = ErrorRecoveryManager::default();

    let chunks = make_chunks(5);
    let report = pipeline.vectorize(&chunks, "docs", &recovery).await;

    assert_eq!(report.total_vectors, 5);
    assert_eq!(report.failed_chunks, 0);
    assert_eq!(report.vector_ids.len(), 5);
    assert!((report.success_rate - 1.0).abs() < f64::EPSILON);
    assert_eq!(index.len(), 5);
}

#[tokio::test]
async fn empty_input_reports_zero_success_rate() {
    let pipeline = pipeline_with(
        Arc::new(HashingEmbedder::new(8)),
        Arc::new(MemoryVectorIndex::new()),
        4,
    );
    let recovery = ErrorRecoveryManager::default();

    let report = pipeline.vectorize(&[], "docs", &recovery).await;
    assert_eq!(report.total_vectors, 0);
    assert_eq!(report.failed_chunks, 0);
    assert_eq!(report.success_rate, 0.0);
}

#[tokio::test]
async fn embedding_failure_does_not_abort_the_batch() {
    let mut chunks = make_chunks(3);
    chunks[1].text.push_str(" POISON");

    let embedder = Arc::new(FlakyEmbedder::new("POISON"));
    let index = Arc::new(MemoryVectorIndex::new());
    let pipeline = pipeline_with(
        Arc::<FlakyEmbedder>::clone(&embedder),
        Arc::<MemoryVectorIndex>::clone(&index),
        8,
    );
    let recovery = ErrorRecoveryManager::default();

    let report = pipeline.vectorize(&chunks, "docs", &recovery).await;

    assert_eq!(report.total_vectors, 2);
    assert_eq!(report.failed_chunks, 1);
    assert_eq!(
        report.vector_ids,
        vec![chunks[0].id.clone(), chunks[2].id.clone()]
    );
    assert!((report.success_rate - 2.0 / 3.0).abs() < 1e-9);
    // Every chunk was attempted
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    // The failure landed in the recovery ledger
    assert_eq!(recovery.error_log().len(), 1);
}

#[tokio::test]
async fn persistence_failure_counts_as_failed_chunk() {
    let chunks = make_chunks(3);
    let index = Arc::new(RejectingIndex::default());
    index.deny(&chunks[0].id);

    let pipeline = pipeline_with(
        Arc::new(HashingEmbedder::new(8)),
        Arc::<RejectingIndex>::clone(&index),
        4,
    );
    let recovery = ErrorRecoveryManager::default();

    let report = pipeline.vectorize(&chunks, "docs", &recovery).await;

    assert_eq!(report.total_vectors, 2);
    assert_eq!(report.failed_chunks, 1);
    assert!(!report.vector_ids.contains(&chunks[0].id));
}

#[tokio::test]
async fn end_to_end_chunking_to_vectors() {
    // 2,400 characters at chunk_size 1000 / overlap 100 yields three chunks
    let word = "lorem ipsum dolor sit amet consectetur ";
    let mut text = word.repeat(62);
    text.truncate(2400);

    let config = ChunkingConfig {
        chunk_size: 1000,
        chunk_overlap: 100,
        ..ChunkingConfig::default()
    };
    let mut chunks = chunk_text(&text, Some("page-1"), &config);
    assert_eq!(chunks.len(), 3);

    // Force an embedding failure on the middle chunk
    chunks[1].text.push_str(" POISON");

    let pipeline = pipeline_with(
        Arc::new(FlakyEmbedder::new("POISON")),
        Arc::new(MemoryVectorIndex::new()),
        16,
    );
    let recovery = ErrorRecoveryManager::default();

    let report = pipeline.vectorize(&chunks, "pages", &recovery).await;

    assert_eq!(report.total_vectors, 2);
    assert_eq!(report.failed_chunks, 1);
    assert_eq!(
        report.vector_ids,
        vec![chunks[0].id.clone(), chunks[2].id.clone()]
    );
}

#[tokio::test]
async fn tripped_breaker_fails_remaining_chunks_fast() {
    let mut chunks = make_chunks(5);
    for chunk in &mut chunks {
        chunk.text.push_str(" POISON");
    }

    let embedder = Arc::new(FlakyEmbedder::new("POISON"));
    let pipeline = VectorPipeline::with_protection(
        Arc::<FlakyEmbedder>::clone(&embedder),
        Arc::new(MemoryVectorIndex::new()),
        PipelineConfig {
            batch_size: 8,
            ..PipelineConfig::default()
        },
        &crate::executor::RateLimitConfig::default(),
        &crate::executor::CircuitBreakerConfig {
            failure_threshold: 2,
            reset_timeout_ms: 60_000,
        },
    );
    let recovery = ErrorRecoveryManager::default();

    let report = pipeline.vectorize(&chunks, "docs", &recovery).await;

    assert_eq!(report.total_vectors, 0);
    assert_eq!(report.failed_chunks, 5);
    // Two failures trip the breaker; the rest are rejected without
    // reaching the embedder.
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn batch_size_is_clamped() {
    let config = PipelineConfig {
        batch_size: 0,
        ..PipelineConfig::default()
    };
    assert_eq!(config.effective_batch_size(), 16);

    let oversized = PipelineConfig {
        batch_size: 1000,
        max_batch_size: 64,
        ..PipelineConfig::default()
    };
    assert_eq!(oversized.effective_batch_size(), 64);
}
