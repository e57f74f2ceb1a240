// Vector generation pipeline
// Batches chunks, requests embeddings concurrently within each batch, and
// persists vectors while tolerating per-chunk failure.

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::Result;
use crate::chunking::TextChunk;
use crate::executor::{CircuitBreaker, CircuitBreakerConfig, RateLimitConfig, RateLimiter};
use crate::recovery::ErrorRecoveryManager;
use crate::services::{EmbeddingProvider, VectorIndex, VectorRecord};

/// Configuration for the vector generation pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Chunks embedded concurrently per batch. Clamped to
    /// `[1, max_batch_size]`; zero falls back to the default.
    pub batch_size: usize,
    pub max_batch_size: usize,
    /// Pause between batches to respect downstream rate limits. Zero
    /// disables the pause.
    pub inter_batch_delay_ms: u64,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
}

impl Default for PipelineConfig {
    #[inline]
    fn default() -> Self {
        Self {
            batch_size: 16,
            max_batch_size: 64,
            inter_batch_delay_ms: 0,
            embedding_model: "nomic-embed-text".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Batch size after defaulting and clamping.
    #[inline]
    pub fn effective_batch_size(&self) -> usize {
        let size = if self.batch_size == 0 {
            Self::default().batch_size
        } else {
            self.batch_size
        };
        size.clamp(1, self.max_batch_size.max(1))
    }
}

/// Aggregated outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorReport {
    pub total_vectors: usize,
    pub failed_chunks: usize,
    pub vector_ids: Vec<String>,
    /// `successful / (successful + failed)`, 0 when nothing was attempted.
    pub success_rate: f64,
}

impl VectorReport {
    fn from_counts(vector_ids: Vec<String>, failed_chunks: usize) -> Self {
        let total_vectors = vector_ids.len();
        let attempted = total_vectors + failed_chunks;
        let success_rate = if attempted == 0 {
            0.0
        } else {
            total_vectors as f64 / attempted as f64
        };
        Self {
            total_vectors,
            failed_chunks,
            vector_ids,
            success_rate,
        }
    }
}

/// Turns chunks into persisted vectors.
///
/// Batches run sequentially; the chunks inside one batch are embedded and
/// persisted concurrently. A chunk failure is counted and excluded from the
/// ids without aborting the batch, and a whole-batch failure counts every
/// chunk in that batch as failed rather than aborting the run.
pub struct VectorPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    config: PipelineConfig,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
}

impl VectorPipeline {
    #[inline]
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        config: PipelineConfig,
    ) -> Self {
        Self::with_protection(
            embedder,
            index,
            config,
            &RateLimitConfig::default(),
            &CircuitBreakerConfig::default(),
        )
    }

    /// Build a pipeline whose embedding calls run through an explicitly
    /// configured rate limiter and circuit breaker.
    #[inline]
    pub fn with_protection(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        config: PipelineConfig,
        rate_limit: &RateLimitConfig,
        breaker: &CircuitBreakerConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            config,
            limiter: RateLimiter::new(rate_limit),
            breaker: CircuitBreaker::new("embedding", breaker.clone()),
        }
    }

    /// Vectorize `chunks` into `namespace`, reporting per-chunk failures to
    /// the recovery manager's ledger.
    #[inline]
    pub async fn vectorize(
        &self,
        chunks: &[TextChunk],
        namespace: &str,
        recovery: &ErrorRecoveryManager,
    ) -> VectorReport {
        if chunks.is_empty() {
            return VectorReport::from_counts(Vec::new(), 0);
        }

        let batch_size = self.config.effective_batch_size();
        let batch_count = chunks.len().div_ceil(batch_size);
        info!(
            "Vectorizing {} chunks into namespace '{}' ({} batches of up to {})",
            chunks.len(),
            namespace,
            batch_count,
            batch_size
        );

        let mut vector_ids = Vec::new();
        let mut failed_chunks = 0usize;

        for (batch_index, batch) in chunks.chunks(batch_size).enumerate() {
            if batch_index > 0 && self.config.inter_batch_delay_ms > 0 {
                sleep(Duration::from_millis(self.config.inter_batch_delay_ms)).await;
            }

            match self.process_batch(batch, namespace).await {
                Ok(results) => {
                    let outcome = recovery
                        .handle_partial_success(&format!("vectorize_batch_{batch_index}"), results);
                    failed_chunks += outcome.failed.len();
                    vector_ids.extend(outcome.successful);
                }
                Err(error) => {
                    // A batch failure never aborts the job: every chunk in
                    // the batch counts as failed and the run continues.
                    warn!(
                        "Batch {} failed wholesale ({} chunks): {}",
                        batch_index,
                        batch.len(),
                        error
                    );
                    recovery.record_error(&format!("vectorize_batch_{batch_index}"), &error, 0);
                    failed_chunks += batch.len();
                }
            }

            debug!(
                "Batch {}/{} complete ({} vectors so far, {} failures)",
                batch_index + 1,
                batch_count,
                vector_ids.len(),
                failed_chunks
            );
        }

        let report = VectorReport::from_counts(vector_ids, failed_chunks);
        info!(
            "Vectorization finished: {} vectors, {} failed chunks, success rate {:.2}",
            report.total_vectors, report.failed_chunks, report.success_rate
        );
        report
    }

    /// Embed and persist every chunk in the batch concurrently. Each chunk
    /// resolves to its vector id or its own error.
    async fn process_batch(
        &self,
        batch: &[TextChunk],
        namespace: &str,
    ) -> Result<Vec<Result<String>>> {
        let tasks = batch.iter().map(|chunk| self.process_chunk(chunk, namespace));
        Ok(join_all(tasks).await)
    }

    async fn process_chunk(&self, chunk: &TextChunk, namespace: &str) -> Result<String> {
        // Embedding calls share the limiter's slots and the breaker's state
        // across the whole batch.
        let values = self
            .limiter
            .run(|| {
                self.breaker
                    .call(|| self.embedder.embed(&chunk.text, &self.config.embedding_model))
            })
            .await?;

        let record = VectorRecord {
            id: chunk.id.clone(),
            values,
            namespace: namespace.to_string(),
            metadata: json!({
                "chunk_index": chunk.index,
                "start_offset": chunk.start_offset,
                "end_offset": chunk.end_offset,
                "source": chunk.metadata.source,
                "position": chunk.metadata.position,
            }),
        };

        self.index.insert(std::slice::from_ref(&record)).await?;
        Ok(record.id)
    }
}
