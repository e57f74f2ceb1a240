// In-memory collaborator implementations
// Used for tests, benches, and local development wiring; production callers
// supply their own trait implementations.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use super::{
    Block, ContentSource, EmbeddingProvider, Page, QueryMatch, QueryOptions, VectorIndex,
    VectorRecord,
};
use crate::Result;

/// Deterministic embedding provider that derives a vector from the text's
/// bytes. Embeddings are stable across calls, which makes pipeline results
/// reproducible in tests.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for HashingEmbedder {
    #[inline]
    fn default() -> Self {
        Self { dimension: 64 }
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str, _model: &str) -> Result<Vec<f32>> {
        let mut values = vec![0.0f32; self.dimension];
        for (i, byte) in text.bytes().enumerate() {
            values[i % self.dimension] += f32::from(byte) / 255.0;
        }
        // Normalize so dot products behave like cosine similarity
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut values {
                *v /= norm;
            }
        }
        Ok(values)
    }
}

/// In-memory vector index keyed by `(namespace, id)`.
#[derive(Debug, Default)]
pub struct MemoryVectorIndex {
    records: Mutex<HashMap<(String, String), VectorRecord>>,
}

impl MemoryVectorIndex {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records across all namespaces.
    #[inline]
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn insert(&self, records: &[VectorRecord]) -> Result<()> {
        let mut store = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for record in records {
            store.insert(
                (record.namespace.clone(), record.id.clone()),
                record.clone(),
            );
        }
        debug!("Inserted {} vector records", records.len());
        Ok(())
    }

    async fn query(&self, vector: &[f32], opts: &QueryOptions) -> Result<Vec<QueryMatch>> {
        let store = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut matches: Vec<QueryMatch> = store
            .values()
            .filter(|r| r.namespace == opts.namespace)
            .map(|r| QueryMatch {
                id: r.id.clone(),
                score: dot(vector, &r.values),
                metadata: r.metadata.clone(),
            })
            .collect();

        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(opts.top_k);
        Ok(matches)
    }

    async fn get_by_ids(&self, namespace: &str, ids: &[String]) -> Result<Vec<VectorRecord>> {
        let store = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(ids
            .iter()
            .filter_map(|id| store.get(&(namespace.to_string(), id.clone())).cloned())
            .collect())
    }

    async fn delete_by_ids(&self, namespace: &str, ids: &[String]) -> Result<usize> {
        let mut store = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;
        for id in ids {
            if store.remove(&(namespace.to_string(), id.clone())).is_some() {
                removed += 1;
            }
        }
        debug!("Deleted {} of {} requested vector records", removed, ids.len());
        Ok(removed)
    }
}

/// In-memory content source seeded with pages and their blocks.
#[derive(Debug, Default)]
pub struct MemoryContentSource {
    pages: Mutex<HashMap<String, Page>>,
    blocks: Mutex<HashMap<String, Vec<Block>>>,
}

impl MemoryContentSource {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add_page(&self, page: Page, blocks: Vec<Block>) {
        let page_id = page.id.clone();
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(page_id.clone(), page);
        self.blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(page_id, blocks);
    }
}

#[async_trait]
impl ContentSource for MemoryContentSource {
    async fn fetch_page(&self, page_id: &str) -> Result<Option<Page>> {
        Ok(self
            .pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(page_id)
            .cloned())
    }

    async fn fetch_blocks(&self, page_id: &str) -> Result<Vec<Block>> {
        Ok(self
            .blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(page_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn search(&self, query: &str) -> Result<Vec<Page>> {
        let needle = query.to_lowercase();
        Ok(self
            .pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|p| p.title.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }
}
