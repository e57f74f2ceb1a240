// External collaborator contracts
// The embedding model, vector index, and content source are thin I/O
// dependencies consumed through these traits; the engine never assumes a
// concrete backend.

pub mod memory;


use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

pub use memory::{HashingEmbedder, MemoryContentSource, MemoryVectorIndex};

/// A vector ready for persistence in the index.
///
/// `id` is unique within its namespace; one record maps to exactly one text
/// chunk or one document property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub namespace: String,
    pub metadata: Value,
}

/// A match returned from similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryMatch {
    pub id: String,
    pub score: f32,
    pub metadata: Value,
}

/// Options for similarity queries.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub namespace: String,
    pub top_k: usize,
}

/// A page fetched from the content source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub title: String,
    pub properties: serde_json::Map<String, Value>,
}

/// A content block belonging to a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    pub text: String,
    pub kind: String,
}

/// Text-to-vector embedding model.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for `text` using the named model.
    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>>;
}

/// Vector index exposing insert/query/get/delete over namespaced records.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn insert(&self, records: &[VectorRecord]) -> Result<()>;

    async fn query(&self, vector: &[f32], opts: &QueryOptions) -> Result<Vec<QueryMatch>>;

    async fn get_by_ids(&self, namespace: &str, ids: &[String]) -> Result<Vec<VectorRecord>>;

    /// Delete records by id, returning the number removed.
    async fn delete_by_ids(&self, namespace: &str, ids: &[String]) -> Result<usize>;
}

/// Upstream content API (e.g. Notion).
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Fetch a page by id; `Ok(None)` when the page does not exist.
    async fn fetch_page(&self, page_id: &str) -> Result<Option<Page>>;

    async fn fetch_blocks(&self, page_id: &str) -> Result<Vec<Block>>;

    async fn search(&self, query: &str) -> Result<Vec<Page>>;
}
