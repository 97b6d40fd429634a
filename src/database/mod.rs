// Database module
// Remote LanceDB index, local JSON snapshots and the store that arbitrates between them

pub mod lancedb;
pub mod snapshot;
pub mod vector_store;


use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

pub use self::lancedb::LanceIndex;
pub use snapshot::SnapshotStore;
pub use vector_store::{StorageMethod, StoreResult, VectorStore};

/// Metadata stored alongside every chunk embedding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub filename: String,
    pub chunk_index: u32,
    pub text: String,
    /// Length of `text` in characters
    pub chunk_size: u32,
}

/// One embedded chunk as written to either backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    #[serde(rename = "values")]
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// A search hit, higher scores are closer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub id: String,
    pub score: f32,
    pub metadata: ChunkMetadata,
}

/// A durable, possibly eventually consistent vector index
#[async_trait]
pub trait RemoteIndex: Send + Sync {
    /// Human readable location, used in logs and health output
    fn describe(&self) -> String;

    async fn upsert(&self, records: &[VectorRecord]) -> Result<()>;

    /// Total number of stored vectors as currently visible to readers
    async fn count(&self) -> Result<usize>;

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>>;

    async fn delete_all(&self) -> Result<()>;
}

/// Cosine similarity, zero when either vector has no magnitude or holds non-finite values
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0_f32, 0.0_f32, 0.0_f32), |(dot, na, nb), (x, y)| {
            (dot + x * y, na + x * x, nb + y * y)
        });

    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    if similarity.is_finite() { similarity } else { 0.0 }
}

/// Top `top_k` records by cosine similarity; ties keep insertion order
#[inline]
pub fn rank_by_similarity(records: &[VectorRecord], query: &[f32], top_k: usize) -> Vec<ScoredChunk> {
    let mut scored: Vec<ScoredChunk> = records
        .iter()
        .map(|record| ScoredChunk {
            id: record.id.clone(),
            score: cosine_similarity(&record.vector, query),
            metadata: record.metadata.clone(),
        })
        .collect();

    // sort_by is stable, so equal scores stay in insertion order
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(top_k);
    scored
}
