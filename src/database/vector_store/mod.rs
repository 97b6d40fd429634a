pub mod consistency;


use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ChunkMetadata, RemoteIndex, ScoredChunk, SnapshotStore, VectorRecord};
use crate::config::VectorConfig;
use crate::embeddings::{Chunker, Embedder};
use crate::{RagError, Result};

use consistency::{ConsistencyPolicy, ConsistencyReport, wait_for_count};

/// Which backend accepted a write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMethod {
    Remote,
    LocalSnapshot,
}

impl std::fmt::Display for StorageMethod {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Remote => "remote",
            Self::LocalSnapshot => "local_snapshot",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreResult {
    pub filename: String,
    pub chunks_stored: usize,
    /// Vectors visible in the backend that took the write
    pub total_vectors: usize,
    pub storage_method: StorageMethod,
    pub snapshot_path: Option<PathBuf>,
    pub consistency_confirmed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    pub remote_cleared: bool,
    pub snapshot_files_removed: usize,
    pub cache_entries_cleared: usize,
}

/// Readiness of each storage backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreHealth {
    /// `None` when no remote index is configured
    pub remote: Option<std::result::Result<usize, String>>,
    pub snapshot: std::result::Result<(), String>,
}

impl StoreHealth {
    /// Writes can land somewhere
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.snapshot.is_ok() || matches!(self.remote, Some(Ok(_)))
    }
}

/// Tunables taken from the `[vector]` config section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    pub upsert_batch_size: usize,
    pub consistency: ConsistencyPolicy,
    pub search_retries: u32,
    pub search_retry_delay: Duration,
}

impl StoreSettings {
    #[inline]
    pub fn from_config(config: &VectorConfig) -> Self {
        Self {
            upsert_batch_size: config.upsert_batch_size.max(1),
            consistency: ConsistencyPolicy::from_config(config),
            search_retries: config.search_retries.max(1),
            search_retry_delay: Duration::from_millis(config.search_retry_delay_ms),
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self::from_config(&VectorConfig::default())
    }
}

/// Chunks, embeds and stores documents, preferring the remote index.
///
/// The backend is chosen per call. A remote failure on one call does not
/// stop the next call from trying the remote index again.
pub struct VectorStore {
    remote: Option<Arc<dyn RemoteIndex>>,
    snapshots: SnapshotStore,
    embedder: Embedder,
    chunker: Chunker,
    settings: StoreSettings,
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("remote", &self.remote.as_ref().map(|r| r.describe()))
            .field("snapshots", &self.snapshots.dir())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl VectorStore {
    #[inline]
    pub fn new(
        remote: Option<Arc<dyn RemoteIndex>>,
        snapshots: SnapshotStore,
        embedder: Embedder,
        chunker: Chunker,
        settings: StoreSettings,
    ) -> Self {
        Self {
            remote,
            snapshots,
            embedder,
            chunker,
            settings,
        }
    }

    #[inline]
    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    #[inline]
    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Chunk, embed and persist a document's text
    #[inline]
    pub async fn store(&self, filename: &str, text: &str) -> Result<StoreResult> {
        let chunks = self.chunker.split(text);
        if chunks.is_empty() {
            return Err(RagError::NoExtractableText);
        }

        let vectors = self.embedder.embed(&chunks).await?;
        let records = build_records(filename, &chunks, vectors);
        info!("Storing {} chunks of {}", records.len(), filename);

        let remote_error = match &self.remote {
            Some(remote) => match self.store_remote(remote.as_ref(), &records).await {
                Ok(report) => {
                    return Ok(StoreResult {
                        filename: filename.to_string(),
                        chunks_stored: records.len(),
                        total_vectors: report.observed.unwrap_or(records.len()),
                        storage_method: StorageMethod::Remote,
                        snapshot_path: None,
                        consistency_confirmed: report.confirmed,
                    });
                }
                Err(e) => {
                    warn!(
                        "Remote index {} failed, falling back to local snapshot: {}",
                        remote.describe(),
                        e
                    );
                    Some(e)
                }
            },
            None => None,
        };

        match self.snapshots.write(filename, &chunks, &records).await {
            Ok(path) => Ok(StoreResult {
                filename: filename.to_string(),
                chunks_stored: records.len(),
                total_vectors: records.len(),
                storage_method: StorageMethod::LocalSnapshot,
                snapshot_path: Some(path),
                consistency_confirmed: true,
            }),
            Err(local_error) => Err(match remote_error {
                Some(remote_error) => RagError::Database(format!(
                    "Both backends failed. Remote: {}. Snapshot: {}",
                    remote_error, local_error
                )),
                None => local_error,
            }),
        }
    }

    async fn store_remote(
        &self,
        remote: &dyn RemoteIndex,
        records: &[VectorRecord],
    ) -> Result<ConsistencyReport> {
        let baseline = remote.count().await?;

        for batch in records.chunks(self.settings.upsert_batch_size) {
            remote.upsert(batch).await?;
        }
        debug!("Upserted {} vectors to {}", records.len(), remote.describe());

        Ok(wait_for_count(
            remote,
            baseline + records.len(),
            self.settings.consistency,
        )
        .await)
    }

    /// Most similar chunks to `query`, best first
    #[inline]
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredChunk>> {
        let query_vector = self.embedder.embed_one(query).await?;

        if let Some(remote) = &self.remote {
            match self.search_remote(remote.as_ref(), &query_vector, top_k).await {
                Ok(hits) => return Ok(hits),
                Err(e) => warn!(
                    "Remote search on {} failed, searching local snapshot: {}",
                    remote.describe(),
                    e
                ),
            }
        }

        self.snapshots.search(&query_vector, top_k).await
    }

    /// Empty results are retried since recent writes may not be visible yet
    async fn search_remote(
        &self,
        remote: &dyn RemoteIndex,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let attempts = self.settings.search_retries;
        for attempt in 1..=attempts {
            let hits = remote.query(query_vector, top_k).await?;
            if !hits.is_empty() {
                debug!("Remote search returned {} hits on attempt {}", hits.len(), attempt);
                return Ok(hits);
            }

            if attempt < attempts {
                debug!(
                    "Remote search empty, retrying in {:?} ({}/{})",
                    self.settings.search_retry_delay, attempt, attempts
                );
                tokio::time::sleep(self.settings.search_retry_delay).await;
            }
        }

        info!("Remote search still empty after {} attempts", attempts);
        Ok(Vec::new())
    }

    /// Remove every stored vector from both backends and flush the embedding cache
    #[inline]
    pub async fn clear_all(&self) -> Result<ClearReport> {
        let remote_cleared = match &self.remote {
            Some(remote) => match remote.delete_all().await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Failed to clear remote index {}: {}", remote.describe(), e);
                    false
                }
            },
            None => false,
        };

        let snapshot_files_removed = self.snapshots.clear().await?;

        let cache_entries_cleared = self.embedder.cache().len();
        self.embedder.cache().clear();

        info!(
            "Cleared vectors (remote: {}, snapshot files: {}, cached embeddings: {})",
            remote_cleared, snapshot_files_removed, cache_entries_cleared
        );
        Ok(ClearReport {
            remote_cleared,
            snapshot_files_removed,
            cache_entries_cleared,
        })
    }

    #[inline]
    pub async fn health(&self) -> StoreHealth {
        let remote = match &self.remote {
            Some(remote) => Some(remote.count().await.map_err(|e| e.to_string())),
            None => None,
        };
        let snapshot = self
            .snapshots
            .check_writable()
            .await
            .map_err(|e| e.to_string());
        StoreHealth { remote, snapshot }
    }
}

/// Records for one upload, ids are `{filename}_{suffix}_{chunk_index}`
#[inline]
pub fn build_records(filename: &str, chunks: &[String], vectors: Vec<Vec<f32>>) -> Vec<VectorRecord> {
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();

    chunks
        .iter()
        .zip(vectors)
        .enumerate()
        .map(|(index, (text, vector))| {
            let chunk_index = u32::try_from(index).unwrap_or(u32::MAX);
            VectorRecord {
                id: format!("{}_{}_{}", filename, suffix, chunk_index),
                vector,
                metadata: ChunkMetadata {
                    filename: filename.to_string(),
                    chunk_index,
                    text: text.clone(),
                    chunk_size: u32::try_from(text.chars().count()).unwrap_or(u32::MAX),
                },
            }
        })
        .collect()
}
