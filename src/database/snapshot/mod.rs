//! Local JSON snapshots used when the remote index is unavailable.
//!
//! Every store writes one `snapshot-<generation>-<name>.json` file. The
//! manifest names the active generation, and only that snapshot is searched.
//! Snapshot and manifest are written to a temporary file and renamed into
//! place while holding the store's lock.


use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{ScoredChunk, VectorRecord, rank_by_similarity};
use crate::{RagError, Result};

pub const MANIFEST_FILE: &str = "manifest.json";
const SNAPSHOT_PREFIX: &str = "snapshot-";
const TEMP_SUFFIX: &str = ".tmp";

/// Pointer to the active snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub active_generation: u64,
    pub active_file: String,
    pub next_generation: u64,
}

/// Contents of one snapshot file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub filename: String,
    pub generation: u64,
    pub timestamp: DateTime<Utc>,
    pub chunks: Vec<String>,
    pub vectors: Vec<VectorRecord>,
}

#[derive(Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

fn snapshot_error(context: &str, path: &Path, error: impl std::fmt::Display) -> RagError {
    RagError::Snapshot(format!("{} {}: {}", context, path.display(), error))
}

/// Characters safe to embed in a snapshot file name
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(TEMP_SUFFIX);
    let temp_path = PathBuf::from(temp_name);

    tokio::fs::write(&temp_path, bytes)
        .await
        .map_err(|e| snapshot_error("Failed to write", &temp_path, e))?;
    tokio::fs::rename(&temp_path, path)
        .await
        .map_err(|e| snapshot_error("Failed to move into place", path, e))
}

impl SnapshotStore {
    #[inline]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    /// Current manifest, `None` when nothing has been written
    #[inline]
    pub async fn manifest(&self) -> Result<Option<Manifest>> {
        let path = self.manifest_path();
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| snapshot_error("Invalid manifest", &path, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(snapshot_error("Failed to read", &path, e)),
        }
    }

    /// Write a new snapshot and make it the active one
    #[inline]
    pub async fn write(
        &self,
        filename: &str,
        chunks: &[String],
        vectors: &[VectorRecord],
    ) -> Result<PathBuf> {
        let _guard = self.lock.lock().await;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| snapshot_error("Failed to create", &self.dir, e))?;

        let generation = self
            .manifest()
            .await?
            .map_or(1, |manifest| manifest.next_generation);

        let file_name = format!("{}{:08}-{}.json", SNAPSHOT_PREFIX, generation, sanitize(filename));
        let path = self.dir.join(&file_name);

        let snapshot = Snapshot {
            filename: filename.to_string(),
            generation,
            timestamp: Utc::now(),
            chunks: chunks.to_vec(),
            vectors: vectors.to_vec(),
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| RagError::Snapshot(format!("Failed to serialize snapshot: {}", e)))?;
        write_atomic(&path, &bytes).await?;

        let manifest = Manifest {
            active_generation: generation,
            active_file: file_name,
            next_generation: generation + 1,
        };
        let manifest_bytes = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| RagError::Snapshot(format!("Failed to serialize manifest: {}", e)))?;
        write_atomic(&self.manifest_path(), &manifest_bytes).await?;

        info!(
            "Saved snapshot generation {} with {} vectors to {}",
            generation,
            vectors.len(),
            path.display()
        );
        Ok(path)
    }

    /// The snapshot the manifest points at
    #[inline]
    pub async fn load_active(&self) -> Result<Option<Snapshot>> {
        let Some(manifest) = self.manifest().await? else {
            return Ok(None);
        };

        let path = self.dir.join(&manifest.active_file);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| snapshot_error("Failed to read", &path, e))?;
        let snapshot = serde_json::from_slice(&bytes)
            .map_err(|e| snapshot_error("Invalid snapshot", &path, e))?;
        Ok(Some(snapshot))
    }

    /// Cosine search over the active snapshot only
    #[inline]
    pub async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        match self.load_active().await? {
            Some(snapshot) => {
                debug!(
                    "Searching snapshot generation {} ({} vectors)",
                    snapshot.generation,
                    snapshot.vectors.len()
                );
                Ok(rank_by_similarity(&snapshot.vectors, query, top_k))
            }
            None => Ok(Vec::new()),
        }
    }

    /// Snapshot files currently on disk, oldest generation first
    #[inline]
    pub async fn snapshot_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(snapshot_error("Failed to list", &self.dir, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| snapshot_error("Failed to list", &self.dir, e))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(SNAPSHOT_PREFIX) && name.ends_with(".json") {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Remove every snapshot, leftover temporary file and the manifest
    #[inline]
    pub async fn clear(&self) -> Result<usize> {
        let _guard = self.lock.lock().await;

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(snapshot_error("Failed to list", &self.dir, e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| snapshot_error("Failed to list", &self.dir, e))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let owned = name.starts_with(SNAPSHOT_PREFIX)
                || name.starts_with(MANIFEST_FILE)
                || name.ends_with(TEMP_SUFFIX);
            if !owned {
                continue;
            }

            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove {}: {}", entry.path().display(), e),
            }
        }

        info!("Removed {} snapshot files from {}", removed, self.dir.display());
        Ok(removed)
    }

    /// Create the directory if needed and prove a file can be written there
    #[inline]
    pub async fn check_writable(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| snapshot_error("Failed to create", &self.dir, e))?;
        let probe = self.dir.join(".write-probe");
        tokio::fs::write(&probe, b"ok")
            .await
            .map_err(|e| snapshot_error("Cannot write to", &self.dir, e))?;
        tokio::fs::remove_file(&probe)
            .await
            .map_err(|e| snapshot_error("Failed to remove", &probe, e))
    }
}
