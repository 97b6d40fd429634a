// Embeddings module
// Word-window chunking, the Ollama client and the caching embedder

pub mod cache;
pub mod chunking;
pub mod ollama;


use async_trait::async_trait;
use itertools::Itertools;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::{RagError, Result};

pub use cache::EmbeddingCache;
pub use chunking::{Chunk, Chunker, ChunkingConfig};
pub use ollama::OllamaClient;

/// Something that turns text into fixed-dimension vectors
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed every text, returning vectors in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn health_check(&self) -> Result<()>;
}

/// Runs the blocking Ollama client on the blocking thread pool
pub struct OllamaBackend {
    client: Arc<OllamaClient>,
}

impl OllamaBackend {
    #[inline]
    pub fn new(client: OllamaClient) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaBackend {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let client = Arc::clone(&self.client);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || client.generate_embeddings_batch(&texts))
            .await
            .map_err(|e| RagError::Embedding(format!("Embedding task failed: {}", e)))?
            .map_err(|e| RagError::Embedding(format!("{:#}", e)))
    }

    async fn health_check(&self) -> Result<()> {
        let client = Arc::clone(&self.client);
        tokio::task::spawn_blocking(move || client.health_check())
            .await
            .map_err(|e| RagError::Embedding(format!("Health check task failed: {}", e)))?
            .map_err(|e| RagError::Embedding(format!("{:#}", e)))
    }
}

/// Produces embeddings through a backend, memoizing every result
#[derive(Clone)]
pub struct Embedder {
    backend: Arc<dyn EmbeddingBackend>,
    cache: EmbeddingCache,
    dimension: usize,
    batch_size: usize,
}

impl Embedder {
    #[inline]
    pub fn new(
        backend: Arc<dyn EmbeddingBackend>,
        cache: EmbeddingCache,
        dimension: usize,
        batch_size: usize,
    ) -> Self {
        Self {
            backend,
            cache,
            dimension,
            batch_size: batch_size.max(1),
        }
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    #[inline]
    pub fn backend(&self) -> &Arc<dyn EmbeddingBackend> {
        &self.backend
    }

    /// Embed texts in order, computing only the ones not already cached
    #[inline]
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // Hits are copied out up front: inserting misses may evict them from a bounded cache
        let mut known: HashMap<&str, Arc<Vec<f32>>> = HashMap::with_capacity(texts.len());
        let mut misses: Vec<&str> = Vec::new();
        for text in texts.iter().map(String::as_str).unique() {
            match self.cache.get(text) {
                Some(vector) => {
                    known.insert(text, vector);
                }
                None => misses.push(text),
            }
        }

        debug!(
            "Embedding {} texts ({} cache misses)",
            texts.len(),
            misses.len()
        );

        for keys in misses.chunks(self.batch_size) {
            let batch: Vec<String> = keys.iter().map(|key| (*key).to_string()).collect();
            let vectors = self.backend.embed_batch(&batch).await?;
            if vectors.len() != batch.len() {
                return Err(RagError::Embedding(format!(
                    "Backend returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }

            for ((key, text), vector) in keys.iter().zip(batch).zip(vectors) {
                self.check_dimension(&vector)?;
                known.insert(*key, self.cache.insert(text, vector));
            }
        }

        texts
            .iter()
            .map(|text| {
                known
                    .get(text.as_str())
                    .map(|vector| vector.as_ref().clone())
                    .ok_or_else(|| {
                        RagError::Embedding(format!("Embedding for {:?} went missing", text))
                    })
            })
            .collect()
    }

    #[inline]
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::Embedding("No embedding produced".to_string()))
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() == self.dimension {
            Ok(())
        } else {
            Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            })
        }
    }
}
