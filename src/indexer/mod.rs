// Indexer module
// Upload, question answering and maintenance on top of extraction and storage

pub mod validation;

#[cfg(test)]
mod tests;

use anyhow::Context;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::answer::{Answer, AnswerGenerator, ChatClient};
use crate::config::Config;
use crate::database::vector_store::{ClearReport, StoreSettings};
use crate::database::{
    LanceIndex, RemoteIndex, ScoredChunk, SnapshotStore, StorageMethod, VectorStore,
};
use crate::door_schedule::{DoorCost, DoorScheduleParser, total_cost};
use crate::embeddings::{
    Chunker, Embedder, EmbeddingBackend, EmbeddingCache, OllamaBackend, OllamaClient,
};
use crate::extraction::{ExtractionDecision, ExtractionOrchestrator};
use crate::{RagError, Result};

pub use validation::{display_name, validate_extension, validate_upload};

/// Everything reported back for one upload
#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub filename: String,
    pub page_count: usize,
    pub storage_method: StorageMethod,
    pub chunks_stored: usize,
    pub total_vectors: usize,
    pub consistency_confirmed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<PathBuf>,
    pub decision: ExtractionDecision,
    pub tables_found: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub door_costs: Vec<DoorCost>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub door_total_cost: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyStatus {
    pub ok: bool,
    pub detail: String,
}

impl DependencyStatus {
    fn from_result<T>(result: std::result::Result<T, String>, ok_detail: impl FnOnce(T) -> String) -> Self {
        match result {
            Ok(value) => Self {
                ok: true,
                detail: ok_detail(value),
            },
            Err(detail) => Self { ok: false, detail },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Uploads and questions can be served
    pub ready: bool,
    pub embedding: DependencyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_index: Option<DependencyStatus>,
    pub snapshot: DependencyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr: Option<DependencyStatus>,
}

/// The whole document-to-answer pipeline
pub struct Pipeline {
    extractor: ExtractionOrchestrator,
    store: VectorStore,
    answers: AnswerGenerator,
    doors: Option<DoorScheduleParser>,
    max_upload_bytes: u64,
    request_timeout: Duration,
    top_k: usize,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("store", &self.store)
            .field("door_schedule", &self.doors.is_some())
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("request_timeout", &self.request_timeout)
            .field("top_k", &self.top_k)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    #[inline]
    pub fn new(extractor: ExtractionOrchestrator, store: VectorStore, answers: AnswerGenerator) -> Self {
        let defaults = Config::default();
        Self {
            extractor,
            store,
            answers,
            doors: None,
            max_upload_bytes: defaults.max_upload_bytes(),
            request_timeout: Duration::from_secs(defaults.upload.request_timeout_seconds),
            top_k: defaults.vector.top_k,
        }
    }

    #[inline]
    pub fn with_door_schedule(mut self, parser: DoorScheduleParser) -> Self {
        self.doors = Some(parser);
        self
    }

    #[inline]
    pub fn with_upload_limits(mut self, max_bytes: u64, request_timeout: Duration) -> Self {
        self.max_upload_bytes = max_bytes;
        self.request_timeout = request_timeout;
        self
    }

    #[inline]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Wire up Ollama, LanceDB, the snapshot directory, OCR and the chat model
    #[inline]
    pub fn from_config(config: &Config) -> Result<Self> {
        let ollama = OllamaClient::new(&config.ollama).context("Failed to initialize Ollama client")?;
        let backend: Arc<dyn EmbeddingBackend> = Arc::new(OllamaBackend::new(ollama));
        let embedder = Embedder::new(
            backend,
            EmbeddingCache::new(),
            config.ollama.embedding_dimension as usize,
            config.ollama.batch_size as usize,
        );

        let remote: Option<Arc<dyn RemoteIndex>> = if config.vector.remote_enabled {
            Some(Arc::new(LanceIndex::from_config(config)))
        } else {
            info!("Remote index disabled, storing snapshots only");
            None
        };

        let chunker = Chunker::from_config(&config.chunking)
            .map_err(|e| RagError::Config(e.to_string()))?;
        let store = VectorStore::new(
            remote,
            SnapshotStore::new(config.snapshot_dir()),
            embedder,
            chunker,
            StoreSettings::from_config(&config.vector),
        );

        let chat = ChatClient::new(&config.llm).context("Failed to initialize chat client")?;
        if config.llm.api_key().is_none() {
            warn!(
                "{} is not set, answers will fall back until it is",
                config.llm.api_key_env
            );
        }
        let answers = AnswerGenerator::new(
            Arc::new(chat),
            config.llm.history_limit,
            Duration::from_secs(config.llm.timeout_seconds),
        );

        let mut pipeline = Self::new(ExtractionOrchestrator::new(&config.extraction), store, answers)
            .with_upload_limits(
                config.max_upload_bytes(),
                Duration::from_secs(config.upload.request_timeout_seconds),
            )
            .with_top_k(config.vector.top_k);
        if config.door_schedule.enabled {
            pipeline = pipeline.with_door_schedule(DoorScheduleParser::from_config(&config.door_schedule));
        }
        Ok(pipeline)
    }

    #[inline]
    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    #[inline]
    pub fn answers(&self) -> &AnswerGenerator {
        &self.answers
    }

    /// Read a PDF from disk and upload it under its file name
    #[inline]
    pub async fn upload_file(&self, path: &Path, force_ocr: bool) -> Result<UploadReport> {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| RagError::InvalidUpload(format!("{} has no file name", path.display())))?
            .to_string();
        validate_extension(&filename)?;

        let metadata = tokio::fs::metadata(path).await?;
        validate_upload(&filename, metadata.len(), self.max_upload_bytes)?;

        let bytes = tokio::fs::read(path).await?;
        self.upload(&filename, &bytes, force_ocr).await
    }

    /// Validate, extract, store and (optionally) price the door schedule.
    ///
    /// The whole call is bounded by the request timeout. Remote writes that
    /// finished before a timeout are kept.
    #[inline]
    pub async fn upload(&self, filename: &str, bytes: &[u8], force_ocr: bool) -> Result<UploadReport> {
        validate_upload(filename, bytes.len() as u64, self.max_upload_bytes)?;

        match tokio::time::timeout(self.request_timeout, self.process(filename, bytes, force_ocr)).await
        {
            Ok(result) => result,
            Err(_) => Err(RagError::Timeout(format!(
                "Processing {} took longer than {:?}",
                filename, self.request_timeout
            ))),
        }
    }

    async fn process(&self, filename: &str, bytes: &[u8], force_ocr: bool) -> Result<UploadReport> {
        info!("Processing upload {} ({} bytes)", filename, bytes.len());

        let outcome = self.extractor.extract(bytes, force_ocr).await?;
        let stored = self.store.store(filename, &outcome.text).await?;

        let door_costs = match &self.doors {
            Some(parser) => match parser
                .parse_with_model(&outcome.text, self.answers.model().as_ref())
                .await
            {
                Ok(costs) => costs,
                Err(e) => {
                    warn!("Door schedule extraction failed for {}: {}", filename, e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        let door_total_cost = (!door_costs.is_empty()).then(|| total_cost(&door_costs));

        info!(
            "Stored {} chunks of {} via {}",
            stored.chunks_stored, filename, stored.storage_method
        );

        Ok(UploadReport {
            filename: stored.filename,
            page_count: outcome.page_count,
            storage_method: stored.storage_method,
            chunks_stored: stored.chunks_stored,
            total_vectors: stored.total_vectors,
            consistency_confirmed: stored.consistency_confirmed,
            snapshot_path: stored.snapshot_path,
            decision: outcome.decision,
            tables_found: outcome.tables.len(),
            door_costs,
            door_total_cost,
        })
    }

    /// Retrieve context for `question` and answer it.
    ///
    /// A retrieval failure is treated as no matching content, which is
    /// answered without calling the model.
    #[inline]
    pub async fn ask(&self, question: &str) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidRequest("Question cannot be empty".to_string()));
        }

        let hits = match self.store.search(question, self.top_k).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Retrieval failed, treating as no matching content: {}", e);
                Vec::new()
            }
        };
        debug!("Retrieved {} chunks for question", hits.len());

        Ok(self.answers.answer(question, &hits).await)
    }

    #[inline]
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<ScoredChunk>> {
        self.store.search(query, limit.max(1)).await
    }

    #[inline]
    pub async fn clear_vectors(&self) -> Result<ClearReport> {
        self.store.clear_all().await
    }

    /// Forget the conversation, returning how many turns were dropped
    #[inline]
    pub fn clear_memory(&self) -> usize {
        let dropped = self.answers.memory().clear();
        info!("Cleared {} conversation turns", dropped);
        dropped
    }

    #[inline]
    pub async fn health(&self) -> HealthReport {
        let embedding = DependencyStatus::from_result(
            self.store
                .embedder()
                .backend()
                .health_check()
                .await
                .map_err(|e| e.to_string()),
            |()| "embedding backend reachable".to_string(),
        );

        let store_health = self.store.health().await;
        let remote_index = store_health.remote.clone().map(|result| {
            DependencyStatus::from_result(result, |count| format!("{} vectors", count))
        });
        let snapshot = DependencyStatus::from_result(store_health.snapshot.clone(), |()| {
            format!("{} writable", self.store.snapshots().dir().display())
        });

        let ocr = match self.extractor.ocr() {
            Some(pipeline) => Some(DependencyStatus::from_result(
                pipeline
                    .engine()
                    .health_check()
                    .await
                    .map_err(|e| e.to_string()),
                |()| format!("{} available", pipeline.engine().name()),
            )),
            None => None,
        };

        HealthReport {
            ready: embedding.ok && store_health.is_ready(),
            embedding,
            remote_index,
            snapshot,
            ocr,
        }
    }
}
