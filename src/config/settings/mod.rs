
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::embeddings::chunking::ChunkingConfig;
use crate::embeddings::ollama::DEFAULT_EMBEDDING_DIMENSION;

/// Environment variable that overrides the configuration directory
pub const HOME_ENV_VAR: &str = "PDF_RAG_HOME";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub door_schedule: DoorScheduleConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub batch_size: u32,
    pub embedding_dimension: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "all-minilm:latest".to_string(),
            batch_size: 10,
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

/// Hosted chat-completion service used to phrase answers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API, e.g. `https://openrouter.ai/api/v1`
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
    /// Number of previous question/answer turns included in prompts
    pub history_limit: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "qwen/qwen-2.5-72b-instruct".to_string(),
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            temperature: 0.2,
            top_p: 0.9,
            max_tokens: 2000,
            timeout_seconds: 120,
            history_limit: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VectorConfig {
    /// Disable to always write to the local snapshot store
    pub remote_enabled: bool,
    /// LanceDB URI of the remote index. Defaults to `<base_dir>/vectors`.
    pub remote_uri: Option<String>,
    pub table_name: String,
    pub top_k: usize,
    pub upsert_batch_size: usize,
    pub consistency_attempts: u32,
    pub consistency_interval_ms: u64,
    pub search_retries: u32,
    pub search_retry_delay_ms: u64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            remote_enabled: true,
            remote_uri: None,
            table_name: "pdf_chunks".to_string(),
            top_k: 5,
            upsert_batch_size: 100,
            consistency_attempts: 30,
            consistency_interval_ms: 1000,
            search_retries: 3,
            search_retry_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OcrEngineKind {
    /// Local `tesseract` binary
    Tesseract,
    /// PaddleOCR-style HTTP service
    Http,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Pages inspected for images and table structure
    pub detection_page_limit: usize,
    /// Pages rasterized and OCRed
    pub ocr_page_limit: usize,
    pub ocr_confidence_threshold: f32,
    pub min_text_chars: usize,
    pub min_words_per_page: f32,
    pub max_noise_ratio: f32,
    /// OCR text replaces native text when it is this many times longer
    pub ocr_preference_ratio: f32,
    /// Native text shorter than this triggers table recovery
    pub short_text_chars: usize,
    pub max_image_dimension: u32,
    pub render_dpi: u32,
    pub ocr_page_timeout_seconds: u64,
    pub ocr_engine: OcrEngineKind,
    pub tesseract_path: String,
    pub tesseract_language: String,
    pub pdftoppm_path: String,
    pub ocr_service_url: Option<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            detection_page_limit: 5,
            ocr_page_limit: 10,
            ocr_confidence_threshold: 0.5,
            min_text_chars: 50,
            min_words_per_page: 20.0,
            max_noise_ratio: 0.3,
            ocr_preference_ratio: 1.3,
            short_text_chars: 100,
            max_image_dimension: 1200,
            render_dpi: 144,
            ocr_page_timeout_seconds: 30,
            ocr_engine: OcrEngineKind::Tesseract,
            tesseract_path: "tesseract".to_string(),
            tesseract_language: "eng".to_string(),
            pdftoppm_path: "pdftoppm".to_string(),
            ocr_service_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadConfig {
    pub max_file_size_mb: u64,
    /// Upper bound on a whole upload, extraction through storage
    pub request_timeout_seconds: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: 10,
            request_timeout_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MaterialPrice {
    pub price_per_sqm: f64,
    pub installation: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DoorScheduleConfig {
    pub enabled: bool,
    pub region: String,
    pub default_price_per_sqm: f64,
    pub default_installation_cost: f64,
    pub labor_cost_per_sqm: f64,
    /// Per-material price overrides keyed by lowercase material name
    pub materials: BTreeMap<String, MaterialPrice>,
}

impl Default for DoorScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            region: "usa".to_string(),
            default_price_per_sqm: 150.0,
            default_installation_cost: 60.0,
            labor_cost_per_sqm: 0.0,
            materials: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid table name: {0:?} (cannot be empty)")]
    InvalidTableName(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid chunk size: {0} words (must be between 10 and 4096)")]
    InvalidChunkSize(usize),
    #[error("Overlap ({overlap}) must be smaller than chunk size ({size})")]
    OverlapTooLarge { overlap: usize, size: usize },
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("Invalid {name}: {value} (must be between 0.0 and 1.0)")]
    InvalidRatio { name: &'static str, value: f32 },
    #[error("Invalid {name}: {value} (must be greater than 0)")]
    MustBePositive { name: &'static str, value: u64 },
    #[error("OCR engine 'http' requires extraction.ocr_service_url")]
    MissingOcrServiceUrl,
    #[error("Invalid price for {0}: prices cannot be negative")]
    NegativePrice(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Resolve the configuration directory, honoring `PDF_RAG_HOME`
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        if let Some(home) = std::env::var_os(HOME_ENV_VAR) {
            return Ok(PathBuf::from(home));
        }

        dirs::config_dir()
            .map(|dir| dir.join("pdf-rag"))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Load the configuration from the default directory
    #[inline]
    pub fn load_default() -> Result<Self> {
        let dir = Self::config_dir().context("Failed to resolve configuration directory")?;
        Self::load(dir)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ollama.validate()?;
        self.llm.validate()?;
        self.vector.validate()?;
        self.extraction.validate()?;
        self.validate_chunking_config()?;
        self.upload.validate()?;
        self.door_schedule.validate()?;
        Ok(())
    }

    fn validate_chunking_config(&self) -> Result<(), ConfigError> {
        let config = &self.chunking;

        if !(10..=4096).contains(&config.chunk_size_words) {
            return Err(ConfigError::InvalidChunkSize(config.chunk_size_words));
        }

        if config.overlap_words >= config.chunk_size_words {
            return Err(ConfigError::OverlapTooLarge {
                overlap: config.overlap_words,
                size: config.chunk_size_words,
            });
        }

        Ok(())
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.ollama.ollama_url()
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Default location of the LanceDB index
    #[inline]
    pub fn vector_database_path(&self) -> PathBuf {
        self.get_base_dir().join("vectors")
    }

    /// URI handed to LanceDB, either configured or the local vectors directory
    #[inline]
    pub fn remote_index_uri(&self) -> String {
        self.vector
            .remote_uri
            .clone()
            .unwrap_or_else(|| self.vector_database_path().display().to_string())
    }

    /// Directory holding local JSON snapshots
    #[inline]
    pub fn snapshot_dir(&self) -> PathBuf {
        self.get_base_dir().join("snapshots")
    }

    #[inline]
    pub fn max_upload_bytes(&self) -> u64 {
        self.upload.max_file_size_mb * 1024 * 1024
    }
}

impl OllamaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(64..=4096).contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }

        Ok(())
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    pub fn set_protocol(&mut self, protocol: String) -> Result<(), ConfigError> {
        if protocol != "http" && protocol != "https" {
            return Err(ConfigError::InvalidProtocol(protocol));
        }
        self.protocol = protocol;
        Ok(())
    }

    pub fn set_host(&mut self, host: String) -> Result<(), ConfigError> {
        let temp_config = OllamaConfig {
            host: host.clone(),
            ..self.clone()
        };
        temp_config.validate()?;
        self.host = host;
        Ok(())
    }

    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }
        self.port = port;
        Ok(())
    }

    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }

    pub fn set_batch_size(&mut self, batch_size: u32) -> Result<(), ConfigError> {
        if batch_size == 0 || batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(batch_size));
        }
        self.batch_size = batch_size;
        Ok(())
    }

    pub fn set_embedding_dimension(&mut self, dimension: u32) -> Result<(), ConfigError> {
        if !(64..=4096).contains(&dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(dimension));
        }
        self.embedding_dimension = dimension;
        Ok(())
    }
}

impl LlmConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.base_url).map_err(|_| ConfigError::InvalidUrl(self.base_url.clone()))?;

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }

        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(ConfigError::InvalidRatio {
                name: "llm.top_p",
                value: self.top_p,
            });
        }

        if self.timeout_seconds == 0 {
            return Err(ConfigError::MustBePositive {
                name: "llm.timeout_seconds",
                value: self.timeout_seconds,
            });
        }

        Ok(())
    }

    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

impl VectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("vector.top_k", self.top_k as u64),
            ("vector.upsert_batch_size", self.upsert_batch_size as u64),
            (
                "vector.consistency_attempts",
                u64::from(self.consistency_attempts),
            ),
            ("vector.search_retries", u64::from(self.search_retries)),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::MustBePositive { name, value });
            }
        }

        if self.table_name.trim().is_empty() {
            return Err(ConfigError::InvalidTableName(self.table_name.clone()));
        }

        Ok(())
    }
}

impl ExtractionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ratios = [
            ("extraction.ocr_confidence_threshold", self.ocr_confidence_threshold),
            ("extraction.max_noise_ratio", self.max_noise_ratio),
        ];
        for (name, value) in ratios {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidRatio { name, value });
            }
        }

        let positive = [
            ("extraction.ocr_page_timeout_seconds", self.ocr_page_timeout_seconds),
            ("extraction.render_dpi", u64::from(self.render_dpi)),
            (
                "extraction.max_image_dimension",
                u64::from(self.max_image_dimension),
            ),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::MustBePositive { name, value });
            }
        }

        if self.ocr_engine == OcrEngineKind::Http {
            let url = self
                .ocr_service_url
                .as_deref()
                .ok_or(ConfigError::MissingOcrServiceUrl)?;
            Url::parse(url).map_err(|_| ConfigError::InvalidUrl(url.to_string()))?;
        }

        Ok(())
    }
}

impl UploadConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_file_size_mb == 0 {
            return Err(ConfigError::MustBePositive {
                name: "upload.max_file_size_mb",
                value: self.max_file_size_mb,
            });
        }
        if self.request_timeout_seconds == 0 {
            return Err(ConfigError::MustBePositive {
                name: "upload.request_timeout_seconds",
                value: self.request_timeout_seconds,
            });
        }
        Ok(())
    }
}

impl DoorScheduleConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_price_per_sqm < 0.0
            || self.default_installation_cost < 0.0
            || self.labor_cost_per_sqm < 0.0
        {
            return Err(ConfigError::NegativePrice("defaults".to_string()));
        }

        for (material, price) in &self.materials {
            if price.price_per_sqm < 0.0 || price.installation < 0.0 {
                return Err(ConfigError::NegativePrice(material.clone()));
            }
        }

        Ok(())
    }
}
