
use anyhow::{Context, Result, bail};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::OllamaConfig;
use crate::http::{RetryPolicy, agent_with_timeout};

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 384;

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Blocking client for Ollama's `/api/embed` and `/api/tags` endpoints
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    model: String,
    batch_size: u32,
    agent: ureq::Agent,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        Ok(Self {
            base_url,
            model: config.model.clone(),
            batch_size: config.batch_size.max(1),
            agent: agent_with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)),
            retry: RetryPolicy::default(),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = agent_with_timeout(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry.attempts = attempts.max(1);
        self
    }

    /// Delay before the first retry; later retries back off exponentially
    #[inline]
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry.base_delay = delay;
        self
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Whether `name` refers to the configured model, allowing for the implicit `:latest` tag
    fn is_configured_model(&self, name: &str) -> bool {
        name == self.model
            || name
                .strip_suffix(":latest")
                .is_some_and(|base| base == self.model)
    }

    /// Check that the server answers and serves the configured model
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        let models = self
            .list_models()
            .with_context(|| format!("Ollama server at {} is unreachable", self.base_url))?;

        if !models.iter().any(|m| self.is_configured_model(&m.name)) {
            let available: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            warn!(
                "Model {} not found. Available models: {:?}",
                self.model, available
            );
            bail!(
                "Model '{}' is not available. Available models: {:?}",
                self.model,
                available
            );
        }

        info!(
            "Ollama at {} is serving model {}",
            self.base_url, self.model
        );
        Ok(())
    }

    /// Models installed on the server
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response: ModelsResponse = self.get_json("/api/tags")?;
        debug!("Found {} models", response.models.len());
        Ok(response.models)
    }

    /// Generate an embedding for a single text input
    #[inline]
    pub fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Generating embedding for text (length: {})", text.len());

        self.embed_request(&[text.to_string()])?
            .pop()
            .context("Ollama returned no embedding")
    }

    /// Generate embeddings for multiple inputs, `batch_size` texts per request
    #[inline]
    pub fn generate_embeddings_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size as usize) {
            let embeddings = self
                .embed_request(batch)
                .with_context(|| format!("Failed to process batch of {} texts", batch.len()))?;
            results.extend(embeddings);
        }

        debug!("Generated {} embeddings total", results.len());
        Ok(results)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("Failed to build URL for {}", path))
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.endpoint(path)?;
        let body = self
            .retry
            .run(url.as_str(), || {
                self.agent
                    .get(url.as_str())
                    .call()
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .with_context(|| format!("GET {} failed", path))?;

        serde_json::from_str(&body).with_context(|| format!("Failed to parse response from {}", path))
    }

    fn embed_request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = self.endpoint("/api/embed")?;
        let request_json = serde_json::to_string(&EmbedRequest {
            model: &self.model,
            input: texts,
        })
        .context("Failed to serialize embedding request")?;

        let body = self
            .retry
            .run(url.as_str(), || {
                self.agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json")
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to generate embeddings")?;

        let response: EmbedResponse =
            serde_json::from_str(&body).context("Failed to parse embedding response")?;

        if response.embeddings.len() != texts.len() {
            bail!(
                "Ollama returned {} embeddings for {} inputs",
                response.embeddings.len(),
                texts.len()
            );
        }

        Ok(response.embeddings)
    }
}
