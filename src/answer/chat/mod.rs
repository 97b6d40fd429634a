
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::ChatMessage;
use crate::config::LlmConfig;
use crate::http::{RetryPolicy, agent_with_timeout};

/// Blocking client for an OpenAI-compatible `/chat/completions` endpoint
#[derive(Debug, Clone)]
pub struct ChatClient {
    endpoint: Url,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    agent: ureq::Agent,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatClient {
    #[inline]
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let mut base = config.base_url.trim_end_matches('/').to_string();
        base.push('/');
        let endpoint = Url::parse(&base)
            .and_then(|base| base.join("chat/completions"))
            .with_context(|| format!("Invalid LLM base URL: {}", config.base_url))?;

        Ok(Self {
            endpoint,
            model: config.model.clone(),
            api_key: config.api_key(),
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
            agent: agent_with_timeout(Duration::from_secs(config.timeout_seconds)),
            // Hosted providers answer bursts with 429
            retry: RetryPolicy {
                retry_rate_limits: true,
                ..RetryPolicy::default()
            },
        })
    }

    #[inline]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry.attempts = attempts.max(1);
        self
    }

    #[inline]
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry.base_delay = delay;
        self
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[inline]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Send the conversation and return the first choice's text
    #[inline]
    pub fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = CompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
        };
        let request_json =
            serde_json::to_string(&request).context("Failed to serialize completion request")?;

        debug!(
            "Requesting completion from {} with {} messages",
            self.model,
            messages.len()
        );

        let response_text = self
            .retry
            .run(self.endpoint.as_str(), || {
                let mut request = self
                    .agent
                    .post(self.endpoint.as_str())
                    .header("Content-Type", "application/json");
                if let Some(key) = &self.api_key {
                    request = request.header("Authorization", &format!("Bearer {}", key));
                }
                request
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Chat completion request failed")?;

        let response: CompletionResponse = serde_json::from_str(&response_text)
            .context("Failed to parse chat completion response")?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| anyhow::anyhow!("Chat completion returned no content"))
    }
}
