// Answer module
// Prompting the hosted chat model with retrieved chunks and conversation memory

pub mod chat;


use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use crate::database::ScoredChunk;
use crate::{RagError, Result};

pub use chat::ChatClient;

/// Returned in place of an answer whenever the chat model cannot be reached
pub const FALLBACK_ANSWER: &str =
    "[Answer unavailable] I'm having trouble generating a response right now. Please try again shortly.";

/// Returned without asking the model when retrieval found nothing
pub const NO_CONTEXT_ANSWER: &str =
    "I couldn't find relevant information in the uploaded documents to answer your question.";

const SYSTEM_PROMPT: &str = "You are a helpful assistant specialized in construction and architectural documents. \
You help users understand door and window schedules, calculate areas, and provide cost estimates.\n\
- Give a direct, clear answer (2-3 sentences maximum)\n\
- Only use information from the provided context\n\
- Be specific about doors, windows, measurements, and costs\n\
- If you don't know the answer from the context, say so clearly\n\
- Use simple punctuation and avoid markdown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    #[inline]
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A hosted chat-completion model
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

#[async_trait]
impl ChatModel for ChatClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let client = self.clone();
        let messages = messages.to_vec();
        tokio::task::spawn_blocking(move || ChatClient::complete(&client, &messages))
            .await
            .map_err(|e| RagError::Answer(format!("Chat task failed: {}", e)))?
            .map_err(|e| RagError::Answer(format!("{:#}", e)))
    }
}

/// Label derived from the best retrieval score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub const HIGH_THRESHOLD: f32 = 0.7;
    pub const MEDIUM_THRESHOLD: f32 = 0.4;

    #[inline]
    pub fn from_score(score: f32) -> Self {
        if score >= Self::HIGH_THRESHOLD {
            Self::High
        } else if score >= Self::MEDIUM_THRESHOLD {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// Confidence for a result set, `Low` when nothing was retrieved
    #[inline]
    pub fn from_hits(hits: &[ScoredChunk]) -> Self {
        hits.iter()
            .map(|hit| hit.score)
            .reduce(f32::max)
            .map_or(Self::Low, Self::from_score)
    }

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl std::fmt::Display for Confidence {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    pub filename: String,
    pub chunk_index: u32,
    pub score: f32,
}

impl From<&ScoredChunk> for Citation {
    #[inline]
    fn from(hit: &ScoredChunk) -> Self {
        Self {
            filename: hit.metadata.filename.clone(),
            chunk_index: hit.metadata.chunk_index,
            score: hit.score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub answer: String,
    pub confidence: Confidence,
    pub citations: Vec<Citation>,
    /// The chat model failed and `answer` is the fallback text
    pub fallback: bool,
}

/// One completed question and answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub question: String,
    pub answer: String,
}

/// Process-wide bounded conversation history
#[derive(Debug)]
pub struct ConversationMemory {
    turns: Mutex<VecDeque<Turn>>,
    limit: usize,
}

impl ConversationMemory {
    #[inline]
    pub fn new(limit: usize) -> Self {
        Self {
            turns: Mutex::new(VecDeque::with_capacity(limit)),
            limit,
        }
    }

    #[inline]
    pub fn record(&self, question: &str, answer: &str) {
        if self.limit == 0 {
            return;
        }
        let mut turns = self.turns.lock().unwrap_or_else(|e| e.into_inner());
        while turns.len() >= self.limit {
            turns.pop_front();
        }
        turns.push_back(Turn {
            question: question.to_string(),
            answer: answer.to_string(),
        });
    }

    /// Oldest first
    #[inline]
    pub fn turns(&self) -> Vec<Turn> {
        self.turns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.turns.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every turn, returning how many were dropped
    #[inline]
    pub fn clear(&self) -> usize {
        let mut turns = self.turns.lock().unwrap_or_else(|e| e.into_inner());
        let dropped = turns.len();
        turns.clear();
        dropped
    }
}

/// Build the chat messages for a question.
///
/// Retrieved chunks go into the final user message, previous turns are
/// replayed as user/assistant pairs.
#[inline]
pub fn build_messages(question: &str, hits: &[ScoredChunk], history: &[Turn]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() * 2 + 2);
    messages.push(ChatMessage::new(ChatRole::System, SYSTEM_PROMPT));

    for turn in history {
        messages.push(ChatMessage::new(ChatRole::User, turn.question.as_str()));
        messages.push(ChatMessage::new(ChatRole::Assistant, turn.answer.as_str()));
    }

    let mut prompt = String::from("Context from document:\n");
    for hit in hits {
        let _ = writeln!(
            prompt,
            "[{} #{}] {}\n",
            hit.metadata.filename, hit.metadata.chunk_index, hit.metadata.text
        );
    }
    let _ = write!(prompt, "\nQuestion: {}", question.trim());
    messages.push(ChatMessage::new(ChatRole::User, prompt));

    messages
}

/// Turns retrieved chunks into an answer, never failing
pub struct AnswerGenerator {
    model: Arc<dyn ChatModel>,
    memory: ConversationMemory,
    timeout: Duration,
}

impl std::fmt::Debug for AnswerGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerGenerator")
            .field("memory", &self.memory)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl AnswerGenerator {
    #[inline]
    pub fn new(model: Arc<dyn ChatModel>, history_limit: usize, timeout: Duration) -> Self {
        Self {
            model,
            memory: ConversationMemory::new(history_limit),
            timeout,
        }
    }

    #[inline]
    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    #[inline]
    pub fn model(&self) -> &Arc<dyn ChatModel> {
        &self.model
    }

    /// Answer `question` from `hits`.
    ///
    /// Without hits the model is not asked and [`NO_CONTEXT_ANSWER`] comes
    /// back with low confidence. Model errors and timeouts produce
    /// [`FALLBACK_ANSWER`]. Only answers from the model are remembered.
    #[inline]
    pub async fn answer(&self, question: &str, hits: &[ScoredChunk]) -> Answer {
        if hits.is_empty() {
            debug!("No context retrieved, skipping the chat model");
            return Answer {
                answer: NO_CONTEXT_ANSWER.to_string(),
                confidence: Confidence::Low,
                citations: Vec::new(),
                fallback: false,
            };
        }

        let messages = build_messages(question, hits, &self.memory.turns());
        let confidence = Confidence::from_hits(hits);
        let citations = hits.iter().map(Citation::from).collect();

        debug!(
            "Asking chat model with {} context chunks (confidence {})",
            hits.len(),
            confidence
        );

        let reply = match tokio::time::timeout(self.timeout, self.model.complete(&messages)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(RagError::Timeout(format!(
                "Chat model did not answer within {:?}",
                self.timeout
            ))),
        };

        match reply {
            Ok(reply) => {
                self.memory.record(question, &reply);
                Answer {
                    answer: reply,
                    confidence,
                    citations,
                    fallback: false,
                }
            }
            Err(e) => {
                warn!("Answer generation failed, returning fallback: {}", e);
                Answer {
                    answer: FALLBACK_ANSWER.to_string(),
                    confidence,
                    citations,
                    fallback: true,
                }
            }
        }
    }
}
