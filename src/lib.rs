use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Document error: {0}")]
    Document(#[from] extraction::pdf::DocumentError),

    #[error("No extractable text found in document")]
    NoExtractableText,

    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Answer generation error: {0}")]
    Answer(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl RagError {
    /// Whether the error was caused by the caller's input rather than by the system
    #[inline]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Document(_)
                | Self::InvalidUpload(_)
                | Self::InvalidRequest(_)
                | Self::NoExtractableText
        )
    }
}

pub mod answer;
pub mod commands;
pub mod config;
pub mod database;
pub mod door_schedule;
pub mod embeddings;
pub mod extraction;
pub mod http;
pub mod indexer;
pub mod mcp;
