#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ConfigError;

/// A contiguous window of words from a document's final text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// The chunk text, words joined by single spaces
    pub text: String,
    /// Zero-based position of this chunk within its document
    pub chunk_index: usize,
    /// Name of the document the chunk was cut from
    pub filename: String,
}

impl Chunk {
    /// Length of the chunk text in characters
    #[inline]
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Configuration for word-window chunking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Number of words in each chunk
    pub chunk_size_words: usize,
    /// Number of words shared by consecutive chunks
    pub overlap_words: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size_words: 300,
            overlap_words: 50,
        }
    }
}

/// Splits text into overlapping fixed-size word windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    #[inline]
    pub fn new(chunk_size_words: usize, overlap_words: usize) -> Result<Self, ConfigError> {
        if chunk_size_words == 0 {
            return Err(ConfigError::InvalidChunkSize(chunk_size_words));
        }
        if overlap_words >= chunk_size_words {
            return Err(ConfigError::OverlapTooLarge {
                overlap: overlap_words,
                size: chunk_size_words,
            });
        }

        Ok(Self {
            chunk_size: chunk_size_words,
            overlap: overlap_words,
        })
    }

    #[inline]
    pub fn from_config(config: &ChunkingConfig) -> Result<Self, ConfigError> {
        Self::new(config.chunk_size_words, config.overlap_words)
    }

    /// Distance in words between the starts of consecutive windows
    #[inline]
    pub fn stride(&self) -> usize {
        self.chunk_size - self.overlap
    }

    /// Split text into word windows.
    ///
    /// A window starts every `chunk_size - overlap` words, so the final windows
    /// may be shorter than `chunk_size` and overlap one another.
    #[inline]
    pub fn split(&self, text: &str) -> Vec<String> {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            return Vec::new();
        }

        let chunks: Vec<String> = (0..words.len())
            .step_by(self.stride())
            .map(|start| {
                let end = (start + self.chunk_size).min(words.len());
                words[start..end].join(" ")
            })
            .filter(|chunk| !chunk.trim().is_empty())
            .collect();

        debug!(
            "Split {} words into {} chunks (size {}, overlap {})",
            words.len(),
            chunks.len(),
            self.chunk_size,
            self.overlap
        );
        chunks
    }

    /// Split text and tag each window with its document and position
    #[inline]
    pub fn chunk_document(&self, filename: &str, text: &str) -> Vec<Chunk> {
        self.split(text)
            .into_iter()
            .enumerate()
            .map(|(chunk_index, text)| Chunk {
                text,
                chunk_index,
                filename: filename.to_string(),
            })
            .collect()
    }
}

impl Default for Chunker {
    #[inline]
    fn default() -> Self {
        let config = ChunkingConfig::default();
        Self {
            chunk_size: config.chunk_size_words,
            overlap: config.overlap_words,
        }
    }
}
