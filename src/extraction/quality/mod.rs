
use crate::config::ExtractionConfig;
use crate::extraction::OcrReason;

const BASIC_PUNCTUATION: &str = ".,;:!?'\"()[]{}-_/\\%&@#*+=$<>|~";

/// Verdict on natively extracted text
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityReport {
    pub reason: OcrReason,
    pub chars: usize,
    pub words_per_page: f32,
    pub noise_ratio: f32,
}

impl QualityReport {
    #[inline]
    pub fn is_acceptable(&self) -> bool {
        self.reason == OcrReason::GoodTextQuality
    }
}

/// Scores native text by length, density and noise
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextQualityAssessor {
    min_text_chars: usize,
    min_words_per_page: f32,
    max_noise_ratio: f32,
}

impl Default for TextQualityAssessor {
    fn default() -> Self {
        Self::from_config(&ExtractionConfig::default())
    }
}

impl TextQualityAssessor {
    #[inline]
    pub fn new(min_text_chars: usize, min_words_per_page: f32, max_noise_ratio: f32) -> Self {
        Self {
            min_text_chars,
            min_words_per_page,
            max_noise_ratio,
        }
    }

    #[inline]
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self::new(
            config.min_text_chars,
            config.min_words_per_page,
            config.max_noise_ratio,
        )
    }

    /// Rules apply in order and the first failure decides the reason
    #[inline]
    pub fn assess(&self, text: &str, page_count: usize) -> QualityReport {
        let trimmed = text.trim();
        let chars = trimmed.chars().count();
        let words = trimmed.split_whitespace().count();
        let words_per_page = words as f32 / page_count.max(1) as f32;
        let noise_ratio = noise_ratio(trimmed);

        let reason = if chars < self.min_text_chars {
            OcrReason::InsufficientText
        } else if words_per_page < self.min_words_per_page {
            OcrReason::TooFewWordsPerPage
        } else if noise_ratio > self.max_noise_ratio {
            OcrReason::ExcessiveNoise
        } else {
            OcrReason::GoodTextQuality
        };

        QualityReport {
            reason,
            chars,
            words_per_page,
            noise_ratio,
        }
    }
}

/// Share of characters that are not alphanumeric, whitespace or basic punctuation
#[inline]
pub fn noise_ratio(text: &str) -> f32 {
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }

    let noisy = text
        .chars()
        .filter(|c| !(c.is_alphanumeric() || c.is_whitespace() || BASIC_PUNCTUATION.contains(*c)))
        .count();

    noisy as f32 / total as f32
}
