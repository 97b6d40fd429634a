// Extraction module
// Native text, structure detection, OCR fallback and table recovery

pub mod detector;
pub mod ocr;
pub mod pdf;
pub mod quality;
pub mod tables;


use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ExtractionConfig;
use crate::{RagError, Result};

use detector::{StructureSignals, detect_structure};
use ocr::OcrPipeline;
use pdf::PdfDocument;
use quality::{QualityReport, TextQualityAssessor};
use tables::{Table, TableRecoveryEngine, dump_tables};

const OCR_SEPARATOR: &str = "\n\n--- OCR ---\n\n";

/// Why OCR did or did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrReason {
    ForcedByUser,
    HasImagesAlwaysRunOcr,
    TableStructureDetected,
    InsufficientText,
    TooFewWordsPerPage,
    ExcessiveNoise,
    GoodTextQuality,
}

impl OcrReason {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ForcedByUser => "forced_by_user",
            Self::HasImagesAlwaysRunOcr => "has_images_always_run_ocr",
            Self::TableStructureDetected => "table_structure_detected",
            Self::InsufficientText => "insufficient_text",
            Self::TooFewWordsPerPage => "too_few_words_per_page",
            Self::ExcessiveNoise => "excessive_noise",
            Self::GoodTextQuality => "good_text_quality",
        }
    }
}

impl fmt::Display for OcrReason {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExtractionDecision {
    pub use_ocr: bool,
    pub reason: OcrReason,
    pub tables_attempted: bool,
}

/// Decide whether OCR runs.
///
/// Priority: the caller's request, then images, then table layout, then the
/// quality verdict on the native text.
#[inline]
pub fn decide_ocr(
    force_ocr: bool,
    signals: &StructureSignals,
    quality: &QualityReport,
) -> (bool, OcrReason) {
    if force_ocr {
        (true, OcrReason::ForcedByUser)
    } else if signals.has_images {
        (true, OcrReason::HasImagesAlwaysRunOcr)
    } else if signals.has_table_layout {
        (true, OcrReason::TableStructureDetected)
    } else if quality.is_acceptable() {
        (false, OcrReason::GoodTextQuality)
    } else {
        (true, quality.reason)
    }
}

#[inline]
pub fn tables_warranted(
    force_ocr: bool,
    signals: &StructureSignals,
    native_text: &str,
    short_text_chars: usize,
) -> bool {
    force_ocr || signals.has_table_layout || native_text.trim().chars().count() < short_text_chars
}

/// Prefer OCR text when it is substantially longer, otherwise keep both
#[inline]
pub fn merge_texts(native: &str, ocr: &str, preference_ratio: f32) -> String {
    let native = native.trim();
    let ocr = ocr.trim();

    match (native.is_empty(), ocr.is_empty()) {
        (true, true) => String::new(),
        (false, true) => native.to_string(),
        (true, false) => ocr.to_string(),
        (false, false) => {
            let native_len = native.chars().count() as f32;
            let ocr_len = ocr.chars().count() as f32;
            if ocr_len > preference_ratio * native_len {
                ocr.to_string()
            } else {
                format!("{native}{OCR_SEPARATOR}{ocr}")
            }
        }
    }
}

/// Final text and everything learned on the way
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionOutcome {
    pub text: String,
    pub tables: Vec<Table>,
    pub page_count: usize,
    pub decision: ExtractionDecision,
    pub native_chars: usize,
    pub ocr_chars: usize,
}

/// Output of the synchronous half of extraction
#[derive(Debug)]
struct NativeAnalysis {
    page_count: usize,
    text: String,
    signals: StructureSignals,
    quality: QualityReport,
    tables: Option<Vec<Table>>,
}

/// Composes native extraction, detection, OCR and table recovery
#[derive(Debug)]
pub struct ExtractionOrchestrator {
    config: ExtractionConfig,
    assessor: TextQualityAssessor,
    ocr: Option<OcrPipeline>,
    tables: Arc<TableRecoveryEngine>,
}

impl ExtractionOrchestrator {
    /// Orchestrator with the configured OCR engine
    #[inline]
    pub fn new(config: &ExtractionConfig) -> Self {
        Self::with_ocr(config, OcrPipeline::from_config(config))
    }

    #[inline]
    pub fn with_ocr(config: &ExtractionConfig, ocr: Option<OcrPipeline>) -> Self {
        Self {
            config: config.clone(),
            assessor: TextQualityAssessor::from_config(config),
            ocr,
            tables: Arc::new(TableRecoveryEngine::new(config.ocr_page_limit)),
        }
    }

    #[inline]
    pub fn ocr(&self) -> Option<&OcrPipeline> {
        self.ocr.as_ref()
    }

    /// Extract the final text of a PDF.
    ///
    /// Structural problems are fatal. OCR and table failures only shrink the
    /// result; if nothing at all is recovered the call fails with
    /// [`RagError::NoExtractableText`].
    #[inline]
    pub async fn extract(&self, bytes: &[u8], force_ocr: bool) -> Result<ExtractionOutcome> {
        let analysis = self.analyze_native(bytes.to_vec(), force_ocr).await?;

        let (use_ocr, reason) = decide_ocr(force_ocr, &analysis.signals, &analysis.quality);
        let decision = ExtractionDecision {
            use_ocr,
            reason,
            tables_attempted: analysis.tables.is_some(),
        };
        info!(
            "Extraction decision: use_ocr={} reason={} tables_attempted={} (chars={}, words/page={:.1}, noise={:.2})",
            decision.use_ocr,
            decision.reason,
            decision.tables_attempted,
            analysis.quality.chars,
            analysis.quality.words_per_page,
            analysis.quality.noise_ratio
        );

        let ocr_text = match (use_ocr, &self.ocr) {
            (true, Some(pipeline)) => pipeline.run(bytes, analysis.page_count).await.text,
            (true, None) => {
                warn!("OCR warranted ({}) but no OCR engine is configured", reason);
                String::new()
            }
            (false, _) => String::new(),
        };

        let tables = analysis.tables.unwrap_or_default();
        let primary = merge_texts(&analysis.text, &ocr_text, self.config.ocr_preference_ratio);
        let dump = dump_tables(&tables);
        let text = match (primary.is_empty(), dump.is_empty()) {
            (_, true) => primary,
            (true, false) => dump,
            (false, false) => format!("{primary}\n\n{dump}"),
        };

        if text.trim().is_empty() {
            warn!("No text recovered from {} pages", analysis.page_count);
            return Err(RagError::NoExtractableText);
        }

        debug!(
            "Final text: {} chars from {} native, {} OCR and {} tables",
            text.len(),
            analysis.text.len(),
            ocr_text.len(),
            tables.len()
        );

        Ok(ExtractionOutcome {
            text,
            tables,
            page_count: analysis.page_count,
            decision,
            native_chars: analysis.text.chars().count(),
            ocr_chars: ocr_text.chars().count(),
        })
    }

    async fn analyze_native(&self, bytes: Vec<u8>, force_ocr: bool) -> Result<NativeAnalysis> {
        let detection_page_limit = self.config.detection_page_limit;
        let short_text_chars = self.config.short_text_chars;
        let assessor = self.assessor;
        let table_engine = Arc::clone(&self.tables);

        tokio::task::spawn_blocking(move || -> Result<NativeAnalysis> {
            let document = PdfDocument::load(&bytes)?;
            let page_count = document.page_count();

            let text = (0..page_count)
                .map(|page_index| document.page_text(page_index))
                .filter(|page| !page.trim().is_empty())
                .collect::<Vec<_>>()
                .join("\n\n");

            let signals = detect_structure(&document, detection_page_limit);
            let quality = assessor.assess(&text, page_count);
            debug!(
                "Native extraction: {} pages, {} chars, signals {:?}",
                page_count,
                text.len(),
                signals
            );

            let tables = tables_warranted(force_ocr, &signals, &text, short_text_chars)
                .then(|| table_engine.recover(&document));

            Ok(NativeAnalysis {
                page_count,
                text,
                signals,
                quality,
                tables,
            })
        })
        .await
        .map_err(|e| RagError::Other(anyhow::anyhow!("Extraction task failed: {}", e)))?
    }
}
