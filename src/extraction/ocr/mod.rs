//! OCR over rasterized pages.
//!
//! A [`PageRasterizer`] turns a PDF page into a PNG, the PNG is downscaled to
//! the configured maximum dimension, and an [`OcrEngine`] recognizes spans of
//! text. Spans under the confidence threshold are dropped. Failures on one
//! page never abort the others.

pub mod engines;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use image::ImageFormat;
use image::imageops::FilterType;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ExtractionConfig, OcrEngineKind};

pub use engines::{HttpOcrEngine, TesseractEngine, normalize_paddle_output, normalize_tsv_output};

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("Page rendering failed: {0}")]
    Render(String),
    #[error("OCR engine failed: {0}")]
    Engine(String),
    #[error("Image processing failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("OCR of page {page} timed out after {seconds}s")]
    Timeout { page: usize, seconds: u64 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A piece of recognized text with its confidence in `[0, 1]`
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedSpan {
    pub text: String,
    pub confidence: f32,
}

impl RecognizedSpan {
    #[inline]
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// A PDF written to a scratch directory once per OCR run.
///
/// The directory and everything rendered into it is removed on drop.
#[derive(Debug)]
pub struct StagedPdf {
    dir: TempDir,
    path: PathBuf,
}

impl StagedPdf {
    #[inline]
    pub async fn write(pdf: &[u8]) -> Result<Self, OcrError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("input.pdf");
        tokio::fs::write(&path, pdf).await?;
        Ok(Self { dir, path })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory for per-page output files
    #[inline]
    pub fn scratch_dir(&self) -> &Path {
        self.dir.path()
    }
}

/// Renders one zero-based page of a staged PDF into PNG bytes
#[async_trait]
pub trait PageRasterizer: Send + Sync {
    async fn render_page(
        &self,
        pdf: &StagedPdf,
        page_index: usize,
        dpi: u32,
    ) -> Result<Vec<u8>, OcrError>;
}

/// Recognizes text in a PNG image
#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &'static str;

    async fn recognize(&self, png: &[u8]) -> Result<Vec<RecognizedSpan>, OcrError>;

    async fn health_check(&self) -> Result<(), OcrError>;
}

/// Rasterizes with poppler's `pdftoppm`
#[derive(Debug, Clone)]
pub struct PdftoppmRasterizer {
    binary: PathBuf,
}

impl PdftoppmRasterizer {
    #[inline]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl PageRasterizer for PdftoppmRasterizer {
    async fn render_page(
        &self,
        pdf: &StagedPdf,
        page_index: usize,
        dpi: u32,
    ) -> Result<Vec<u8>, OcrError> {
        let page_number = (page_index + 1).to_string();
        let output_prefix = pdf.scratch_dir().join(format!("page-{}", page_number));

        let output = tokio::process::Command::new(&self.binary)
            .arg("-png")
            .arg("-r")
            .arg(dpi.to_string())
            .arg("-f")
            .arg(&page_number)
            .arg("-l")
            .arg(&page_number)
            .arg("-singlefile")
            .arg(pdf.path())
            .arg(&output_prefix)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| OcrError::Render(format!("Failed to run {}: {}", self.binary.display(), e)))?;

        if !output.status.success() {
            return Err(OcrError::Render(format!(
                "pdftoppm exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let png_path = output_prefix.with_extension("png");
        let png = tokio::fs::read(&png_path).await?;
        if let Err(e) = tokio::fs::remove_file(&png_path).await {
            debug!("Could not remove {}: {}", png_path.display(), e);
        }
        Ok(png)
    }
}

/// Shrink an image so its longest side is at most `max_dimension`, keeping its aspect ratio
#[inline]
pub fn downscale_png(png: &[u8], max_dimension: u32) -> Result<Vec<u8>, OcrError> {
    let image = image::load_from_memory(png)?;
    if image.width().max(image.height()) <= max_dimension {
        return Ok(png.to_vec());
    }

    let resized = image.resize(max_dimension, max_dimension, FilterType::Triangle);
    debug!(
        "Downscaled page image from {}x{} to {}x{}",
        image.width(),
        image.height(),
        resized.width(),
        resized.height()
    );

    let mut buffer = Cursor::new(Vec::new());
    resized.write_to(&mut buffer, ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

/// Text recognized across a document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OcrOutput {
    pub text: String,
    pub pages_processed: usize,
    pub pages_failed: usize,
}

/// Rasterize, downscale, recognize and filter, page by page
pub struct OcrPipeline {
    rasterizer: Arc<dyn PageRasterizer>,
    engine: Arc<dyn OcrEngine>,
    page_limit: usize,
    max_image_dimension: u32,
    render_dpi: u32,
    confidence_threshold: f32,
    page_timeout: Duration,
}

impl std::fmt::Debug for OcrPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcrPipeline")
            .field("engine", &self.engine.name())
            .field("page_limit", &self.page_limit)
            .field("confidence_threshold", &self.confidence_threshold)
            .finish_non_exhaustive()
    }
}

impl OcrPipeline {
    #[inline]
    pub fn new(
        rasterizer: Arc<dyn PageRasterizer>,
        engine: Arc<dyn OcrEngine>,
        config: &ExtractionConfig,
    ) -> Self {
        Self {
            rasterizer,
            engine,
            page_limit: config.ocr_page_limit,
            max_image_dimension: config.max_image_dimension,
            render_dpi: config.render_dpi,
            confidence_threshold: config.ocr_confidence_threshold,
            page_timeout: Duration::from_secs(config.ocr_page_timeout_seconds),
        }
    }

    /// Build the configured engine, or `None` when OCR is disabled
    #[inline]
    pub fn from_config(config: &ExtractionConfig) -> Option<Self> {
        let engine: Arc<dyn OcrEngine> = match config.ocr_engine {
            OcrEngineKind::Disabled => return None,
            OcrEngineKind::Tesseract => Arc::new(TesseractEngine::new(
                &config.tesseract_path,
                &config.tesseract_language,
            )),
            OcrEngineKind::Http => {
                let url = config.ocr_service_url.as_deref()?;
                Arc::new(HttpOcrEngine::new(
                    url,
                    Duration::from_secs(config.ocr_page_timeout_seconds),
                ))
            }
        };
        let rasterizer = Arc::new(PdftoppmRasterizer::new(&config.pdftoppm_path));
        Some(Self::new(rasterizer, engine, config))
    }

    #[inline]
    pub fn engine(&self) -> &Arc<dyn OcrEngine> {
        &self.engine
    }

    /// OCR up to the page limit; failed or timed out pages are skipped
    #[inline]
    pub async fn run(&self, pdf: &[u8], page_count: usize) -> OcrOutput {
        let pages = page_count.min(self.page_limit);
        info!("Running {} OCR on {} pages", self.engine.name(), pages);

        let mut output = OcrOutput::default();
        let staged = match StagedPdf::write(pdf).await {
            Ok(staged) => staged,
            Err(e) => {
                warn!("Could not stage PDF for OCR: {}", e);
                output.pages_failed = pages;
                return output;
            }
        };

        let mut page_texts = Vec::with_capacity(pages);
        for page_index in 0..pages {
            let result = tokio::time::timeout(self.page_timeout, self.ocr_page(&staged, page_index))
                .await
                .unwrap_or_else(|_| {
                    Err(OcrError::Timeout {
                        page: page_index + 1,
                        seconds: self.page_timeout.as_secs(),
                    })
                });

            match result {
                Ok(text) => {
                    output.pages_processed += 1;
                    if !text.is_empty() {
                        page_texts.push(text);
                    }
                }
                Err(e) => {
                    output.pages_failed += 1;
                    warn!("OCR failed on page {}: {}", page_index + 1, e);
                }
            }
        }

        output.text = page_texts.join("\n\n");
        debug!(
            "OCR produced {} chars ({} pages ok, {} failed)",
            output.text.len(),
            output.pages_processed,
            output.pages_failed
        );
        output
    }

    async fn ocr_page(&self, pdf: &StagedPdf, page_index: usize) -> Result<String, OcrError> {
        let png = self
            .rasterizer
            .render_page(pdf, page_index, self.render_dpi)
            .await?;

        let max_dimension = self.max_image_dimension;
        let png = tokio::task::spawn_blocking(move || downscale_png(&png, max_dimension))
            .await
            .map_err(|e| OcrError::Engine(format!("Downscale task failed: {}", e)))??;

        let spans = self.engine.recognize(&png).await?;
        Ok(filter_spans(&spans, self.confidence_threshold))
    }
}

/// Join the text of spans at or above the threshold, one per line
#[inline]
pub fn filter_spans(spans: &[RecognizedSpan], threshold: f32) -> String {
    spans
        .iter()
        .filter(|span| span.confidence >= threshold)
        .map(|span| span.text.trim())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
