use super::*;
use image::{DynamicImage, GenericImageView, RgbImage};
use std::sync::Mutex;

fn png(width: u32, height: u32) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::new(width, height));
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .expect("PNG encoding should succeed");
    buffer.into_inner()
}

/// Renders blank pages, failing or stalling on chosen pages
#[derive(Default)]
struct FakeRasterizer {
    failing_page: Option<usize>,
    slow_page: Option<usize>,
    rendered: Mutex<Vec<usize>>,
    /// Path and contents of the staged PDF seen by each call
    sources: Mutex<Vec<(PathBuf, Vec<u8>)>>,
}

#[async_trait]
impl PageRasterizer for FakeRasterizer {
    async fn render_page(
        &self,
        pdf: &StagedPdf,
        page_index: usize,
        _dpi: u32,
    ) -> Result<Vec<u8>, OcrError> {
        let contents = tokio::fs::read(pdf.path()).await?;
        self.sources
            .lock()
            .expect("lock should not be poisoned")
            .push((pdf.path().to_path_buf(), contents));
        self.rendered
            .lock()
            .expect("lock should not be poisoned")
            .push(page_index);
        if self.failing_page == Some(page_index) {
            return Err(OcrError::Render("broken page".to_string()));
        }
        if self.slow_page == Some(page_index) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        Ok(png(600, 300))
    }
}

/// Returns fixed spans and records the size of every image it sees
struct FakeEngine {
    spans: Vec<RecognizedSpan>,
    sizes: Mutex<Vec<(u32, u32)>>,
}

impl FakeEngine {
    fn new(spans: Vec<RecognizedSpan>) -> Self {
        Self {
            spans,
            sizes: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl OcrEngine for FakeEngine {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn recognize(&self, png: &[u8]) -> Result<Vec<RecognizedSpan>, OcrError> {
        let image = image::load_from_memory(png)?;
        self.sizes
            .lock()
            .expect("lock should not be poisoned")
            .push(image.dimensions());
        Ok(self.spans.clone())
    }

    async fn health_check(&self) -> Result<(), OcrError> {
        Ok(())
    }
}

fn config() -> ExtractionConfig {
    ExtractionConfig {
        ocr_page_limit: 3,
        ocr_page_timeout_seconds: 2,
        max_image_dimension: 200,
        ..ExtractionConfig::default()
    }
}

#[test]
fn downscale_preserves_aspect_ratio() {
    let resized = downscale_png(&png(900, 450), 300).expect("downscale should succeed");
    let image = image::load_from_memory(&resized).expect("valid PNG");
    assert_eq!(image.dimensions(), (300, 150));
}

#[test]
fn small_images_are_untouched() {
    let original = png(800, 600);
    let result = downscale_png(&original, 1200).expect("downscale should succeed");
    assert_eq!(result, original);
}

#[test]
fn downscale_rejects_non_images() {
    assert!(matches!(
        downscale_png(b"not a png", 1200),
        Err(OcrError::Image(_))
    ));
}

#[test]
fn low_confidence_spans_are_dropped() {
    let spans = vec![
        RecognizedSpan::new("Door Schedule", 0.9),
        RecognizedSpan::new("smudge", 0.2),
        RecognizedSpan::new("D-1 90x210", 0.5),
        RecognizedSpan::new("  ", 0.99),
    ];
    assert_eq!(filter_spans(&spans, 0.5), "Door Schedule\nD-1 90x210");
}

#[tokio::test]
async fn pipeline_respects_page_limit_and_downscales() {
    let rasterizer = Arc::new(FakeRasterizer::default());
    let engine = Arc::new(FakeEngine::new(vec![RecognizedSpan::new("text", 0.9)]));
    let pipeline = OcrPipeline::new(
        Arc::clone(&rasterizer) as Arc<dyn PageRasterizer>,
        Arc::clone(&engine) as Arc<dyn OcrEngine>,
        &config(),
    );

    let output = pipeline.run(b"%PDF", 10).await;

    assert_eq!(output.pages_processed, 3);
    assert_eq!(output.pages_failed, 0);
    assert_eq!(output.text, "text\n\ntext\n\ntext");
    assert_eq!(
        *rasterizer.rendered.lock().expect("lock should not be poisoned"),
        vec![0, 1, 2]
    );
    assert!(
        engine
            .sizes
            .lock()
            .expect("lock should not be poisoned")
            .iter()
            .all(|&(w, h)| (w, h) == (200, 100))
    );
}

#[tokio::test]
async fn pdf_is_staged_once_per_run() {
    let rasterizer = Arc::new(FakeRasterizer::default());
    let engine = Arc::new(FakeEngine::new(vec![RecognizedSpan::new("text", 0.9)]));
    let pipeline = OcrPipeline::new(
        Arc::clone(&rasterizer) as Arc<dyn PageRasterizer>,
        engine,
        &config(),
    );

    let output = pipeline.run(b"%PDF-1.5 staged", 3).await;
    assert_eq!(output.pages_processed, 3);

    let sources = rasterizer
        .sources
        .lock()
        .expect("lock should not be poisoned")
        .clone();
    assert_eq!(sources.len(), 3);
    assert!(sources.iter().all(|(path, _)| *path == sources[0].0));
    assert!(sources.iter().all(|(_, contents)| contents == b"%PDF-1.5 staged"));
    assert!(!sources[0].0.exists());
}

#[tokio::test]
async fn failing_page_is_skipped() {
    let rasterizer = Arc::new(FakeRasterizer {
        failing_page: Some(1),
        ..FakeRasterizer::default()
    });
    let engine = Arc::new(FakeEngine::new(vec![RecognizedSpan::new("ok", 0.9)]));
    let pipeline = OcrPipeline::new(rasterizer, engine, &config());

    let output = pipeline.run(b"%PDF", 3).await;

    assert_eq!(output.pages_processed, 2);
    assert_eq!(output.pages_failed, 1);
    assert_eq!(output.text, "ok\n\nok");
}

#[tokio::test]
async fn slow_page_times_out() {
    let rasterizer = Arc::new(FakeRasterizer {
        slow_page: Some(0),
        ..FakeRasterizer::default()
    });
    let engine = Arc::new(FakeEngine::new(vec![RecognizedSpan::new("late", 0.9)]));
    let pipeline = OcrPipeline::new(rasterizer, engine, &config());

    let output = pipeline.run(b"%PDF", 2).await;

    assert_eq!(output.pages_failed, 1);
    assert_eq!(output.pages_processed, 1);
    assert_eq!(output.text, "late");
}

#[test]
fn disabled_engine_builds_no_pipeline() {
    let config = ExtractionConfig {
        ocr_engine: OcrEngineKind::Disabled,
        ..ExtractionConfig::default()
    };
    assert!(OcrPipeline::from_config(&config).is_none());

    let tesseract = OcrPipeline::from_config(&ExtractionConfig::default())
        .expect("tesseract pipeline should be built");
    assert_eq!(tesseract.engine().name(), "tesseract");
}
