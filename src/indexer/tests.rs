use super::*;
use crate::answer::{ChatMessage, ChatModel, Confidence, NO_CONTEXT_ANSWER};
use crate::config::{DoorScheduleConfig, ExtractionConfig};
use crate::extraction::OcrReason;
use crate::extraction::pdf::DocumentError;
use crate::extraction::pdf::fixtures::{PageSpec, build_encrypted_pdf, build_pdf};
use async_trait::async_trait;
use std::sync::Mutex;
use tempfile::TempDir;

const AXES: [&str; 4] = ["door", "size", "wood", "window"];

/// Counts keyword occurrences, optionally slowly or not at all
struct KeywordBackend {
    delay: Duration,
    fail: bool,
}

#[async_trait]
impl EmbeddingBackend for KeywordBackend {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(RagError::Embedding("backend offline".to_string()));
        }
        Ok(texts
            .iter()
            .map(|text| {
                let lower = text.to_lowercase();
                let mut vector: Vec<f32> = AXES
                    .iter()
                    .map(|axis| lower.matches(axis).count() as f32)
                    .collect();
                vector.push(0.5);
                vector
            })
            .collect())
    }

    async fn health_check(&self) -> Result<()> {
        if self.fail {
            Err(RagError::Embedding("backend offline".to_string()))
        } else {
            Ok(())
        }
    }
}

struct EchoModel {
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl ChatModel for EchoModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let last = messages
            .last()
            .map(|message| message.content.clone())
            .unwrap_or_default();
        self.prompts
            .lock()
            .expect("lock should not be poisoned")
            .push(last);
        Ok("Door D-1 is 90 by 210 cm.".to_string())
    }
}

const CLEAN_LINES: [&str; 5] = [
    "Door Schedule: D-1 90x210 wood",
    "The main entrance uses a solid timber door with a painted frame.",
    "All interior doors follow the same hardware specification as the entrance.",
    "Fire rated doors are marked on the floor plans and in the hardware list.",
    "Finishes are to be approved by the architect before installation begins.",
];

struct Harness {
    pipeline: Pipeline,
    model: Arc<EchoModel>,
    _temp_dir: TempDir,
}

fn harness_with(backend: KeywordBackend) -> Harness {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = ExtractionConfig::default();

    let embedder = Embedder::new(Arc::new(backend), EmbeddingCache::new(), 5, 16);
    let store = VectorStore::new(
        None,
        SnapshotStore::new(temp_dir.path().join("snapshots")),
        embedder,
        Chunker::default(),
        StoreSettings::default(),
    );

    let model = Arc::new(EchoModel {
        prompts: Mutex::new(Vec::new()),
    });
    let answers = AnswerGenerator::new(
        Arc::clone(&model) as Arc<dyn ChatModel>,
        4,
        Duration::from_secs(5),
    );

    let pipeline = Pipeline::new(ExtractionOrchestrator::with_ocr(&config, None), store, answers)
        .with_door_schedule(DoorScheduleParser::from_config(&DoorScheduleConfig::default()))
        .with_upload_limits(64 * 1024, Duration::from_secs(30))
        .with_top_k(3);

    Harness {
        pipeline,
        model,
        _temp_dir: temp_dir,
    }
}

fn harness() -> Harness {
    harness_with(KeywordBackend {
        delay: Duration::ZERO,
        fail: false,
    })
}

fn clean_pdf() -> Vec<u8> {
    build_pdf(&[PageSpec::text(&CLEAN_LINES)])
}

#[tokio::test]
async fn clean_pdf_is_stored_without_ocr() {
    let harness = harness();

    let report = harness
        .pipeline
        .upload("plans.pdf", &clean_pdf(), false)
        .await
        .expect("upload succeeds");

    assert_eq!(report.filename, "plans.pdf");
    assert_eq!(report.page_count, 1);
    assert!(!report.decision.use_ocr);
    assert_eq!(report.decision.reason, OcrReason::GoodTextQuality);
    assert_eq!(report.chunks_stored, 1);
    assert_eq!(report.total_vectors, 1);
    assert_eq!(report.storage_method, StorageMethod::LocalSnapshot);
    assert!(report.snapshot_path.is_some());
}

#[tokio::test]
async fn door_schedule_is_priced_on_upload() {
    let harness = harness();

    let report = harness
        .pipeline
        .upload("plans.pdf", &clean_pdf(), false)
        .await
        .expect("upload succeeds");

    assert_eq!(report.door_costs.len(), 1);
    let door = &report.door_costs[0];
    assert_eq!(door.entry.door_id, "D-1");
    assert_eq!(door.area_sqm, Some(1.89));
    assert_eq!(report.door_total_cost, door.total_cost);
}

#[tokio::test]
async fn question_retrieves_uploaded_chunk() {
    let harness = harness();
    harness
        .pipeline
        .upload("plans.pdf", &clean_pdf(), false)
        .await
        .expect("upload succeeds");

    let answer = harness
        .pipeline
        .ask("what is the door size")
        .await
        .expect("question answered");

    assert!(!answer.fallback);
    assert_eq!(answer.answer, "Door D-1 is 90 by 210 cm.");
    assert_eq!(answer.citations.len(), 1);
    assert_eq!(answer.citations[0].filename, "plans.pdf");
    assert_eq!(answer.citations[0].chunk_index, 0);

    let prompts = harness.model.prompts.lock().expect("lock should not be poisoned");
    assert!(prompts[0].contains("D-1 90x210 wood"));
}

#[tokio::test]
async fn rejected_uploads_are_client_errors() {
    let harness = harness();
    let pdf = clean_pdf();

    for (filename, bytes) in [
        ("plans.docx", pdf.clone()),
        ("plans.pdf", Vec::new()),
        ("plans.pdf", vec![b'%'; 64 * 1024 + 1]),
    ] {
        let error = harness
            .pipeline
            .upload(filename, &bytes, false)
            .await
            .expect_err("upload should be rejected");
        assert!(matches!(error, RagError::InvalidUpload(_)), "{error}");
        assert!(error.is_client_error());
    }
}

#[tokio::test]
async fn corrupt_and_encrypted_pdfs_are_rejected() {
    let harness = harness();

    let corrupt = harness
        .pipeline
        .upload("broken.pdf", b"%PDF-1.4 this is not really a pdf", false)
        .await
        .expect_err("corrupt pdf should fail");
    assert!(matches!(corrupt, RagError::Document(DocumentError::Corrupt(_))));
    assert!(corrupt.is_client_error());

    let encrypted = harness
        .pipeline
        .upload("secret.pdf", &build_encrypted_pdf(), false)
        .await
        .expect_err("encrypted pdf should fail");
    assert!(matches!(encrypted, RagError::Document(DocumentError::Encrypted)));
}

#[tokio::test]
async fn slow_uploads_time_out() {
    let mut harness = harness_with(KeywordBackend {
        delay: Duration::from_secs(5),
        fail: false,
    });
    harness.pipeline = harness
        .pipeline
        .with_upload_limits(64 * 1024, Duration::from_millis(100));

    let error = harness
        .pipeline
        .upload("plans.pdf", &clean_pdf(), false)
        .await
        .expect_err("upload should time out");

    assert!(matches!(error, RagError::Timeout(_)));
}

#[tokio::test]
async fn retrieval_failure_answers_without_the_model() {
    let harness = harness_with(KeywordBackend {
        delay: Duration::ZERO,
        fail: true,
    });

    let answer = harness
        .pipeline
        .ask("what is the door size")
        .await
        .expect("question answered");

    assert!(answer.citations.is_empty());
    assert_eq!(answer.confidence, Confidence::Low);
    assert_eq!(answer.answer, NO_CONTEXT_ANSWER);
    assert!(!answer.fallback);
    assert!(
        harness
            .model
            .prompts
            .lock()
            .expect("lock should not be poisoned")
            .is_empty()
    );
}

#[tokio::test]
async fn empty_question_is_rejected() {
    let harness = harness();
    assert!(matches!(
        harness.pipeline.ask("   ").await,
        Err(RagError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn upload_file_reads_from_disk() {
    let harness = harness();
    let dir = TempDir::new().expect("should create temp dir");
    let path = dir.path().join("Floor Plan.PDF");
    std::fs::write(&path, clean_pdf()).expect("write pdf");

    let report = harness
        .pipeline
        .upload_file(&path, false)
        .await
        .expect("upload succeeds");

    assert_eq!(report.filename, "Floor Plan.PDF");
    assert_eq!(report.chunks_stored, 1);
}

#[tokio::test]
async fn clearing_removes_vectors_and_memory() {
    let harness = harness();
    harness
        .pipeline
        .upload("plans.pdf", &clean_pdf(), false)
        .await
        .expect("upload succeeds");
    harness
        .pipeline
        .ask("what is the door size")
        .await
        .expect("question answered");

    let report = harness.pipeline.clear_vectors().await.expect("clear succeeds");
    assert!(report.snapshot_files_removed >= 1);
    assert!(
        harness
            .pipeline
            .search("door", 5)
            .await
            .expect("search succeeds")
            .is_empty()
    );

    assert_eq!(harness.pipeline.clear_memory(), 1);
    assert_eq!(harness.pipeline.clear_memory(), 0);
}

#[tokio::test]
async fn health_reports_dependencies() {
    let harness = harness();
    let health = harness.pipeline.health().await;

    assert!(health.ready);
    assert!(health.embedding.ok);
    assert!(health.snapshot.ok);
    assert_eq!(health.remote_index, None);
    assert_eq!(health.ocr, None);

    let offline = harness_with(KeywordBackend {
        delay: Duration::ZERO,
        fail: true,
    });
    let health = offline.pipeline.health().await;
    assert!(!health.ready);
    assert!(!health.embedding.ok);
    assert!(health.embedding.detail.contains("backend offline"));
}

#[test]
fn upload_validation_messages() {
    assert!(validate_upload("a.pdf", 10, 100).is_ok());
    assert!(validate_upload("A.PDF", 10, 100).is_ok());

    let wrong = validate_upload("dir/notes.txt", 10, 100).expect_err("wrong extension");
    assert!(wrong.to_string().contains("notes.txt is not a PDF"));

    let empty = validate_upload("a.pdf", 0, 100).expect_err("empty file");
    assert!(empty.to_string().contains("a.pdf is empty"));

    let large = validate_upload("a.pdf", 3 * 1024 * 1024, 1024 * 1024).expect_err("too large");
    assert!(large.to_string().contains("3.0 MB, larger than the 1.0 MB limit"));

    assert!(validate_upload("pdf", 10, 100).is_err());
}

#[test]
fn display_name_strips_directories() {
    assert_eq!(display_name("/tmp/uploads/plans.pdf"), "plans.pdf");
    assert_eq!(display_name("plans.pdf"), "plans.pdf");
}
