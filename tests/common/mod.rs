//! Shared helpers for integration tests

#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, Stream, dictionary};
use pdf_rag::RagError;
use pdf_rag::answer::{AnswerGenerator, ChatMessage, ChatModel};
use pdf_rag::config::ExtractionConfig;
use pdf_rag::database::vector_store::{StoreSettings, VectorStore};
use pdf_rag::database::{RemoteIndex, SnapshotStore};
use pdf_rag::embeddings::{Chunker, Embedder, EmbeddingBackend, EmbeddingCache};
use pdf_rag::extraction::ExtractionOrchestrator;
use pdf_rag::indexer::Pipeline;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const DOOR_SCHEDULE_LINES: [&str; 5] = [
    "Door Schedule: D-1 90x210 wood",
    "The main entrance uses a solid timber door with a painted frame.",
    "All interior doors follow the same hardware specification as the entrance.",
    "Fire rated doors are marked on the floor plans and in the hardware list.",
    "Finishes are to be approved by the architect before installation begins.",
];

pub const KEYWORDS: [&str; 4] = ["door", "size", "wood", "window"];

/// Single-page PDF with one text line per entry, top to bottom
pub fn text_pdf(lines: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut operations = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        operations.push(Operation::new("BT", vec![]));
        operations.push(Operation::new("Tf", vec!["F1".into(), 12.into()]));
        operations.push(Operation::new(
            "Td",
            vec![72.into(), (720.0 - 18.0 * i as f32).into()],
        ));
        operations.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
        operations.push(Operation::new("ET", vec![]));
    }
    let content = Content { operations }
        .encode()
        .expect("content encodes");
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        "Contents" => content_id,
        "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).expect("in-memory save should succeed");
    buffer
}

/// Keyword counts plus a constant component, so every text has a direction
pub fn keyword_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut vector: Vec<f32> = KEYWORDS
        .iter()
        .map(|keyword| lower.matches(keyword).count() as f32)
        .collect();
    vector.push(0.5);
    vector
}

pub struct KeywordBackend;

#[async_trait]
impl EmbeddingBackend for KeywordBackend {
    async fn embed_batch(&self, texts: &[String]) -> pdf_rag::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| keyword_vector(text)).collect())
    }

    async fn health_check(&self) -> pdf_rag::Result<()> {
        Ok(())
    }
}

/// Always gives the same reply, or fails when `reply` is `None`
pub struct CannedModel {
    pub reply: Option<String>,
}

#[async_trait]
impl ChatModel for CannedModel {
    async fn complete(&self, _messages: &[ChatMessage]) -> pdf_rag::Result<String> {
        self.reply
            .clone()
            .ok_or_else(|| RagError::Answer("model unavailable".to_string()))
    }
}

pub fn fast_settings() -> StoreSettings {
    let mut settings = StoreSettings::default();
    settings.consistency.attempts = 3;
    settings.consistency.interval = Duration::from_millis(10);
    settings.search_retries = 2;
    settings.search_retry_delay = Duration::from_millis(10);
    settings
}

/// Pipeline over in-process backends, storing snapshots under `dir`
pub fn pipeline(
    dir: &Path,
    remote: Option<Arc<dyn RemoteIndex>>,
    reply: Option<&str>,
) -> Pipeline {
    let embedder = Embedder::new(
        Arc::new(KeywordBackend),
        EmbeddingCache::new(),
        KEYWORDS.len() + 1,
        16,
    );
    let store = VectorStore::new(
        remote,
        SnapshotStore::new(dir.join("snapshots")),
        embedder,
        Chunker::default(),
        fast_settings(),
    );
    let answers = AnswerGenerator::new(
        Arc::new(CannedModel {
            reply: reply.map(str::to_string),
        }),
        4,
        Duration::from_secs(5),
    );
    Pipeline::new(
        ExtractionOrchestrator::with_ocr(&ExtractionConfig::default(), None),
        store,
        answers,
    )
}
