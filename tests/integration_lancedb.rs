#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

//! The vector store writing through a real on-disk LanceDB table

mod common;

use pdf_rag::database::vector_store::VectorStore;
use pdf_rag::database::{LanceIndex, RemoteIndex, SnapshotStore, StorageMethod};
use pdf_rag::embeddings::{Chunker, Embedder, EmbeddingCache};
use std::sync::Arc;
use tempfile::TempDir;

use common::{DOOR_SCHEDULE_LINES, KEYWORDS, KeywordBackend, fast_settings};

fn lance_store(dir: &TempDir) -> (VectorStore, Arc<LanceIndex>) {
    let index = Arc::new(LanceIndex::new(
        dir.path().join("vectors").display().to_string(),
        "pdf_chunks",
        KEYWORDS.len() + 1,
    ));
    let embedder = Embedder::new(
        Arc::new(KeywordBackend),
        EmbeddingCache::new(),
        KEYWORDS.len() + 1,
        16,
    );
    let store = VectorStore::new(
        Some(Arc::clone(&index) as Arc<dyn RemoteIndex>),
        SnapshotStore::new(dir.path().join("snapshots")),
        embedder,
        Chunker::new(12, 2).expect("valid chunking"),
        fast_settings(),
    );
    (store, index)
}

#[tokio::test]
async fn documents_are_stored_and_searched_remotely() {
    let dir = TempDir::new().expect("should create temp dir");
    let (store, index) = lance_store(&dir);

    let text = DOOR_SCHEDULE_LINES.join("\n");
    let result = store.store("plans.pdf", &text).await.expect("store succeeds");

    assert_eq!(result.storage_method, StorageMethod::Remote);
    assert!(result.chunks_stored > 1);
    assert_eq!(result.total_vectors, result.chunks_stored);
    assert!(result.consistency_confirmed);
    assert_eq!(result.snapshot_path, None);
    assert_eq!(index.count().await.expect("count"), result.chunks_stored);

    let hits = store.search("door schedule wood", 3).await.expect("search succeeds");
    assert_eq!(hits.len(), 3);
    assert!(hits.windows(2).all(|pair| pair[0].score >= pair[1].score));
    assert_eq!(hits[0].metadata.chunk_index, 0);
    assert!(hits[0].metadata.text.starts_with("Door Schedule: D-1"));
}

#[tokio::test]
async fn second_upload_appends_to_the_table() {
    let dir = TempDir::new().expect("should create temp dir");
    let (store, index) = lance_store(&dir);
    let text = DOOR_SCHEDULE_LINES.join("\n");

    let first = store.store("plans.pdf", &text).await.expect("first store");
    let second = store.store("plans.pdf", &text).await.expect("second store");

    assert_eq!(second.total_vectors, first.chunks_stored * 2);
    assert_eq!(index.count().await.expect("count"), second.total_vectors);
}

#[tokio::test]
async fn clear_all_empties_the_table() {
    let dir = TempDir::new().expect("should create temp dir");
    let (store, index) = lance_store(&dir);
    store
        .store("plans.pdf", &DOOR_SCHEDULE_LINES.join("\n"))
        .await
        .expect("store succeeds");

    let report = store.clear_all().await.expect("clear succeeds");

    assert!(report.remote_cleared);
    assert_eq!(index.count().await.expect("count"), 0);
    assert!(store.search("door", 5).await.expect("search").is_empty());

    let health = store.health().await;
    assert_eq!(health.remote, Some(Ok(0)));
    assert!(health.is_ready());
}
