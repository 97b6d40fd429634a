#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

//! A configured pipeline talking to mocked Ollama and chat-completion services

mod common;

use pdf_rag::config::{Config, OcrEngineKind};
use pdf_rag::database::StorageMethod;
use pdf_rag::indexer::Pipeline;
use serde_json::{Value, json};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use common::{DOOR_SCHEDULE_LINES, KEYWORDS, keyword_vector, text_pdf};

/// Answers `/api/embed` with keyword vectors for every input
fn embed_responder(request: &Request) -> ResponseTemplate {
    let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
    let embeddings: Vec<Vec<f32>> = body["input"]
        .as_array()
        .map(|inputs| {
            inputs
                .iter()
                .map(|input| keyword_vector(input.as_str().unwrap_or_default()))
                .collect()
        })
        .unwrap_or_default();
    ResponseTemplate::new(200).set_body_json(json!({ "embeddings": embeddings }))
}

async fn mock_services() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{ "name": "all-minilm:latest", "size": 45_000_000 }]
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(embed_responder)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": { "role": "assistant", "content": "  D-1 is a 90 x 210 cm wooden door.  " }
            }]
        })))
        .mount(&server)
        .await;

    server
}

fn config_for(server: &MockServer, dir: &TempDir) -> Config {
    let mut config = Config {
        base_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    config.ollama.protocol = "http".to_string();
    config.ollama.host = server.address().ip().to_string();
    config.ollama.port = server.address().port();
    config.ollama.embedding_dimension = (KEYWORDS.len() + 1) as u32;
    config.llm.base_url = format!("{}/v1", server.uri());
    config.llm.api_key_env = "PDF_RAG_TEST_UNSET_KEY".to_string();
    config.vector.remote_enabled = false;
    config.extraction.ocr_engine = OcrEngineKind::Disabled;
    config
}

#[tokio::test(flavor = "multi_thread")]
async fn configured_pipeline_uploads_and_answers() {
    let server = mock_services().await;
    let dir = TempDir::new().expect("should create temp dir");
    let pipeline = Pipeline::from_config(&config_for(&server, &dir)).expect("pipeline builds");

    let report = pipeline
        .upload("plans.pdf", &text_pdf(&DOOR_SCHEDULE_LINES), false)
        .await
        .expect("upload succeeds");
    assert_eq!(report.storage_method, StorageMethod::LocalSnapshot);
    assert_eq!(report.chunks_stored, 1);
    assert_eq!(report.door_costs.len(), 1);
    assert_eq!(report.door_costs[0].area_sqm, Some(1.89));

    let answer = pipeline
        .ask("How big is door D-1?")
        .await
        .expect("question answered");
    assert!(!answer.fallback);
    assert_eq!(answer.answer, "D-1 is a 90 x 210 cm wooden door.");
    assert_eq!(answer.citations.len(), 1);

    let health = pipeline.health().await;
    assert!(health.ready, "{health:?}");
    assert!(health.embedding.ok);
    assert_eq!(health.remote_index, None);
    assert_eq!(health.ocr, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_embedding_model_is_reported_unhealthy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{ "name": "llama3:latest" }]
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("should create temp dir");
    let pipeline = Pipeline::from_config(&config_for(&server, &dir)).expect("pipeline builds");

    let health = pipeline.health().await;
    assert!(!health.ready);
    assert!(!health.embedding.ok);
    assert!(health.embedding.detail.contains("all-minilm"), "{}", health.embedding.detail);
}
