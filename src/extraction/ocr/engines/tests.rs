use super::*;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t1275\t1650\t-1\t
4\t1\t1\t1\t1\t0\t100\t100\t400\t30\t-1\t
5\t1\t1\t1\t1\t1\t100\t100\t80\t30\t96.5\tDoor
5\t1\t1\t1\t1\t2\t190\t100\t120\t30\t91.5\tSchedule
5\t1\t1\t1\t2\t1\t100\t140\t60\t30\t40\tD-1
5\t1\t1\t1\t2\t2\t170\t140\t60\t30\t-1\t
";

#[test]
fn tsv_words_are_grouped_into_lines() {
    let spans = normalize_tsv_output(TSV);

    assert_eq!(spans.len(), 2);
    assert_eq!(spans[0].text, "Door Schedule");
    assert!((spans[0].confidence - 0.94).abs() < 1e-4);
    assert_eq!(spans[1].text, "D-1");
    assert!((spans[1].confidence - 0.40).abs() < 1e-4);
}

#[test]
fn tsv_without_words_is_empty() {
    assert!(normalize_tsv_output("").is_empty());
    assert!(normalize_tsv_output("level\tpage_num\n1\t1").is_empty());
}

#[test]
fn paddle_list_of_lists() {
    let reply = json!([[
        [[[0, 0], [10, 0], [10, 5], [0, 5]], ["Door Schedule", 0.98]],
        [[[0, 6], [10, 6], [10, 9], [0, 9]], ["D-1 90x210", 0.42]]
    ]]);

    assert_eq!(
        normalize_paddle_output(&reply),
        vec![
            RecognizedSpan::new("Door Schedule", 0.98),
            RecognizedSpan::new("D-1 90x210", 0.42),
        ]
    );
}

#[test]
fn paddle_parallel_arrays() {
    let reply = json!({
        "result": {
            "rec_texts": ["Door", "Schedule"],
            "rec_scores": [0.9, 0.8]
        }
    });

    assert_eq!(
        normalize_paddle_output(&reply),
        vec![
            RecognizedSpan::new("Door", 0.9),
            RecognizedSpan::new("Schedule", 0.8),
        ]
    );
}

#[test]
fn paddle_unknown_shapes_are_empty() {
    assert!(normalize_paddle_output(&json!(null)).is_empty());
    assert!(normalize_paddle_output(&json!({ "status": "ok" })).is_empty());
    assert!(normalize_paddle_output(&json!([[null]])).is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn http_engine_posts_and_normalizes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ocr"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "texts": ["Door"],
            "scores": [0.77]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let engine = HttpOcrEngine::new(&format!("{}/ocr", server.uri()), Duration::from_secs(5));
    let spans = engine.recognize(b"png").await.expect("OCR should succeed");

    assert_eq!(spans, vec![RecognizedSpan::new("Door", 0.77)]);
}

#[tokio::test(flavor = "multi_thread")]
async fn http_engine_surfaces_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let engine = HttpOcrEngine::new(&server.uri(), Duration::from_secs(5));
    let result = engine.recognize(b"png").await;

    assert!(matches!(result, Err(OcrError::Engine(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn http_health_accepts_any_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;

    let engine = HttpOcrEngine::new(&server.uri(), Duration::from_secs(5));
    engine.health_check().await.expect("service should be reachable");
}
