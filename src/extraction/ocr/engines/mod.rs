#[cfg(test)]
mod tests;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use super::{OcrEngine, OcrError, RecognizedSpan};

const TSV_WORD_LEVEL: &str = "5";

/// Runs the `tesseract` CLI and reads its TSV output
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    binary: PathBuf,
    language: String,
}

impl TesseractEngine {
    #[inline]
    pub fn new(binary: impl Into<PathBuf>, language: &str) -> Self {
        Self {
            binary: binary.into(),
            language: language.to_string(),
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    async fn recognize(&self, png: &[u8]) -> Result<Vec<RecognizedSpan>, OcrError> {
        let workdir = tempfile::tempdir()?;
        let input = workdir.path().join("page.png");
        tokio::fs::write(&input, png).await?;

        let output = tokio::process::Command::new(&self.binary)
            .arg(&input)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .arg("tsv")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                OcrError::Engine(format!("Failed to run {}: {}", self.binary.display(), e))
            })?;

        if !output.status.success() {
            return Err(OcrError::Engine(format!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let spans = normalize_tsv_output(&String::from_utf8_lossy(&output.stdout));
        debug!("tesseract recognized {} lines", spans.len());
        Ok(spans)
    }

    async fn health_check(&self) -> Result<(), OcrError> {
        let output = tokio::process::Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .map_err(|e| {
                OcrError::Engine(format!("Failed to run {}: {}", self.binary.display(), e))
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(OcrError::Engine(format!(
                "tesseract --version exited with {}",
                output.status
            )))
        }
    }
}

/// Posts base64 PNGs to a PaddleOCR-style HTTP service
#[derive(Debug, Clone)]
pub struct HttpOcrEngine {
    url: String,
    agent: ureq::Agent,
}

impl HttpOcrEngine {
    #[inline]
    pub fn new(url: &str, timeout: Duration) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            url: url.to_string(),
            agent,
        }
    }

    fn post_image(&self, png: &[u8]) -> Result<Value, OcrError> {
        let body = json!({ "image": STANDARD.encode(png) }).to_string();

        let response = self
            .agent
            .post(&self.url)
            .header("Content-Type", "application/json")
            .send(&body)
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(|e| OcrError::Engine(format!("OCR service request failed: {}", e)))?;

        serde_json::from_str(&response)
            .map_err(|e| OcrError::Engine(format!("OCR service returned invalid JSON: {}", e)))
    }
}

#[async_trait]
impl OcrEngine for HttpOcrEngine {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn recognize(&self, png: &[u8]) -> Result<Vec<RecognizedSpan>, OcrError> {
        let engine = self.clone();
        let png = png.to_vec();
        let reply = tokio::task::spawn_blocking(move || engine.post_image(&png))
            .await
            .map_err(|e| OcrError::Engine(format!("OCR request task failed: {}", e)))??;

        Ok(normalize_paddle_output(&reply))
    }

    async fn health_check(&self) -> Result<(), OcrError> {
        let engine = self.clone();
        tokio::task::spawn_blocking(move || match engine.agent.get(&engine.url).call() {
            // Any HTTP status means the service is listening
            Ok(_) | Err(ureq::Error::StatusCode(_)) => Ok(()),
            Err(e) => Err(OcrError::Engine(format!("OCR service unreachable: {}", e))),
        })
        .await
        .map_err(|e| OcrError::Engine(format!("OCR health task failed: {}", e)))?
    }
}

/// Lines of Tesseract TSV output, with word confidences averaged per line
#[inline]
pub fn normalize_tsv_output(tsv: &str) -> Vec<RecognizedSpan> {
    let mut lines: Vec<((&str, &str, &str, &str), Vec<&str>, Vec<f32>)> = Vec::new();

    for row in tsv.lines() {
        let fields: Vec<&str> = row.split('\t').collect();
        if fields.len() < 12 || fields[0] != TSV_WORD_LEVEL {
            continue;
        }

        let Ok(confidence) = fields[10].trim().parse::<f32>() else {
            continue;
        };
        let word = fields[11].trim();
        if confidence < 0.0 || word.is_empty() {
            continue;
        }

        let key = (fields[1], fields[2], fields[3], fields[4]);
        match lines.last_mut() {
            Some((last_key, words, confidences)) if *last_key == key => {
                words.push(word);
                confidences.push(confidence);
            }
            _ => lines.push((key, vec![word], vec![confidence])),
        }
    }

    lines
        .into_iter()
        .map(|(_, words, confidences)| {
            let mean = confidences.iter().sum::<f32>() / confidences.len() as f32;
            RecognizedSpan::new(words.join(" "), (mean / 100.0).clamp(0.0, 1.0))
        })
        .collect()
}

/// Spans from PaddleOCR replies.
///
/// Two shapes are understood: nested lists of `[box, [text, score]]` entries,
/// and objects holding parallel `rec_texts`/`rec_scores` (or `texts`/`scores`)
/// arrays. Wrapper objects with a `result`, `results` or `data` field are
/// unwrapped.
#[inline]
pub fn normalize_paddle_output(reply: &Value) -> Vec<RecognizedSpan> {
    let mut spans = Vec::new();
    collect_paddle_spans(reply, &mut spans, 0);
    spans
}

fn collect_paddle_spans(value: &Value, spans: &mut Vec<RecognizedSpan>, depth: usize) {
    if depth > 8 {
        return;
    }

    match value {
        Value::Array(items) => {
            if let Some(span) = span_from_pair(items) {
                spans.push(span);
                return;
            }
            // [box, [text, score]]
            if let [_, Value::Array(pair)] = items.as_slice() {
                if let Some(span) = span_from_pair(pair) {
                    spans.push(span);
                    return;
                }
            }
            for item in items {
                collect_paddle_spans(item, spans, depth + 1);
            }
        }
        Value::Object(map) => {
            let texts = map.get("rec_texts").or_else(|| map.get("texts"));
            let scores = map
                .get("rec_scores")
                .or_else(|| map.get("scores"))
                .or_else(|| map.get("confidences"));
            if let (Some(Value::Array(texts)), Some(Value::Array(scores))) = (texts, scores) {
                spans.extend(texts.iter().zip(scores).filter_map(|(text, score)| {
                    Some(RecognizedSpan::new(text.as_str()?, score.as_f64()? as f32))
                }));
                return;
            }
            for key in ["result", "results", "data"] {
                if let Some(inner) = map.get(key) {
                    collect_paddle_spans(inner, spans, depth + 1);
                }
            }
        }
        _ => {}
    }
}

fn span_from_pair(pair: &[Value]) -> Option<RecognizedSpan> {
    match pair {
        [Value::String(text), score] => Some(RecognizedSpan::new(text, score.as_f64()? as f32)),
        _ => None,
    }
}
