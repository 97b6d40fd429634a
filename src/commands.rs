use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::answer::{Answer, Confidence};
use crate::config::Config;
use crate::database::{ScoredChunk, StorageMethod};
use crate::indexer::{DependencyStatus, HealthReport, Pipeline, UploadReport};
use crate::mcp::{McpServer, register_pipeline_tools};

fn load_pipeline() -> Result<Pipeline> {
    let config = Config::load_default().context("Failed to load configuration")?;
    Pipeline::from_config(&config).context("Failed to initialize pipeline")
}

fn spinner(message: &str) -> ProgressBar {
    let bar = if console::user_attended_stderr() {
        ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{spinner} {msg} ({elapsed})")
                .expect("style template is valid"),
        )
    } else {
        ProgressBar::hidden()
    };
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// Extract, embed and store a PDF from disk
#[inline]
pub async fn upload_pdf(path: &Path, force_ocr: bool) -> Result<()> {
    let pipeline = load_pipeline()?;

    let bar = spinner(&format!("Processing {}", path.display()));
    let outcome = pipeline.upload_file(path, force_ocr).await;
    bar.finish_and_clear();

    let report = outcome.with_context(|| format!("Failed to upload {}", path.display()))?;
    print!("{}", format_upload_report(&report));
    Ok(())
}

/// Answer one question from the stored documents
#[inline]
pub async fn ask_question(question: &str) -> Result<()> {
    let pipeline = load_pipeline()?;

    let bar = spinner("Thinking");
    let outcome = pipeline.ask(question).await;
    bar.finish_and_clear();

    print!("{}", format_answer(&outcome?));
    Ok(())
}

/// Print the closest chunks for a query
#[inline]
pub async fn search_chunks(query: &str, limit: usize) -> Result<()> {
    let pipeline = load_pipeline()?;
    let hits = pipeline.search(query, limit).await?;

    if hits.is_empty() {
        println!("No matching chunks. Use 'pdf-rag upload <path>' to add a document.");
        return Ok(());
    }

    print!("{}", format_hits(&hits));
    Ok(())
}

/// Remove stored vectors (unless `memory_only`) and conversation history
#[inline]
pub async fn clear(memory_only: bool) -> Result<()> {
    let pipeline = load_pipeline()?;

    let dropped = pipeline.clear_memory();
    println!("{} Cleared {} conversation turns", style("✓").green(), dropped);

    if memory_only {
        return Ok(());
    }

    let report = pipeline.clear_vectors().await?;
    if report.remote_cleared {
        println!("{} Remote index cleared", style("✓").green());
    }
    println!(
        "{} Removed {} snapshot files and {} cached embeddings",
        style("✓").green(),
        report.snapshot_files_removed,
        report.cache_entries_cleared
    );
    Ok(())
}

/// Report dependency status, failing when the pipeline is not ready
#[inline]
pub async fn show_health() -> Result<()> {
    let pipeline = load_pipeline()?;
    let report = pipeline.health().await;

    print!("{}", format_health(&report));
    if !report.ready {
        anyhow::bail!("pdf-rag is not ready");
    }
    Ok(())
}

/// Serve the pipeline as MCP tools on stdio until EOF or Ctrl+C
#[inline]
pub async fn serve_mcp() -> Result<()> {
    let pipeline = Arc::new(load_pipeline()?);

    let health = pipeline.health().await;
    if health.ready {
        info!("Dependencies ready, starting MCP server");
    } else {
        warn!("Starting MCP server with unavailable dependencies: {:?}", health);
    }

    let server = McpServer::new("pdf-rag".to_string(), env!("CARGO_PKG_VERSION").to_string())
        .with_instructions(
            "Upload construction PDFs with upload_pdf, then ask questions about them with ask_question",
        );
    register_pipeline_tools(&server, &pipeline).await;

    // stdout carries protocol messages, so status goes to stderr
    eprintln!("MCP server ready on stdio. Press Ctrl+C to stop.");

    let mut restart_count = 0;
    const MAX_RESTARTS: u32 = 3;

    loop {
        tokio::select! {
            result = server.serve_stdio() => {
                match result {
                    Ok(()) => {
                        info!("MCP server stopped normally");
                        break;
                    }
                    Err(e) => {
                        error!("MCP server error (attempt {}/{}): {}", restart_count + 1, MAX_RESTARTS + 1, e);
                        restart_count += 1;

                        if restart_count > MAX_RESTARTS {
                            error!("Maximum restart attempts reached, shutting down");
                            break;
                        }

                        tokio::time::sleep(Duration::from_secs(5)).await;
                        info!("Restarting MCP server (attempt {}/{})", restart_count + 1, MAX_RESTARTS + 1);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Received interrupt signal, shutting down");
                break;
            }
        }
    }

    Ok(())
}

fn format_upload_report(report: &UploadReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} Stored {} ({} pages)",
        style("✓").green(),
        style(&report.filename).bold(),
        report.page_count
    );
    let _ = writeln!(
        out,
        "  Extraction: {} ({})",
        if report.decision.use_ocr { "OCR" } else { "native text" },
        report.decision.reason
    );
    let _ = writeln!(
        out,
        "  Chunks stored: {} via {} ({} vectors total)",
        report.chunks_stored, report.storage_method, report.total_vectors
    );
    if report.storage_method == StorageMethod::Remote && !report.consistency_confirmed {
        let _ = writeln!(
            out,
            "  {} Remote count not yet confirmed; new chunks may take a moment to appear",
            style("!").yellow()
        );
    }
    if let Some(path) = &report.snapshot_path {
        let _ = writeln!(out, "  Snapshot: {}", path.display());
    }
    if report.tables_found > 0 {
        let _ = writeln!(out, "  Tables recovered: {}", report.tables_found);
    }

    if !report.door_costs.is_empty() {
        let _ = writeln!(out, "  Door schedule:");
        for door in &report.door_costs {
            let cost = door
                .total_cost
                .map_or_else(|| "no estimate".to_string(), |total| format!("{:.2}", total));
            let _ = writeln!(
                out,
                "    {} x{} {} {}",
                door.entry.door_id,
                door.entry.count,
                if door.entry.material.is_empty() {
                    "-"
                } else {
                    door.entry.material.as_str()
                },
                cost
            );
        }
        if let Some(total) = report.door_total_cost {
            let _ = writeln!(out, "    Total: {:.2}", total);
        }
    }
    out
}

fn format_answer(answer: &Answer) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", answer.answer);
    let _ = writeln!(out);

    let confidence = match answer.confidence {
        Confidence::High => style(answer.confidence.as_str()).green(),
        Confidence::Medium => style(answer.confidence.as_str()).yellow(),
        Confidence::Low => style(answer.confidence.as_str()).red(),
    };
    let _ = writeln!(out, "Confidence: {}", confidence);

    for citation in &answer.citations {
        let _ = writeln!(
            out,
            "  [{} #{}] score {:.3}",
            citation.filename, citation.chunk_index, citation.score
        );
    }
    out
}

fn format_hits(hits: &[ScoredChunk]) -> String {
    let mut out = String::new();
    for (rank, hit) in hits.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}. {} #{} (score {:.3})",
            rank + 1,
            style(&hit.metadata.filename).bold(),
            hit.metadata.chunk_index,
            hit.score
        );
        let preview: String = hit.metadata.text.chars().take(200).collect();
        let _ = writeln!(out, "   {}", preview.replace('\n', " "));
    }
    out
}

fn status_line(out: &mut String, name: &str, status: &DependencyStatus) {
    let mark = if status.ok {
        style("✓").green()
    } else {
        style("✗").red()
    };
    let _ = writeln!(out, "  {} {}: {}", mark, name, status.detail);
}

fn format_health(report: &HealthReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Status: {}",
        if report.ready {
            style("ready").green()
        } else {
            style("not ready").red()
        }
    );
    status_line(&mut out, "Embeddings", &report.embedding);
    if let Some(remote) = &report.remote_index {
        status_line(&mut out, "Remote index", remote);
    }
    status_line(&mut out, "Snapshots", &report.snapshot);
    if let Some(ocr) = &report.ocr {
        status_line(&mut out, "OCR", ocr);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answer::Citation;

    #[test]
    fn answer_lists_citations() {
        console::set_colors_enabled(false);
        let answer = Answer {
            answer: "Door D-1 is 90 by 210 cm.".to_string(),
            confidence: Confidence::High,
            citations: vec![Citation {
                filename: "plans.pdf".to_string(),
                chunk_index: 2,
                score: 0.8126,
            }],
            fallback: false,
        };

        let text = format_answer(&answer);
        assert!(text.starts_with("Door D-1 is 90 by 210 cm.\n"));
        assert!(text.contains("Confidence: high"));
        assert!(text.contains("[plans.pdf #2] score 0.813"));
    }

    #[test]
    fn health_shows_optional_dependencies_only_when_present() {
        console::set_colors_enabled(false);
        let report = HealthReport {
            ready: false,
            embedding: DependencyStatus {
                ok: false,
                detail: "connection refused".to_string(),
            },
            remote_index: None,
            snapshot: DependencyStatus {
                ok: true,
                detail: "/tmp/snapshots writable".to_string(),
            },
            ocr: None,
        };

        let text = format_health(&report);
        assert!(text.contains("Status: not ready"));
        assert!(text.contains("✗ Embeddings: connection refused"));
        assert!(text.contains("✓ Snapshots: /tmp/snapshots writable"));
        assert!(!text.contains("Remote index"));
        assert!(!text.contains("OCR"));
    }
}
