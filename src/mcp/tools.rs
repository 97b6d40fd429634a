//! Tool definitions and handlers exposing the upload, question answering
//! and maintenance operations of a [`Pipeline`].

use crate::indexer::Pipeline;
use crate::mcp::errors::McpError;
use crate::mcp::protocol::{CallToolResult, Tool};
use crate::mcp::server::{McpServer, ToolHandler};
use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error};

/// Default number of hits returned by `search_chunks`
pub const DEFAULT_SEARCH_LIMIT: usize = 5;

/// Largest `limit` accepted by `search_chunks`
pub const MAX_SEARCH_LIMIT: usize = 50;

/// Register every pipeline tool on `server`
#[inline]
pub async fn register_pipeline_tools(server: &McpServer, pipeline: &Arc<Pipeline>) {
    server
        .register_tool(
            UploadPdfHandler::tool_definition(),
            UploadPdfHandler::new(Arc::clone(pipeline)),
        )
        .await;
    server
        .register_tool(
            AskQuestionHandler::tool_definition(),
            AskQuestionHandler::new(Arc::clone(pipeline)),
        )
        .await;
    server
        .register_tool(
            SearchChunksHandler::tool_definition(),
            SearchChunksHandler::new(Arc::clone(pipeline)),
        )
        .await;
    server
        .register_tool(
            ClearVectorsHandler::tool_definition(),
            ClearVectorsHandler::new(Arc::clone(pipeline)),
        )
        .await;
    server
        .register_tool(
            ClearMemoryHandler::tool_definition(),
            ClearMemoryHandler::new(Arc::clone(pipeline)),
        )
        .await;
    server
        .register_tool(
            HealthCheckHandler::tool_definition(),
            HealthCheckHandler::new(Arc::clone(pipeline)),
        )
        .await;
}

/// Decode tool arguments into `T`
fn parse_arguments<T: DeserializeOwned>(tool: &str, arguments: Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(arguments)).map_err(|e| {
        McpError::InvalidToolArguments {
            tool: tool.to_string(),
            message: e.to_string(),
        }
        .into()
    })
}

/// Pretty JSON as a successful tool result, or the error text as a failed one
fn json_result<T: Serialize>(tool: &str, outcome: crate::Result<T>) -> Result<CallToolResult> {
    match outcome {
        Ok(value) => Ok(CallToolResult::text(serde_json::to_string_pretty(&value)?)),
        Err(e) => {
            error!("{} failed: {}", tool, e);
            Ok(CallToolResult::error(e.to_string()))
        }
    }
}

fn no_arguments_schema() -> Value {
    json!({
        "type": "object",
        "properties": {},
        "additionalProperties": false
    })
}

/// Index a PDF from the local filesystem
pub struct UploadPdfHandler {
    pipeline: Arc<Pipeline>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UploadPdfArgs {
    path: String,
    #[serde(default)]
    force_ocr: bool,
}

impl UploadPdfHandler {
    #[inline]
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "upload_pdf".to_string(),
            description:
                "Extract, chunk and index a PDF so its content can be searched and questioned".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Path to a .pdf file readable by the server"
                    },
                    "force_ocr": {
                        "type": "boolean",
                        "description": "Optional: Run OCR even when the PDF has a usable text layer (default: false)"
                    }
                },
                "required": ["path"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for UploadPdfHandler {
    #[inline]
    async fn call(&self, arguments: Map<String, Value>) -> Result<CallToolResult> {
        let args: UploadPdfArgs = parse_arguments("upload_pdf", arguments)?;
        debug!("Uploading {} (force_ocr={})", args.path, args.force_ocr);

        let outcome = self
            .pipeline
            .upload_file(Path::new(&args.path), args.force_ocr)
            .await;
        json_result("upload_pdf", outcome)
    }
}

/// Answer a question from the indexed documents
pub struct AskQuestionHandler {
    pipeline: Arc<Pipeline>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AskQuestionArgs {
    question: String,
}

impl AskQuestionHandler {
    #[inline]
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "ask_question".to_string(),
            description:
                "Answer a question using the uploaded documents and the conversation so far".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "question": {
                        "type": "string",
                        "description": "Question about the uploaded documents"
                    }
                },
                "required": ["question"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for AskQuestionHandler {
    #[inline]
    async fn call(&self, arguments: Map<String, Value>) -> Result<CallToolResult> {
        let args: AskQuestionArgs = parse_arguments("ask_question", arguments)?;
        let outcome = self.pipeline.ask(&args.question).await;
        json_result("ask_question", outcome)
    }
}

/// Raw similarity search over stored chunks
pub struct SearchChunksHandler {
    pipeline: Arc<Pipeline>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SearchChunksArgs {
    query: String,
    limit: Option<usize>,
}

impl SearchChunksHandler {
    #[inline]
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "search_chunks".to_string(),
            description: "Search stored document chunks by similarity".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search query"
                    },
                    "limit": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": MAX_SEARCH_LIMIT,
                        "description": format!("Maximum number of results (default: {})", DEFAULT_SEARCH_LIMIT)
                    }
                },
                "required": ["query"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for SearchChunksHandler {
    #[inline]
    async fn call(&self, arguments: Map<String, Value>) -> Result<CallToolResult> {
        let args: SearchChunksArgs = parse_arguments("search_chunks", arguments)?;
        let limit = args
            .limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT);

        if args.query.trim().is_empty() {
            return Ok(CallToolResult::error("Query cannot be empty"));
        }

        debug!("Searching chunks: query='{}', limit={}", args.query, limit);
        let outcome = self.pipeline.search(&args.query, limit).await;
        json_result("search_chunks", outcome)
    }
}

/// Remove every stored vector and snapshot
pub struct ClearVectorsHandler {
    pipeline: Arc<Pipeline>,
}

impl ClearVectorsHandler {
    #[inline]
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "clear_vectors".to_string(),
            description:
                "Delete all stored vectors from the remote index and local snapshots".to_string(),
            input_schema: no_arguments_schema(),
        }
    }
}

#[async_trait]
impl ToolHandler for ClearVectorsHandler {
    #[inline]
    async fn call(&self, _arguments: Map<String, Value>) -> Result<CallToolResult> {
        let outcome = self.pipeline.clear_vectors().await;
        json_result("clear_vectors", outcome)
    }
}

/// Forget the conversation history
pub struct ClearMemoryHandler {
    pipeline: Arc<Pipeline>,
}

impl ClearMemoryHandler {
    #[inline]
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "clear_memory".to_string(),
            description: "Forget previous questions and answers".to_string(),
            input_schema: no_arguments_schema(),
        }
    }
}

#[async_trait]
impl ToolHandler for ClearMemoryHandler {
    #[inline]
    async fn call(&self, _arguments: Map<String, Value>) -> Result<CallToolResult> {
        let dropped = self.pipeline.clear_memory();
        Ok(CallToolResult::text(serde_json::to_string_pretty(
            &json!({ "turns_cleared": dropped }),
        )?))
    }
}

/// Readiness and per-dependency status
pub struct HealthCheckHandler {
    pipeline: Arc<Pipeline>,
}

impl HealthCheckHandler {
    #[inline]
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "health_check".to_string(),
            description:
                "Report whether uploads and questions can be served, with per-dependency detail".to_string(),
            input_schema: no_arguments_schema(),
        }
    }
}

#[async_trait]
impl ToolHandler for HealthCheckHandler {
    #[inline]
    async fn call(&self, _arguments: Map<String, Value>) -> Result<CallToolResult> {
        let report = self.pipeline.health().await;
        let mut result = CallToolResult::text(serde_json::to_string_pretty(&report)?);
        if !report.ready {
            result.is_error = true;
        }
        Ok(result)
    }
}
