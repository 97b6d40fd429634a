//! Connection state, request routing and the line-delimited stdio
//! transport.

use crate::mcp::errors::{McpError, rpc_error};
use crate::mcp::protocol::*;
use crate::mcp::validation::{is_protocol_version_supported, parse_message, request_id};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    /// `initialize` answered, waiting for the client's `initialized` notification
    Initializing,
    Ready,
    Closed,
}

/// Executes one tool. `arguments` is the call's argument object, empty when omitted.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Map<String, Value>) -> Result<CallToolResult>;
}

struct RegisteredTool {
    definition: Tool,
    handler: Box<dyn ToolHandler>,
}

pub struct McpServer {
    server_info: Implementation,
    instructions: Option<String>,
    tools: RwLock<BTreeMap<String, RegisteredTool>>,
    state: RwLock<ConnectionState>,
}

impl McpServer {
    #[inline]
    pub fn new(name: String, version: String) -> Self {
        Self {
            server_info: Implementation { name, version },
            instructions: None,
            tools: RwLock::new(BTreeMap::new()),
            state: RwLock::new(ConnectionState::Uninitialized),
        }
    }

    /// Text returned to clients in the `initialize` result
    #[inline]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    #[inline]
    pub fn server_info(&self) -> &Implementation {
        &self.server_info
    }

    /// Register a tool, replacing any earlier tool with the same name
    #[inline]
    pub async fn register_tool<H>(&self, definition: Tool, handler: H)
    where
        H: ToolHandler + 'static,
    {
        debug!("Registered tool: {}", definition.name);
        self.tools.write().await.insert(
            definition.name.clone(),
            RegisteredTool {
                definition,
                handler: Box::new(handler),
            },
        );
    }

    #[inline]
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    async fn set_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
    }

    #[inline]
    pub async fn serve_stdio(&self) -> Result<()> {
        info!("Starting MCP server with stdio transport");
        self.serve(BufReader::new(io::stdin()), io::stdout()).await
    }

    /// Answer newline-delimited JSON-RPC messages until the reader is exhausted.
    ///
    /// Every connection starts uninitialized, so a client must send
    /// `initialize` before listing or calling tools.
    #[inline]
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.set_state(ConnectionState::Uninitialized).await;

        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    info!("EOF reached, closing connection");
                    break;
                }
                Ok(_) => {
                    if let Some(reply) = self.handle_line(line.trim()).await {
                        write_reply(&mut writer, &reply).await?;
                    }
                }
                Err(e) => {
                    error!("Error reading input: {}", e);
                    break;
                }
            }
        }

        self.set_state(ConnectionState::Closed).await;
        info!("MCP server stopped");
        Ok(())
    }

    /// The reply owed for one input line, if any
    async fn handle_line(&self, line: &str) -> Option<Reply> {
        if line.is_empty() {
            return None;
        }

        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to parse JSON: {}", e);
                return Some(Reply::error(
                    None,
                    RpcError::new(ErrorCode::ParseError, "Parse error"),
                ));
            }
        };

        match parse_message(&value) {
            Ok(Incoming::Request { id, method, params }) => {
                debug!("Request {}", method);
                Some(match self.handle_request(&method, params).await {
                    Ok(result) => Reply::result(id, result),
                    Err(e) => Reply::error(Some(id), rpc_error(&e)),
                })
            }
            Ok(Incoming::Notification { method }) => {
                self.handle_notification(&method).await;
                None
            }
            Ok(Incoming::Response) => {
                warn!("Ignoring response message from client");
                None
            }
            Err(e) => {
                warn!("Rejected message: {}", e);
                Some(Reply::error(request_id(&value), e.to_rpc_error()))
            }
        }
    }

    async fn handle_request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        match method {
            "initialize" => self.initialize(params).await,
            "ping" => Ok(json!({})),
            "tools/list" => {
                self.ensure_initialized().await?;
                let tools = self.tools.read().await;
                let result = ListToolsResult {
                    tools: tools.values().map(|tool| tool.definition.clone()).collect(),
                };
                Ok(serde_json::to_value(result)?)
            }
            "tools/call" => {
                self.ensure_initialized().await?;
                let params: CallToolParams = decode_params(method, params)?;
                let result = self.call_tool(params).await?;
                Ok(serde_json::to_value(result)?)
            }
            other => Err(McpError::MethodNotFound(other.to_string()).into()),
        }
    }

    async fn handle_notification(&self, method: &str) {
        match method {
            "initialized" | "notifications/initialized" => {
                self.set_state(ConnectionState::Ready).await;
                info!("Server ready to handle requests");
            }
            "notifications/cancelled" => debug!("Received cancellation notification"),
            other => warn!("Unknown notification method: {}", other),
        }
    }

    async fn initialize(&self, params: Option<Value>) -> Result<Value> {
        let params: InitializeParams = decode_params("initialize", params)?;
        if !is_protocol_version_supported(&params.protocol_version) {
            return Err(McpError::UnsupportedProtocolVersion(params.protocol_version).into());
        }

        self.set_state(ConnectionState::Initializing).await;
        info!(
            "Client {} {} connected with protocol {}",
            params.client_info.name, params.client_info.version, params.protocol_version
        );

        Ok(serde_json::to_value(InitializeResult {
            protocol_version: params.protocol_version,
            capabilities: ServerCapabilities::default(),
            server_info: self.server_info.clone(),
            instructions: self.instructions.clone(),
        })?)
    }

    async fn ensure_initialized(&self) -> Result<(), McpError> {
        match self.connection_state().await {
            ConnectionState::Initializing | ConnectionState::Ready => Ok(()),
            ConnectionState::Uninitialized | ConnectionState::Closed => {
                Err(McpError::NotInitialized)
            }
        }
    }

    async fn call_tool(&self, params: CallToolParams) -> Result<CallToolResult> {
        let tools = self.tools.read().await;
        let tool = tools
            .get(&params.name)
            .ok_or_else(|| McpError::ToolNotFound(params.name.clone()))?;

        debug!("Calling tool {}", params.name);
        tool.handler.call(params.arguments).await
    }
}

fn decode_params<T: serde::de::DeserializeOwned>(
    method: &str,
    params: Option<Value>,
) -> Result<T, McpError> {
    let params =
        params.ok_or_else(|| McpError::InvalidParams(format!("{} requires parameters", method)))?;
    Ok(serde_json::from_value(params)?)
}

async fn write_reply<W>(writer: &mut W, reply: &Reply) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut json = serde_json::to_vec(reply)?;
    json.push(b'\n');
    writer.write_all(&json).await?;
    writer.flush().await?;
    Ok(())
}
