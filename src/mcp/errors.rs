//! Request-level failures and their JSON-RPC error objects.
//!
//! Failures inside a tool are not protocol errors; tools report them as
//! `isError` results instead.

use crate::mcp::protocol::{ErrorCode, RpcError, SUPPORTED_PROTOCOL_VERSIONS};
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum McpError {
    #[error("Unsupported protocol version: {0}. Supported: {supported}", supported = SUPPORTED_PROTOCOL_VERSIONS.join(", "))]
    UnsupportedProtocolVersion(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters for tool '{tool}': {message}")]
    InvalidToolArguments { tool: String, message: String },

    #[error("Server not initialized. Send initialize request first.")]
    NotInitialized,

    #[error("{0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
}

impl McpError {
    #[inline]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnsupportedProtocolVersion(_) => ErrorCode::UnsupportedProtocolVersion,
            Self::ToolNotFound(_) => ErrorCode::ToolNotFound,
            Self::InvalidToolArguments { .. } | Self::InvalidParams(_) => ErrorCode::InvalidParams,
            Self::NotInitialized | Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::MethodNotFound(_) => ErrorCode::MethodNotFound,
        }
    }

    #[inline]
    pub fn to_rpc_error(&self) -> RpcError {
        RpcError::new(self.code(), self.to_string())
    }
}

impl From<serde_json::Error> for McpError {
    #[inline]
    fn from(error: serde_json::Error) -> Self {
        Self::InvalidParams(error.to_string())
    }
}

/// Map any request failure to the error object sent back to the client
#[inline]
pub fn rpc_error(failure: &anyhow::Error) -> RpcError {
    if let Some(mcp_error) = failure.downcast_ref::<McpError>() {
        warn!("Rejected request: {}", mcp_error);
        return mcp_error.to_rpc_error();
    }

    error!("Request failed: {:#}", failure);
    RpcError::new(ErrorCode::InternalError, format!("{:#}", failure))
}
