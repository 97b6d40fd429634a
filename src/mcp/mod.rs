//! Model Context Protocol server exposing the document pipeline as tools
//! over newline-delimited JSON-RPC 2.0 on stdio.

pub mod errors;
pub mod protocol;
pub mod server;
pub mod tools;
pub mod validation;


pub use server::{ConnectionState, McpServer, ToolHandler};
pub use tools::register_pipeline_tools;
