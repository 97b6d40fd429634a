//! Structural checks applied to every incoming line before it is routed.

use crate::mcp::errors::McpError;
use crate::mcp::protocol::{Incoming, JSONRPC_VERSION, RequestId, SUPPORTED_PROTOCOL_VERSIONS};
use serde_json::Value;

fn invalid(message: &str) -> McpError {
    McpError::InvalidRequest(format!("Invalid Request: {}", message))
}

/// The request id, when `value` carries a usable one
#[inline]
pub fn request_id(value: &Value) -> Option<RequestId> {
    match value.get("id")? {
        Value::String(id) => Some(RequestId::String(id.clone())),
        Value::Number(id) => id.as_i64().map(RequestId::Number),
        _ => None,
    }
}

/// Classify a decoded JSON value as a request, notification or response.
///
/// Anything that is not a well-formed JSON-RPC 2.0 envelope is rejected.
#[inline]
pub fn parse_message(value: &Value) -> Result<Incoming, McpError> {
    let object = value
        .as_object()
        .ok_or_else(|| invalid("message must be a JSON object"))?;

    if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(invalid("jsonrpc must be \"2.0\""));
    }

    let id = match object.get("id") {
        None | Some(Value::Null) => None,
        Some(_) => Some(request_id(value).ok_or_else(|| invalid("id must be a string or an integer"))?),
    };

    match object.get("method") {
        Some(Value::String(method)) => {
            let params = object.get("params").cloned();
            if params
                .as_ref()
                .is_some_and(|params| !(params.is_object() || params.is_array()))
            {
                return Err(invalid("params must be an object or an array"));
            }

            Ok(match id {
                Some(id) => Incoming::Request {
                    id,
                    method: method.clone(),
                    params,
                },
                None => Incoming::Notification {
                    method: method.clone(),
                },
            })
        }
        Some(_) => Err(invalid("method must be a string")),
        None if object.contains_key("result") || object.contains_key("error") => {
            Ok(Incoming::Response)
        }
        None => Err(invalid("message is neither a request nor a response")),
    }
}

#[inline]
pub fn is_protocol_version_supported(version: &str) -> bool {
    SUPPORTED_PROTOCOL_VERSIONS.contains(&version)
}
