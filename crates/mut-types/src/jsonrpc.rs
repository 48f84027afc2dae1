//! JSON-RPC 2.0 envelopes for MCP communication.

use crate::error::McpError;
use crate::protocol::JSONRPC_VERSION;
use serde::{Deserialize, Serialize};

fn jsonrpc_version() -> String {
    JSONRPC_VERSION.to_string()
}

/// A JSON-RPC 2.0 request. Without an `id` it is a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request that expects a response.
    pub fn new(id: u64, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    /// Create a notification (no id, no response expected).
    pub fn notification(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id: None,
            method: method.into(),
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcResponse {
    /// Build a successful response.
    pub fn success(id: u64, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response.
    pub fn failure(id: u64, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id: Some(id),
            result: None,
            error: Some(error),
        }
    }

    /// Check this response against the request it answers and extract the result.
    ///
    /// The id must echo `expected_id`; an `error` object becomes
    /// [`McpError::JsonRpc`]. A response with neither field yields an empty
    /// object so list parsers see "nothing listed" rather than failing.
    pub fn into_result(
        self,
        server: &str,
        method: &str,
        expected_id: u64,
    ) -> Result<serde_json::Value, McpError> {
        if self.id != Some(expected_id) {
            return Err(McpError::IdMismatch {
                server: server.to_string(),
                method: method.to_string(),
                expected: expected_id,
                actual: self.id,
            });
        }

        if let Some(err) = self.error {
            return Err(McpError::JsonRpc {
                server: server.to_string(),
                method: method.to_string(),
                code: err.code,
                message: err.message,
                data: err.data,
            });
        }

        Ok(self
            .result
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new())))
    }
}
