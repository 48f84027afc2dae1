//! Error hierarchy for MCP discovery.

use thiserror::Error;

/// Errors from talking to a backend MCP server.
///
/// Every variant names the connection (`server`) so a caller can log it
/// without extra context. Nothing here is retried by the discovery layer.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Invalid MCP client configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to spawn MCP server '{name}': {source}")]
    SpawnFailed {
        name: String,
        source: std::io::Error,
    },

    #[error("MCP server '{name}' has no {pipe} pipe")]
    PipeUnavailable { name: String, pipe: &'static str },

    #[error("MCP client '{server}' is already initialized")]
    AlreadyInitialized { server: String },

    #[error("MCP client '{server}' is not initialized (cannot call {method})")]
    NotInitialized { server: String, method: String },

    #[error("MCP client '{server}' already has a call in flight (stdio allows one at a time)")]
    Busy { server: String },

    #[error("Response ID mismatch from '{server}' for {method}: expected {expected}, got {actual:?}")]
    IdMismatch {
        server: String,
        method: String,
        expected: u64,
        actual: Option<u64>,
    },

    #[error("JSON-RPC error from '{server}' for {method} (code {code}): {message}")]
    JsonRpc {
        server: String,
        method: String,
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("HTTP error {status} from '{server}': {body}")]
    Http {
        server: String,
        status: u16,
        body: String,
    },

    #[error("MCP server '{server}' negotiated unsupported protocol version '{version}'")]
    UnsupportedVersion { server: String, version: String },

    #[error("MCP protocol error from '{server}': {message}")]
    Protocol { server: String, message: String },

    #[error("Transport error on '{server}': {message}")]
    Transport { server: String, message: String },

    #[error("MCP server '{server}' closed the connection")]
    ConnectionClosed { server: String },

    #[error("MCP request {method} to '{server}' timed out after {timeout_ms}ms")]
    Timeout {
        server: String,
        method: String,
        timeout_ms: u64,
    },

    #[error("MCP request {method} to '{server}' was cancelled")]
    Cancelled { server: String, method: String },

    #[error("Failed to decode {context}: {source}")]
    Decode {
        context: String,
        source: serde_json::Error,
    },

    #[error("Malformed {context}: {message}")]
    Framing { context: String, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Whether the call ran out of time waiting for the server.
    pub fn is_timeout(&self) -> bool {
        matches!(self, McpError::Timeout { .. })
    }

    /// The server answered, but the payload could not be decoded.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            McpError::Decode { .. } | McpError::Framing { .. } | McpError::Json(_)
        )
    }

    /// State errors: the call was made in the wrong lifecycle state.
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            McpError::AlreadyInitialized { .. }
                | McpError::NotInitialized { .. }
                | McpError::Busy { .. }
        )
    }
}

/// Errors from loading or validating client configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file parse error at {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Missing required configuration: {key}")]
    MissingKey { key: String },

    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}
