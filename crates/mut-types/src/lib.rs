//! Wire model for the Mut gateway's MCP discovery layer.
//!
//! JSON-RPC 2.0 envelopes, MCP domain types with typed parsers, the supported
//! protocol version registry, and the shared error hierarchy.

pub mod error;
pub mod jsonrpc;
pub mod mcp;
pub mod protocol;

pub use error::{ConfigError, McpError};
pub use jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use mcp::*;
pub use protocol::{
    DEFAULT_MCP_VERSION, LATEST_MCP_VERSION, ProtocolVersion, SUPPORTED_VERSIONS,
    is_version_supported,
};
