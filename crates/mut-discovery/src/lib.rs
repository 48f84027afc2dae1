//! MCP client transports and capability discovery for the Mut gateway.
//!
//! A gateway builds one client per backend server with [`connect`], runs the
//! `initialize` handshake, and reads the server's tools, prompts and
//! resources with [`discover`]. All three transports (stdio, streamable HTTP,
//! SSE) share the [`McpClient`] contract.

pub mod client;
pub mod config;
pub mod context;
pub mod discover;
pub mod event_stream;
pub mod http;
pub mod sink;
pub mod sse;
pub mod stdio;
pub mod transport;

pub use client::{Connection, ConnectionState, McpClient};
pub use config::{
    ClientOptions, DiscoveryConfig, HttpClientConfig, ServerConfig, SseClientConfig,
    StdioClientConfig,
};
pub use context::CallContext;
pub use discover::{ServerDiscovery, discover, discover_all, discover_server};
pub use http::{HttpClient, HttpTransport};
pub use sink::LogSink;
pub use sse::{SseClient, SseTransport};
pub use stdio::{StdioClient, StdioTransport};
pub use transport::{BoxFuture, RequestIds, Transport};

use mut_types::McpError;

/// Build an uninitialized client for `config`, choosing the transport.
///
/// Stdio servers are spawned immediately; HTTP and SSE clients only
/// validate their configuration until the first call.
pub fn connect(config: &ServerConfig) -> Result<Box<dyn McpClient>, McpError> {
    let client: Box<dyn McpClient> = match config {
        ServerConfig::Stdio(c) => Box::new(Connection::stdio(c)?),
        ServerConfig::Http(c) => Box::new(Connection::http(c)?),
        ServerConfig::Sse(c) => Box::new(Connection::sse(c)?),
    };
    Ok(client)
}
