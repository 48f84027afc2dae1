//! The byte-level channel underneath a [`Connection`](crate::Connection).
//!
//! A transport moves JSON-RPC messages and correlates responses; it knows
//! nothing about the MCP lifecycle. Three implementations exist: stdio,
//! streamable HTTP and SSE.

use crate::context::CallContext;
use mut_types::McpError;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

/// A boxed, `Send` future borrowing from the transport or client.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Sends JSON-RPC messages to one MCP server.
///
/// Dyn-compatible; all async methods return boxed futures.
pub trait Transport: Send + Sync {
    /// Connection identifier used in logs and errors.
    fn id(&self) -> &str;

    /// Short transport name ("stdio", "http", "sse").
    fn kind(&self) -> &'static str;

    /// Send a request and return its validated `result`.
    ///
    /// Implementations allocate the request id, check the echoed id and turn
    /// a JSON-RPC `error` into [`McpError::JsonRpc`].
    fn request<'a>(
        &'a self,
        ctx: &'a CallContext,
        method: &'a str,
        params: Option<serde_json::Value>,
    ) -> BoxFuture<'a, Result<serde_json::Value, McpError>>;

    /// Send a notification. No response is read.
    fn notify<'a>(
        &'a self,
        ctx: &'a CallContext,
        method: &'a str,
        params: Option<serde_json::Value>,
    ) -> BoxFuture<'a, Result<(), McpError>>;

    /// Record the protocol version agreed during `initialize`.
    fn set_protocol_version(&self, _version: &str) {}

    /// Release OS resources and reset session state. Best-effort and
    /// idempotent; never fails.
    fn shutdown(&self) -> BoxFuture<'_, ()>;
}

/// Per-connection request id generator: 1, 2, 3, ... never reused.
#[derive(Debug)]
pub struct RequestIds(AtomicU64);

impl RequestIds {
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub fn next_id(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    /// The id the next call will receive.
    pub fn peek(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for RequestIds {
    fn default() -> Self {
        Self::new()
    }
}
