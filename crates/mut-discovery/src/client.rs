//! MCP client: the capability contract and the lifecycle shared by every
//! transport.
//!
//! [`McpClient`] is what callers program against. [`Connection`] implements
//! it once, generically over a [`Transport`], so the handshake, the state
//! machine and the result parsing are identical for stdio, HTTP and SSE.

use crate::context::CallContext;
use crate::transport::{BoxFuture, Transport};
use mut_types::protocol::methods;
use mut_types::{
    ClientInfo, DiscoveryResult, InitializeParams, InitializeResult, McpError, Prompt,
    PromptResult, ProtocolVersion, Resource, ResourceReadResult, ServerInfo, Tool, ToolArgument,
    ToolCallResult,
};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lifecycle of one logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

/// The capability contract every MCP client offers, whatever its transport.
///
/// Dyn-compatible so gateways can hold `Box<dyn McpClient>` per backend.
pub trait McpClient: Send + Sync {
    /// Connection identifier used in logs and errors.
    fn id(&self) -> &str;

    fn state(&self) -> ConnectionState;

    /// Server identity captured by `initialize`, if the connection is ready.
    fn server_info(&self) -> Option<ServerInfo>;

    /// Perform the `initialize` handshake followed by `notifications/initialized`.
    fn initialize<'a>(
        &'a self,
        ctx: &'a CallContext,
    ) -> BoxFuture<'a, Result<InitializeResult, McpError>>;

    fn list_tools<'a>(&'a self, ctx: &'a CallContext) -> BoxFuture<'a, Result<Vec<Tool>, McpError>>;

    fn call_tool<'a>(
        &'a self,
        ctx: &'a CallContext,
        name: &'a str,
        arguments: ToolArgument,
    ) -> BoxFuture<'a, Result<ToolCallResult, McpError>>;

    fn list_prompts<'a>(
        &'a self,
        ctx: &'a CallContext,
    ) -> BoxFuture<'a, Result<Vec<Prompt>, McpError>>;

    fn get_prompt<'a>(
        &'a self,
        ctx: &'a CallContext,
        name: &'a str,
        arguments: HashMap<String, String>,
    ) -> BoxFuture<'a, Result<PromptResult, McpError>>;

    fn list_resources<'a>(
        &'a self,
        ctx: &'a CallContext,
    ) -> BoxFuture<'a, Result<Vec<Resource>, McpError>>;

    fn read_resource<'a>(
        &'a self,
        ctx: &'a CallContext,
        uri: &'a str,
    ) -> BoxFuture<'a, Result<ResourceReadResult, McpError>>;

    /// Initialize if needed, then list tools, prompts and resources.
    fn discover<'a>(
        &'a self,
        ctx: &'a CallContext,
    ) -> BoxFuture<'a, Result<DiscoveryResult, McpError>>;

    /// Release the transport and reset state. Idempotent.
    fn close(&self) -> BoxFuture<'_, Result<(), McpError>>;
}

#[derive(Debug)]
struct Lifecycle {
    state: ConnectionState,
    server_info: Option<ServerInfo>,
    /// Bumped by every `close`; a handshake only commits in the generation
    /// it started in.
    generation: u64,
}

impl Lifecycle {
    fn roll_back(&mut self, generation: u64) {
        if self.generation == generation
            && matches!(
                self.state,
                ConnectionState::Initializing | ConnectionState::Ready
            )
        {
            self.state = ConnectionState::Uninitialized;
            self.server_info = None;
        }
    }
}

/// Rolls an unfinished handshake back to `Uninitialized`, including when the
/// `initialize` future is dropped before it completes.
struct InitGuard<'a> {
    lifecycle: &'a Mutex<Lifecycle>,
    generation: u64,
    armed: bool,
}

impl InitGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InitGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.lifecycle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .roll_back(self.generation);
        }
    }
}

/// An MCP client over a concrete transport.
pub struct Connection<T> {
    transport: T,
    protocol_version: ProtocolVersion,
    client_info: ClientInfo,
    lifecycle: Mutex<Lifecycle>,
}

impl<T: Transport> Connection<T> {
    pub fn new(transport: T, protocol_version: ProtocolVersion, client_info: ClientInfo) -> Self {
        Self {
            transport,
            protocol_version,
            client_info,
            lifecycle: Mutex::new(Lifecycle {
                state: ConnectionState::Uninitialized,
                server_info: None,
                generation: 0,
            }),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_initialize(&self) -> Result<InitGuard<'_>, McpError> {
        let mut lc = self.lifecycle();
        match lc.state {
            ConnectionState::Uninitialized | ConnectionState::Closed => {
                lc.state = ConnectionState::Initializing;
                Ok(InitGuard {
                    lifecycle: &self.lifecycle,
                    generation: lc.generation,
                    armed: true,
                })
            }
            ConnectionState::Initializing | ConnectionState::Ready => {
                Err(McpError::AlreadyInitialized {
                    server: self.transport.id().to_string(),
                })
            }
        }
    }

    fn ensure_ready(&self, method: &str) -> Result<(), McpError> {
        if self.lifecycle().state == ConnectionState::Ready {
            Ok(())
        } else {
            Err(McpError::NotInitialized {
                server: self.transport.id().to_string(),
                method: method.to_string(),
            })
        }
    }

    /// Check the server's answer against the supported version set.
    ///
    /// An empty answer is taken as agreement with the version we asked for.
    fn negotiate(&self, offered: &str) -> Result<ProtocolVersion, McpError> {
        if offered.is_empty() {
            return Ok(self.protocol_version);
        }
        offered
            .parse()
            .map_err(|_| McpError::UnsupportedVersion {
                server: self.transport.id().to_string(),
                version: offered.to_string(),
            })
    }

    async fn handshake(
        &self,
        ctx: &CallContext,
        generation: u64,
    ) -> Result<InitializeResult, McpError> {
        let params = serde_json::to_value(InitializeParams {
            protocol_version: self.protocol_version.to_string(),
            capabilities: serde_json::Map::new(),
            client_info: self.client_info.clone(),
        })?;

        let value = self
            .transport
            .request(ctx, methods::INITIALIZE, Some(params))
            .await?;
        let mut result = mut_types::parse_initialize(&value)?;

        let negotiated = self.negotiate(&result.protocol_version)?;
        result.server_info.protocol_version = Some(negotiated.to_string());

        {
            let mut lc = self.lifecycle();
            if lc.generation != generation || lc.state != ConnectionState::Initializing {
                return Err(McpError::ConnectionClosed {
                    server: self.transport.id().to_string(),
                });
            }
            lc.state = ConnectionState::Ready;
            lc.server_info = Some(result.server_info.clone());
            self.transport.set_protocol_version(negotiated.as_str());
        }

        self.transport
            .notify(ctx, methods::INITIALIZED, None)
            .await?;

        tracing::info!(
            server = %self.transport.id(),
            "MCP client initialized: {} {} (protocol {negotiated})",
            result.server_info.name,
            result.server_info.version,
        );

        Ok(result)
    }

    async fn do_initialize(&self, ctx: &CallContext) -> Result<InitializeResult, McpError> {
        let guard = self.begin_initialize()?;
        let result = self.handshake(ctx, guard.generation).await?;
        guard.disarm();
        Ok(result)
    }

    /// Send a capability request once the connection is ready.
    async fn call(
        &self,
        ctx: &CallContext,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        self.ensure_ready(method)?;
        self.transport.request(ctx, method, Some(params)).await
    }
}

impl<T: Transport> McpClient for Connection<T> {
    fn id(&self) -> &str {
        self.transport.id()
    }

    fn state(&self) -> ConnectionState {
        self.lifecycle().state
    }

    fn server_info(&self) -> Option<ServerInfo> {
        self.lifecycle().server_info.clone()
    }

    fn initialize<'a>(
        &'a self,
        ctx: &'a CallContext,
    ) -> BoxFuture<'a, Result<InitializeResult, McpError>> {
        Box::pin(self.do_initialize(ctx))
    }

    fn list_tools<'a>(&'a self, ctx: &'a CallContext) -> BoxFuture<'a, Result<Vec<Tool>, McpError>> {
        Box::pin(async move {
            let value = self
                .call(ctx, methods::TOOLS_LIST, serde_json::json!({}))
                .await?;
            mut_types::parse_tools_list(&value)
        })
    }

    fn call_tool<'a>(
        &'a self,
        ctx: &'a CallContext,
        name: &'a str,
        arguments: ToolArgument,
    ) -> BoxFuture<'a, Result<ToolCallResult, McpError>> {
        Box::pin(async move {
            let params = serde_json::json!({
                "name": name,
                "arguments": arguments,
            });
            let value = self.call(ctx, methods::TOOLS_CALL, params).await?;
            mut_types::parse_tool_call(&value)
        })
    }

    fn list_prompts<'a>(
        &'a self,
        ctx: &'a CallContext,
    ) -> BoxFuture<'a, Result<Vec<Prompt>, McpError>> {
        Box::pin(async move {
            let value = self
                .call(ctx, methods::PROMPTS_LIST, serde_json::json!({}))
                .await?;
            mut_types::parse_prompts_list(&value)
        })
    }

    fn get_prompt<'a>(
        &'a self,
        ctx: &'a CallContext,
        name: &'a str,
        arguments: HashMap<String, String>,
    ) -> BoxFuture<'a, Result<PromptResult, McpError>> {
        Box::pin(async move {
            let params = serde_json::json!({
                "name": name,
                "arguments": arguments,
            });
            let value = self.call(ctx, methods::PROMPTS_GET, params).await?;
            mut_types::parse_prompt(&value)
        })
    }

    fn list_resources<'a>(
        &'a self,
        ctx: &'a CallContext,
    ) -> BoxFuture<'a, Result<Vec<Resource>, McpError>> {
        Box::pin(async move {
            let value = self
                .call(ctx, methods::RESOURCES_LIST, serde_json::json!({}))
                .await?;
            mut_types::parse_resources_list(&value)
        })
    }

    fn read_resource<'a>(
        &'a self,
        ctx: &'a CallContext,
        uri: &'a str,
    ) -> BoxFuture<'a, Result<ResourceReadResult, McpError>> {
        Box::pin(async move {
            let params = serde_json::json!({ "uri": uri });
            let value = self.call(ctx, methods::RESOURCES_READ, params).await?;
            mut_types::parse_resource_read(&value)
        })
    }

    fn discover<'a>(
        &'a self,
        ctx: &'a CallContext,
    ) -> BoxFuture<'a, Result<DiscoveryResult, McpError>> {
        Box::pin(crate::discover::discover(self, ctx))
    }

    fn close(&self) -> BoxFuture<'_, Result<(), McpError>> {
        Box::pin(async move {
            tracing::info!(server = %self.transport.id(), "Closing MCP client");
            {
                let mut lc = self.lifecycle();
                lc.state = ConnectionState::Closed;
                lc.server_info = None;
                lc.generation += 1;
            }
            self.transport.shutdown().await;
            Ok(())
        })
    }
}
