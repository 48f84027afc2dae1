//! Discovery passes that build one [`DiscoveryResult`] per backend server.

use crate::client::{ConnectionState, McpClient};
use crate::config::{DiscoveryConfig, ServerConfig};
use crate::context::CallContext;
use futures_util::future::join_all;
use mut_types::{DiscoveryResult, McpError};

/// Run a discovery pass on an open client.
///
/// Initializes first unless the client is already ready, then lists tools,
/// prompts and resources in that order. A failing list is logged and left
/// empty; only a failed `initialize` fails the pass.
pub async fn discover(
    client: &dyn McpClient,
    ctx: &CallContext,
) -> Result<DiscoveryResult, McpError> {
    let server_info = match client.server_info() {
        Some(info) if client.state() == ConnectionState::Ready => info,
        _ => client.initialize(ctx).await?.server_info,
    };

    let mut result = DiscoveryResult {
        server_info,
        ..Default::default()
    };

    match client.list_tools(ctx).await {
        Ok(tools) => result.tools = tools,
        Err(e) => tracing::warn!(server = %client.id(), "Failed to list tools: {e}"),
    }

    match client.list_prompts(ctx).await {
        Ok(prompts) => result.prompts = prompts,
        Err(e) => tracing::warn!(server = %client.id(), "Failed to list prompts: {e}"),
    }

    match client.list_resources(ctx).await {
        Ok(resources) => result.resources = resources,
        Err(e) => tracing::warn!(server = %client.id(), "Failed to list resources: {e}"),
    }

    tracing::info!(
        server = %client.id(),
        "MCP discovery completed: {} tools, {} prompts, {} resources",
        result.tools.len(),
        result.prompts.len(),
        result.resources.len(),
    );

    Ok(result)
}

/// Connect to one configured server, discover it, and close the connection.
///
/// The connection is closed whether or not discovery succeeded.
pub async fn discover_server(
    config: &ServerConfig,
    ctx: &CallContext,
) -> Result<DiscoveryResult, McpError> {
    let client = crate::connect(config)?;
    tracing::info!(server = %client.id(), "Created {} client", config.transport_name());

    let outcome = client.discover(ctx).await;
    if let Err(e) = &outcome {
        tracing::error!(server = %client.id(), "Failed to discover MCP server: {e}");
    }

    client.close().await?;
    outcome
}

/// Outcome of discovering one named server from a [`DiscoveryConfig`].
#[derive(Debug)]
pub struct ServerDiscovery {
    pub name: String,
    pub outcome: Result<DiscoveryResult, McpError>,
}

/// Discover every configured server concurrently.
///
/// Servers that fail are logged and reported in their outcome; they never
/// stop the others. Results come back in configuration (name) order.
pub async fn discover_all(config: &DiscoveryConfig, ctx: &CallContext) -> Vec<ServerDiscovery> {
    let passes = config.servers.iter().map(|(name, server)| async move {
        let outcome = discover_server(server, ctx).await;
        match &outcome {
            Ok(result) => tracing::info!(
                "MCP server '{}' discovered ({} tools)",
                name,
                result.tools.len()
            ),
            Err(e) => tracing::warn!("MCP server '{}' failed discovery: {}", name, e),
        }
        ServerDiscovery {
            name: name.clone(),
            outcome,
        }
    });

    join_all(passes).await
}
