//! MCP domain types and typed parsers for JSON-RPC `result` payloads.
//!
//! Optional wire fields are `Option` so an omitted `description` stays
//! distinguishable from an empty one. Parsers never panic on malformed
//! input; they return [`McpError::Decode`].

use crate::error::McpError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Free-form arguments passed to `tools/call`.
pub type ToolArgument = serde_json::Map<String, serde_json::Value>;

/// Identity this client announces during `initialize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "mut-client".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Identity a server reports during `initialize`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
}

/// Parameters of the `initialize` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: serde_json::Map<String, serde_json::Value>,
    pub client_info: ClientInfo,
}

/// Result of the `initialize` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: serde_json::Map<String, serde_json::Value>,
    pub server_info: ServerInfo,
}

fn default_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// A tool exposed by an MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_schema")]
    pub input_schema: serde_json::Value,
}

/// A content item in a tool result or prompt message.
///
/// `text` is set for `type = "text"`; `data` and `mime_type` carry base64
/// payloads such as images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl ToolContent {
    /// A plain text content item.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: Some(text.into()),
            data: None,
            mime_type: None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        self.text.as_deref()
    }
}

/// Result of `tools/call`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

/// A prompt template exposed by an MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<PromptArgument>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// A message in a rendered prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: ToolContent,
}

/// Result of `prompts/get`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub messages: Vec<PromptMessage>,
}

/// A resource exposed by an MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// One item of `resources/read` output: either `text` or base64 `blob`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContent {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

/// Result of `resources/read`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceReadResult {
    #[serde(default)]
    pub contents: Vec<ResourceContent>,
}

/// Everything one discovery pass learned about a server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResult {
    pub server_info: ServerInfo,
    #[serde(default)]
    pub tools: Vec<Tool>,
    #[serde(default)]
    pub prompts: Vec<Prompt>,
    #[serde(default)]
    pub resources: Vec<Resource>,
}

#[derive(Deserialize)]
struct ToolsList {
    #[serde(default)]
    tools: Vec<Tool>,
}

#[derive(Deserialize)]
struct PromptsList {
    #[serde(default)]
    prompts: Vec<Prompt>,
}

#[derive(Deserialize)]
struct ResourcesList {
    #[serde(default)]
    resources: Vec<Resource>,
}

fn decode<T: DeserializeOwned>(context: &str, result: &serde_json::Value) -> Result<T, McpError> {
    T::deserialize(result).map_err(|source| McpError::Decode {
        context: format!("{context} result"),
        source,
    })
}

/// Parse an `initialize` result.
pub fn parse_initialize(result: &serde_json::Value) -> Result<InitializeResult, McpError> {
    decode("initialize", result)
}

/// Parse a `tools/list` result.
pub fn parse_tools_list(result: &serde_json::Value) -> Result<Vec<Tool>, McpError> {
    decode::<ToolsList>("tools/list", result).map(|l| l.tools)
}

/// Parse a `prompts/list` result.
pub fn parse_prompts_list(result: &serde_json::Value) -> Result<Vec<Prompt>, McpError> {
    decode::<PromptsList>("prompts/list", result).map(|l| l.prompts)
}

/// Parse a `resources/list` result.
pub fn parse_resources_list(result: &serde_json::Value) -> Result<Vec<Resource>, McpError> {
    decode::<ResourcesList>("resources/list", result).map(|l| l.resources)
}

/// Parse a `tools/call` result.
pub fn parse_tool_call(result: &serde_json::Value) -> Result<ToolCallResult, McpError> {
    decode("tools/call", result)
}

/// Parse a `prompts/get` result.
pub fn parse_prompt(result: &serde_json::Value) -> Result<PromptResult, McpError> {
    decode("prompts/get", result)
}

/// Parse a `resources/read` result.
pub fn parse_resource_read(result: &serde_json::Value) -> Result<ResourceReadResult, McpError> {
    decode("resources/read", result)
}
