//! Configuration types for backend MCP servers.
//!
//! A gateway describes each backend as one [`ServerConfig`], tagged by
//! transport. Configs can be built in code or read from TOML:
//!
//! ```toml
//! [servers.filesystem]
//! transport = "stdio"
//! command = "npx"
//! args = ["-y", "@modelcontextprotocol/server-filesystem", "/srv"]
//!
//! [servers.remote]
//! transport = "http"
//! url = "https://api.example.com/mcp"
//! headers = { Authorization = "Bearer token123" }
//! timeout_ms = 60000
//! ```

use mut_types::{ClientInfo, ConfigError, ProtocolVersion};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_timeout() -> u64 {
    30000
}

/// Options shared by every transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientOptions {
    /// Identifier used in logs and errors (e.g. "gateway:123"). Generated
    /// when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Protocol version to request in `initialize` (default: 2024-11-05).
    #[serde(default)]
    pub protocol_version: ProtocolVersion,
    /// Identity announced to the server.
    #[serde(default)]
    pub client_info: ClientInfo,
    /// Timeout for each request in milliseconds (default: 30000).
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            id: None,
            protocol_version: ProtocolVersion::default(),
            client_info: ClientInfo::default(),
            timeout_ms: default_timeout(),
        }
    }
}

impl ClientOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The configured id, or `"<transport>:<uuid>"` when none was given.
    pub fn connection_id(&self, transport: &str) -> String {
        match self.id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!("{transport}:{}", uuid::Uuid::new_v4()),
        }
    }
}

/// A server spawned as a child process, spoken to over stdin/stdout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StdioClientConfig {
    /// Command to run (e.g., "npx", "uv").
    pub command: String,
    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables to set for the server process.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for the server process.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(flatten)]
    pub options: ClientOptions,
}

impl StdioClientConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command.trim().is_empty() {
            return Err(ConfigError::MissingKey {
                key: "command".into(),
            });
        }
        Ok(())
    }
}

/// A server reached over HTTP: streamable HTTP or a persistent SSE stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// Endpoint URL (e.g. "https://api.example.com/mcp").
    pub url: String,
    /// Extra headers sent on every request, typically authentication
    /// (`Authorization`, `X-API-Key`, ...).
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(flatten)]
    pub options: ClientOptions,
}

/// The SSE transport is configured exactly like streamable HTTP.
pub type SseClientConfig = HttpClientConfig;

impl HttpClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::MissingKey { key: "url".into() });
        }
        reqwest::Url::parse(&self.url).map_err(|e| ConfigError::InvalidValue {
            key: "url".into(),
            message: format!("{}: {e}", self.url),
        })?;
        Ok(())
    }
}

/// Configuration for one backend server, tagged by transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum ServerConfig {
    Stdio(StdioClientConfig),
    #[serde(alias = "streamable_http")]
    Http(HttpClientConfig),
    Sse(SseClientConfig),
}

impl ServerConfig {
    pub fn transport_name(&self) -> &'static str {
        match self {
            ServerConfig::Stdio(_) => "stdio",
            ServerConfig::Http(_) => "http",
            ServerConfig::Sse(_) => "sse",
        }
    }

    pub fn options(&self) -> &ClientOptions {
        match self {
            ServerConfig::Stdio(c) => &c.options,
            ServerConfig::Http(c) | ServerConfig::Sse(c) => &c.options,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            ServerConfig::Stdio(c) => c.validate(),
            ServerConfig::Http(c) | ServerConfig::Sse(c) => c.validate(),
        }
    }
}

/// Top-level discovery configuration: named backend servers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
}

impl DiscoveryConfig {
    /// Read and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        tracing::debug!(
            "Loaded {} MCP server(s) from {}",
            config.servers.len(),
            path.display()
        );
        Ok(config)
    }

    /// Validate every server, naming the offending one on failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, server) in &self.servers {
            server.validate().map_err(|e| match e {
                ConfigError::MissingKey { key } => ConfigError::MissingKey {
                    key: format!("servers.{name}.{key}"),
                },
                ConfigError::InvalidValue { key, message } => ConfigError::InvalidValue {
                    key: format!("servers.{name}.{key}"),
                    message,
                },
                other => other,
            })?;
        }
        Ok(())
    }
}
