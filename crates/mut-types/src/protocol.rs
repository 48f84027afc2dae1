//! Protocol constants: JSON-RPC version, MCP protocol versions, method names
//! and HTTP header names.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The only JSON-RPC version MCP speaks.
pub const JSONRPC_VERSION: &str = "2.0";

/// Header carrying the server-issued session token (streamable HTTP).
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Header carrying the negotiated protocol version on post-handshake requests.
pub const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

/// JSON-RPC method names used by the discovery client.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const PROMPTS_LIST: &str = "prompts/list";
    pub const PROMPTS_GET: &str = "prompts/get";
    pub const RESOURCES_LIST: &str = "resources/list";
    pub const RESOURCES_READ: &str = "resources/read";
}

/// A date-based MCP protocol version.
///
/// Each version marks the last date backward-incompatible changes were made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ProtocolVersion {
    /// 2024-11-05, the pre-release revision most servers still speak.
    V2024_11_05,
    /// 2024-11-25, the initial official release.
    V2024_11_25,
    /// 2025-06-18: structured tool output, OAuth, elicitation.
    V2025_06_18,
}

/// The version sent in `initialize` unless configured otherwise.
pub const DEFAULT_MCP_VERSION: ProtocolVersion = ProtocolVersion::V2024_11_05;

/// The newest version this client understands.
pub const LATEST_MCP_VERSION: ProtocolVersion = ProtocolVersion::V2025_06_18;

/// All supported versions, oldest first.
pub const SUPPORTED_VERSIONS: [ProtocolVersion; 3] = [
    ProtocolVersion::V2024_11_05,
    ProtocolVersion::V2024_11_25,
    ProtocolVersion::V2025_06_18,
];

impl ProtocolVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolVersion::V2024_11_05 => "2024-11-05",
            ProtocolVersion::V2024_11_25 => "2024-11-25",
            ProtocolVersion::V2025_06_18 => "2025-06-18",
        }
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        DEFAULT_MCP_VERSION
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a version string is not in the supported set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVersion(pub String);

impl fmt::Display for UnknownVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported MCP protocol version '{}'", self.0)
    }
}

impl std::error::Error for UnknownVersion {}

impl FromStr for ProtocolVersion {
    type Err = UnknownVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SUPPORTED_VERSIONS
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| UnknownVersion(s.to_string()))
    }
}

impl TryFrom<String> for ProtocolVersion {
    type Error = UnknownVersion;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProtocolVersion> for String {
    fn from(value: ProtocolVersion) -> Self {
        value.as_str().to_string()
    }
}

/// Whether `version` is one of the protocol versions this client speaks.
pub fn is_version_supported(version: &str) -> bool {
    version.parse::<ProtocolVersion>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_and_latest() {
        assert_eq!(DEFAULT_MCP_VERSION.as_str(), "2024-11-05");
        assert_eq!(LATEST_MCP_VERSION.as_str(), "2025-06-18");
        assert_eq!(ProtocolVersion::default(), DEFAULT_MCP_VERSION);
    }

    #[test]
    fn supported_versions_are_ordered() {
        let mut sorted = SUPPORTED_VERSIONS;
        sorted.sort();
        assert_eq!(sorted, SUPPORTED_VERSIONS);
        assert_eq!(SUPPORTED_VERSIONS.last(), Some(&LATEST_MCP_VERSION));
    }

    #[test]
    fn version_set_is_closed() {
        assert!(is_version_supported("2024-11-05"));
        assert!(is_version_supported("2024-11-25"));
        assert!(is_version_supported("2025-06-18"));

        assert!(!is_version_supported(""));
        assert!(!is_version_supported("2025-03-26"));
        assert!(!is_version_supported("2024-11-05 "));
        assert!(!is_version_supported("latest"));
    }

    #[test]
    fn serde_uses_date_strings() {
        let json = serde_json::to_string(&ProtocolVersion::V2024_11_25).unwrap();
        assert_eq!(json, "\"2024-11-25\"");
        let parsed: ProtocolVersion = serde_json::from_str("\"2025-06-18\"").unwrap();
        assert_eq!(parsed, ProtocolVersion::V2025_06_18);
        assert!(serde_json::from_str::<ProtocolVersion>("\"1999-01-01\"").is_err());
    }
}
