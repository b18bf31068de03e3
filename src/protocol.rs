//! MCP Protocol Types (JSON-RPC 2.0)
//!
//! Core message types for talking to MCP servers. MCP is built on top of
//! JSON-RPC 2.0, a simple stateless RPC protocol.
//!
//! - JSON-RPC 2.0: <https://www.jsonrpc.org/specification>
//! - MCP Spec: <https://modelcontextprotocol.io/specification/2025-03-26>
//!
//! This layer is responsible only for serialization/deserialization of
//! messages. Transport concerns (stdio, HTTP) live in the transport layer;
//! handshake sequencing lives in the session layer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision this client negotiates
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC error code for an unknown method
pub const CODE_METHOD_NOT_FOUND: i32 = -32601;

/// A JSON-RPC 2.0 request message
///
/// Requests are sent from the client to the MCP server to invoke methods.
/// Each request carries a unique ID (monotonically increasing) used to match
/// the response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpRequest {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Request identifier (used to match responses)
    pub id: u64,

    /// Method name to invoke
    pub method: String,

    /// Method parameters (optional, depends on method)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl McpRequest {
    /// Create a new MCP request
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 notification (a request without an ID, expecting no reply)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpNotification {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Method name
    pub method: String,

    /// Notification parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl McpNotification {
    /// Create a new notification
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }

    /// The `notifications/initialized` message sent after a successful
    /// initialize round trip.
    pub fn initialized() -> Self {
        Self::new("notifications/initialized", None)
    }
}

/// A JSON-RPC 2.0 response message
///
/// A response carries either a `result` or an `error`, never both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpResponse {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Request identifier (matches the request's ID)
    pub id: u64,

    /// Result payload (present on success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error information (present on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<McpError>,
}

impl McpResponse {
    /// Create a successful response
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn err(id: u64, error: McpError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Check if the response is successful
    pub fn is_success(&self) -> bool {
        self.result.is_some() && self.error.is_none()
    }

    /// Get the result, or the error if unsuccessful
    pub fn into_result(self) -> Result<Value, McpError> {
        match (self.result, self.error) {
            (Some(result), None) => Ok(result),
            (None, Some(error)) => Err(error),
            _ => Err(McpError::internal_error(
                "Invalid response: both result and error present",
            )),
        }
    }
}

/// Check whether a decoded JSON value has the shape of a JSON-RPC response.
///
/// Servers may interleave their own notifications or requests on the same
/// stream; those carry a `method` field and no `result`/`error`, and must be
/// skipped rather than treated as a reply.
pub(crate) fn looks_like_response(value: &Value) -> bool {
    value.get("id").map_or(false, |id| id.is_u64())
        && (value.get("result").is_some() || value.get("error").is_some())
}

/// A JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpError {
    /// Error code (JSON-RPC defined or MCP-specific)
    pub code: i32,

    /// Human-readable error message
    pub message: String,

    /// Additional error data (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl McpError {
    /// Create a new error
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Method not found (-32601): the method does not exist / is not available
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::new(
            CODE_METHOD_NOT_FOUND,
            format!("Method not found: {}", method.into()),
        )
    }

    /// Internal error (-32603): internal JSON-RPC error
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(-32603, message)
    }

    /// Whether this error is the protocol-level "unknown method" reply
    pub fn is_method_not_found(&self) -> bool {
        self.code == CODE_METHOD_NOT_FOUND
    }
}

impl std::fmt::Display for McpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[Error {}] {}", self.code, self.message)
    }
}

impl std::error::Error for McpError {}

/// Initialization parameters sent during the handshake
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InitializeParams {
    /// Client protocol version
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,

    /// Client capabilities
    pub capabilities: ClientCapabilities,

    /// Client information
    #[serde(rename = "clientInfo")]
    pub client_info: ClientInfo,
}

impl InitializeParams {
    /// Parameters advertised by this crate
    pub fn current() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: "capstan".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

/// Client capabilities advertised during initialization
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientCapabilities {
    /// Sampling capability (object or null)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<Value>,

    /// Experimental features
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Value>,
}

/// Client identification information
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientInfo {
    /// Client name
    pub name: String,

    /// Client version
    pub version: String,
}

/// Server identification information from the initialize response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerInfo {
    /// Server name
    pub name: String,

    /// Server version
    #[serde(default)]
    pub version: Option<String>,

    /// Human-readable server title
    #[serde(default)]
    pub title: Option<String>,
}

/// Capability categories a server declared in its initialize response.
///
/// A category counts as advertised when its key is present at all, even as an
/// empty object. Categories that were never advertised must not be queried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdvertisedCapabilities {
    /// Server advertised `tools`
    pub tools: bool,

    /// Server advertised `resources`
    pub resources: bool,

    /// Server advertised `prompts`
    pub prompts: bool,
}

/// Decoded initialize response
#[derive(Debug, Clone, PartialEq)]
pub struct InitializeOutcome {
    /// Server-declared name, if provided
    pub server_name: Option<String>,

    /// Server-declared description (`instructions`, falling back to title)
    pub server_description: Option<String>,

    /// Negotiated protocol version as reported by the server
    pub protocol_version: Option<String>,

    /// Capability categories the server advertised
    pub capabilities: AdvertisedCapabilities,
}

#[derive(Debug, Deserialize)]
struct RawInitializeResult {
    #[serde(rename = "protocolVersion")]
    protocol_version: Option<String>,

    #[serde(default)]
    capabilities: Value,

    #[serde(rename = "serverInfo")]
    server_info: Option<ServerInfo>,

    #[serde(default)]
    instructions: Option<String>,
}

impl InitializeOutcome {
    /// Decode the result payload of an `initialize` response.
    pub fn from_result(result: Value) -> Result<Self, serde_json::Error> {
        let raw: RawInitializeResult = serde_json::from_value(result)?;

        let capabilities = AdvertisedCapabilities {
            tools: raw.capabilities.get("tools").is_some(),
            resources: raw.capabilities.get("resources").is_some(),
            prompts: raw.capabilities.get("prompts").is_some(),
        };

        let (server_name, title) = match raw.server_info {
            Some(info) => (Some(info.name), info.title),
            None => (None, None),
        };

        Ok(Self {
            server_name,
            server_description: raw.instructions.or(title),
            protocol_version: raw.protocol_version,
            capabilities,
        })
    }
}
