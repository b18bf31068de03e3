//! Capability snapshots
//!
//! The immutable result of one successful acquisition: the tools, resources
//! and prompts a server exposes, plus its self-declared identity.
//!
//! The absent-vs-empty distinction matters downstream: `resources: None`
//! means the server never advertised resource support, while
//! `resources: Some(vec![])` means it advertised the capability but had
//! nothing to list (or answered "method not found" when asked).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool exposed by an MCP server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolDescriptor {
    /// Tool name (unique identifier)
    pub name: String,

    /// Human-readable title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Tool description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Tool input schema (JSON Schema)
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,

    /// Behavioral annotations (read-only hints, destructive hints, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Value>,
}

/// A resource exposed by an MCP server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceDescriptor {
    /// Resource name
    pub name: String,

    /// Resource URI
    pub uri: String,

    /// Resource description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A prompt exposed by an MCP server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptDescriptor {
    /// Prompt name
    pub name: String,

    /// Prompt description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The enumerated capabilities of one server at one point in time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapabilitySnapshot {
    /// Server-declared name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,

    /// Server-declared description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_description: Option<String>,

    /// Tools the server exposes
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,

    /// Resources, `None` when the capability was never advertised
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<ResourceDescriptor>>,

    /// Prompts, `None` when the capability was never advertised
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<Vec<PromptDescriptor>>,
}

impl CapabilitySnapshot {
    /// Total number of enumerated items across all categories
    pub fn item_count(&self) -> usize {
        self.tools.len()
            + self.resources.as_ref().map_or(0, Vec::len)
            + self.prompts.as_ref().map_or(0, Vec::len)
    }
}
