/// Core workflow type definitions
///
/// Defines the fundamental structures for workflows, nodes, and edges.
/// These types are serialized/deserialized from JSON for persistence and must
/// round-trip losslessly through the storage collaborator.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A complete workflow definition containing nodes and their connections
///
/// Workflows are stored as JSON documents in SQLite and loaded into a GraphModel
/// when an editing session starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique workflow identifier (e.g., "wf-onboarding")
    pub id: String,
    /// Human-readable workflow name
    pub name: String,
    /// List of nodes in this workflow
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// List of edges connecting nodes
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// A single step in the workflow graph
///
/// The `label` is the user-facing name and the handle used by template
/// expressions: `{{Fetch.base64}}` reads the output of the node labelled `Fetch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Stable node identifier, unchanged by renames
    pub id: String,
    /// Registered node type name (see `NodeType`)
    #[serde(rename = "type")]
    pub node_type: String,
    /// Unique display name, addressable from expressions
    pub label: String,
    /// Raw configuration, possibly containing `{{Label.path}}` expressions
    #[serde(default = "empty_config")]
    pub config: Value,
}

fn empty_config() -> Value {
    Value::Object(Default::default())
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: NodeType, label: impl Into<String>, config: Value) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.as_str().to_string(),
            label: label.into(),
            config,
        }
    }

    /// The registered type of this node, if it is one the engine knows
    pub fn kind(&self) -> Option<NodeType> {
        NodeType::parse(&self.node_type)
    }
}

/// Node types the engine ships handlers for
///
/// - Webhook: HTTP trigger entry point
/// - HttpRequest: outbound HTTP call
/// - Code: sandboxed Lua script
/// - Convert: base64 encode of a URL/file, or decode into an expiring public asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeType {
    /// Expected config: { "path": "/signup", "method": "POST", "samplePayload": {...} }
    Webhook,
    /// Expected config: { "url": "https://api.example.com", "method": "GET", "headers": {...} }
    HttpRequest,
    /// Expected config: { "script": "return { total = input.a + input.b }", "input": {...} }
    Code,
    /// Expected config: { "operation": "toBase64" | "fromBase64", ... }
    Convert,
}

impl NodeType {
    pub const ALL: [NodeType; 4] = [
        NodeType::Webhook,
        NodeType::HttpRequest,
        NodeType::Code,
        NodeType::Convert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Webhook => "webhook",
            NodeType::HttpRequest => "httpRequest",
            NodeType::Code => "code",
            NodeType::Convert => "convert",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// Trigger nodes start batch runs from inbound requests
    pub fn is_trigger(&self) -> bool {
        matches!(self, NodeType::Webhook)
    }
}

/// Directed dependency between two nodes
///
/// `to` may reference the output of `from` in its config.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// Source node ID
    pub from: String,
    /// Target node ID
    pub to: String,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Inbound request that started a run, exposed as the webhook node's output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerPayload {
    /// Parsed JSON body (or the raw text when it is not JSON)
    pub body: Value,
    /// Request headers, names lowercased
    pub headers: HashMap<String, String>,
    /// URL query parameters
    pub query: HashMap<String, String>,
    pub method: String,
    pub path: String,
    /// Arrival timestamp (RFC 3339)
    pub received_at: String,
}

impl TriggerPayload {
    /// Build a trigger payload from webhook request parts
    pub fn from_webhook(
        method: &str,
        path: &str,
        body: Value,
        headers: HashMap<String, String>,
        query: HashMap<String, String>,
    ) -> Self {
        Self {
            body,
            headers,
            query,
            method: method.to_uppercase(),
            path: path.to_string(),
            received_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}
