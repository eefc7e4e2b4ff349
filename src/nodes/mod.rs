/// Node type registry
///
/// One handler per `NodeType`, registered in a static table. Handlers only see
/// their own resolved config plus an `ExecutionContext`; anything they need from
/// other nodes has already been substituted by the template resolver.

use crate::assets::ExpiringAssetStore;
use crate::credentials::CredentialProvider;
use crate::error::{FieldError, NodeError};
use crate::workflow::types::{NodeType, TriggerPayload};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// Webhook trigger
pub mod webhook;

// Outbound HTTP request
pub mod http;

// Sandboxed Lua code
pub mod code;

// Base64 <-> URL/file/asset conversion
pub mod convert;

/// Shared collaborators available to every handler
#[derive(Debug, Clone)]
pub struct NodeServices {
    pub http: reqwest::Client,
    pub assets: Arc<ExpiringAssetStore>,
    pub credentials: Arc<dyn CredentialProvider>,
}

/// Per-attempt execution context handed to a handler
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub node_id: String,
    /// Fires on explicit cancellation, supersession or deadline expiry
    pub cancel: CancellationToken,
    pub deadline: Instant,
    /// Present when the run was started by an inbound webhook
    pub trigger: Option<TriggerPayload>,
    pub services: Arc<NodeServices>,
}

impl ExecutionContext {
    /// Time left before the deadline
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Await an external call unless the attempt is cancelled first
    pub async fn guard<F, T>(&self, fut: F) -> Result<T, NodeError>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            out = fut => Ok(out),
            _ = self.cancel.cancelled() => Err(NodeError::Cancelled(format!("node {} cancelled during external call", self.node_id))),
        }
    }
}

/// Behaviour of one node type
#[async_trait]
pub trait NodeHandler: Send + Sync {
    fn node_type(&self) -> NodeType;

    /// One-line description for the node catalogue
    fn description(&self) -> &'static str;

    /// Config used when a node of this type is created without one
    fn default_config(&self) -> Value;

    /// Field-level problems with a (resolved) config; empty when valid
    fn validate_config(&self, config: &Value) -> Vec<FieldError>;

    /// Run the node. Called only with a config that passed `validate_config`.
    async fn execute(&self, config: Value, ctx: ExecutionContext) -> Result<Value, NodeError>;
}

static WEBHOOK: webhook::WebhookHandler = webhook::WebhookHandler;
static HTTP_REQUEST: http::HttpRequestHandler = http::HttpRequestHandler;
static CODE: code::CodeHandler = code::CodeHandler;
static CONVERT: convert::ConvertHandler = convert::ConvertHandler;

/// Handler for a known node type
pub fn handler_for(node_type: NodeType) -> &'static dyn NodeHandler {
    match node_type {
        NodeType::Webhook => &WEBHOOK,
        NodeType::HttpRequest => &HTTP_REQUEST,
        NodeType::Code => &CODE,
        NodeType::Convert => &CONVERT,
    }
}

/// Handler for a node type name as stored on a node
pub fn lookup(type_name: &str) -> Result<&'static dyn NodeHandler, NodeError> {
    NodeType::parse(type_name)
        .map(handler_for)
        .ok_or_else(|| NodeError::UnsupportedType(type_name.to_string()))
}

/// Catalogue entry describing a node type
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeTypeInfo {
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub description: &'static str,
    pub default_config: Value,
    pub trigger: bool,
}

pub fn catalogue() -> Vec<NodeTypeInfo> {
    NodeType::ALL
        .into_iter()
        .map(|node_type| {
            let handler = handler_for(node_type);
            NodeTypeInfo {
                node_type,
                description: handler.description(),
                default_config: handler.default_config(),
                trigger: node_type.is_trigger(),
            }
        })
        .collect()
}

// Config accessors shared by the handlers

pub(crate) fn str_field<'a>(config: &'a Value, name: &str) -> Option<&'a str> {
    config.get(name).and_then(Value::as_str)
}

/// Non-empty string field, or an error naming it
pub(crate) fn require_str(config: &Value, name: &str, errors: &mut Vec<FieldError>) -> Option<String> {
    match config.get(name) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::String(_)) | None | Some(Value::Null) => {
            errors.push(FieldError::new(name, "is required"));
            None
        }
        Some(_) => {
            errors.push(FieldError::new(name, "must be a string"));
            None
        }
    }
}

/// Optional string-to-string map, e.g. headers or query parameters
///
/// Scalar values are stringified; nested values are rejected.
pub(crate) fn string_map(config: &Value, name: &str, errors: &mut Vec<FieldError>) -> Vec<(String, String)> {
    match config.get(name) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Object(map)) => {
            let mut pairs = Vec::with_capacity(map.len());
            for (key, value) in map {
                match value {
                    Value::String(s) => pairs.push((key.clone(), s.clone())),
                    Value::Number(_) | Value::Bool(_) => pairs.push((key.clone(), value.to_string())),
                    Value::Null => {}
                    _ => errors.push(FieldError::new(format!("{}.{}", name, key), "must be a scalar value")),
                }
            }
            pairs
        }
        Some(_) => {
            errors.push(FieldError::new(name, "must be an object"));
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_type_is_unsupported() {
        let err = lookup("spreadsheet").err().unwrap();
        assert!(matches!(err, NodeError::UnsupportedType(ref t) if t == "spreadsheet"));
    }

    #[test]
    fn default_configs_only_lack_targets() {
        for info in catalogue() {
            let handler = handler_for(info.node_type);
            let errors = handler.validate_config(&info.default_config);
            match info.node_type {
                NodeType::Webhook | NodeType::Code => assert!(errors.is_empty(), "{:?}: {:?}", info.node_type, errors),
                NodeType::HttpRequest => assert_eq!(errors, vec![FieldError::new("url", "is required")]),
                NodeType::Convert => assert_eq!(errors, vec![FieldError::new("source", "is required")]),
            }
        }
    }

    #[test]
    fn string_map_stringifies_scalars() {
        let mut errors = Vec::new();
        let pairs = string_map(&json!({"h": {"a": "x", "b": 2, "c": true, "d": null, "e": [1]}}), "h", &mut errors);
        assert_eq!(
            pairs,
            vec![("a".into(), "x".into()), ("b".into(), "2".into()), ("c".into(), "true".into())]
        );
        assert_eq!(errors, vec![FieldError::new("h.e", "must be a scalar value")]);
    }
}
