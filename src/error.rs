/// Error taxonomy for the engine
///
/// Structural problems come from the graph and are returned to callers directly.
/// Node errors happen while preparing or running a single node; the coordinator
/// captures them into that node's ExecutionResult instead of propagating them.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Structural problems with the node/edge graph
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum GraphError {
    #[error("Node not found: {node_id}")]
    #[serde(rename_all = "camelCase")]
    NotFound { node_id: String },

    #[error("Edge not found: {from} -> {to}")]
    EdgeNotFound { from: String, to: String },

    #[error("Duplicate node id: {node_id}")]
    #[serde(rename_all = "camelCase")]
    DuplicateId { node_id: String },

    #[error("Label already in use: {label}")]
    DuplicateLabel { label: String },

    /// Labels are addressable from expressions, so they cannot contain path syntax
    #[error("Invalid label '{label}': labels must be non-empty and cannot contain '.', '[', ']', '{{' or '}}'")]
    InvalidLabel { label: String },

    #[error("Edge {from} -> {to} would create a cycle")]
    Cycle { from: String, to: String },

    #[error("Graph contains a cycle through node {node_id}")]
    #[serde(rename_all = "camelCase")]
    CycleDetected { node_id: String },

    #[error("Edge {from} -> {to} references a missing node")]
    DanglingEdge { from: String, to: String },

    #[error("Node {node_id} references unknown label '{label}'")]
    #[serde(rename_all = "camelCase")]
    DanglingReference { node_id: String, label: String },

    #[error("Node {node_id} references '{label}', which is not upstream of it")]
    #[serde(rename_all = "camelCase")]
    UnlinkedReference { node_id: String, label: String },
}

impl GraphError {
    /// Whether this issue prevents execution
    ///
    /// Dangling and unlinked references are surfaced as unresolved values at run time instead.
    pub fn is_blocking(&self) -> bool {
        !matches!(self, GraphError::DanglingReference { .. } | GraphError::UnlinkedReference { .. })
    }
}

/// A single offending config field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors raised while validating or running a single node
#[derive(Debug, Clone, Error)]
pub enum NodeError {
    #[error("Invalid configuration: {}", describe_fields(.0))]
    ConfigValidation(Vec<FieldError>),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unsupported node type: {0}")]
    UnsupportedType(String),
}

/// Machine-readable category of a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Validation,
    Execution,
    Cancelled,
    Timeout,
    UnsupportedType,
    Structural,
}

impl NodeError {
    /// Shorthand for an execution failure
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Shorthand for a single-field validation failure
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation(vec![FieldError::new(field, message)])
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            NodeError::ConfigValidation(_) => ErrorKind::Validation,
            NodeError::Execution(_) => ErrorKind::Execution,
            NodeError::Cancelled(_) => ErrorKind::Cancelled,
            NodeError::Timeout(_) => ErrorKind::Timeout,
            NodeError::UnsupportedType(_) => ErrorKind::UnsupportedType,
        }
    }

    /// Cancellation and timeouts end an attempt as `cancelled`, everything else as `error`
    pub fn is_cancellation(&self) -> bool {
        matches!(self, NodeError::Cancelled(_) | NodeError::Timeout(_))
    }

    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            NodeError::ConfigValidation(fields) => fields,
            _ => &[],
        }
    }
}

fn describe_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| format!("{}: {}", f.field, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_names_every_field() {
        let err = NodeError::ConfigValidation(vec![
            FieldError::new("url", "is required"),
            FieldError::new("method", "unsupported method 'FETCH'"),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("url: is required"));
        assert!(msg.contains("method: unsupported method 'FETCH'"));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn dangling_reference_is_not_blocking() {
        let warning = GraphError::DanglingReference {
            node_id: "n2".into(),
            label: "Gone".into(),
        };
        assert!(!warning.is_blocking());
        assert!(GraphError::CycleDetected { node_id: "n1".into() }.is_blocking());
    }

    #[test]
    fn timeout_counts_as_cancellation() {
        assert!(NodeError::Timeout(Duration::from_secs(3)).is_cancellation());
        assert!(!NodeError::failed("boom").is_cancellation());
        assert_eq!(
            NodeError::Timeout(Duration::from_secs(3)).to_string(),
            "Timed out after 3s"
        );
        assert_eq!(
            NodeError::Timeout(Duration::from_millis(200)).to_string(),
            "Timed out after 200ms"
        );
    }
}
