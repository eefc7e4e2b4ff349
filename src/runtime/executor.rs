/// Single-node execution
///
/// `NodeExecutor` looks up the node's handler, validates the resolved config
/// and runs the handler as its own tokio task under a cancellation token and a
/// deadline. It knows nothing about the cache or about other nodes; the
/// coordinator decides what happens with the outcome.

use crate::error::{ErrorKind, FieldError, GraphError, NodeError};
use crate::nodes::{self, ExecutionContext, NodeServices};
use crate::workflow::template::UnresolvedReference;
use crate::workflow::types::{Node, TriggerPayload};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Terminal status of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionStatus {
    Success,
    Error,
    Cancelled,
    /// Batch runs only: an upstream node did not succeed
    Skipped,
}

/// Immutable record of one node attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub node_id: String,
    /// Attempt token; later attempts carry larger tokens
    pub attempt: u64,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub field_errors: Vec<FieldError>,
    /// Template expressions that resolved to ""
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<UnresolvedReference>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn success(node_id: &str, attempt: u64, output: Value, unresolved: Vec<UnresolvedReference>, duration: Duration) -> Self {
        Self {
            node_id: node_id.to_string(),
            attempt,
            status: ExecutionStatus::Success,
            output: Some(output),
            error_message: None,
            error_kind: None,
            field_errors: Vec::new(),
            unresolved,
            timestamp: Utc::now(),
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Error or cancelled result for a failed attempt
    pub fn failure(node_id: &str, attempt: u64, error: &NodeError, unresolved: Vec<UnresolvedReference>, duration: Duration) -> Self {
        let status = if error.is_cancellation() {
            ExecutionStatus::Cancelled
        } else {
            ExecutionStatus::Error
        };
        Self {
            node_id: node_id.to_string(),
            attempt,
            status,
            output: None,
            error_message: Some(error.to_string()),
            error_kind: Some(error.kind()),
            field_errors: error.field_errors().to_vec(),
            unresolved,
            timestamp: Utc::now(),
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Node dropped from a batch run without being attempted
    pub fn skipped(node_id: &str, reason: impl Into<String>) -> Self {
        Self {
            node_id: node_id.to_string(),
            attempt: 0,
            status: ExecutionStatus::Skipped,
            output: None,
            error_message: Some(reason.into()),
            error_kind: None,
            field_errors: Vec::new(),
            unresolved: Vec::new(),
            timestamp: Utc::now(),
            duration_ms: 0,
        }
    }

    /// Node that could not be attempted because the graph changed under a run
    pub fn structural(node_id: &str, error: &GraphError) -> Self {
        Self {
            status: ExecutionStatus::Error,
            error_message: Some(error.to_string()),
            error_kind: Some(ErrorKind::Structural),
            ..Self::skipped(node_id, "")
        }
    }

    /// The same attempt, demoted after a newer attempt took over the node
    pub fn superseded(self) -> Self {
        Self {
            status: ExecutionStatus::Cancelled,
            output: None,
            error_message: Some(NodeError::Cancelled("superseded by a newer attempt".to_string()).to_string()),
            error_kind: Some(ErrorKind::Cancelled),
            field_errors: Vec::new(),
            ..self
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

/// Runs one node's handler with cancellation and a deadline
#[derive(Debug)]
pub struct NodeExecutor {
    services: Arc<NodeServices>,
    default_timeout: Duration,
    max_timeout: Duration,
}

impl NodeExecutor {
    pub fn new(services: Arc<NodeServices>, default_timeout: Duration, max_timeout: Duration) -> Self {
        Self {
            services,
            default_timeout: default_timeout.min(max_timeout),
            max_timeout,
        }
    }

    pub fn services(&self) -> &Arc<NodeServices> {
        &self.services
    }

    /// Deadline for a node: `timeoutSeconds` from its config, capped by the maximum
    pub fn timeout_for(&self, config: &Value) -> Duration {
        config
            .get("timeoutSeconds")
            .and_then(Value::as_f64)
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(|secs| Duration::from_secs_f64(secs).min(self.max_timeout))
            .unwrap_or(self.default_timeout)
    }

    /// Execute a node against an already-resolved config
    ///
    /// The handler runs as a spawned task. If `cancel` fires or the deadline
    /// passes first the task is aborted; a side effect it already started may
    /// still complete remotely.
    pub async fn execute_node(
        &self,
        node: &Node,
        config: Value,
        cancel: CancellationToken,
        trigger: Option<TriggerPayload>,
    ) -> Result<Value, NodeError> {
        let handler = nodes::lookup(&node.node_type)?;

        let field_errors = handler.validate_config(&config);
        if !field_errors.is_empty() {
            tracing::warn!("⚠️ Node {} has invalid config: {} field error(s)", node.id, field_errors.len());
            return Err(NodeError::ConfigValidation(field_errors));
        }

        if cancel.is_cancelled() {
            return Err(NodeError::Cancelled(format!("node {} cancelled before start", node.id)));
        }

        let timeout = self.timeout_for(&config);
        let deadline = Instant::now() + timeout;
        let ctx = ExecutionContext {
            node_id: node.id.clone(),
            cancel: cancel.clone(),
            deadline,
            trigger,
            services: self.services.clone(),
        };

        tracing::info!("🚀 Starting node execution: {} (type: {}, timeout {:?})", node.id, node.node_type, timeout);

        let mut task = tokio::spawn(handler.execute(config, ctx));

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                task.abort();
                tracing::info!("🛑 Node {} cancelled", node.id);
                Err(NodeError::Cancelled(format!("node {} cancelled", node.id)))
            }
            _ = tokio::time::sleep_until(deadline) => {
                cancel.cancel();
                task.abort();
                tracing::warn!("⏰ Node {} timed out after {:?}", node.id, timeout);
                Err(NodeError::Timeout(timeout))
            }
            joined = &mut task => match joined {
                Ok(outcome) => outcome,
                Err(e) if e.is_cancelled() => Err(NodeError::Cancelled(format!("node {} task aborted", node.id))),
                Err(e) => Err(NodeError::failed(format!("Node task panicked: {}", e))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use crate::workflow::types::NodeType;
    use serde_json::json;

    #[tokio::test]
    async fn timeout_comes_from_config_and_is_capped() {
        let (executor, _dir) = test_support::executor().await;
        assert_eq!(executor.timeout_for(&json!({})), test_support::DEFAULT_TIMEOUT);
        assert_eq!(executor.timeout_for(&json!({"timeoutSeconds": 0.5})), Duration::from_millis(500));
        assert_eq!(executor.timeout_for(&json!({"timeoutSeconds": 9999})), test_support::MAX_TIMEOUT);
        assert_eq!(executor.timeout_for(&json!({"timeoutSeconds": -1})), test_support::DEFAULT_TIMEOUT);
    }

    #[tokio::test]
    async fn invalid_config_never_reaches_the_handler() {
        let (executor, _dir) = test_support::executor().await;
        let node = Node::new("n1", NodeType::HttpRequest, "Call", json!({}));
        let err = executor
            .execute_node(&node, json!({"url": ""}), CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert_eq!(err.field_errors(), &[FieldError::new("url", "is required")]);
    }

    #[tokio::test]
    async fn unknown_type_is_unsupported() {
        let (executor, _dir) = test_support::executor().await;
        let node = Node {
            id: "n1".into(),
            node_type: "spreadsheet".into(),
            label: "Sheet".into(),
            config: json!({}),
        };
        let err = executor
            .execute_node(&node, json!({}), CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedType);
    }

    #[test]
    fn failure_status_follows_error_kind() {
        let timed_out = ExecutionResult::failure("n1", 3, &NodeError::Timeout(Duration::from_secs(2)), Vec::new(), Duration::ZERO);
        assert_eq!(timed_out.status, ExecutionStatus::Cancelled);
        assert_eq!(timed_out.error_kind, Some(ErrorKind::Timeout));
        assert_eq!(timed_out.error_message.as_deref(), Some("Timed out after 2s"));

        let failed = ExecutionResult::failure("n1", 4, &NodeError::failed("boom"), Vec::new(), Duration::ZERO);
        assert_eq!(failed.status, ExecutionStatus::Error);

        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["nodeId"], json!("n1"));
        assert_eq!(value["errorKind"], json!("execution"));
        assert!(value.get("output").is_none());
    }
}
