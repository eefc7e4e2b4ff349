/// Editing session
///
/// One per loaded workflow: the live graph, its coordinator (and therefore
/// its output cache) and a batch engine. Graph edits go through here so that
/// deleting a node also drops its cached output and in-flight attempt.

use crate::error::GraphError;
use crate::nodes;
use crate::runtime::coordinator::{ExecutionCoordinator, SharedGraph};
use crate::runtime::engine::ExecutionEngine;
use crate::runtime::executor::NodeExecutor;
use crate::workflow::graph::GraphModel;
use crate::workflow::types::{Node, NodeType, Workflow};
use serde_json::Value;
use std::sync::{Arc, RwLock};

#[derive(Debug)]
pub struct EditorSession {
    workflow_id: String,
    name: RwLock<String>,
    coordinator: Arc<ExecutionCoordinator>,
    engine: ExecutionEngine,
}

impl EditorSession {
    /// Start a session from a persisted document, with an empty cache
    pub fn new(workflow: &Workflow, executor: Arc<NodeExecutor>) -> Self {
        let graph: SharedGraph = Arc::new(RwLock::new(GraphModel::from_workflow(workflow)));
        let coordinator = Arc::new(ExecutionCoordinator::new(graph, executor));

        let issues = coordinator.graph().validate();
        if !issues.is_empty() {
            tracing::warn!("⚠️ Workflow {} loaded with {} structural issue(s)", workflow.id, issues.len());
        }

        Self {
            workflow_id: workflow.id.clone(),
            name: RwLock::new(workflow.name.clone()),
            engine: ExecutionEngine::new(coordinator.clone()),
            coordinator,
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn name(&self) -> String {
        self.name.read().map(|n| n.clone()).unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn set_name(&self, name: impl Into<String>) {
        let mut guard = self.name.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = name.into();
    }

    pub fn coordinator(&self) -> &Arc<ExecutionCoordinator> {
        &self.coordinator
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    /// Current graph as a persistable document
    pub fn snapshot_workflow(&self) -> Workflow {
        self.coordinator.graph().to_workflow(&self.workflow_id, &self.name())
    }

    /// Add a node of a registered type
    ///
    /// Missing id, label or config are filled in: a uuid, a free label derived
    /// from the type name, and the type's default config.
    pub fn add_node(
        &self,
        node_type: NodeType,
        id: Option<String>,
        label: Option<String>,
        config: Option<Value>,
    ) -> Result<Node, GraphError> {
        let mut graph = self.coordinator.graph_mut();
        let label = match label {
            Some(label) => label,
            None => free_label(&graph, node_type),
        };
        let node = Node::new(
            id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            node_type,
            label,
            config.unwrap_or_else(|| nodes::handler_for(node_type).default_config()),
        );
        graph.add_node(node.clone())?;
        tracing::info!("➕ Added {} node '{}' ({}) to workflow {}", node.node_type, node.label, node.id, self.workflow_id);
        Ok(node)
    }

    /// Remove a node and everything cached for it; references to it dangle
    pub fn remove_node(&self, node_id: &str) -> Result<Node, GraphError> {
        let removed = self.coordinator.graph_mut().remove_node(node_id)?;
        self.coordinator.forget(node_id);
        Ok(removed)
    }

    /// Rename a node; returns how many references were rewritten
    pub fn rename_node(&self, node_id: &str, new_label: &str) -> Result<usize, GraphError> {
        self.coordinator.graph_mut().rename_node(node_id, new_label)
    }

    pub fn update_config(&self, node_id: &str, config: Value) -> Result<(), GraphError> {
        self.coordinator.graph_mut().update_config(node_id, config)
    }

    pub fn add_edge(&self, from: &str, to: &str) -> Result<(), GraphError> {
        self.coordinator.graph_mut().add_edge(from, to)
    }

    pub fn remove_edge(&self, from: &str, to: &str) -> Result<(), GraphError> {
        self.coordinator.graph_mut().remove_edge(from, to)
    }

    pub fn validate(&self) -> Vec<GraphError> {
        self.coordinator.graph().validate()
    }

    /// Webhook node serving `path`, if any
    pub fn webhook_node(&self, path: &str) -> Option<Node> {
        let wanted = normalize_path(path);
        self.coordinator
            .graph()
            .nodes()
            .iter()
            .find(|node| {
                node.kind() == Some(NodeType::Webhook)
                    && node
                        .config
                        .get("path")
                        .and_then(Value::as_str)
                        .is_some_and(|p| normalize_path(p) == wanted)
            })
            .cloned()
    }
}

fn normalize_path(path: &str) -> String {
    format!("/{}", path.trim_matches('/'))
}

/// First unused label of the form `HttpRequest`, `HttpRequest2`, ...
fn free_label(graph: &GraphModel, node_type: NodeType) -> String {
    let name = node_type.as_str();
    let mut chars = name.chars();
    let base: String = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::from("Node"),
    };
    (1..)
        .map(|n| if n == 1 { base.clone() } else { format!("{}{}", base, n) })
        .find(|label| graph.node_by_label(label).is_none())
        .unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use serde_json::json;

    #[tokio::test]
    async fn edits_flow_through_to_the_document() {
        let (executor, _dir) = test_support::executor().await;
        let session = EditorSession::new(
            &Workflow {
                id: "wf".into(),
                name: "Demo".into(),
                nodes: vec![],
                edges: vec![],
            },
            Arc::new(executor),
        );

        let first = session.add_node(NodeType::HttpRequest, None, None, None).unwrap();
        let second = session.add_node(NodeType::HttpRequest, None, None, None).unwrap();
        assert_eq!(first.label, "HttpRequest");
        assert_eq!(second.label, "HttpRequest2");
        assert_eq!(first.config["method"], json!("GET"));

        let code = session
            .add_node(NodeType::Code, Some("c".into()), Some("Calc".into()), Some(json!({"script": "return input", "input": "{{HttpRequest.status}}"})))
            .unwrap();
        session.add_edge(&first.id, &code.id).unwrap();
        assert_eq!(session.rename_node(&first.id, "Api").unwrap(), 1);

        let doc = session.snapshot_workflow();
        assert_eq!(doc.name, "Demo");
        assert_eq!(doc.nodes.len(), 3);
        assert_eq!(doc.nodes[2].config["input"], json!("{{Api.status}}"));
        assert_eq!(doc.edges.len(), 1);
    }

    #[tokio::test]
    async fn removing_a_node_forgets_its_output() {
        let (executor, _dir) = test_support::executor().await;
        let session = EditorSession::new(
            &Workflow {
                id: "wf".into(),
                name: "Demo".into(),
                nodes: vec![Node::new("c", NodeType::Code, "Calc", json!({"script": "return 7"}))],
                edges: vec![],
            },
            Arc::new(executor),
        );

        session.coordinator().test_node("c", None, None).await.unwrap();
        assert_eq!(session.coordinator().outputs().len(), 1);

        session.remove_node("c").unwrap();
        assert!(session.coordinator().outputs().is_empty());
        assert!(matches!(session.remove_node("c"), Err(GraphError::NotFound { .. })));
    }

    #[tokio::test]
    async fn webhook_lookup_ignores_slashes() {
        let (executor, _dir) = test_support::executor().await;
        let session = EditorSession::new(
            &Workflow {
                id: "wf".into(),
                name: "Hooks".into(),
                nodes: vec![Node::new("h", NodeType::Webhook, "Hook", json!({"path": "/orders/new"}))],
                edges: vec![],
            },
            Arc::new(executor),
        );
        assert_eq!(session.webhook_node("orders/new/").map(|n| n.id), Some("h".to_string()));
        assert!(session.webhook_node("/orders").is_none());
    }
}
