/// In-memory graph model for an editing session
///
/// Owns nodes and edges and enforces structural rules on every edit: unique ids,
/// unique labels, and an acyclic edge set. Petgraph is used for the cycle and
/// ordering checks, built on demand from the node/edge lists.

use crate::error::GraphError;
use crate::workflow::template;
use crate::workflow::types::{Edge, Node, Workflow};
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use petgraph::Direction;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Nodes and edges of one workflow
#[derive(Debug, Clone, Default)]
pub struct GraphModel {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

/// Petgraph view of the model
///
/// Edges pointing at missing nodes are left out; `validate` reports them separately.
struct Dag {
    graph: DiGraph<String, ()>,
    node_id_to_index: HashMap<String, NodeIndex>,
}

impl Dag {
    fn index(&self, node_id: &str) -> Result<NodeIndex, GraphError> {
        self.node_id_to_index
            .get(node_id)
            .copied()
            .ok_or_else(|| GraphError::NotFound {
                node_id: node_id.to_string(),
            })
    }
}

impl GraphModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load nodes and edges as persisted, without validation
    ///
    /// Persisted documents may be structurally broken; callers run `validate`
    /// before executing anything.
    pub fn from_workflow(workflow: &Workflow) -> Self {
        Self {
            nodes: workflow.nodes.clone(),
            edges: workflow.edges.clone(),
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    pub fn node_by_label(&self, label: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.label == label)
    }

    fn require(&self, node_id: &str) -> Result<&Node, GraphError> {
        self.node(node_id).ok_or_else(|| GraphError::NotFound {
            node_id: node_id.to_string(),
        })
    }

    /// Mapping label -> node id used by the resolver
    pub fn label_index(&self) -> HashMap<String, String> {
        self.nodes
            .iter()
            .map(|n| (n.label.clone(), n.id.clone()))
            .collect()
    }

    pub fn add_node(&mut self, node: Node) -> Result<(), GraphError> {
        check_label(&node.label)?;
        if self.node(&node.id).is_some() {
            return Err(GraphError::DuplicateId { node_id: node.id });
        }
        if self.node_by_label(&node.label).is_some() {
            return Err(GraphError::DuplicateLabel { label: node.label });
        }
        tracing::debug!("➕ Added node '{}' ({}) as '{}'", node.id, node.node_type, node.label);
        self.nodes.push(node);
        Ok(())
    }

    /// Remove a node and every edge touching it
    ///
    /// Expressions in other nodes that referenced its label are kept as-is;
    /// they resolve as unresolved `unknownLabel` references from now on.
    pub fn remove_node(&mut self, node_id: &str) -> Result<Node, GraphError> {
        let position = self
            .nodes
            .iter()
            .position(|n| n.id == node_id)
            .ok_or_else(|| GraphError::NotFound {
                node_id: node_id.to_string(),
            })?;
        let removed = self.nodes.remove(position);
        let before = self.edges.len();
        self.edges.retain(|e| e.from != node_id && e.to != node_id);

        let dangling = self
            .nodes
            .iter()
            .filter(|n| template::referenced_labels(&n.config).contains(&removed.label))
            .count();
        tracing::debug!(
            "🗑️ Removed node '{}' with {} edges; {} nodes now hold dangling references to '{}'",
            node_id,
            before - self.edges.len(),
            dangling,
            removed.label
        );
        Ok(removed)
    }

    /// Rename a node and rewrite every expression that referenced its old label
    ///
    /// Returns the number of expressions rewritten.
    pub fn rename_node(&mut self, node_id: &str, new_label: &str) -> Result<usize, GraphError> {
        check_label(new_label)?;
        let old_label = self.require(node_id)?.label.clone();
        if old_label == new_label {
            return Ok(0);
        }
        if self.node_by_label(new_label).is_some() {
            return Err(GraphError::DuplicateLabel {
                label: new_label.to_string(),
            });
        }

        let mut rewritten = 0;
        for node in &mut self.nodes {
            if node.id == node_id {
                node.label = new_label.to_string();
            }
            let (config, count) = template::rewrite_label(&node.config, &old_label, new_label);
            if count > 0 {
                node.config = config;
                rewritten += count;
            }
        }

        tracing::info!("✏️ Renamed '{}' -> '{}' ({} references rewritten)", old_label, new_label, rewritten);
        Ok(rewritten)
    }

    pub fn update_config(&mut self, node_id: &str, config: Value) -> Result<(), GraphError> {
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.id == node_id)
            .ok_or_else(|| GraphError::NotFound {
                node_id: node_id.to_string(),
            })?;
        node.config = config;
        Ok(())
    }

    /// Add a dependency edge, rejecting anything that would close a cycle
    ///
    /// Adding an edge that already exists is a no-op. On error the graph is unchanged.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<(), GraphError> {
        self.require(from)?;
        self.require(to)?;
        if self.edges.iter().any(|e| e.from == from && e.to == to) {
            return Ok(());
        }

        let cycle = GraphError::Cycle {
            from: from.to_string(),
            to: to.to_string(),
        };
        if from == to {
            return Err(cycle);
        }
        let dag = self.build_dag();
        if has_path_connecting(&dag.graph, dag.index(to)?, dag.index(from)?, None) {
            tracing::warn!("🔁 Rejected edge '{}' -> '{}': would create a cycle", from, to);
            return Err(cycle);
        }

        self.edges.push(Edge::new(from, to));
        Ok(())
    }

    pub fn remove_edge(&mut self, from: &str, to: &str) -> Result<(), GraphError> {
        let before = self.edges.len();
        self.edges.retain(|e| !(e.from == from && e.to == to));
        if self.edges.len() == before {
            return Err(GraphError::EdgeNotFound {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }

    /// Report every structural issue without mutating anything
    ///
    /// Dangling references, and references to nodes that are not upstream
    /// (a batch run may reach them before their source has run), are included
    /// as non-blocking warnings.
    pub fn validate(&self) -> Vec<GraphError> {
        let mut issues = Vec::new();

        let mut ids = HashSet::new();
        let mut labels = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                issues.push(GraphError::DuplicateId {
                    node_id: node.id.clone(),
                });
            }
            if let Err(err) = check_label(&node.label) {
                issues.push(err);
            } else if !labels.insert(node.label.as_str()) {
                issues.push(GraphError::DuplicateLabel {
                    label: node.label.clone(),
                });
            }
        }

        for edge in &self.edges {
            if !ids.contains(edge.from.as_str()) || !ids.contains(edge.to.as_str()) {
                issues.push(GraphError::DanglingEdge {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                });
            }
        }

        let dag = self.build_dag();
        if let Err(cycle) = toposort(&dag.graph, None) {
            issues.push(GraphError::CycleDetected {
                node_id: dag.graph[cycle.node_id()].clone(),
            });
        }

        let label_index = self.label_index();
        for node in &self.nodes {
            let referenced = template::referenced_labels(&node.config);
            if referenced.is_empty() {
                continue;
            }
            let upstream = self.upstream(&node.id).unwrap_or_default();
            for label in referenced {
                match label_index.get(&label) {
                    None => issues.push(GraphError::DanglingReference {
                        node_id: node.id.clone(),
                        label,
                    }),
                    Some(source) if !upstream.contains(source) => issues.push(GraphError::UnlinkedReference {
                        node_id: node.id.clone(),
                        label,
                    }),
                    Some(_) => {}
                }
            }
        }

        issues
    }

    /// Blocking structural issues, if any
    pub fn check_executable(&self) -> Result<(), GraphError> {
        match self.validate().into_iter().find(GraphError::is_blocking) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Node ids in dependency order
    pub fn topological_order(&self) -> Result<Vec<String>, GraphError> {
        let dag = self.build_dag();
        let order = toposort(&dag.graph, None).map_err(|cycle| GraphError::CycleDetected {
            node_id: dag.graph[cycle.node_id()].clone(),
        })?;
        Ok(order.into_iter().map(|idx| dag.graph[idx].clone()).collect())
    }

    /// The start node plus everything downstream of it
    pub fn reachable_from(&self, start: &str) -> Result<HashSet<String>, GraphError> {
        let dag = self.build_dag();
        let mut dfs = Dfs::new(&dag.graph, dag.index(start)?);
        let mut reachable = HashSet::new();
        while let Some(idx) = dfs.next(&dag.graph) {
            reachable.insert(dag.graph[idx].clone());
        }
        Ok(reachable)
    }

    /// Direct upstream dependencies of a node
    pub fn predecessors(&self, node_id: &str) -> Vec<String> {
        self.edges
            .iter()
            .filter(|e| e.to == node_id)
            .map(|e| e.from.clone())
            .collect()
    }

    /// All transitive upstream dependencies of a node
    pub fn upstream(&self, node_id: &str) -> Result<HashSet<String>, GraphError> {
        let dag = self.build_dag();
        let start = dag.index(node_id)?;
        let mut seen = HashSet::new();
        let mut stack = vec![start];
        while let Some(idx) = stack.pop() {
            for parent in dag.graph.neighbors_directed(idx, Direction::Incoming) {
                if seen.insert(dag.graph[parent].clone()) {
                    stack.push(parent);
                }
            }
        }
        Ok(seen)
    }

    /// Export as a persistable workflow document
    pub fn to_workflow(&self, id: &str, name: &str) -> Workflow {
        Workflow {
            id: id.to_string(),
            name: name.to_string(),
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
        }
    }

    fn build_dag(&self) -> Dag {
        let mut graph = DiGraph::new();
        let mut node_id_to_index = HashMap::new();

        for node in &self.nodes {
            node_id_to_index
                .entry(node.id.clone())
                .or_insert_with(|| graph.add_node(node.id.clone()));
        }
        for edge in &self.edges {
            if let (Some(&from), Some(&to)) = (node_id_to_index.get(&edge.from), node_id_to_index.get(&edge.to)) {
                graph.add_edge(from, to, ());
            }
        }

        Dag {
            graph,
            node_id_to_index,
        }
    }
}

fn check_label(label: &str) -> Result<(), GraphError> {
    let forbidden = ['.', '[', ']', '{', '}'];
    if label.trim().is_empty() || label != label.trim() || label.contains(forbidden) {
        return Err(GraphError::InvalidLabel {
            label: label.to_string(),
        });
    }
    Ok(())
}
