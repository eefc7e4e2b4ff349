/// Batch execution engine
///
/// Runs a whole graph (or the part reachable from a start node) sequentially
/// in topological order through the coordinator, so batch runs share the same
/// cache, tokens and supersession rules as single-node tests. Progress is
/// streamed as `RunEvent`s; nothing that happens inside a run is returned as
/// an error.

use crate::error::GraphError;
use crate::runtime::coordinator::ExecutionCoordinator;
use crate::runtime::executor::{ExecutionResult, ExecutionStatus};
use crate::workflow::types::TriggerPayload;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Per-status tally of a finished run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub skipped: usize,
}

impl RunSummary {
    fn record(&mut self, status: ExecutionStatus) {
        match status {
            ExecutionStatus::Success => self.succeeded += 1,
            ExecutionStatus::Error => self.failed += 1,
            ExecutionStatus::Cancelled => self.cancelled += 1,
            ExecutionStatus::Skipped => self.skipped += 1,
        }
    }
}

/// Progress of a batch run
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum RunEvent {
    #[serde(rename_all = "camelCase")]
    Started { run_id: String, order: Vec<String> },
    Node(ExecutionResult),
    #[serde(rename_all = "camelCase")]
    Completed {
        run_id: String,
        summary: RunSummary,
        duration_ms: u64,
    },
}

/// Live handle on a spawned run
#[derive(Debug)]
pub struct RunHandle {
    pub run_id: String,
    pub events: mpsc::Receiver<RunEvent>,
    /// Cancels the node in flight; remaining nodes are skipped
    pub cancel: CancellationToken,
}

/// Collected outcome of a run awaited to the end
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub results: Vec<ExecutionResult>,
    pub summary: RunSummary,
}

impl RunReport {
    pub fn result(&self, node_id: &str) -> Option<&ExecutionResult> {
        self.results.iter().find(|r| r.node_id == node_id)
    }
}

/// Everything a run needs, captured from the graph at start
struct RunPlan {
    order: Vec<String>,
    predecessors: HashMap<String, Vec<String>>,
    /// Nodes that receive the trigger payload
    trigger_targets: HashSet<String>,
}

#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    coordinator: Arc<ExecutionCoordinator>,
}

impl ExecutionEngine {
    pub fn new(coordinator: Arc<ExecutionCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Start a batch run
    ///
    /// With a `start` node only that node and its downstream nodes run. The
    /// trigger payload goes to the start node, or to every trigger node when
    /// the whole graph runs.
    pub fn run_graph(&self, start: Option<&str>, trigger: Option<TriggerPayload>) -> Result<RunHandle, GraphError> {
        let plan = self.plan(start)?;
        let run_id = uuid::Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(plan.order.len() + 2);

        tracing::info!(
            "🚀 Starting run {} over {} node(s){}",
            run_id,
            plan.order.len(),
            start.map(|s| format!(" from {}", s)).unwrap_or_default()
        );

        tokio::spawn(drive(
            self.coordinator.clone(),
            plan,
            run_id.clone(),
            trigger,
            cancel.clone(),
            tx,
        ));

        Ok(RunHandle {
            run_id,
            events: rx,
            cancel,
        })
    }

    /// Run and wait for every node
    pub async fn run_to_completion(&self, start: Option<&str>, trigger: Option<TriggerPayload>) -> Result<RunReport, GraphError> {
        let mut handle = self.run_graph(start, trigger)?;
        let mut results = Vec::new();
        let mut summary = RunSummary::default();

        while let Some(event) = handle.events.recv().await {
            match event {
                RunEvent::Node(result) => results.push(result),
                RunEvent::Completed { summary: done, .. } => summary = done,
                RunEvent::Started { .. } => {}
            }
        }

        Ok(RunReport {
            run_id: handle.run_id,
            results,
            summary,
        })
    }

    fn plan(&self, start: Option<&str>) -> Result<RunPlan, GraphError> {
        let graph = self.coordinator.graph();
        graph.check_executable()?;

        let mut order = graph.topological_order()?;
        if let Some(start) = start {
            let reachable = graph.reachable_from(start)?;
            order.retain(|id| reachable.contains(id));
        }

        let predecessors = order
            .iter()
            .map(|id| (id.clone(), graph.predecessors(id)))
            .collect();

        let trigger_targets = match start {
            Some(start) => HashSet::from([start.to_string()]),
            None => order
                .iter()
                .filter(|id| {
                    graph
                        .node(id)
                        .and_then(|node| node.kind())
                        .is_some_and(|kind| kind.is_trigger())
                })
                .cloned()
                .collect(),
        };

        Ok(RunPlan {
            order,
            predecessors,
            trigger_targets,
        })
    }
}

async fn drive(
    coordinator: Arc<ExecutionCoordinator>,
    plan: RunPlan,
    run_id: String,
    trigger: Option<TriggerPayload>,
    cancel: CancellationToken,
    events: mpsc::Sender<RunEvent>,
) {
    let started = std::time::Instant::now();
    let mut halted: HashSet<String> = HashSet::new();
    let mut summary = RunSummary::default();

    let mut listening = events
        .send(RunEvent::Started {
            run_id: run_id.clone(),
            order: plan.order.clone(),
        })
        .await
        .is_ok();

    for (step, node_id) in plan.order.iter().enumerate() {
        let blocked_by = plan
            .predecessors
            .get(node_id)
            .and_then(|preds| preds.iter().find(|p| halted.contains(*p)));

        let result = if let Some(upstream) = blocked_by {
            ExecutionResult::skipped(node_id, format!("upstream node {} did not succeed", upstream))
        } else if cancel.is_cancelled() {
            ExecutionResult::skipped(node_id, "run cancelled")
        } else {
            tracing::info!("📍 Step {}/{}: executing node '{}'", step + 1, plan.order.len(), node_id);
            let node_trigger = trigger.clone().filter(|_| plan.trigger_targets.contains(node_id));
            match coordinator.execute(node_id, None, cancel.clone(), node_trigger).await {
                Ok(result) => result,
                Err(err) => ExecutionResult::structural(node_id, &err),
            }
        };

        if !result.is_success() {
            halted.insert(node_id.clone());
        }
        summary.record(result.status);

        if listening && events.send(RunEvent::Node(result)).await.is_err() {
            tracing::debug!("📭 Run {} has no listener anymore; continuing in background", run_id);
            listening = false;
        }
    }

    let duration_ms = started.elapsed().as_millis() as u64;
    tracing::info!(
        "🎉 Run {} finished in {}ms: {} succeeded, {} failed, {} cancelled, {} skipped",
        run_id,
        duration_ms,
        summary.succeeded,
        summary.failed,
        summary.cancelled,
        summary.skipped
    );

    if listening {
        let _ = events
            .send(RunEvent::Completed {
                run_id,
                summary,
                duration_ms,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::coordinator::SharedGraph;
    use crate::test_support;
    use crate::workflow::graph::GraphModel;
    use crate::workflow::types::{Edge, Node, NodeType, Workflow};
    use serde_json::json;
    use std::sync::RwLock;

    async fn engine_for(nodes: Vec<Node>, edges: Vec<Edge>) -> (ExecutionEngine, tempfile::TempDir) {
        let (executor, dir) = test_support::executor().await;
        let workflow = Workflow {
            id: "wf".into(),
            name: "wf".into(),
            nodes,
            edges,
        };
        let graph: SharedGraph = Arc::new(RwLock::new(GraphModel::from_workflow(&workflow)));
        let coordinator = Arc::new(ExecutionCoordinator::new(graph, Arc::new(executor)));
        (ExecutionEngine::new(coordinator), dir)
    }

    fn code(id: &str, label: &str, script: &str, input: serde_json::Value) -> Node {
        Node::new(id, NodeType::Code, label, json!({"script": script, "input": input}))
    }

    #[tokio::test]
    async fn failing_middle_node_skips_its_dependents() {
        let (engine, _dir) = engine_for(
            vec![
                code("a", "A", "return { n = 2 }", json!(null)),
                code("b", "B", "error('boom')", json!("{{A.n}}")),
                code("c", "C", "return input", json!("{{B}}")),
            ],
            vec![Edge::new("a", "b"), Edge::new("b", "c")],
        )
        .await;

        let report = engine.run_to_completion(None, None).await.unwrap();
        let statuses: Vec<_> = report.results.iter().map(|r| (r.node_id.as_str(), r.status)).collect();
        assert_eq!(
            statuses,
            vec![
                ("a", ExecutionStatus::Success),
                ("b", ExecutionStatus::Error),
                ("c", ExecutionStatus::Skipped),
            ]
        );
        assert!(report.result("b").unwrap().error_message.as_deref().unwrap().contains("boom"));
        assert_eq!(
            report.summary,
            RunSummary {
                succeeded: 1,
                failed: 1,
                cancelled: 0,
                skipped: 1
            }
        );
        assert!(engine.coordinator.outputs().get("c").is_none());
    }

    #[tokio::test]
    async fn outputs_flow_downstream_in_order() {
        let (engine, _dir) = engine_for(
            vec![
                code("sum", "Sum", "return { total = input.a + input.b }", json!({"a": 2, "b": 3})),
                code("fmt", "Format", "return input", json!("total={{Sum.total}}")),
            ],
            vec![Edge::new("sum", "fmt")],
        )
        .await;

        let report = engine.run_to_completion(None, None).await.unwrap();
        assert_eq!(report.result("fmt").unwrap().output, Some(json!("total=5")));
    }

    #[tokio::test]
    async fn start_node_limits_the_run_and_receives_the_trigger() {
        let (engine, _dir) = engine_for(
            vec![
                Node::new("hook", NodeType::Webhook, "Hook", json!({"path": "/in"})),
                code("echo", "Echo", "return input", json!("{{Hook.body.name}}")),
                code("other", "Other", "return 1", json!(null)),
            ],
            vec![Edge::new("hook", "echo")],
        )
        .await;

        let trigger = TriggerPayload::from_webhook("POST", "/in", json!({"name": "Ada"}), HashMap::new(), HashMap::new());
        let report = engine.run_to_completion(Some("hook"), Some(trigger)).await.unwrap();

        assert_eq!(report.results.len(), 2);
        assert!(report.result("other").is_none());
        assert_eq!(report.result("echo").unwrap().output, Some(json!("Ada")));
    }

    #[tokio::test]
    async fn events_bracket_the_node_results() {
        let (engine, _dir) = engine_for(vec![code("a", "A", "return 1", json!(null))], vec![]).await;
        let mut handle = engine.run_graph(None, None).unwrap();

        let mut kinds = Vec::new();
        while let Some(event) = handle.events.recv().await {
            kinds.push(serde_json::to_value(&event).unwrap()["event"].as_str().unwrap().to_string());
        }
        assert_eq!(kinds, vec!["started", "node", "completed"]);
    }

    #[tokio::test]
    async fn cyclic_graph_is_rejected_before_running() {
        let (engine, _dir) = engine_for(
            vec![code("a", "A", "return 1", json!(null)), code("b", "B", "return 1", json!(null))],
            vec![Edge::new("a", "b"), Edge::new("b", "a")],
        )
        .await;
        assert!(matches!(
            engine.run_graph(None, None),
            Err(GraphError::CycleDetected { .. })
        ));
    }
}
