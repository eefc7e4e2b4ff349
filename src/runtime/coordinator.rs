/// Execution coordinator
///
/// Owns the output cache and the per-node attempt slots of one editing
/// session. Every attempt gets a fresh token; starting a new attempt cancels
/// the node's in-flight one and waits for it to reach a terminal state, and a
/// result is only committed while its token still owns the node. A superseded
/// attempt therefore never writes the cache, whatever order tasks finish in.

use crate::error::{GraphError, NodeError};
use crate::runtime::cache::{OutputCache, OutputScope, OutputSnapshot};
use crate::runtime::executor::{ExecutionResult, ExecutionStatus, NodeExecutor};
use crate::workflow::graph::GraphModel;
use crate::workflow::template::{self, Resolution};
use crate::workflow::types::{Node, TriggerPayload};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Graph shared between a session's editor and its coordinator
pub type SharedGraph = Arc<RwLock<GraphModel>>;

/// Lifecycle of a node's current attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AttemptPhase {
    Idle,
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl AttemptPhase {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptPhase::Queued | AttemptPhase::Running)
    }

    fn from_status(status: ExecutionStatus) -> Self {
        match status {
            ExecutionStatus::Success => AttemptPhase::Succeeded,
            ExecutionStatus::Error => AttemptPhase::Failed,
            ExecutionStatus::Cancelled | ExecutionStatus::Skipped => AttemptPhase::Cancelled,
        }
    }
}

#[derive(Debug)]
struct AttemptSlot {
    token: u64,
    phase: AttemptPhase,
    cancel: CancellationToken,
    /// Flips to true once the attempt has finished (committed or not)
    done: watch::Receiver<bool>,
}

/// Owns an attempt until its result is committed
///
/// Dropped unsettled (the caller abandoned the future, or it panicked), it
/// cancels the attempt and records a `cancelled` result if the attempt still
/// owns the node. Either way `done` is signalled so a waiting successor runs.
struct AttemptGuard<'a> {
    coordinator: &'a ExecutionCoordinator,
    node_id: String,
    token: u64,
    cancel: CancellationToken,
    started: std::time::Instant,
    settled: bool,
    done: watch::Sender<bool>,
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.cancel.cancel();
            let error = NodeError::Cancelled(format!("attempt {} of node {} was abandoned", self.token, self.node_id));
            let result = ExecutionResult::failure(&self.node_id, self.token, &error, Vec::new(), self.started.elapsed());
            tracing::info!("🛑 Attempt {} of node {} abandoned by its caller", self.token, self.node_id);
            self.coordinator.commit(result);
        }
        let _ = self.done.send(true);
    }
}

/// Node plus its resolved config, ready to execute
struct Prepared {
    node: Node,
    resolution: Resolution,
}

#[derive(Debug)]
pub struct ExecutionCoordinator {
    graph: SharedGraph,
    executor: Arc<NodeExecutor>,
    cache: OutputCache,
    slots: Mutex<HashMap<String, AttemptSlot>>,
    next_token: AtomicU64,
}

impl ExecutionCoordinator {
    pub fn new(graph: SharedGraph, executor: Arc<NodeExecutor>) -> Self {
        Self {
            graph,
            executor,
            cache: OutputCache::new(),
            slots: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(0),
        }
    }

    pub fn graph(&self) -> RwLockReadGuard<'_, GraphModel> {
        self.graph.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn graph_mut(&self) -> RwLockWriteGuard<'_, GraphModel> {
        self.graph.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Test a single node on demand
    ///
    /// Structural problems are returned as errors. Everything else, including
    /// invalid config and unresolved references, ends up in the result.
    pub async fn test_node(
        &self,
        node_id: &str,
        config_override: Option<Value>,
        cancel: Option<CancellationToken>,
    ) -> Result<ExecutionResult, GraphError> {
        self.execute(node_id, config_override, cancel.unwrap_or_default(), None).await
    }

    /// Run one attempt, cancelling and awaiting any attempt already in flight
    pub(crate) async fn execute(
        &self,
        node_id: &str,
        config_override: Option<Value>,
        parent: CancellationToken,
        trigger: Option<TriggerPayload>,
    ) -> Result<ExecutionResult, GraphError> {
        let Prepared { node, resolution } = self.prepare(node_id, config_override, true)?;

        let token = self.next_token.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = parent.child_token();
        let (done_tx, done_rx) = watch::channel(false);
        let mut guard = AttemptGuard {
            coordinator: self,
            node_id: node_id.to_string(),
            token,
            cancel: cancel.clone(),
            started: std::time::Instant::now(),
            settled: false,
            done: done_tx,
        };

        let prior = self.lock_slots().insert(
            node_id.to_string(),
            AttemptSlot {
                token,
                phase: AttemptPhase::Queued,
                cancel: cancel.clone(),
                done: done_rx,
            },
        );

        if let Some(mut prior) = prior.filter(|slot| !slot.phase.is_terminal()) {
            tracing::info!("♻️ Attempt {} of node {} supersedes attempt {}", token, node_id, prior.token);
            prior.cancel.cancel();
            let _ = prior.done.wait_for(|finished| *finished).await;
        }

        self.set_phase(node_id, token, AttemptPhase::Running);
        if !resolution.unresolved.is_empty() {
            tracing::debug!("🧩 Node {} has {} unresolved reference(s)", node_id, resolution.unresolved.len());
        }

        let started = std::time::Instant::now();
        let outcome = self
            .executor
            .execute_node(&node, resolution.config, cancel, trigger)
            .await;
        let elapsed = started.elapsed();

        let result = match outcome {
            Ok(output) => ExecutionResult::success(node_id, token, output, resolution.unresolved, elapsed),
            Err(err) => {
                tracing::warn!("❌ Node {} attempt {} failed: {}", node_id, token, err);
                ExecutionResult::failure(node_id, token, &err, resolution.unresolved, elapsed)
            }
        };

        let committed = self.commit(result);
        guard.settled = true;
        Ok(committed)
    }

    /// Resolution only, for live previews; never executes or writes anything
    pub fn preview(&self, node_id: &str, config_override: Option<Value>) -> Result<Resolution, GraphError> {
        self.prepare(node_id, config_override, false).map(|prepared| prepared.resolution)
    }

    /// Cancel a node's in-flight attempt; false when nothing was running
    pub fn cancel_node(&self, node_id: &str) -> bool {
        match self.lock_slots().get(node_id) {
            Some(slot) if !slot.phase.is_terminal() => {
                slot.cancel.cancel();
                tracing::info!("🛑 Cancellation requested for node {} (attempt {})", node_id, slot.token);
                true
            }
            _ => false,
        }
    }

    /// Cancel and drop everything held for a deleted node
    pub fn forget(&self, node_id: &str) {
        if let Some(slot) = self.lock_slots().remove(node_id) {
            slot.cancel.cancel();
        }
        if self.cache.evict(node_id) {
            tracing::debug!("🧹 Evicted cached output of node {}", node_id);
        }
    }

    pub fn outputs(&self) -> OutputSnapshot {
        self.cache.snapshot()
    }

    pub fn phase(&self, node_id: &str) -> AttemptPhase {
        self.lock_slots()
            .get(node_id)
            .map(|slot| slot.phase)
            .unwrap_or(AttemptPhase::Idle)
    }

    fn prepare(&self, node_id: &str, config_override: Option<Value>, executable: bool) -> Result<Prepared, GraphError> {
        let graph = self.graph();
        if executable {
            graph.check_executable()?;
        }
        let node = graph
            .node(node_id)
            .cloned()
            .ok_or_else(|| GraphError::NotFound {
                node_id: node_id.to_string(),
            })?;

        let scope = OutputScope::new(graph.label_index(), self.cache.snapshot());
        let raw = config_override.unwrap_or_else(|| node.config.clone());
        let resolution = template::resolve(&raw, &scope);

        Ok(Prepared { node, resolution })
    }

    /// Write a result if its attempt still owns the node
    fn commit(&self, result: ExecutionResult) -> ExecutionResult {
        let mut slots = self.lock_slots();
        match slots.get_mut(&result.node_id) {
            Some(slot) if slot.token == result.attempt => {
                slot.phase = AttemptPhase::from_status(result.status);
                self.cache.commit(&result);
                tracing::info!(
                    "✅ Node {} attempt {} committed as {:?} in {}ms",
                    result.node_id,
                    result.attempt,
                    result.status,
                    result.duration_ms
                );
                result
            }
            _ => {
                tracing::debug!("🗑️ Discarding superseded attempt {} of node {}", result.attempt, result.node_id);
                result.superseded()
            }
        }
    }

    fn set_phase(&self, node_id: &str, token: u64, phase: AttemptPhase) {
        if let Some(slot) = self.lock_slots().get_mut(node_id) {
            if slot.token == token {
                slot.phase = phase;
            }
        }
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<String, AttemptSlot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
