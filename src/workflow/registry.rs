/// Hot-reload session registry using ArcSwap
///
/// Holds one `EditorSession` per loaded workflow. Updates clone the map and
/// swap the pointer, so lookups never block and sessions already handed out
/// keep working while the registry changes underneath them. Reloading a
/// workflow from storage replaces its session, which clears its output cache.

use crate::runtime::executor::NodeExecutor;
use crate::runtime::session::EditorSession;
use crate::workflow::storage::WorkflowStorage;
use crate::workflow::types::Workflow;
use anyhow::Result;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug)]
pub struct SessionRegistry {
    /// workflow_id -> live session
    sessions: ArcSwap<HashMap<String, Arc<EditorSession>>>,
    storage: WorkflowStorage,
    executor: Arc<NodeExecutor>,
}

impl SessionRegistry {
    pub fn new(storage: WorkflowStorage, executor: Arc<NodeExecutor>) -> Self {
        Self {
            sessions: ArcSwap::from_pointee(HashMap::new()),
            storage,
            executor,
        }
    }

    /// Load every stored workflow into a fresh session
    pub async fn init_from_storage(&self) -> Result<()> {
        let stored = self.storage.load_all_workflows().await?;
        let sessions: HashMap<String, Arc<EditorSession>> = stored
            .into_iter()
            .map(|(id, workflow)| (id, Arc::new(EditorSession::new(&workflow, self.executor.clone()))))
            .collect();

        self.sessions.store(Arc::new(sessions));
        tracing::info!("📊 Initialized session registry with {} workflows", self.sessions.load().len());
        Ok(())
    }

    /// Replace a workflow's session with one rebuilt from storage
    ///
    /// Returns the new session, or `None` when the workflow no longer exists.
    pub async fn reload_workflow(&self, workflow_id: &str) -> Result<Option<Arc<EditorSession>>> {
        let Some(workflow) = self.storage.get_workflow(workflow_id).await? else {
            self.remove_workflow(workflow_id);
            return Ok(None);
        };
        let session = self.install(&workflow);
        tracing::info!("🔥 Hot-reloaded workflow {} (output cache cleared)", workflow_id);
        Ok(Some(session))
    }

    /// Start a fresh session for a document without touching storage
    pub fn install(&self, workflow: &Workflow) -> Arc<EditorSession> {
        let session = Arc::new(EditorSession::new(workflow, self.executor.clone()));
        let installed = session.clone();
        self.sessions.rcu(move |current| {
            let mut next = HashMap::clone(current);
            next.insert(workflow.id.clone(), installed.clone());
            next
        });
        session
    }

    pub fn get_session(&self, workflow_id: &str) -> Option<Arc<EditorSession>> {
        self.sessions.load().get(workflow_id).cloned()
    }

    /// Drop a session; returns whether one existed
    pub fn remove_workflow(&self, workflow_id: &str) -> bool {
        if !self.sessions.load().contains_key(workflow_id) {
            return false;
        }
        self.sessions.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.remove(workflow_id);
            next
        });
        tracing::info!("🗑️ Removed workflow session: {}", workflow_id);
        true
    }

    /// Persist a session's current graph and keep the session (and its cache)
    pub async fn save_session(&self, workflow_id: &str) -> Result<Option<Workflow>> {
        let Some(session) = self.get_session(workflow_id) else {
            return Ok(None);
        };
        let workflow = session.snapshot_workflow();
        self.storage.save_workflow(&workflow).await?;
        Ok(Some(workflow))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use crate::workflow::types::{Node, NodeType};
    use serde_json::json;

    #[tokio::test]
    async fn reload_replaces_the_session_and_clears_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let storage = WorkflowStorage::connect(dir.path().join("stepwise.db")).await.unwrap();
        let (executor, _assets) = test_support::executor().await;
        storage
            .save_workflow(&Workflow {
                id: "wf".into(),
                name: "Calc".into(),
                nodes: vec![Node::new("c", NodeType::Code, "Calc", json!({"script": "return 1"}))],
                edges: vec![],
            })
            .await
            .unwrap();

        let registry = SessionRegistry::new(storage, Arc::new(executor));
        registry.init_from_storage().await.unwrap();

        let session = registry.get_session("wf").unwrap();
        session.coordinator().test_node("c", None, None).await.unwrap();
        assert_eq!(session.coordinator().outputs().len(), 1);

        let reloaded = registry.reload_workflow("wf").await.unwrap().unwrap();
        assert!(!Arc::ptr_eq(&session, &reloaded));
        assert!(reloaded.coordinator().outputs().is_empty());
        assert!(registry.reload_workflow("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_persists_session_edits() {
        let dir = tempfile::tempdir().unwrap();
        let storage = WorkflowStorage::connect(dir.path().join("stepwise.db")).await.unwrap();
        let (executor, _assets) = test_support::executor().await;
        let registry = SessionRegistry::new(storage.clone(), Arc::new(executor));

        let session = registry.install(&Workflow {
            id: "wf".into(),
            name: "Draft".into(),
            nodes: vec![],
            edges: vec![],
        });
        session.add_node(NodeType::Webhook, Some("hook".into()), None, None).unwrap();

        registry.save_session("wf").await.unwrap();
        let stored = storage.get_workflow("wf").await.unwrap().unwrap();
        assert_eq!(stored.nodes.len(), 1);
        assert_eq!(stored.nodes[0].label, "Webhook");

        assert!(registry.remove_workflow("wf"));
        assert!(!registry.remove_workflow("wf"));
    }
}
