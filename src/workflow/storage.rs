/// SQLite document store for workflows
///
/// Each workflow is persisted as one JSON document (`Workflow {id, name,
/// nodes, edges}`) next to a few indexed columns for listing. The document
/// round-trips losslessly; editing sessions are rebuilt from it on reload.

use crate::workflow::types::Workflow;
use anyhow::Result;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct WorkflowStorage {
    pool: SqlitePool,
}

/// Listing entry without the full document
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSummary {
    pub id: String,
    pub name: String,
    pub node_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl WorkflowStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database file and its schema
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new().filename(path).create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;

        let storage = Self::new(pool);
        storage.init_schema().await?;
        tracing::info!("💾 Workflow database ready at {}", path.display());
        Ok(storage)
    }

    /// Create the workflows table; safe to call repeatedly
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                node_count INTEGER NOT NULL DEFAULT 0,
                document JSON NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_workflows_name ON workflows(name)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Insert or replace a workflow document
    pub async fn save_workflow(&self, workflow: &Workflow) -> Result<()> {
        let document = serde_json::to_string(workflow)?;

        sqlx::query(
            r#"
            INSERT INTO workflows (id, name, node_count, document, updated_at)
            VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                node_count = excluded.node_count,
                document = excluded.document,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&workflow.id)
        .bind(&workflow.name)
        .bind(workflow.nodes.len() as i64)
        .bind(&document)
        .execute(&self.pool)
        .await?;

        tracing::debug!("💾 Saved workflow {} ({} nodes, {} edges)", workflow.id, workflow.nodes.len(), workflow.edges.len());
        Ok(())
    }

    pub async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>> {
        let row = sqlx::query("SELECT document FROM workflows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let document: String = row.get("document");
                Ok(Some(serde_json::from_str(&document)?))
            }
            None => Ok(None),
        }
    }

    /// Most recently updated first
    pub async fn list_workflows(&self) -> Result<Vec<WorkflowSummary>> {
        let rows = sqlx::query(
            "SELECT id, name, node_count, created_at, updated_at FROM workflows ORDER BY updated_at DESC, id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| WorkflowSummary {
                id: row.get("id"),
                name: row.get("name"),
                node_count: row.get("node_count"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    /// Every stored workflow keyed by id, for registry start-up
    pub async fn load_all_workflows(&self) -> Result<HashMap<String, Workflow>> {
        let rows = sqlx::query("SELECT id, document FROM workflows")
            .fetch_all(&self.pool)
            .await?;

        let mut workflows = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let document: String = row.get("document");
            match serde_json::from_str::<Workflow>(&document) {
                Ok(workflow) => {
                    workflows.insert(id, workflow);
                }
                Err(e) => tracing::error!("❌ Skipping unreadable workflow document {}: {}", id, e),
            }
        }

        Ok(workflows)
    }

    /// Returns whether a row was deleted
    pub async fn delete_workflow(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{Edge, Node, NodeType};
    use serde_json::json;

    fn sample() -> Workflow {
        Workflow {
            id: "wf-images".into(),
            name: "Images".into(),
            nodes: vec![
                Node::new("n1", NodeType::Convert, "Fetch", json!({"operation": "toBase64", "source": "https://example.com/cat.png"})),
                Node::new(
                    "n2",
                    NodeType::Convert,
                    "Store",
                    json!({"operation": "fromBase64", "base64Data": "{{ Fetch.base64 }}", "expirationValue": 2, "expirationUnit": "hours"}),
                ),
            ],
            edges: vec![Edge::new("n1", "n2")],
        }
    }

    #[tokio::test]
    async fn documents_round_trip_losslessly() {
        let dir = tempfile::tempdir().unwrap();
        let storage = WorkflowStorage::connect(dir.path().join("db/stepwise.db")).await.unwrap();

        let workflow = sample();
        storage.save_workflow(&workflow).await.unwrap();
        assert_eq!(storage.get_workflow("wf-images").await.unwrap(), Some(workflow.clone()));

        let mut renamed = workflow.clone();
        renamed.name = "Images v2".into();
        renamed.nodes.pop();
        renamed.edges.clear();
        storage.save_workflow(&renamed).await.unwrap();

        let listed = storage.list_workflows().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "Images v2");
        assert_eq!(listed[0].node_count, 1);

        let all = storage.load_all_workflows().await.unwrap();
        assert_eq!(all.get("wf-images"), Some(&renamed));
    }

    #[tokio::test]
    async fn delete_reports_whether_anything_was_removed() {
        let dir = tempfile::tempdir().unwrap();
        let storage = WorkflowStorage::connect(dir.path().join("stepwise.db")).await.unwrap();
        storage.save_workflow(&sample()).await.unwrap();

        assert!(storage.delete_workflow("wf-images").await.unwrap());
        assert!(!storage.delete_workflow("wf-images").await.unwrap());
        assert_eq!(storage.get_workflow("wf-images").await.unwrap(), None);
    }
}
