/// Workflow management REST API endpoints
///
/// CRUD over persisted workflow documents. Creating or replacing a workflow
/// reloads its editing session, which starts with an empty output cache.

use crate::api::{ApiError, AppState};
use crate::workflow::types::Workflow;
use axum::{
    extract::{Path, State},
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Response for workflow creation/update operations
#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub id: String,
    pub message: String,
}

/// Request body for workflow creation and replacement
#[derive(Debug, Deserialize)]
pub struct WorkflowRequest {
    pub workflow: Workflow,
}

pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", get(list_workflows).post(create_workflow))
        .route(
            "/api/workflows/{id}",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
}

/// POST /api/workflows
/// Body: { "workflow": { "id": "...", "name": "...", "nodes": [...], "edges": [...] } }
async fn create_workflow(
    State(state): State<AppState>,
    Json(payload): Json<WorkflowRequest>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    let workflow = payload.workflow;

    if workflow.id.trim().is_empty() || workflow.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Workflow id and name are required".into()));
    }
    if state.storage.get_workflow(&workflow.id).await?.is_some() {
        return Err(ApiError::Conflict(format!("Workflow already exists: {}", workflow.id)));
    }

    state.storage.save_workflow(&workflow).await?;
    state.registry.reload_workflow(&workflow.id).await?;

    tracing::info!("🔥 Created workflow: {} ({})", workflow.id, workflow.name);

    Ok(Json(WorkflowResponse {
        id: workflow.id.clone(),
        message: format!("Workflow '{}' created successfully", workflow.name),
    }))
}

/// GET /api/workflows
async fn list_workflows(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let workflows = state.storage.list_workflows().await?;
    Ok(Json(json!({ "workflows": workflows })))
}

/// GET /api/workflows/{id}
///
/// Returns the persisted document; unsaved edits live at `/graph`.
async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, ApiError> {
    state
        .storage
        .get_workflow(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Workflow not found: {}", id)))
}

/// PUT /api/workflows/{id}
/// Body: { "workflow": {...} }; the id in the URL wins
async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<WorkflowRequest>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    let mut workflow = payload.workflow;
    workflow.id = id.clone();

    if workflow.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Workflow name is required".into()));
    }
    if state.storage.get_workflow(&id).await?.is_none() {
        return Err(ApiError::NotFound(format!("Workflow not found: {}", id)));
    }

    state.storage.save_workflow(&workflow).await?;
    state.registry.reload_workflow(&id).await?;

    tracing::info!("🔥 Replaced workflow: {} ({})", workflow.id, workflow.name);

    Ok(Json(WorkflowResponse {
        id,
        message: format!("Workflow '{}' updated successfully", workflow.name),
    }))
}

/// DELETE /api/workflows/{id}
async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let had_session = state.registry.remove_workflow(&id);
    let deleted = state.storage.delete_workflow(&id).await?;

    if !deleted && !had_session {
        return Err(ApiError::NotFound(format!("Workflow not found: {}", id)));
    }

    tracing::info!("🗑️ Deleted workflow: {}", id);
    Ok(Json(json!({ "message": "Workflow deleted successfully" })))
}
