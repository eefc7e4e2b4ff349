/// Editing session endpoints
///
/// Everything under `/api/workflows/{id}/...` works on the live session: graph
/// edits, single-node tests, cancellation, previews, the output cache and
/// batch runs streamed as server-sent events. Edits stay in memory until
/// `POST /save` writes the graph back to storage.

use crate::api::{session, ApiError, AppState};
use crate::nodes::{self, NodeTypeInfo};
use crate::runtime::engine::RunEvent;
use crate::runtime::executor::ExecutionResult;
use crate::workflow::template::Resolution;
use crate::workflow::types::{Node, NodeType, Workflow};
use axum::{
    extract::{Path, Query, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
    routing::{delete, get, post, put},
    Router,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
pub struct AddNodeRequest {
    #[serde(rename = "type")]
    pub node_type: String,
    pub id: Option<String>,
    pub label: Option<String>,
    pub config: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub label: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfigRequest {
    pub config: Value,
}

#[derive(Debug, Deserialize)]
pub struct EdgeRequest {
    pub from: String,
    pub to: String,
}

/// Body for test and preview; `config` replaces the stored raw config for this call only
#[derive(Debug, Default, Deserialize)]
pub struct OverrideRequest {
    #[serde(default)]
    pub config: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct RunQuery {
    pub start: Option<String>,
}

pub fn create_editor_routes() -> Router<AppState> {
    Router::new()
        .route("/api/node-types", get(node_types))
        .route("/api/workflows/{id}/graph", get(get_graph))
        .route("/api/workflows/{id}/validate", get(validate))
        .route("/api/workflows/{id}/nodes", post(add_node))
        .route("/api/workflows/{id}/nodes/{node_id}", delete(remove_node))
        .route("/api/workflows/{id}/nodes/{node_id}/label", put(rename_node))
        .route("/api/workflows/{id}/nodes/{node_id}/config", put(update_config))
        .route("/api/workflows/{id}/nodes/{node_id}/test", post(test_node))
        .route("/api/workflows/{id}/nodes/{node_id}/cancel", post(cancel_node))
        .route("/api/workflows/{id}/nodes/{node_id}/preview", post(preview))
        .route("/api/workflows/{id}/edges", post(add_edge).delete(remove_edge))
        .route("/api/workflows/{id}/outputs", get(outputs))
        .route("/api/workflows/{id}/run", post(run_graph))
        .route("/api/workflows/{id}/save", post(save))
}

/// GET /api/node-types
async fn node_types() -> Json<Vec<NodeTypeInfo>> {
    Json(nodes::catalogue())
}

/// GET /api/workflows/{id}/graph
/// Returns: { "workflow": {...}, "issues": [...] }
async fn get_graph(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let session = session(&state, &id)?;
    Ok(Json(json!({
        "workflow": session.snapshot_workflow(),
        "issues": session.validate(),
    })))
}

/// GET /api/workflows/{id}/validate
async fn validate(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let issues = session(&state, &id)?.validate();
    let executable = !issues.iter().any(|issue| issue.is_blocking());
    Ok(Json(json!({ "executable": executable, "issues": issues })))
}

/// POST /api/workflows/{id}/nodes
/// Body: { "type": "httpRequest", "label": "Fetch", "config": {...} }
async fn add_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<AddNodeRequest>,
) -> Result<Json<Node>, ApiError> {
    let node_type = NodeType::parse(&request.node_type)
        .ok_or_else(|| ApiError::BadRequest(format!("Unsupported node type: {}", request.node_type)))?;
    let node = session(&state, &id)?.add_node(node_type, request.id, request.label, request.config)?;
    Ok(Json(node))
}

/// DELETE /api/workflows/{id}/nodes/{node_id}
async fn remove_node(
    State(state): State<AppState>,
    Path((id, node_id)): Path<(String, String)>,
) -> Result<Json<Node>, ApiError> {
    Ok(Json(session(&state, &id)?.remove_node(&node_id)?))
}

/// PUT /api/workflows/{id}/nodes/{node_id}/label
/// Body: { "label": "Fetch image" }
async fn rename_node(
    State(state): State<AppState>,
    Path((id, node_id)): Path<(String, String)>,
    Json(request): Json<RenameRequest>,
) -> Result<Json<Value>, ApiError> {
    let rewritten = session(&state, &id)?.rename_node(&node_id, &request.label)?;
    Ok(Json(json!({ "label": request.label, "rewrittenReferences": rewritten })))
}

/// PUT /api/workflows/{id}/nodes/{node_id}/config
async fn update_config(
    State(state): State<AppState>,
    Path((id, node_id)): Path<(String, String)>,
    Json(request): Json<ConfigRequest>,
) -> Result<Json<Value>, ApiError> {
    session(&state, &id)?.update_config(&node_id, request.config)?;
    Ok(Json(json!({ "updated": node_id })))
}

/// POST /api/workflows/{id}/nodes/{node_id}/test
/// Body: {} or { "config": {...} }
///
/// The attempt is cancelled if the client goes away before it finishes.
async fn test_node(
    State(state): State<AppState>,
    Path((id, node_id)): Path<(String, String)>,
    Json(request): Json<OverrideRequest>,
) -> Result<Json<ExecutionResult>, ApiError> {
    let session = session(&state, &id)?;
    let cancel = CancellationToken::new();
    let _disconnect = cancel.clone().drop_guard();

    let result = session
        .coordinator()
        .test_node(&node_id, request.config, Some(cancel))
        .await?;
    Ok(Json(result))
}

/// POST /api/workflows/{id}/nodes/{node_id}/cancel
async fn cancel_node(
    State(state): State<AppState>,
    Path((id, node_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let cancelled = session(&state, &id)?.coordinator().cancel_node(&node_id);
    Ok(Json(json!({ "cancelled": cancelled })))
}

/// POST /api/workflows/{id}/nodes/{node_id}/preview
async fn preview(
    State(state): State<AppState>,
    Path((id, node_id)): Path<(String, String)>,
    Json(request): Json<OverrideRequest>,
) -> Result<Json<Resolution>, ApiError> {
    let resolution = session(&state, &id)?.coordinator().preview(&node_id, request.config)?;
    Ok(Json(resolution))
}

/// POST /api/workflows/{id}/edges
/// Body: { "from": "n1", "to": "n2" }
async fn add_edge(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(edge): Json<EdgeRequest>,
) -> Result<Json<Value>, ApiError> {
    session(&state, &id)?.add_edge(&edge.from, &edge.to)?;
    Ok(Json(json!({ "from": edge.from, "to": edge.to })))
}

/// DELETE /api/workflows/{id}/edges
/// Body: { "from": "n1", "to": "n2" }
async fn remove_edge(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(edge): Json<EdgeRequest>,
) -> Result<Json<Value>, ApiError> {
    session(&state, &id)?.remove_edge(&edge.from, &edge.to)?;
    Ok(Json(json!({ "removed": { "from": edge.from, "to": edge.to } })))
}

/// GET /api/workflows/{id}/outputs
async fn outputs(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let snapshot = session(&state, &id)?.coordinator().outputs();
    Ok(Json(json!({ "outputs": &*snapshot })))
}

/// POST /api/workflows/{id}/run?start={node_id}
///
/// Streams `started`, one `node` event per node, then `completed`.
async fn run_graph(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RunQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let handle = session(&state, &id)?.engine().run_graph(query.start.as_deref(), None)?;

    let stream = futures::stream::unfold(handle.events, |mut events| async move {
        events.recv().await.map(|event| (event, events))
    })
    .map(|event| {
        let name = match &event {
            RunEvent::Started { .. } => "started",
            RunEvent::Node(_) => "node",
            RunEvent::Completed { .. } => "completed",
        };
        Event::default().event(name).json_data(&event)
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// POST /api/workflows/{id}/save
async fn save(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Workflow>, ApiError> {
    state
        .registry
        .save_session(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Workflow not found: {}", id)))
}
