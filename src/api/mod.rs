/// HTTP API Layer
///
/// This module provides the REST API for the workflow editor:
/// - Workflow CRUD against the SQLite document store
/// - Graph edits, single-node tests, previews and batch runs (SSE)
/// - Webhook ingress that runs a graph from its trigger node
/// - Public downloads of expiring assets

use crate::assets::ExpiringAssetStore;
use crate::credentials::CredentialProvider;
use crate::error::GraphError;
use crate::workflow::registry::SessionRegistry;
use crate::workflow::storage::WorkflowStorage;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Router,
};
use serde_json::json;
use std::sync::Arc;

// Workflow management endpoints (POST/GET/PUT/DELETE)
pub mod workflows;

// Editing session endpoints: graph edits, tests, previews, runs
pub mod editor;

// Webhook ingress
pub mod webhooks;

// Expiring asset downloads
pub mod assets;

/// Shared state for every route
#[derive(Clone)]
pub struct AppState {
    /// Workflow documents
    pub storage: WorkflowStorage,
    /// Live editing sessions keyed by workflow id
    pub registry: Arc<SessionRegistry>,
    pub assets: Arc<ExpiringAssetStore>,
    /// Used to verify inbound webhook credentials
    pub credentials: Arc<dyn CredentialProvider>,
}

/// Error body returned by every endpoint
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Method {0} not allowed")]
    MethodNotAllowed(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Graph(GraphError::NotFound { .. }) | ApiError::Graph(GraphError::EdgeNotFound { .. }) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Graph(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Graph(err) => json!({ "error": err.to_string(), "graphError": err }),
            ApiError::Internal(err) => {
                tracing::error!("❌ Internal error: {:#}", err);
                json!({ "error": "Internal server error" })
            }
            other => json!({ "error": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

/// Look up a live session or fail with 404
pub(crate) fn session(
    state: &AppState,
    workflow_id: &str,
) -> Result<Arc<crate::runtime::session::EditorSession>, ApiError> {
    state
        .registry
        .get_session(workflow_id)
        .ok_or_else(|| ApiError::NotFound(format!("Workflow not found: {}", workflow_id)))
}

/// Every API route, bound to its state
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(workflows::create_workflow_routes())
        .merge(editor::create_editor_routes())
        .merge(webhooks::create_webhook_routes())
        .merge(assets::create_asset_routes())
        .with_state(state)
}
