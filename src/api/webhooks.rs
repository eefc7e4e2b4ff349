/// Webhook ingress
///
/// `ANY /webhook/{workflow_id}/{*path}` finds the workflow's webhook node for
/// `path`, checks method and credential, and runs the graph from that node
/// with the request as trigger payload. The response carries every node's
/// result; it is 422 when any node did not succeed.

use crate::api::{session, ApiError, AppState};
use crate::nodes::webhook::{accepts_method, auth_header, verify_request};
use crate::workflow::types::TriggerPayload;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    response::Json,
    routing::any,
    Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;

pub fn create_webhook_routes() -> Router<AppState> {
    Router::new().route("/webhook/{workflow_id}/{*path}", any(execute_webhook))
}

/// Execute a workflow via webhook trigger
async fn execute_webhook(
    State(state): State<AppState>,
    Path((workflow_id, webhook_path)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    tracing::info!("📥 Webhook request received: {} {}/{}", method, workflow_id, webhook_path);

    let session = session(&state, &workflow_id)?;
    let node = session.webhook_node(&webhook_path).ok_or_else(|| {
        tracing::warn!("❌ No webhook node for path '{}' in workflow '{}'", webhook_path, workflow_id);
        ApiError::NotFound(format!("No webhook at /{} in workflow {}", webhook_path.trim_start_matches('/'), workflow_id))
    })?;

    if !accepts_method(&node.config, method.as_str()) {
        return Err(ApiError::MethodNotAllowed(method.to_string()));
    }

    let mut header_map: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
        .collect();

    verify_request(&node.config, &header_map, state.credentials.as_ref())
        .await
        .map_err(|e| {
            tracing::warn!("🔒 Webhook {}/{} rejected: {}", workflow_id, webhook_path, e);
            ApiError::Unauthorized("Invalid webhook credentials".into())
        })?;

    // The secret itself never becomes part of a node output
    if let Some(secret_header) = auth_header(&node.config) {
        header_map.remove(&secret_header);
    }

    let trigger = TriggerPayload::from_webhook(
        method.as_str(),
        &format!("/{}", webhook_path.trim_start_matches('/')),
        parse_body(&body),
        header_map,
        query,
    );

    let started = std::time::Instant::now();
    let report = session.engine().run_to_completion(Some(&node.id), Some(trigger)).await?;
    let all_succeeded = report.summary.failed == 0 && report.summary.cancelled == 0 && report.summary.skipped == 0;

    tracing::info!(
        "🎉 Webhook run {} for {} finished in {:?} ({} succeeded)",
        report.run_id,
        workflow_id,
        started.elapsed(),
        report.summary.succeeded
    );

    // The last node in dependency order is the workflow's response
    let output = report
        .results
        .last()
        .and_then(|result| result.output.clone())
        .unwrap_or(Value::Null);

    let status = if all_succeeded {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };

    Ok((
        status,
        Json(json!({
            "runId": report.run_id,
            "summary": report.summary,
            "output": output,
            "results": report.results,
        })),
    ))
}

/// JSON when possible, otherwise the raw text; empty bodies are null
fn parse_body(body: &[u8]) -> Value {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(body).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}
