/// Public downloads of expiring assets
///
/// GET /assets/{name} serves an asset only while it is unexpired; afterwards
/// it is 404 even if the reaper has not removed the file yet.

use crate::api::{ApiError, AppState};
use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::Utc;

pub fn create_asset_routes() -> Router<AppState> {
    Router::new().route("/assets/{name}", get(download_asset))
}

async fn download_asset(State(state): State<AppState>, Path(name): Path<String>) -> Result<Response, ApiError> {
    let (asset, bytes) = state
        .assets
        .read(&name)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Asset not found or expired: {}", name)))?;

    let max_age = (asset.expires_at() - Utc::now()).num_seconds().max(0);
    tracing::debug!("📤 Serving asset {} ({} bytes)", asset.name, asset.size);

    Ok((
        [
            (header::CONTENT_TYPE, asset.mime_type.clone()),
            (header::CACHE_CONTROL, format!("public, max-age={}", max_age)),
        ],
        bytes,
    )
        .into_response())
}
