/// Shared fixtures for unit tests
///
/// A node executor backed by a temporary asset directory, and a local HTTP
/// server that the HTTP and convert nodes can call without leaving the host.

use crate::assets::ExpiringAssetStore;
use crate::credentials::StaticCredentialProvider;
use crate::nodes::NodeServices;
use crate::runtime::executor::NodeExecutor;
use axum::{
    extract::{Path, Query},
    http::{header, Method, StatusCode, Uri},
    response::{IntoResponse, Json},
    routing::{any, get},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_TIMEOUT: Duration = Duration::from_secs(30);

/// 1x1 transparent PNG
pub const PNG_BYTES: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f, 0x15, 0xc4,
    0x89, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae,
    0x42, 0x60, 0x82,
];

/// Executor with a fresh asset store; keep the directory alive for the test
pub async fn executor() -> (NodeExecutor, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let assets = ExpiringAssetStore::open(dir.path().join("assets"), "http://localhost:3004")
        .await
        .unwrap();
    let services = Arc::new(NodeServices {
        http: reqwest::Client::new(),
        assets: Arc::new(assets),
        credentials: Arc::new(StaticCredentialProvider::default().with("api-key", "s3cret")),
    });
    (NodeExecutor::new(services, DEFAULT_TIMEOUT, MAX_TIMEOUT), dir)
}

pub struct FixtureServer {
    base: String,
}

impl FixtureServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

#[derive(Deserialize)]
struct SlowQuery {
    #[serde(default)]
    ms: u64,
}

/// Start the fixture server on an ephemeral port
///
/// Routes: `/slow?ms=N`, `/echo`, `/status/{code}`, `/image.png`.
pub async fn fixture_server() -> FixtureServer {
    let router = Router::new()
        .route("/slow", get(slow))
        .route("/echo", any(echo))
        .route("/status/{code}", any(status))
        .route("/image.png", get(image));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        let _ = axum::serve(listener, router.into_make_service()).await;
    });

    FixtureServer { base }
}

async fn slow(Query(query): Query<SlowQuery>) -> impl IntoResponse {
    tokio::time::sleep(Duration::from_millis(query.ms)).await;
    Json(json!({ "waitedMs": query.ms }))
}

async fn echo(method: Method, uri: Uri, body: String) -> impl IntoResponse {
    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "body": body,
    }))
}

async fn status(Path(code): Path<u16>) -> impl IntoResponse {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST);
    (status, Json(json!({ "status": code })))
}

async fn image() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/png")], PNG_BYTES)
}
