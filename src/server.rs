/// Server setup and initialization
///
/// Wires together storage, the session registry, node services, the asset
/// reaper and the HTTP routes. Provides the application factory used by
/// `main` and by the end-to-end tests.

use crate::{
    api::{self, AppState},
    assets::ExpiringAssetStore,
    config::Config,
    credentials::{CredentialProvider, EnvCredentialProvider},
    nodes::NodeServices,
    runtime::{executor::NodeExecutor, scheduler::AssetReaperService},
    workflow::{registry::SessionRegistry, storage::WorkflowStorage},
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Fully wired application
pub struct App {
    pub router: Router,
    pub state: AppState,
    pub reaper: Arc<AssetReaperService>,
}

/// Create the application with the default environment credential provider
pub async fn create_app(config: Config) -> Result<App> {
    create_app_with_credentials(config, Arc::new(EnvCredentialProvider::default())).await
}

/// Create the application with all routes and background services
///
/// The reaper is started here; callers stop it on shutdown.
pub async fn create_app_with_credentials(config: Config, credentials: Arc<dyn CredentialProvider>) -> Result<App> {
    tracing::info!("📋 Initializing workflow storage at {}", config.database.path);
    let storage = WorkflowStorage::connect(&config.database.path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open workflow database: {}", e))?;

    tracing::info!("🗂️ Opening asset store at {}", config.assets.dir);
    let assets = Arc::new(ExpiringAssetStore::open(&config.assets.dir, &config.assets.public_base_url).await?);

    let http = reqwest::Client::builder()
        .user_agent(concat!("stepwise/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

    let services = Arc::new(NodeServices {
        http,
        assets: assets.clone(),
        credentials: credentials.clone(),
    });

    tracing::info!(
        "⚙️ Initializing node executor (default timeout {:?}, max {:?})",
        config.execution.default_timeout(),
        config.execution.max_timeout()
    );
    let executor = Arc::new(NodeExecutor::new(
        services,
        config.execution.default_timeout(),
        config.execution.max_timeout(),
    ));

    tracing::info!("📊 Loading editing sessions from storage");
    let registry = Arc::new(SessionRegistry::new(storage.clone(), executor));
    registry
        .init_from_storage()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load workflows from storage: {}", e))?;

    let reaper = Arc::new(AssetReaperService::new(assets.clone(), config.assets.reap_interval()).await?);
    reaper.start().await?;

    let state = AppState {
        storage,
        registry,
        assets,
        credentials,
    };

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let router = Router::new()
        .route("/healthz", get(health_check))
        .merge(api::router(state.clone()));

    tracing::info!("✅ Application initialized successfully");

    Ok(App { router, state, reaper })
}

/// Start the HTTP server with the given configuration
///
/// Serves until Ctrl-C, then stops the reaper.
pub async fn start_server(config: Config) -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .try_init();

    tracing::info!("Starting Stepwise server...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.router.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("👋 Shutdown requested");
        })
        .await?;

    app.reaper.stop().await?;
    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AssetConfig, DatabaseConfig, ExecutionConfig, ServerConfig};
    use crate::credentials::StaticCredentialProvider;
    use crate::test_support;
    use serde_json::{json, Value};

    struct Running {
        base: String,
        app_reaper: Arc<AssetReaperService>,
        _dir: tempfile::TempDir,
    }

    async fn spawn_app() -> Running {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 0,
            },
            database: DatabaseConfig {
                path: dir.path().join("stepwise.db").display().to_string(),
            },
            execution: ExecutionConfig {
                default_timeout_secs: 10,
                max_timeout_secs: 30,
            },
            assets: AssetConfig {
                dir: dir.path().join("assets").display().to_string(),
                public_base_url: base.clone(),
                reap_interval_secs: 60,
            },
        };
        let credentials = Arc::new(StaticCredentialProvider::default().with("hook-secret", "letmein"));
        let app = create_app_with_credentials(config, credentials).await.unwrap();

        let router = app.router.clone();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router.into_make_service()).await;
        });

        Running {
            base,
            app_reaper: app.reaper,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn editor_round_trip_over_http() {
        let fixture = test_support::fixture_server().await;
        let app = spawn_app().await;
        let client = reqwest::Client::new();

        let created = client
            .post(format!("{}/api/workflows", app.base))
            .json(&json!({"workflow": {"id": "wf-img", "name": "Image to URL", "nodes": [], "edges": []}}))
            .send()
            .await
            .unwrap();
        assert_eq!(created.status(), 200);

        let fetch: Value = client
            .post(format!("{}/api/workflows/wf-img/nodes", app.base))
            .json(&json!({"type": "convert", "label": "Fetch", "config": {"operation": "toBase64", "source": fixture.url("/image.png")}}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let store: Value = client
            .post(format!("{}/api/workflows/wf-img/nodes", app.base))
            .json(&json!({"type": "convert", "label": "Store", "config": {"operation": "fromBase64", "base64Data": "{{Fetch.base64}}", "mimeType": "{{Fetch.mimeType}}"}}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let (fetch_id, store_id) = (fetch["id"].as_str().unwrap(), store["id"].as_str().unwrap());

        let cycle = client
            .post(format!("{}/api/workflows/wf-img/edges", app.base))
            .json(&json!({"from": fetch_id, "to": fetch_id}))
            .send()
            .await
            .unwrap();
        assert_eq!(cycle.status(), 422);

        client
            .post(format!("{}/api/workflows/wf-img/edges", app.base))
            .json(&json!({"from": fetch_id, "to": store_id}))
            .send()
            .await
            .unwrap()
            .error_for_status()
            .unwrap();

        let tested: Value = client
            .post(format!("{}/api/workflows/wf-img/nodes/{}/test", app.base, fetch_id))
            .json(&json!({}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(tested["status"], json!("success"));

        let stored: Value = client
            .post(format!("{}/api/workflows/wf-img/nodes/{}/test", app.base, store_id))
            .json(&json!({}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(stored["status"], json!("success"));

        let url = stored["output"]["url"].as_str().unwrap();
        let download = client.get(url).send().await.unwrap();
        assert_eq!(download.status(), 200);
        assert_eq!(download.headers()["content-type"], "image/png");
        assert_eq!(download.bytes().await.unwrap().as_ref(), test_support::PNG_BYTES);

        let saved = client
            .post(format!("{}/api/workflows/wf-img/save", app.base))
            .send()
            .await
            .unwrap();
        assert_eq!(saved.status(), 200);
        let persisted: Value = client
            .get(format!("{}/api/workflows/wf-img", app.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(persisted["nodes"].as_array().unwrap().len(), 2);

        app.app_reaper.stop().await.unwrap();
    }

    #[tokio::test]
    async fn webhook_runs_downstream_nodes() {
        let app = spawn_app().await;
        let client = reqwest::Client::new();

        let workflow = json!({"workflow": {
            "id": "wf-hook",
            "name": "Greeter",
            "nodes": [
                {"id": "hook", "type": "webhook", "label": "Hook",
                 "config": {"path": "/greet", "method": "POST", "credentialId": "hook-secret", "authHeader": "X-Token"}},
                {"id": "greet", "type": "code", "label": "Greet",
                 "config": {"script": "return { message = 'hello ' .. input.name, sawToken = input.token ~= '' }",
                            "input": {"name": "{{Hook.body.name}}", "token": "{{Hook.headers.x-token}}"}}}
            ],
            "edges": [{"from": "hook", "to": "greet"}]
        }});
        client
            .post(format!("{}/api/workflows", app.base))
            .json(&workflow)
            .send()
            .await
            .unwrap()
            .error_for_status()
            .unwrap();

        let rejected = client
            .post(format!("{}/webhook/wf-hook/greet", app.base))
            .json(&json!({"name": "Ada"}))
            .send()
            .await
            .unwrap();
        assert_eq!(rejected.status(), 401);

        let wrong_method = client
            .get(format!("{}/webhook/wf-hook/greet", app.base))
            .header("X-Token", "letmein")
            .send()
            .await
            .unwrap();
        assert_eq!(wrong_method.status(), 405);

        let response = client
            .post(format!("{}/webhook/wf-hook/greet", app.base))
            .header("X-Token", "letmein")
            .json(&json!({"name": "Ada"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["output"]["message"], json!("hello Ada"));
        assert_eq!(body["output"]["sawToken"], json!(false));

        let missing = client
            .post(format!("{}/webhook/wf-hook/nowhere", app.base))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), 404);

        app.app_reaper.stop().await.unwrap();
    }
}
