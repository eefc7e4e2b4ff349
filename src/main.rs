/// Stepwise server entry point
///
/// Loads configuration from the environment and starts the HTTP server with
/// workflow editing and execution capabilities.

use stepwise::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Workflow management API at /api/workflows/*
/// - Editing sessions at /api/workflows/{id}/nodes, /edges, /run, ...
/// - Dynamic webhook execution at /webhook/{workflow_id}/*
/// - Expiring asset downloads at /assets/{name}
/// - Health check at /healthz
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to 0.0.0.0:3004 and data/ for the database and assets
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
