/// Configuration management for the Stepwise engine
///
/// Handles server, database, execution and asset settings. Every value can be
/// overridden through a `STEPWISE_*` environment variable.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub execution: ExecutionConfig,
    pub assets: AssetConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file holding workflow documents
    pub path: String,
}

/// Limits applied to node attempts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Deadline for nodes without a `timeoutSeconds` override
    pub default_timeout_secs: u64,
    /// Upper bound for any per-node override
    pub max_timeout_secs: u64,
}

/// Expiring asset storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    pub dir: String,
    /// Prefix for public asset URLs, e.g. "https://flows.example.com"
    pub public_base_url: String,
    pub reap_interval_secs: u64,
}

impl ExecutionConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs.max(1))
    }

    pub fn max_timeout(&self) -> Duration {
        Duration::from_secs(self.max_timeout_secs.max(1))
    }
}

impl AssetConfig {
    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        let host = env_or("STEPWISE_HOST", "0.0.0.0");
        let port = env_parse("STEPWISE_PORT", 3004);
        let public_base_url = std::env::var("STEPWISE_PUBLIC_URL")
            .unwrap_or_else(|_| format!("http://localhost:{}", port));

        Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                path: env_or("STEPWISE_DATABASE", "data/stepwise.db"),
            },
            execution: ExecutionConfig {
                default_timeout_secs: env_parse("STEPWISE_NODE_TIMEOUT_SECS", 30),
                max_timeout_secs: env_parse("STEPWISE_MAX_NODE_TIMEOUT_SECS", 300),
            },
            assets: AssetConfig {
                dir: env_or("STEPWISE_ASSETS_DIR", "data/assets"),
                public_base_url,
                reap_interval_secs: env_parse("STEPWISE_REAP_INTERVAL_SECS", 60),
            },
        }
    }
}
