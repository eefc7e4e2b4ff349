/// Credential lookup
///
/// Node handlers refer to secrets by opaque credential id only. The engine
/// asks a `CredentialProvider` for the secret at execution time and never
/// persists or logs the returned value.

use crate::error::NodeError;
use async_trait::async_trait;
use std::collections::HashMap;

/// Resolves credential ids to secret material
#[async_trait]
pub trait CredentialProvider: Send + Sync + std::fmt::Debug {
    async fn resolve(&self, credential_id: &str) -> Result<String, NodeError>;
}

/// Reads secrets from environment variables
///
/// Credential `github-token` maps to `STEPWISE_CREDENTIAL_GITHUB_TOKEN`.
#[derive(Debug, Clone)]
pub struct EnvCredentialProvider {
    prefix: String,
}

impl EnvCredentialProvider {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn variable_name(&self, credential_id: &str) -> String {
        let suffix: String = credential_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("{}{}", self.prefix, suffix)
    }
}

impl Default for EnvCredentialProvider {
    fn default() -> Self {
        Self::new("STEPWISE_CREDENTIAL_")
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn resolve(&self, credential_id: &str) -> Result<String, NodeError> {
        let variable = self.variable_name(credential_id);
        std::env::var(&variable).map_err(|_| {
            tracing::warn!("🔐 Credential '{}' not found (expected {})", credential_id, variable);
            NodeError::failed(format!("Credential '{}' is not available", credential_id))
        })
    }
}

/// Fixed in-memory secrets, for embedding and tests
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialProvider {
    secrets: HashMap<String, String>,
}

impl StaticCredentialProvider {
    pub fn with(mut self, credential_id: impl Into<String>, secret: impl Into<String>) -> Self {
        self.secrets.insert(credential_id.into(), secret.into());
        self
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn resolve(&self, credential_id: &str) -> Result<String, NodeError> {
        self.secrets
            .get(credential_id)
            .cloned()
            .ok_or_else(|| NodeError::failed(format!("Credential '{}' is not available", credential_id)))
    }
}
