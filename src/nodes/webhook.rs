/// Webhook trigger node
///
/// Expected config: { "path": "/signup", "method": "POST", "samplePayload": {...},
///                    "credentialId": "signup-hook", "authHeader": "x-signature" }
/// When a run is started by an inbound request the node outputs that request;
/// when tested manually it outputs `samplePayload` so downstream steps can be
/// built against realistic data.

use super::{str_field, ExecutionContext, NodeHandler};
use crate::credentials::CredentialProvider;
use crate::error::{FieldError, NodeError};
use crate::workflow::types::NodeType;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

const METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "ANY"];
const DEFAULT_AUTH_HEADER: &str = "authorization";

#[derive(Debug, Default)]
pub struct WebhookHandler;

#[async_trait]
impl NodeHandler for WebhookHandler {
    fn node_type(&self) -> NodeType {
        NodeType::Webhook
    }

    fn description(&self) -> &'static str {
        "Starts the workflow when an HTTP request arrives at /webhook/{workflow}/{path}"
    }

    fn default_config(&self) -> Value {
        json!({
            "path": "/hook",
            "method": "POST",
            "samplePayload": {}
        })
    }

    fn validate_config(&self, config: &Value) -> Vec<FieldError> {
        let mut errors = Vec::new();
        match str_field(config, "path") {
            Some(path) if path.starts_with('/') && path.len() > 1 => {}
            Some(_) => errors.push(FieldError::new("path", "must start with '/' and name a route")),
            None => errors.push(FieldError::new("path", "is required")),
        }
        if let Some(method) = config.get("method") {
            match method.as_str() {
                Some(m) if METHODS.contains(&m.to_uppercase().as_str()) => {}
                _ => errors.push(FieldError::new("method", format!("must be one of {}", METHODS.join(", ")))),
            }
        }
        for name in ["credentialId", "authHeader"] {
            if config.get(name).is_some_and(|v| !v.is_string() && !v.is_null()) {
                errors.push(FieldError::new(name, "must be a string"));
            }
        }
        errors
    }

    async fn execute(&self, config: Value, ctx: ExecutionContext) -> Result<Value, NodeError> {
        if let Some(trigger) = &ctx.trigger {
            tracing::debug!("🪝 Webhook node {} emitting inbound {} {}", ctx.node_id, trigger.method, trigger.path);
            return serde_json::to_value(trigger).map_err(|e| NodeError::failed(format!("Failed to encode trigger payload: {}", e)));
        }

        tracing::debug!("🪝 Webhook node {} emitting sample payload", ctx.node_id);
        Ok(json!({
            "body": config.get("samplePayload").cloned().unwrap_or_else(|| json!({})),
            "headers": {},
            "query": {},
            "method": str_field(&config, "method").unwrap_or("POST").to_uppercase(),
            "path": str_field(&config, "path").unwrap_or_default(),
            "sample": true
        }))
    }
}

/// Whether a webhook node accepts requests with this method
pub fn accepts_method(config: &Value, method: &str) -> bool {
    match str_field(config, "method").map(str::to_uppercase) {
        None => true,
        Some(expected) => expected == "ANY" || expected.eq_ignore_ascii_case(method),
    }
}

/// Lowercased name of the header carrying the webhook secret, when one is configured
pub fn auth_header(config: &Value) -> Option<String> {
    str_field(config, "credentialId").filter(|id| !id.is_empty())?;
    Some(
        str_field(config, "authHeader")
            .unwrap_or(DEFAULT_AUTH_HEADER)
            .to_ascii_lowercase(),
    )
}

/// Check an inbound request against the node's credential, if it has one
///
/// Header names are matched case-insensitively; `headers` must use lowercase keys.
pub async fn verify_request(
    config: &Value,
    headers: &HashMap<String, String>,
    credentials: &dyn CredentialProvider,
) -> Result<(), NodeError> {
    let (Some(credential_id), Some(header)) = (str_field(config, "credentialId"), auth_header(config)) else {
        return Ok(());
    };
    let expected = credentials.resolve(credential_id).await?;

    match headers.get(&header) {
        Some(presented) if *presented == expected => Ok(()),
        _ => Err(NodeError::failed(format!("Webhook request rejected: missing or invalid '{}' header", header))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentialProvider;

    #[test]
    fn validates_path_and_method() {
        let handler = WebhookHandler;
        assert!(handler.validate_config(&json!({"path": "/orders", "method": "post"})).is_empty());
        let errors = handler.validate_config(&json!({"path": "orders", "method": "FETCH"}));
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["path", "method"]);
    }

    #[test]
    fn method_matching() {
        assert!(accepts_method(&json!({"method": "post"}), "POST"));
        assert!(!accepts_method(&json!({"method": "POST"}), "GET"));
        assert!(accepts_method(&json!({"method": "ANY"}), "DELETE"));
        assert!(accepts_method(&json!({}), "GET"));
    }

    #[tokio::test]
    async fn credential_header_is_enforced() {
        let provider = StaticCredentialProvider::default().with("hook", "s3cret");
        let config = json!({"path": "/x", "credentialId": "hook", "authHeader": "X-Signature"});

        let mut headers = HashMap::new();
        assert!(verify_request(&config, &headers, &provider).await.is_err());
        headers.insert("x-signature".to_string(), "s3cret".to_string());
        assert!(verify_request(&config, &headers, &provider).await.is_ok());
        assert!(verify_request(&json!({"path": "/x"}), &HashMap::new(), &provider).await.is_ok());
        assert_eq!(auth_header(&config).as_deref(), Some("x-signature"));
        assert_eq!(auth_header(&json!({"path": "/x", "authHeader": "X-Signature"})), None);
    }
}
