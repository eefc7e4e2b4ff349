/// HTTP request node
///
/// Expected config: { "url": "https://api.example.com/users", "method": "POST",
///                    "headers": {...}, "query": {...}, "body": {...} | "text",
///                    "credentialId": "crm", "authHeader": "Authorization",
///                    "allowErrorStatus": false }
/// Output: { "status": 200, "headers": {...}, "data": <json or text>, "success": true }

use super::{require_str, str_field, string_map, ExecutionContext, NodeHandler};
use crate::error::{FieldError, NodeError};
use crate::workflow::types::NodeType;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

const METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD"];

#[derive(Debug, Default)]
pub struct HttpRequestHandler;

#[async_trait]
impl NodeHandler for HttpRequestHandler {
    fn node_type(&self) -> NodeType {
        NodeType::HttpRequest
    }

    fn description(&self) -> &'static str {
        "Calls an external HTTP endpoint and returns its status, headers and body"
    }

    fn default_config(&self) -> Value {
        json!({
            "url": "",
            "method": "GET",
            "headers": {},
            "query": {},
            "body": null,
            "allowErrorStatus": false
        })
    }

    fn validate_config(&self, config: &Value) -> Vec<FieldError> {
        let mut errors = Vec::new();

        if let Some(url) = require_str(config, "url", &mut errors) {
            match reqwest::Url::parse(&url) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                Ok(parsed) => errors.push(FieldError::new("url", format!("unsupported scheme '{}'", parsed.scheme()))),
                Err(e) => errors.push(FieldError::new("url", format!("invalid URL: {}", e))),
            }
        }

        let method = str_field(config, "method").unwrap_or("GET").to_uppercase();
        if !METHODS.contains(&method.as_str()) {
            errors.push(FieldError::new("method", format!("unsupported method '{}'", method)));
        }

        string_map(config, "headers", &mut errors);
        string_map(config, "query", &mut errors);

        for name in ["credentialId", "authHeader"] {
            if config.get(name).is_some_and(|v| !v.is_string() && !v.is_null()) {
                errors.push(FieldError::new(name, "must be a string"));
            }
        }
        if config.get("allowErrorStatus").is_some_and(|v| !v.is_boolean() && !v.is_null()) {
            errors.push(FieldError::new("allowErrorStatus", "must be a boolean"));
        }

        errors
    }

    async fn execute(&self, config: Value, ctx: ExecutionContext) -> Result<Value, NodeError> {
        let mut ignored = Vec::new();
        let url = str_field(&config, "url").unwrap_or_default().trim().to_string();
        let method = str_field(&config, "method").unwrap_or("GET").to_uppercase();
        let headers = string_map(&config, "headers", &mut ignored);
        let query = string_map(&config, "query", &mut ignored);
        let allow_error_status = config.get("allowErrorStatus").and_then(Value::as_bool).unwrap_or(false);

        tracing::debug!("🌍 HTTP Request: {} {}", method, url);

        let client = &ctx.services.http;
        let mut request_builder = match method.as_str() {
            "GET" => client.get(&url),
            "POST" => client.post(&url),
            "PUT" => client.put(&url),
            "PATCH" => client.patch(&url),
            "DELETE" => client.delete(&url),
            "HEAD" => client.head(&url),
            _ => return Err(NodeError::invalid("method", format!("unsupported method '{}'", method))),
        };

        request_builder = request_builder.timeout(ctx.remaining());
        if !query.is_empty() {
            request_builder = request_builder.query(&query);
        }
        for (key, value) in &headers {
            request_builder = request_builder.header(key.as_str(), value.as_str());
        }

        // Secret material goes straight onto the request and is never logged
        if let Some(credential_id) = str_field(&config, "credentialId").filter(|id| !id.is_empty()) {
            let secret = ctx.services.credentials.resolve(credential_id).await?;
            let header = str_field(&config, "authHeader").unwrap_or("Authorization");
            request_builder = request_builder.header(header, secret);
        }

        match config.get("body") {
            Some(body @ (Value::Object(_) | Value::Array(_))) => {
                request_builder = request_builder.json(body);
            }
            Some(Value::String(text)) if !text.is_empty() => {
                let has_content_type = headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type"));
                if !has_content_type {
                    request_builder = request_builder.header("Content-Type", "text/plain");
                }
                request_builder = request_builder.body(text.clone());
            }
            Some(scalar @ (Value::Number(_) | Value::Bool(_))) => {
                request_builder = request_builder.json(scalar);
            }
            _ => {}
        }

        let response = ctx
            .guard(request_builder.send())
            .await?
            .map_err(|e| NodeError::failed(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let headers_map: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();

        tracing::debug!("📡 Response status: {}", status);

        let response_text = ctx
            .guard(response.text())
            .await?
            .map_err(|e| NodeError::failed(format!("Failed to read response body: {}", e)))?;

        let data = serde_json::from_str::<Value>(&response_text).unwrap_or(Value::String(response_text));

        if !status.is_success() && !allow_error_status {
            return Err(NodeError::failed(format!("{} {} returned HTTP {}", method, url, status.as_u16())));
        }

        tracing::info!("✅ HTTP request completed: {} {} (status: {})", method, url, status);

        Ok(json!({
            "status": status.as_u16(),
            "headers": headers_map,
            "data": data,
            "success": status.is_success()
        }))
    }
}
