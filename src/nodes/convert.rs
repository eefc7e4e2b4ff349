/// Convert node: binary payloads <-> base64
///
/// `toBase64`:   { "operation": "toBase64", "source": "https://.../cat.png", "sourceType": "url" | "file" }
///               -> { "base64", "mimeType", "size", "dataUri", "source" }
/// `fromBase64`: { "operation": "fromBase64", "base64Data": "<base64 or data URI>", "mimeType": "image/png",
///                 "expirationValue": 1, "expirationUnit": "days" }
///               -> { "url", "path", "mimeType", "size", "expiresAt", "ttlSeconds", ... }
///
/// Decoded payloads are persisted in the expiring asset store; the requested
/// expiration is clamped to five days in whatever unit it was given.

use super::{require_str, str_field, ExecutionContext, NodeHandler};
use crate::assets::{mime, MAX_TTL_SECONDS};
use crate::error::{FieldError, NodeError};
use crate::workflow::types::NodeType;
use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use serde_json::{json, Value};

/// Expiration units accepted by `fromBase64`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirationUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl ExpirationUnit {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "seconds" | "second" => Some(Self::Seconds),
            "minutes" | "minute" => Some(Self::Minutes),
            "hours" | "hour" => Some(Self::Hours),
            "days" | "day" => Some(Self::Days),
            _ => None,
        }
    }

    pub fn seconds(&self) -> u64 {
        match self {
            Self::Seconds => 1,
            Self::Minutes => 60,
            Self::Hours => 3_600,
            Self::Days => 86_400,
        }
    }

    /// Largest value allowed for this unit (5 days, 120 hours, 7200 minutes, ...)
    pub fn max_value(&self) -> u64 {
        MAX_TTL_SECONDS / self.seconds()
    }
}

/// TTL in seconds for a requested expiration, clamped to the unit's maximum
pub fn expiration_seconds(value: u64, unit: ExpirationUnit) -> u64 {
    value.min(unit.max_value()) * unit.seconds()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    ToBase64,
    FromBase64,
}

#[derive(Debug, Default)]
pub struct ConvertHandler;

#[async_trait]
impl NodeHandler for ConvertHandler {
    fn node_type(&self) -> NodeType {
        NodeType::Convert
    }

    fn description(&self) -> &'static str {
        "Encodes a URL or file to base64, or decodes base64 into a temporary public URL"
    }

    fn default_config(&self) -> Value {
        json!({
            "operation": "toBase64",
            "source": "",
            "sourceType": "url",
            "base64Data": "",
            "mimeType": "",
            "expirationValue": 1,
            "expirationUnit": "days"
        })
    }

    fn validate_config(&self, config: &Value) -> Vec<FieldError> {
        let mut errors = Vec::new();
        match operation(config) {
            Some(Operation::ToBase64) => {
                if let Some(source) = require_str(config, "source", &mut errors) {
                    match source_type(config, &source) {
                        Some(SourceType::Url) => {
                            if reqwest::Url::parse(&source).is_err() {
                                errors.push(FieldError::new("source", "is not a valid URL"));
                            }
                        }
                        Some(SourceType::File) => {}
                        None => errors.push(FieldError::new("sourceType", "must be 'url' or 'file'")),
                    }
                }
            }
            Some(Operation::FromBase64) => {
                if !config.get("base64Data").is_some_and(Value::is_string) {
                    errors.push(FieldError::new("base64Data", "must be a string"));
                }
                if let Err(err) = requested_ttl(config) {
                    errors.push(err);
                }
            }
            None => errors.push(FieldError::new("operation", "must be 'toBase64' or 'fromBase64'")),
        }
        errors
    }

    async fn execute(&self, config: Value, ctx: ExecutionContext) -> Result<Value, NodeError> {
        match operation(&config) {
            Some(Operation::ToBase64) => to_base64(&config, &ctx).await,
            Some(Operation::FromBase64) => from_base64(&config, &ctx).await,
            None => Err(NodeError::invalid("operation", "must be 'toBase64' or 'fromBase64'")),
        }
    }
}

fn operation(config: &Value) -> Option<Operation> {
    match str_field(config, "operation")? {
        "toBase64" => Some(Operation::ToBase64),
        "fromBase64" => Some(Operation::FromBase64),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceType {
    Url,
    File,
}

/// Explicit `sourceType`, otherwise inferred from the source's scheme
fn source_type(config: &Value, source: &str) -> Option<SourceType> {
    match str_field(config, "sourceType").filter(|s| !s.is_empty()) {
        Some("url") => Some(SourceType::Url),
        Some("file") => Some(SourceType::File),
        Some(_) => None,
        None if source.starts_with("http://") || source.starts_with("https://") => Some(SourceType::Url),
        None => Some(SourceType::File),
    }
}

/// Validate and clamp the requested expiration
///
/// Accepts numbers or numeric strings, since the value may come from an expression.
fn requested_ttl(config: &Value) -> Result<u64, FieldError> {
    let unit_name = str_field(config, "expirationUnit").unwrap_or("days");
    let unit = ExpirationUnit::parse(unit_name)
        .ok_or_else(|| FieldError::new("expirationUnit", "must be one of seconds, minutes, hours, days"))?;

    let value = match config.get("expirationValue") {
        None | Some(Value::Null) => 1.0,
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| FieldError::new("expirationValue", "must be a number"))?,
        Some(_) => return Err(FieldError::new("expirationValue", "must be a number")),
    };
    if !value.is_finite() || value < 1.0 {
        return Err(FieldError::new("expirationValue", "must be at least 1"));
    }

    let requested = value.floor().min(u64::MAX as f64) as u64;
    let ttl = expiration_seconds(requested, unit);
    if requested > unit.max_value() {
        tracing::debug!(
            "⏳ Clamped expiration {} {} to {} {}",
            requested,
            unit_name,
            unit.max_value(),
            unit_name
        );
    }
    Ok(ttl)
}

async fn to_base64(config: &Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
    let source = str_field(config, "source").unwrap_or_default().trim().to_string();
    let kind = source_type(config, &source).ok_or_else(|| NodeError::invalid("sourceType", "must be 'url' or 'file'"))?;

    let (bytes, mime_type) = match kind {
        SourceType::Url => fetch_url(&source, ctx).await?,
        SourceType::File => {
            let bytes = ctx
                .guard(tokio::fs::read(&source))
                .await?
                .map_err(|e| NodeError::failed(format!("Failed to read file '{}': {}", source, e)))?;
            (bytes, mime::from_path(&source))
        }
    };

    let encoded = STANDARD.encode(&bytes);
    tracing::info!("🔄 Encoded {} bytes of {} from {}", bytes.len(), mime_type, source);

    Ok(json!({
        "dataUri": format!("data:{};base64,{}", mime_type, encoded),
        "base64": encoded,
        "mimeType": mime_type,
        "size": bytes.len(),
        "source": source
    }))
}

async fn fetch_url(url: &str, ctx: &ExecutionContext) -> Result<(Vec<u8>, String), NodeError> {
    let response = ctx
        .guard(ctx.services.http.get(url).timeout(ctx.remaining()).send())
        .await?
        .map_err(|e| NodeError::failed(format!("Failed to fetch '{}': {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(NodeError::failed(format!("Fetching '{}' returned HTTP {}", url, status.as_u16())));
    }

    let mime_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(mime::essence)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| mime::from_path(url));

    let bytes = ctx
        .guard(response.bytes())
        .await?
        .map_err(|e| NodeError::failed(format!("Failed to read body of '{}': {}", url, e)))?;

    Ok((bytes.to_vec(), mime_type))
}

/// Split a data URI into (mime type, payload); plain base64 passes through
fn split_data_uri(data: &str) -> Result<(Option<String>, &str), NodeError> {
    let Some(rest) = data.strip_prefix("data:") else {
        return Ok((None, data));
    };
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| NodeError::failed("Malformed data URI: missing ','"))?;
    if !header.split(';').any(|part| part.eq_ignore_ascii_case("base64")) {
        return Err(NodeError::failed("Data URI is not base64 encoded"));
    }
    let mime_type = header.split(';').next().map(mime::essence).filter(|m| !m.is_empty());
    Ok((mime_type, payload))
}

/// Decode standard or URL-safe base64, ignoring whitespace and missing padding
pub fn decode_payload(payload: &str) -> Result<Vec<u8>, NodeError> {
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let trimmed = compact.trim_end_matches('=');
    let padded = format!("{}{}", trimmed, "=".repeat((4 - trimmed.len() % 4) % 4));

    STANDARD
        .decode(&padded)
        .or_else(|_| URL_SAFE.decode(&padded))
        .map_err(|e| NodeError::failed(format!("Invalid base64 payload: {}", e)))
}

async fn from_base64(config: &Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
    let ttl_seconds = requested_ttl(config).map_err(|e| NodeError::ConfigValidation(vec![e]))?;
    let data = str_field(config, "base64Data").unwrap_or_default().trim();

    let (uri_mime, payload) = split_data_uri(data)?;
    let bytes = decode_payload(payload)?;
    if bytes.is_empty() {
        return Err(NodeError::invalid("base64Data", "decoded payload is empty"));
    }

    let mime_type = str_field(config, "mimeType")
        .map(mime::essence)
        .filter(|m| !m.is_empty())
        .or(uri_mime)
        .unwrap_or_else(|| mime::OCTET_STREAM.to_string());

    let stored = ctx.services.assets.store(&bytes, &mime_type, ttl_seconds).await?;
    tracing::info!("🔗 Node {} published {} bytes at {}", ctx.node_id, bytes.len(), stored.url);

    serde_json::to_value(&stored).map_err(|e| NodeError::failed(format!("Failed to encode stored asset: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiration_is_clamped_per_unit() {
        assert_eq!(expiration_seconds(1, ExpirationUnit::Days), 86_400);
        assert_eq!(expiration_seconds(9, ExpirationUnit::Days), 432_000);
        assert_eq!(expiration_seconds(500, ExpirationUnit::Hours), 432_000);
        assert_eq!(expiration_seconds(7_201, ExpirationUnit::Minutes), 432_000);
        assert_eq!(expiration_seconds(999_999_999, ExpirationUnit::Seconds), 432_000);
        assert_eq!(expiration_seconds(90, ExpirationUnit::Minutes), 5_400);
    }

    #[test]
    fn requested_ttl_accepts_numeric_strings_and_rejects_non_positive() {
        assert_eq!(requested_ttl(&json!({"expirationValue": "2", "expirationUnit": "hours"})), Ok(7_200));
        assert_eq!(requested_ttl(&json!({})), Ok(86_400));
        assert_eq!(
            requested_ttl(&json!({"expirationValue": 0})),
            Err(FieldError::new("expirationValue", "must be at least 1"))
        );
        assert!(requested_ttl(&json!({"expirationValue": 1, "expirationUnit": "weeks"})).is_err());
    }

    #[test]
    fn data_uris_and_plain_base64_decode() {
        let (mime_type, payload) = split_data_uri("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(mime_type.as_deref(), Some("image/png"));
        assert_eq!(decode_payload(payload).unwrap(), b"hello");

        assert_eq!(decode_payload("aGVs\nbG8").unwrap(), b"hello");
        assert!(split_data_uri("data:text/plain,hello").is_err());
        assert!(decode_payload("***").is_err());
        assert!(decode_payload("").unwrap().is_empty());
    }

    #[test]
    fn validation_depends_on_operation() {
        let handler = ConvertHandler;
        assert_eq!(
            handler.validate_config(&json!({"operation": "resize"})),
            vec![FieldError::new("operation", "must be 'toBase64' or 'fromBase64'")]
        );
        assert!(handler
            .validate_config(&json!({"operation": "toBase64", "source": "https://example.com/a.png"}))
            .is_empty());
        assert!(handler
            .validate_config(&json!({"operation": "toBase64", "source": "/tmp/a.png"}))
            .is_empty());
        // Empty payload passes config validation; the handler rejects it after decoding
        assert!(handler
            .validate_config(&json!({"operation": "fromBase64", "base64Data": ""}))
            .is_empty());
        assert_eq!(
            handler.validate_config(&json!({"operation": "fromBase64", "base64Data": 42, "expirationValue": -1})),
            vec![
                FieldError::new("base64Data", "must be a string"),
                FieldError::new("expirationValue", "must be at least 1"),
            ]
        );
    }
}
