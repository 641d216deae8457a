use bytes::Bytes;
use chrono::{DateTime, Utc};
use common::domain::{is_storable_text, is_valid_identifier, Envelope, EnvelopeSource};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Prefix of log ids generated for unstructured uploads without `X-Log-ID`
pub const GENERATED_LOG_ID_PREFIX: &str = "txt-";

/// Input defects. Surfaced to the caller synchronously and never queued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationError {
    #[error("missing or invalid field: {0}")]
    MissingField(&'static str),

    #[error("missing tenant: X-Tenant-ID header is required for unstructured uploads")]
    MissingTenant,

    #[error("malformed body: {0}")]
    MalformedBody(String),
}

impl NormalizationError {
    /// Stable error code returned to HTTP clients
    pub fn code(&self) -> &'static str {
        match self {
            NormalizationError::MissingField(_) => "MissingField",
            NormalizationError::MissingTenant => "MissingTenant",
            NormalizationError::MalformedBody(_) => "MalformedBody",
        }
    }
}

/// One inbound request before normalization. Lives for a single request.
#[derive(Debug, Clone, Default)]
pub struct RawLogRecord {
    pub body: Bytes,
    pub content_type: Option<String>,
    /// Out-of-band tenant (`X-Tenant-ID`)
    pub header_tenant: Option<String>,
    /// Optional caller-supplied id for unstructured uploads (`X-Log-ID`)
    pub header_log_id: Option<String>,
}

impl RawLogRecord {
    pub fn structured(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            content_type: Some("application/json".to_string()),
            ..Default::default()
        }
    }

    pub fn unstructured(body: impl Into<Bytes>, tenant: Option<&str>) -> Self {
        Self {
            body: body.into(),
            content_type: Some("text/plain".to_string()),
            header_tenant: tenant.map(str::to_string),
            header_log_id: None,
        }
    }

    pub fn with_log_id(mut self, log_id: impl Into<String>) -> Self {
        self.header_log_id = Some(log_id.into());
        self
    }
}

/// `application/json` or any `+json` suffix, parameters ignored
pub fn is_structured_content_type(content_type: Option<&str>) -> bool {
    let Some(content_type) = content_type else {
        return false;
    };
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json")
}

/// Deterministic id for unstructured text: the same tenant sending the same
/// text always maps to the same key.
pub fn generate_log_id(tenant_id: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    format!("{}{}", GENERATED_LOG_ID_PREFIX, hex::encode(&digest[..16]))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn string_field<'a>(
    object: &'a Map<String, Value>,
    name: &'static str,
    accept: fn(&str) -> bool,
) -> Result<&'a str, NormalizationError> {
    match object.get(name).and_then(Value::as_str) {
        Some(value) if accept(value) => Ok(value),
        _ => Err(NormalizationError::MissingField(name)),
    }
}

fn storable(text: &str) -> Result<&str, NormalizationError> {
    if is_storable_text(text) {
        Ok(text)
    } else {
        Err(NormalizationError::MalformedBody(
            "text contains a NUL character".to_string(),
        ))
    }
}

fn normalize_structured(
    record: &RawLogRecord,
    received_at: DateTime<Utc>,
) -> Result<Envelope, NormalizationError> {
    let value: Value = serde_json::from_slice(&record.body)
        .map_err(|e| NormalizationError::MalformedBody(e.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| NormalizationError::MalformedBody("expected a JSON object".to_string()))?;

    let tenant_id = string_field(object, "tenant_id", is_valid_identifier)?;
    let log_id = string_field(object, "log_id", is_valid_identifier)?;
    let text = storable(string_field(object, "text", |_| true)?)?;

    Ok(Envelope::new(
        tenant_id,
        log_id,
        text,
        EnvelopeSource::JsonUpload,
        received_at,
    ))
}

fn normalize_unstructured(
    record: &RawLogRecord,
    received_at: DateTime<Utc>,
) -> Result<Envelope, NormalizationError> {
    let tenant_id = record
        .header_tenant
        .as_deref()
        .filter(|tenant| is_valid_identifier(tenant))
        .ok_or(NormalizationError::MissingTenant)?;
    let text = std::str::from_utf8(&record.body)
        .map_err(|e| NormalizationError::MalformedBody(format!("body is not UTF-8: {}", e)))?;
    let text = storable(text)?;

    let log_id = match non_blank(record.header_log_id.as_deref()) {
        Some(log_id) if is_valid_identifier(log_id) => log_id.to_string(),
        Some(_) => return Err(NormalizationError::MissingField("log_id")),
        None => generate_log_id(tenant_id, text),
    };

    Ok(Envelope::new(
        tenant_id,
        log_id,
        text,
        EnvelopeSource::TextUpload,
        received_at,
    ))
}

/// Convert an inbound record into the canonical envelope.
///
/// Pure: no I/O, and checks run in a fixed order so the same input always
/// reports the same error.
///
/// Structured: object body, then `tenant_id`, `log_id`, `text`.
/// Unstructured: tenant header, then UTF-8 body, then `X-Log-ID`.
/// Ids must be non-blank without control characters; text must not hold NUL.
pub fn normalize(
    record: &RawLogRecord,
    received_at: DateTime<Utc>,
) -> Result<Envelope, NormalizationError> {
    if is_structured_content_type(record.content_type.as_deref()) {
        normalize_structured(record, received_at)
    } else {
        normalize_unstructured(record, received_at)
    }
}
