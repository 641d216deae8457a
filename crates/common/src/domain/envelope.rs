use crate::domain::result::{DomainError, DomainResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Provenance of an envelope. Set by the normalizer, never by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeSource {
    JsonUpload,
    TextUpload,
}

impl EnvelopeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeSource::JsonUpload => "json_upload",
            EnvelopeSource::TextUpload => "text_upload",
        }
    }
}

impl fmt::Display for EnvelopeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvelopeSource {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json_upload" => Ok(EnvelopeSource::JsonUpload),
            "text_upload" => Ok(EnvelopeSource::TextUpload),
            other => Err(DomainError::InvalidEnvelopeSource(other.to_string())),
        }
    }
}

/// Tenant and log ids must be non-blank and free of control characters:
/// they are copied into line-delimited NATS headers and subjects.
pub fn is_valid_identifier(value: &str) -> bool {
    !value.trim().is_empty() && !value.chars().any(char::is_control)
}

/// Postgres `TEXT` cannot hold NUL
pub fn is_storable_text(value: &str) -> bool {
    !value.contains('\0')
}

fn identifier(value: &str, _ctx: &()) -> garde::Result {
    if is_valid_identifier(value) {
        Ok(())
    } else {
        Err(garde::Error::new(
            "must be non-blank and contain no control characters",
        ))
    }
}

fn storable_text(value: &str, _ctx: &()) -> garde::Result {
    if is_storable_text(value) {
        Ok(())
    } else {
        Err(garde::Error::new("must not contain NUL"))
    }
}

/// Canonical unit placed on the message channel.
///
/// Fields are private so an envelope cannot change after construction;
/// callers read through the accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Envelope {
    #[garde(custom(identifier))]
    tenant_id: String,
    #[garde(custom(identifier))]
    log_id: String,
    #[garde(custom(storable_text))]
    text: String,
    #[garde(skip)]
    source: EnvelopeSource,
    #[garde(skip)]
    received_at: DateTime<Utc>,
}

impl Envelope {
    pub fn new(
        tenant_id: impl Into<String>,
        log_id: impl Into<String>,
        text: impl Into<String>,
        source: EnvelopeSource,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            log_id: log_id.into(),
            text: text.into(),
            source,
            received_at,
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn log_id(&self) -> &str {
        &self.log_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn source(&self) -> EnvelopeSource {
        self.source
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn key(&self) -> ProcessedLogKey {
        ProcessedLogKey::new(&self.tenant_id, &self.log_id)
    }

    /// Serialize to the JSON wire format used on the channel
    pub fn to_json_bytes(&self) -> DomainResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| DomainError::RepositoryError(e.into()))
    }

    /// Decode a channel payload. Any failure here is permanent: the bytes will
    /// not decode differently on redelivery.
    pub fn from_json_slice(payload: &[u8]) -> DomainResult<Self> {
        serde_json::from_slice(payload).map_err(|e| {
            DomainError::PermanentProcessingDefect(format!("undecodable envelope: {}", e))
        })
    }
}

/// Natural identity of a processed log inside the tenant store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessedLogKey {
    pub tenant_id: String,
    pub log_id: String,
}

impl ProcessedLogKey {
    pub fn new(tenant_id: impl Into<String>, log_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            log_id: log_id.into(),
        }
    }

    /// Document path: `tenants/{tenant_id}/processed_logs/{log_id}`
    pub fn document_path(&self) -> String {
        format!("tenants/{}/processed_logs/{}", self.tenant_id, self.log_id)
    }
}

impl fmt::Display for ProcessedLogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.document_path())
    }
}

/// Trait for publishing envelopes to the message channel
///
/// Implementations should:
/// - Serialize the envelope to the channel wire format (JSON)
/// - Publish to the message broker (NATS JetStream) and wait for the stream ack
/// - Return error if publish fails; no retries
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait EnvelopeProducer: Send + Sync {
    async fn publish_envelope(&self, envelope: &Envelope) -> DomainResult<()>;
}
