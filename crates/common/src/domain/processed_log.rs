use crate::domain::envelope::{Envelope, EnvelopeSource, ProcessedLogKey};
use crate::domain::result::DomainResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Ok,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Ok => "ok",
        }
    }
}

impl FromStr for ProcessingStatus {
    type Err = crate::domain::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(ProcessingStatus::Ok),
            other => Err(crate::domain::DomainError::ValidationError(format!(
                "unknown processing status: {}",
                other
            ))),
        }
    }
}

/// Committed result of processing one envelope.
///
/// Its existence at `tenants/{tenant_id}/processed_logs/{log_id}` is the
/// durable dedup marker for that key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingRecord {
    pub tenant_id: String,
    pub log_id: String,
    pub text: String,
    pub source: EnvelopeSource,
    pub received_at: DateTime<Utc>,
    pub modified_text: String,
    pub char_count: i64,
    pub processed_at: DateTime<Utc>,
    pub status: ProcessingStatus,
}

impl ProcessingRecord {
    pub fn key(&self) -> ProcessedLogKey {
        ProcessedLogKey::new(&self.tenant_id, &self.log_id)
    }

    /// True when the record was produced from the same logical content.
    /// `received_at` is not compared: an HTTP retry of the same payload is a
    /// duplicate, not a conflict.
    pub fn matches_envelope(&self, envelope: &Envelope) -> bool {
        self.tenant_id == envelope.tenant_id()
            && self.log_id == envelope.log_id()
            && self.text == envelope.text()
            && self.source == envelope.source()
    }
}

/// Repository trait for the multi-tenant processed log store
/// Infrastructure layer (Postgres, in-memory) implements this trait
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ProcessedLogRepository: Send + Sync {
    /// Look up the record committed at `key`, if any
    async fn get_processed_log(&self, key: &ProcessedLogKey)
        -> DomainResult<Option<ProcessingRecord>>;

    /// Create-if-absent. Must be atomic with respect to concurrent writers of
    /// the same key; returns `DomainError::ProcessedLogAlreadyExists` when a
    /// record is already present and leaves that record untouched.
    async fn create_processed_log(&self, record: &ProcessingRecord) -> DomainResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ProcessingRecord {
        ProcessingRecord {
            tenant_id: "acme".to_string(),
            log_id: "t-1".to_string(),
            text: "hello".to_string(),
            source: EnvelopeSource::JsonUpload,
            received_at: Utc::now(),
            modified_text: "HELLO".to_string(),
            char_count: 5,
            processed_at: Utc::now(),
            status: ProcessingStatus::Ok,
        }
    }

    #[test]
    fn test_matches_envelope_ignores_received_at() {
        let envelope = Envelope::new(
            "acme",
            "t-1",
            "hello",
            EnvelopeSource::JsonUpload,
            Utc::now() + chrono::Duration::seconds(30),
        );
        assert!(record().matches_envelope(&envelope));
    }

    #[test]
    fn test_different_text_does_not_match() {
        let envelope = Envelope::new(
            "acme",
            "t-1",
            "goodbye",
            EnvelopeSource::JsonUpload,
            Utc::now(),
        );
        assert!(!record().matches_envelope(&envelope));
    }

    #[test]
    fn test_different_source_does_not_match() {
        let envelope = Envelope::new(
            "acme",
            "t-1",
            "hello",
            EnvelopeSource::TextUpload,
            Utc::now(),
        );
        assert!(!record().matches_envelope(&envelope));
    }

    #[test]
    fn test_record_serializes_status() {
        let value = serde_json::to_value(record()).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["source"], "json_upload");
    }
}
