use crate::domain::{normalize, NormalizationError, RawLogRecord};
use chrono::Utc;
use common::domain::{DomainError, EnvelopeProducer, EnvelopeSource};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Rejected(#[from] NormalizationError),

    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),
}

/// The envelope was handed to the channel. Says nothing about processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub tenant_id: String,
    pub log_id: String,
    pub source: EnvelopeSource,
}

/// Fast-accept front door.
///
/// Flow:
/// 1. Normalize the raw record (rejects never reach the channel)
/// 2. Stamp `received_at`
/// 3. Publish once; no retries here, redelivery belongs to the channel
///
/// The gateway never writes to the tenant store.
pub struct IngestionGateway {
    envelope_producer: Arc<dyn EnvelopeProducer>,
}

impl IngestionGateway {
    pub fn new(envelope_producer: Arc<dyn EnvelopeProducer>) -> Self {
        Self { envelope_producer }
    }

    #[instrument(skip(self, record), fields(content_type = ?record.content_type, body_bytes = record.body.len()))]
    pub async fn ingest(&self, record: RawLogRecord) -> Result<Accepted, IngestError> {
        let envelope = normalize(&record, Utc::now()).inspect_err(|e| {
            debug!(error = %e, "rejecting log record");
        })?;

        self.envelope_producer
            .publish_envelope(&envelope)
            .await
            .map_err(|e| {
                warn!(
                    tenant_id = %envelope.tenant_id(),
                    log_id = %envelope.log_id(),
                    error = %e,
                    "failed to queue envelope"
                );
                match e {
                    DomainError::ValidationError(detail) => {
                        IngestError::Rejected(NormalizationError::MalformedBody(detail))
                    }
                    other => IngestError::TransportUnavailable(other.to_string()),
                }
            })?;

        debug!(
            tenant_id = %envelope.tenant_id(),
            log_id = %envelope.log_id(),
            source = %envelope.source(),
            "envelope queued"
        );

        Ok(Accepted {
            tenant_id: envelope.tenant_id().to_string(),
            log_id: envelope.log_id().to_string(),
            source: envelope.source(),
        })
    }
}
