use async_trait::async_trait;
use common::domain::{DomainError, DomainResult, Envelope, EnvelopeProducer};
use common::nats::{
    subject_token, JetStreamPublisher, LayeredPublisher, NatsPublisherBuilder, NatsTracingConfig,
    PublishRequest, TENANT_HEADER,
};
use std::sync::Arc;
use tracing::debug;

/// Publishes envelopes as JSON to `{stream}.{tenant_token}`
pub struct NatsEnvelopeProducer {
    publisher: LayeredPublisher,
    stream: String,
}

impl NatsEnvelopeProducer {
    pub fn new(jetstream: Arc<dyn JetStreamPublisher>, stream: impl Into<String>) -> Self {
        let stream = stream.into();
        debug!(stream = %stream, "initialized NatsEnvelopeProducer");

        let publisher = NatsPublisherBuilder::new(jetstream)
            .with_tracing(NatsTracingConfig::new("ingest_gateway"))
            .with_logging()
            .build();

        Self { publisher, stream }
    }

    pub fn subject_for(&self, envelope: &Envelope) -> String {
        format!("{}.{}", self.stream, subject_token(envelope.tenant_id()))
    }
}

#[async_trait]
impl EnvelopeProducer for NatsEnvelopeProducer {
    async fn publish_envelope(&self, envelope: &Envelope) -> DomainResult<()> {
        let payload = envelope.to_json_bytes()?;
        // A tenant that cannot travel in a header is an input defect, not an outage
        let request = PublishRequest::new(self.subject_for(envelope), payload)
            .with_header(TENANT_HEADER, envelope.tenant_id())
            .map_err(|e| DomainError::ValidationError(e.to_string()))?;

        self.publisher
            .publish(request)
            .await
            .map_err(DomainError::RepositoryError)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::domain::EnvelopeSource;
    use common::nats::MockJetStreamPublisher;

    fn envelope(tenant_id: &str) -> Envelope {
        Envelope::new(tenant_id, "t-1", "hello", EnvelopeSource::JsonUpload, Utc::now())
    }

    #[test]
    fn test_subject_sanitizes_tenant() {
        let producer =
            NatsEnvelopeProducer::new(Arc::new(MockJetStreamPublisher::new()), "envelopes");

        assert_eq!(producer.subject_for(&envelope("acme")), "envelopes.acme");
        assert_eq!(producer.subject_for(&envelope("a.b c")), "envelopes.a_b_c");
    }

    #[tokio::test]
    async fn test_publish_envelope_sends_json_with_tenant_header() {
        // Arrange
        let mut mock = MockJetStreamPublisher::new();
        mock.expect_publish_with_headers()
            .withf(|subject, headers, payload| {
                let decoded = Envelope::from_json_slice(payload).unwrap();
                subject == "envelopes.acme"
                    && headers.get(TENANT_HEADER).map(|v| v.as_str()) == Some("acme")
                    && decoded.log_id() == "t-1"
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let producer = NatsEnvelopeProducer::new(Arc::new(mock), "envelopes");

        // Act
        let result = producer.publish_envelope(&envelope("acme")).await;

        // Assert
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_publish_failure_is_reported() {
        let mut mock = MockJetStreamPublisher::new();
        mock.expect_publish_with_headers()
            .times(1)
            .returning(|_, _, _| Err(anyhow::anyhow!("timed out waiting for ack")));

        let producer = NatsEnvelopeProducer::new(Arc::new(mock), "envelopes");

        let result = producer.publish_envelope(&envelope("acme")).await;

        assert!(matches!(result, Err(DomainError::RepositoryError(_))));
    }

    #[tokio::test]
    async fn test_tenant_with_line_break_is_never_published() {
        let mut mock = MockJetStreamPublisher::new();
        mock.expect_publish_with_headers().times(0);

        let producer = NatsEnvelopeProducer::new(Arc::new(mock), "envelopes");

        let result = producer
            .publish_envelope(&envelope("acme\r\nNats-Msg-Id: fixed"))
            .await;

        assert!(matches!(result, Err(DomainError::ValidationError(_))));
    }
}
