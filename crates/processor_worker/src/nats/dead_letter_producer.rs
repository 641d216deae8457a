use async_trait::async_trait;
use common::domain::{DeadLetter, DeadLetterProducer, DomainError, DomainResult};
use common::nats::{
    subject_token, JetStreamPublisher, LayeredPublisher, NatsPublisherBuilder, NatsTracingConfig,
    PublishRequest,
};
use std::sync::Arc;
use tracing::debug;

/// Header naming why the message was dead-lettered
pub const DEAD_LETTER_KIND_HEADER: &str = "X-Dead-Letter-Kind";

/// Publishes dead letters as JSON to `{stream}.{tenant_token}`
pub struct NatsDeadLetterProducer {
    publisher: LayeredPublisher,
    stream: String,
}

impl NatsDeadLetterProducer {
    pub fn new(jetstream: Arc<dyn JetStreamPublisher>, stream: impl Into<String>) -> Self {
        let stream = stream.into();
        debug!(stream = %stream, "initialized NatsDeadLetterProducer");

        let publisher = NatsPublisherBuilder::new(jetstream)
            .with_tracing(NatsTracingConfig::new("dead_letter_producer"))
            .with_logging()
            .build();

        Self { publisher, stream }
    }

    pub fn subject_for(&self, dead_letter: &DeadLetter) -> String {
        format!(
            "{}.{}",
            self.stream,
            subject_token(dead_letter.tenant_id.as_deref().unwrap_or_default())
        )
    }
}

#[async_trait]
impl DeadLetterProducer for NatsDeadLetterProducer {
    async fn publish_dead_letter(&self, dead_letter: &DeadLetter) -> DomainResult<()> {
        let payload =
            serde_json::to_vec(dead_letter).map_err(|e| DomainError::RepositoryError(e.into()))?;
        let request = PublishRequest::new(self.subject_for(dead_letter), payload)
            .with_header(DEAD_LETTER_KIND_HEADER, dead_letter.kind.as_str())
            .map_err(DomainError::RepositoryError)?;

        self.publisher
            .publish(request)
            .await
            .map_err(DomainError::RepositoryError)?;

        Ok(())
    }
}
