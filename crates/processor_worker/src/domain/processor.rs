use crate::domain::ProcessingStep;
use chrono::Utc;
use common::domain::{
    DeadLetter, DeadLetterKind, DeadLetterProducer, DomainError, DomainResult, Envelope,
    ProcessedLogRepository, ProcessingRecord, ProcessingStatus,
};
use common::validation::validate_struct;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// What happened to one delivery. Every variant is final for that delivery;
/// transient failures are returned as `Err` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Unseen key: processed and committed by this delivery
    Committed,
    /// Key already committed with the same content
    Duplicate,
    /// Lost the create-if-absent race to a concurrent delivery
    RaceResolved,
    /// Key committed with different content; dead-lettered
    Conflict,
    /// Envelope can never be processed; dead-lettered
    DeadLettered,
}

impl HandleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandleOutcome::Committed => "committed",
            HandleOutcome::Duplicate => "duplicate",
            HandleOutcome::RaceResolved => "race_resolved",
            HandleOutcome::Conflict => "conflict",
            HandleOutcome::DeadLettered => "dead_lettered",
        }
    }

    /// Whether the channel should stop redelivering without success
    pub fn is_rejection(&self) -> bool {
        matches!(self, HandleOutcome::Conflict | HandleOutcome::DeadLettered)
    }
}

/// Turns at-least-once delivery into exactly-once effect.
///
/// The tenant store is the only dedup state: a record at
/// `(tenant_id, log_id)` means the key is done. Nothing is remembered in
/// process, so any number of instances can consume the same stream.
///
/// Per delivery:
/// 1. Look up the key
/// 2. Committed + same content: duplicate. Different content: conflict
/// 3. Unseen: run the processing step, then create-if-absent
/// 4. AlreadyExists from the create: another delivery won, re-check content
/// 5. Step or store failure before commit: `Err`, the channel redelivers
pub struct IdempotentProcessor {
    repository: Arc<dyn ProcessedLogRepository>,
    processing_step: Arc<dyn ProcessingStep>,
    dead_letter_producer: Arc<dyn DeadLetterProducer>,
}

impl IdempotentProcessor {
    pub fn new(
        repository: Arc<dyn ProcessedLogRepository>,
        processing_step: Arc<dyn ProcessingStep>,
        dead_letter_producer: Arc<dyn DeadLetterProducer>,
    ) -> Self {
        Self {
            repository,
            processing_step,
            dead_letter_producer,
        }
    }

    #[instrument(skip(self, envelope), fields(tenant_id = %envelope.tenant_id(), log_id = %envelope.log_id()))]
    pub async fn handle(&self, envelope: &Envelope) -> DomainResult<HandleOutcome> {
        if let Err(e) = validate_struct(envelope) {
            return self
                .dead_letter(
                    envelope,
                    DeadLetterKind::PermanentProcessingDefect,
                    e.to_string(),
                )
                .await;
        }

        let key = envelope.key();

        if let Some(existing) = self.repository.get_processed_log(&key).await? {
            return self.resolve_existing(envelope, &existing, false).await;
        }

        let output = match self.processing_step.process(envelope).await {
            Ok(output) => output,
            Err(e) if e.is_permanent() => {
                return self
                    .dead_letter(
                        envelope,
                        DeadLetterKind::PermanentProcessingDefect,
                        e.to_string(),
                    )
                    .await;
            }
            Err(e) => {
                warn!(error = %e, "processing step failed, leaving for redelivery");
                return Err(e);
            }
        };

        let record = ProcessingRecord {
            tenant_id: envelope.tenant_id().to_string(),
            log_id: envelope.log_id().to_string(),
            text: envelope.text().to_string(),
            source: envelope.source(),
            received_at: envelope.received_at(),
            modified_text: output.modified_text,
            char_count: output.char_count,
            processed_at: Utc::now(),
            status: ProcessingStatus::Ok,
        };

        match self.repository.create_processed_log(&record).await {
            Ok(()) => {
                info!(document_path = %key.document_path(), "processed log committed");
                Ok(HandleOutcome::Committed)
            }
            Err(DomainError::ProcessedLogAlreadyExists(path)) => {
                debug!(document_path = %path, "lost commit race, re-checking content");
                match self.repository.get_processed_log(&key).await {
                    Ok(Some(existing)) => self.resolve_existing(envelope, &existing, true).await,
                    Ok(None) => {
                        warn!(document_path = %path, "record reported as existing but not readable");
                        Ok(HandleOutcome::RaceResolved)
                    }
                    Err(e) => {
                        // The key is committed either way
                        warn!(document_path = %path, error = %e, "re-read after race failed");
                        Ok(HandleOutcome::RaceResolved)
                    }
                }
            }
            Err(e) if e.is_permanent() => {
                warn!(error = %e, "store refused the record");
                self.dead_letter(
                    envelope,
                    DeadLetterKind::PermanentProcessingDefect,
                    e.to_string(),
                )
                .await
            }
            Err(e) => Err(e),
        }
    }

    async fn resolve_existing(
        &self,
        envelope: &Envelope,
        existing: &ProcessingRecord,
        after_race: bool,
    ) -> DomainResult<HandleOutcome> {
        if existing.matches_envelope(envelope) {
            debug!(after_race, "key already committed with same content");
            return Ok(if after_race {
                HandleOutcome::RaceResolved
            } else {
                HandleOutcome::Duplicate
            });
        }

        let conflict = DomainError::ConflictingLogId {
            tenant_id: envelope.tenant_id().to_string(),
            log_id: envelope.log_id().to_string(),
        };
        error!(
            error = %conflict,
            committed_received_at = %existing.received_at,
            incoming_received_at = %envelope.received_at(),
            "conflicting log id: committed record kept, incoming envelope rejected"
        );

        self.dead_letter(envelope, DeadLetterKind::ConflictingLogId, conflict.to_string())
            .await
            .map(|_| HandleOutcome::Conflict)
    }

    async fn dead_letter(
        &self,
        envelope: &Envelope,
        kind: DeadLetterKind,
        reason: String,
    ) -> DomainResult<HandleOutcome> {
        let payload = envelope.to_json_bytes()?;
        let dead_letter = DeadLetter::new(kind, reason, &payload).with_tenant(envelope.tenant_id());
        self.publish_dead_letter(&dead_letter).await?;
        Ok(HandleOutcome::DeadLettered)
    }

    /// Divert a channel payload that does not decode into an envelope
    #[instrument(skip(self, payload), fields(subject = %subject, payload_bytes = payload.len()))]
    pub async fn divert_undecodable(
        &self,
        subject: &str,
        payload: &[u8],
        reason: &str,
    ) -> DomainResult<HandleOutcome> {
        warn!(reason = %reason, "undecodable envelope");
        let dead_letter = DeadLetter::new(
            DeadLetterKind::PermanentProcessingDefect,
            reason,
            payload,
        )
        .with_subject(subject);
        self.publish_dead_letter(&dead_letter).await?;
        Ok(HandleOutcome::DeadLettered)
    }

    async fn publish_dead_letter(&self, dead_letter: &DeadLetter) -> DomainResult<()> {
        self.dead_letter_producer
            .publish_dead_letter(dead_letter)
            .await
            .map_err(|e| {
                // Never drop silently: surface as transient so the delivery is retried
                error!(error = %e, kind = ?dead_letter.kind, "dead-letter publish failed");
                DomainError::TransientFailure(format!("dead-letter publish failed: {}", e))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MockProcessingStep, ProcessingOutput};
    use common::domain::{
        EnvelopeSource, MockDeadLetterProducer, MockProcessedLogRepository, ProcessedLogKey,
    };

    fn envelope(text: &str) -> Envelope {
        Envelope::new("acme", "t-1", text, EnvelopeSource::JsonUpload, Utc::now())
    }

    fn committed(text: &str) -> ProcessingRecord {
        ProcessingRecord {
            tenant_id: "acme".to_string(),
            log_id: "t-1".to_string(),
            text: text.to_string(),
            source: EnvelopeSource::JsonUpload,
            received_at: Utc::now(),
            modified_text: text.to_uppercase(),
            char_count: text.chars().count() as i64,
            processed_at: Utc::now(),
            status: ProcessingStatus::Ok,
        }
    }

    fn uppercase_step(times: usize) -> MockProcessingStep {
        let mut step = MockProcessingStep::new();
        step.expect_process().times(times).returning(|e| {
            Ok(ProcessingOutput {
                modified_text: e.text().to_uppercase(),
                char_count: e.text().chars().count() as i64,
            })
        });
        step
    }

    fn no_dead_letters() -> MockDeadLetterProducer {
        let mut producer = MockDeadLetterProducer::new();
        producer.expect_publish_dead_letter().times(0);
        producer
    }

    fn processor(
        repo: MockProcessedLogRepository,
        step: MockProcessingStep,
        dead_letters: MockDeadLetterProducer,
    ) -> IdempotentProcessor {
        IdempotentProcessor::new(Arc::new(repo), Arc::new(step), Arc::new(dead_letters))
    }

    #[tokio::test]
    async fn test_unseen_key_is_processed_and_committed() {
        // Arrange
        let mut repo = MockProcessedLogRepository::new();
        repo.expect_get_processed_log()
            .withf(|key: &ProcessedLogKey| key.tenant_id == "acme" && key.log_id == "t-1")
            .times(1)
            .returning(|_| Ok(None));
        repo.expect_create_processed_log()
            .withf(|record: &ProcessingRecord| {
                record.text == "hello"
                    && record.modified_text == "HELLO"
                    && record.char_count == 5
                    && record.status == ProcessingStatus::Ok
            })
            .times(1)
            .returning(|_| Ok(()));

        let processor = processor(repo, uppercase_step(1), no_dead_letters());

        // Act
        let outcome = processor.handle(&envelope("hello")).await;

        // Assert
        assert_eq!(outcome.unwrap(), HandleOutcome::Committed);
    }

    #[tokio::test]
    async fn test_committed_same_content_is_duplicate_without_recompute() {
        let mut repo = MockProcessedLogRepository::new();
        repo.expect_get_processed_log()
            .times(1)
            .returning(|_| Ok(Some(committed("hello"))));
        repo.expect_create_processed_log().times(0);

        let processor = processor(repo, uppercase_step(0), no_dead_letters());

        let outcome = processor.handle(&envelope("hello")).await.unwrap();

        assert_eq!(outcome, HandleOutcome::Duplicate);
    }

    #[tokio::test]
    async fn test_committed_different_content_is_conflict() {
        let mut repo = MockProcessedLogRepository::new();
        repo.expect_get_processed_log()
            .times(1)
            .returning(|_| Ok(Some(committed("hello"))));
        repo.expect_create_processed_log().times(0);

        let mut dead_letters = MockDeadLetterProducer::new();
        dead_letters
            .expect_publish_dead_letter()
            .withf(|dl: &DeadLetter| {
                dl.kind == DeadLetterKind::ConflictingLogId
                    && dl.tenant_id.as_deref() == Some("acme")
                    && dl.payload.contains("goodbye")
            })
            .times(1)
            .returning(|_| Ok(()));

        let processor = processor(repo, uppercase_step(0), dead_letters);

        let outcome = processor.handle(&envelope("goodbye")).await.unwrap();

        assert_eq!(outcome, HandleOutcome::Conflict);
        assert!(outcome.is_rejection());
    }

    #[tokio::test]
    async fn test_race_with_same_content_is_resolved() {
        let mut repo = MockProcessedLogRepository::new();
        let mut seq = mockall::Sequence::new();
        repo.expect_get_processed_log()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(None));
        repo.expect_create_processed_log()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|r| Err(DomainError::ProcessedLogAlreadyExists(r.key().document_path())));
        repo.expect_get_processed_log()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Some(committed("hello"))));

        let processor = processor(repo, uppercase_step(1), no_dead_letters());

        let outcome = processor.handle(&envelope("hello")).await.unwrap();

        assert_eq!(outcome, HandleOutcome::RaceResolved);
    }

    #[tokio::test]
    async fn test_race_against_different_content_is_conflict() {
        let mut repo = MockProcessedLogRepository::new();
        let mut seq = mockall::Sequence::new();
        repo.expect_get_processed_log()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(None));
        repo.expect_create_processed_log()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|r| Err(DomainError::ProcessedLogAlreadyExists(r.key().document_path())));
        repo.expect_get_processed_log()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Some(committed("other"))));

        let mut dead_letters = MockDeadLetterProducer::new();
        dead_letters
            .expect_publish_dead_letter()
            .times(1)
            .returning(|_| Ok(()));

        let processor = processor(repo, uppercase_step(1), dead_letters);

        let outcome = processor.handle(&envelope("hello")).await.unwrap();

        assert_eq!(outcome, HandleOutcome::Conflict);
    }

    #[tokio::test]
    async fn test_race_with_failed_reread_still_acks() {
        let mut repo = MockProcessedLogRepository::new();
        let mut seq = mockall::Sequence::new();
        repo.expect_get_processed_log()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(None));
        repo.expect_create_processed_log()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|r| Err(DomainError::ProcessedLogAlreadyExists(r.key().document_path())));
        repo.expect_get_processed_log()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(DomainError::RepositoryError(anyhow::anyhow!("timeout"))));

        let processor = processor(repo, uppercase_step(1), no_dead_letters());

        let outcome = processor.handle(&envelope("hello")).await.unwrap();

        assert_eq!(outcome, HandleOutcome::RaceResolved);
    }

    #[tokio::test]
    async fn test_step_failure_is_not_committed() {
        let mut repo = MockProcessedLogRepository::new();
        repo.expect_get_processed_log()
            .times(1)
            .returning(|_| Ok(None));
        repo.expect_create_processed_log().times(0);

        let mut step = MockProcessingStep::new();
        step.expect_process()
            .times(1)
            .returning(|_| Err(DomainError::TransientFailure("worker crashed".to_string())));

        let processor = processor(repo, step, no_dead_letters());

        let result = processor.handle(&envelope("hello")).await;

        assert!(matches!(result, Err(DomainError::TransientFailure(_))));
    }

    #[tokio::test]
    async fn test_store_unavailable_on_lookup_is_transient() {
        let mut repo = MockProcessedLogRepository::new();
        repo.expect_get_processed_log()
            .times(1)
            .returning(|_| Err(DomainError::RepositoryError(anyhow::anyhow!("pool timeout"))));

        let processor = processor(repo, uppercase_step(0), no_dead_letters());

        let result = processor.handle(&envelope("hello")).await;

        assert!(matches!(result, Err(DomainError::RepositoryError(_))));
    }

    #[tokio::test]
    async fn test_store_failure_on_create_is_transient() {
        let mut repo = MockProcessedLogRepository::new();
        repo.expect_get_processed_log()
            .times(1)
            .returning(|_| Ok(None));
        repo.expect_create_processed_log()
            .times(1)
            .returning(|_| Err(DomainError::RepositoryError(anyhow::anyhow!("conn reset"))));

        let processor = processor(repo, uppercase_step(1), no_dead_letters());

        let result = processor.handle(&envelope("hello")).await;

        assert!(matches!(result, Err(DomainError::RepositoryError(_))));
    }

    #[tokio::test]
    async fn test_invalid_envelope_is_dead_lettered_without_store_access() {
        let mut repo = MockProcessedLogRepository::new();
        repo.expect_get_processed_log().times(0);

        let mut dead_letters = MockDeadLetterProducer::new();
        dead_letters
            .expect_publish_dead_letter()
            .withf(|dl: &DeadLetter| dl.kind == DeadLetterKind::PermanentProcessingDefect)
            .times(1)
            .returning(|_| Ok(()));

        let processor = processor(repo, uppercase_step(0), dead_letters);
        let invalid = Envelope::new("", "t-1", "x", EnvelopeSource::TextUpload, Utc::now());

        let outcome = processor.handle(&invalid).await.unwrap();

        assert_eq!(outcome, HandleOutcome::DeadLettered);
    }

    #[tokio::test]
    async fn test_permanent_step_error_is_dead_lettered() {
        let mut repo = MockProcessedLogRepository::new();
        repo.expect_get_processed_log()
            .times(1)
            .returning(|_| Ok(None));
        repo.expect_create_processed_log().times(0);

        let mut step = MockProcessingStep::new();
        step.expect_process().times(1).returning(|_| {
            Err(DomainError::PermanentProcessingDefect(
                "unsupported text".to_string(),
            ))
        });

        let mut dead_letters = MockDeadLetterProducer::new();
        dead_letters
            .expect_publish_dead_letter()
            .times(1)
            .returning(|_| Ok(()));

        let processor = processor(repo, step, dead_letters);

        let outcome = processor.handle(&envelope("hello")).await.unwrap();

        assert_eq!(outcome, HandleOutcome::DeadLettered);
    }

    #[tokio::test]
    async fn test_dead_letter_failure_becomes_transient() {
        let mut repo = MockProcessedLogRepository::new();
        repo.expect_get_processed_log()
            .times(1)
            .returning(|_| Ok(Some(committed("hello"))));

        let mut dead_letters = MockDeadLetterProducer::new();
        dead_letters
            .expect_publish_dead_letter()
            .times(1)
            .returning(|_| Err(DomainError::RepositoryError(anyhow::anyhow!("nats down"))));

        let processor = processor(repo, uppercase_step(0), dead_letters);

        let result = processor.handle(&envelope("goodbye")).await;

        assert!(matches!(result, Err(DomainError::TransientFailure(_))));
    }

    #[tokio::test]
    async fn test_divert_undecodable_keeps_raw_payload() {
        let mut dead_letters = MockDeadLetterProducer::new();
        dead_letters
            .expect_publish_dead_letter()
            .withf(|dl: &DeadLetter| {
                dl.kind == DeadLetterKind::PermanentProcessingDefect
                    && dl.payload == "not json"
                    && dl.subject.as_deref() == Some("envelopes.acme")
                    && dl.tenant_id.is_none()
            })
            .times(1)
            .returning(|_| Ok(()));

        let processor = processor(
            MockProcessedLogRepository::new(),
            uppercase_step(0),
            dead_letters,
        );

        let outcome = processor
            .divert_undecodable("envelopes.acme", b"not json", "expected value")
            .await
            .unwrap();

        assert_eq!(outcome, HandleOutcome::DeadLettered);
    }

    #[tokio::test]
    async fn test_store_refusing_record_is_dead_lettered_not_retried() {
        let mut repo = MockProcessedLogRepository::new();
        repo.expect_get_processed_log()
            .times(1)
            .returning(|_| Ok(None));
        repo.expect_create_processed_log().times(1).returning(|_| {
            Err(DomainError::PermanentProcessingDefect(
                "invalid byte sequence for encoding \"UTF8\": 0x00".to_string(),
            ))
        });

        let mut dead_letters = MockDeadLetterProducer::new();
        dead_letters
            .expect_publish_dead_letter()
            .withf(|dl: &DeadLetter| {
                dl.kind == DeadLetterKind::PermanentProcessingDefect
                    && dl.tenant_id.as_deref() == Some("acme")
            })
            .times(1)
            .returning(|_| Ok(()));

        let processor = processor(repo, uppercase_step(1), dead_letters);

        let outcome = processor.handle(&envelope("hello")).await.unwrap();

        assert_eq!(outcome, HandleOutcome::DeadLettered);
    }

    #[tokio::test]
    async fn test_transient_store_error_is_left_for_redelivery() {
        let mut repo = MockProcessedLogRepository::new();
        repo.expect_get_processed_log()
            .times(1)
            .returning(|_| Ok(None));
        repo.expect_create_processed_log()
            .times(1)
            .returning(|_| Err(DomainError::RepositoryError(anyhow::anyhow!("pool timeout"))));

        let processor = processor(repo, uppercase_step(1), no_dead_letters());

        let result = processor.handle(&envelope("hello")).await;

        assert!(matches!(result, Err(DomainError::RepositoryError(_))));
    }
}
