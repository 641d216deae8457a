use crate::domain::result::DomainResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterKind {
    ConflictingLogId,
    PermanentProcessingDefect,
}

impl DeadLetterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterKind::ConflictingLogId => "conflicting_log_id",
            DeadLetterKind::PermanentProcessingDefect => "permanent_processing_defect",
        }
    }
}

/// A channel message that will never process successfully.
///
/// `payload` is the original message body (lossy UTF-8) so the entry can be
/// inspected or replayed by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub kind: DeadLetterKind,
    pub reason: String,
    pub tenant_id: Option<String>,
    pub subject: Option<String>,
    pub payload: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(kind: DeadLetterKind, reason: impl Into<String>, payload: &[u8]) -> Self {
        Self {
            kind,
            reason: reason.into(),
            tenant_id: None,
            subject: None,
            payload: String::from_utf8_lossy(payload).into_owned(),
            failed_at: Utc::now(),
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

/// Sink for messages that exhausted valid retry semantics
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeadLetterProducer: Send + Sync {
    async fn publish_dead_letter(&self, dead_letter: &DeadLetter) -> DomainResult<()>;
}
