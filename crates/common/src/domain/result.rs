use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Processed log already exists: {0}")]
    ProcessedLogAlreadyExists(String),

    #[error("Conflicting log id {log_id} for tenant {tenant_id}: committed content differs")]
    ConflictingLogId { tenant_id: String, log_id: String },

    #[error("Permanent processing defect: {0}")]
    PermanentProcessingDefect(String),

    #[error("Transient processing failure: {0}")]
    TransientFailure(String),

    #[error("Invalid envelope source: {0}")]
    InvalidEnvelopeSource(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),
}

impl DomainError {
    /// Errors that redelivery cannot fix. Everything else is worth another attempt.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            DomainError::ConflictingLogId { .. }
                | DomainError::PermanentProcessingDefect(_)
                | DomainError::InvalidEnvelopeSource(_)
                | DomainError::ValidationError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_errors() {
        assert!(DomainError::ConflictingLogId {
            tenant_id: "acme".to_string(),
            log_id: "t-1".to_string(),
        }
        .is_permanent());
        assert!(DomainError::PermanentProcessingDefect("bad".to_string()).is_permanent());
        assert!(DomainError::ValidationError("tenant_id: empty".to_string()).is_permanent());
    }

    #[test]
    fn test_transient_errors() {
        assert!(!DomainError::TransientFailure("store down".to_string()).is_permanent());
        assert!(!DomainError::RepositoryError(anyhow::anyhow!("timeout")).is_permanent());
        assert!(!DomainError::ProcessedLogAlreadyExists("k".to_string()).is_permanent());
    }
}
