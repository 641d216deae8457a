//! Garde validation utilities.

use crate::domain::DomainError;
use garde::{Report, Validate};

/// Run garde validation and fold the report into a `DomainError::ValidationError`
pub fn validate_struct<T>(value: &T) -> Result<(), DomainError>
where
    T: Validate,
    T::Context: Default,
{
    value
        .validate()
        .map_err(|report| DomainError::ValidationError(describe_report(&report)))
}

fn describe_report(report: &Report) -> String {
    report
        .iter()
        .map(|(path, error)| {
            let path = path.to_string();
            if path.is_empty() {
                error.message().to_string()
            } else {
                format!("{}: {}", path, error.message())
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Validate)]
    struct Keyed {
        #[garde(length(min = 1))]
        tenant_id: String,
        #[garde(length(min = 1))]
        log_id: String,
    }

    #[test]
    fn test_validate_success() {
        let keyed = Keyed {
            tenant_id: "acme".to_string(),
            log_id: "t-1".to_string(),
        };
        assert!(validate_struct(&keyed).is_ok());
    }

    #[test]
    fn test_validate_reports_every_failing_field() {
        let keyed = Keyed {
            tenant_id: "".to_string(),
            log_id: "".to_string(),
        };
        match validate_struct(&keyed) {
            Err(DomainError::ValidationError(msg)) => {
                assert!(msg.contains("tenant_id"));
                assert!(msg.contains("log_id"));
            }
            other => panic!("Expected ValidationError, got {:?}", other),
        }
    }
}
