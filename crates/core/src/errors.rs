use thiserror::Error;

use crate::domain::expense::ExpenseStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid expense transition from {from} to {to}")]
    InvalidTransition { from: ExpenseStatus, to: ExpenseStatus },
    #[error("amount {amount} is outside the allowed range {min}..={max}")]
    AmountOutOfRange { amount: i64, min: i64, max: i64 },
    #[error("description must not be empty")]
    EmptyDescription,
    #[error("description must be at most {max} characters")]
    DescriptionTooLong { max: usize },
    #[error("notes must be at most {max} characters")]
    NotesTooLong { max: usize },
    #[error("unknown status filter `{0}`")]
    UnknownStatusFilter(String),
}

/// Failure conditions returned by every workflow operation. Callers match on
/// the variant to pick a response code or log level; only `Settlement` is
/// worth retrying.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExpenseError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("expense not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("transaction failure: {0}")]
    Transaction(String),
    #[error("settlement failure: {0}")]
    Settlement(String),
}

impl ExpenseError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Settlement(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Permission(_) => "permission",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Transaction(_) => "transaction",
            Self::Settlement(_) => "settlement",
        }
    }

    /// Response code an HTTP shell would map this condition to.
    pub fn status_hint(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Permission(_) => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Transaction(_) => 500,
            Self::Settlement(_) => 502,
        }
    }
}

impl From<DomainError> for ExpenseError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvalidTransition { .. } => Self::Conflict(value.to_string()),
            DomainError::AmountOutOfRange { .. }
            | DomainError::EmptyDescription
            | DomainError::DescriptionTooLong { .. }
            | DomainError::NotesTooLong { .. }
            | DomainError::UnknownStatusFilter(_) => Self::Validation(value.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::expense::ExpenseStatus;
    use crate::errors::{DomainError, ExpenseError};

    #[test]
    fn input_errors_map_to_validation() {
        let error = ExpenseError::from(DomainError::EmptyDescription);
        assert!(matches!(error, ExpenseError::Validation(_)));
        assert_eq!(error.status_hint(), 400);
        assert!(!error.is_retryable());
    }

    #[test]
    fn illegal_transition_maps_to_conflict() {
        let error = ExpenseError::from(DomainError::InvalidTransition {
            from: ExpenseStatus::Approved,
            to: ExpenseStatus::Rejected,
        });
        assert_eq!(error.kind(), "conflict");
        assert_eq!(error.status_hint(), 409);
        assert!(error.to_string().contains("approved"));
    }

    #[test]
    fn only_settlement_failures_are_retryable() {
        let errors = [
            ExpenseError::Validation("x".to_owned()),
            ExpenseError::Permission("x".to_owned()),
            ExpenseError::NotFound("x".to_owned()),
            ExpenseError::Conflict("x".to_owned()),
            ExpenseError::Transaction("x".to_owned()),
        ];
        assert!(errors.iter().all(|error| !error.is_retryable()));
        assert!(ExpenseError::Settlement("gateway timeout".to_owned()).is_retryable());
    }

    #[test]
    fn transaction_failure_maps_to_internal_error() {
        let error = ExpenseError::Transaction("database is locked".to_owned());
        assert_eq!(error.status_hint(), 500);
    }
}
