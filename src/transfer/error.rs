//! Transfer Database Error Types
//!
//! Expected conditions (nothing found, empty result) are `Ok(None)` / empty
//! collections. Only the variants below are errors.

use thiserror::Error;

/// Transfer database error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransferDbError {
    /// Referenced channel, request, queue entry or registration is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Uniqueness violation
    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    /// Illegal state-machine move
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    /// Storage unreachable, timed out or otherwise broken. Always retryable.
    #[error("Infrastructure error: {0}")]
    InfrastructureError(String),

    /// A batch operation stopped partway.
    ///
    /// `succeeded` lists the keys processed before the failure, in order.
    #[error("Batch stopped at {failed} after {} succeeded: {reason}", .succeeded.len())]
    PartialBatchFailure {
        succeeded: Vec<i64>,
        failed: i64,
        reason: String,
    },
}

/// Result type for transfer database operations
pub type TransferDbResult<T> = Result<T, TransferDbError>;

impl TransferDbError {
    /// Stable error code for logs and callers
    pub fn code(&self) -> &'static str {
        match self {
            TransferDbError::NotFound(_) => "NOT_FOUND",
            TransferDbError::DuplicateEntry(_) => "DUPLICATE_ENTRY",
            TransferDbError::InvalidTransition(_) => "INVALID_TRANSITION",
            TransferDbError::InfrastructureError(_) => "INFRASTRUCTURE_ERROR",
            TransferDbError::PartialBatchFailure { .. } => "PARTIAL_BATCH_FAILURE",
        }
    }

    /// Whether the external scheduler may simply retry the same call
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransferDbError::InfrastructureError(_))
    }

    /// Wrap a per-element failure of a batch operation
    pub(crate) fn partial(succeeded: Vec<i64>, failed: i64, cause: TransferDbError) -> Self {
        TransferDbError::PartialBatchFailure {
            succeeded,
            failed,
            reason: cause.to_string(),
        }
    }
}

impl From<sqlx::Error> for TransferDbError {
    fn from(e: sqlx::Error) -> Self {
        TransferDbError::InfrastructureError(e.to_string())
    }
}

/// Map an insert failure, turning key violations into typed outcomes.
///
/// SQLSTATE 23505 = unique_violation, 23503 = foreign_key_violation.
pub(crate) fn map_insert_error(e: sqlx::Error, what: impl Into<String>) -> TransferDbError {
    if let sqlx::Error::Database(db_err) = &e {
        match db_err.code().as_deref() {
            Some("23505") => return TransferDbError::DuplicateEntry(what.into()),
            Some("23503") => return TransferDbError::NotFound(what.into()),
            _ => {}
        }
    }
    TransferDbError::from(e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(TransferDbError::NotFound("x".into()).code(), "NOT_FOUND");
        assert_eq!(
            TransferDbError::DuplicateEntry("x".into()).code(),
            "DUPLICATE_ENTRY"
        );
        assert_eq!(
            TransferDbError::partial(vec![], 1, TransferDbError::NotFound("x".into())).code(),
            "PARTIAL_BATCH_FAILURE"
        );
    }

    #[test]
    fn test_only_infrastructure_is_retryable() {
        assert!(TransferDbError::InfrastructureError("timeout".into()).is_retryable());
        assert!(!TransferDbError::NotFound("x".into()).is_retryable());
        assert!(!TransferDbError::InvalidTransition("x".into()).is_retryable());
    }

    #[test]
    fn test_partial_display() {
        let err = TransferDbError::partial(
            vec![1, 2],
            3,
            TransferDbError::DuplicateEntry("file 3 on request 7".into()),
        );
        assert_eq!(
            err.to_string(),
            "Batch stopped at 3 after 2 succeeded: Duplicate entry: file 3 on request 7"
        );
    }

    #[test]
    fn test_non_database_sqlx_error_is_infrastructure() {
        let err = map_insert_error(sqlx::Error::PoolTimedOut, "channel");
        assert!(matches!(err, TransferDbError::InfrastructureError(_)));
    }
}
