//! Error types for discovery, approval, and backfill operations.
//!
//! Errors are classified by who has to act on them:
//! - Caller errors: bad input, unknown token, item already disposed. Never retried.
//! - External: provider, classifier, or timeout failures. Per-item, retryable.
//! - Store: the database could not be reached or written. Aborts the current run.

use thiserror::Error;

use crate::db::DbError;
use crate::sources::SourceError;

/// Caller-facing error for every public operation in the crate.
#[derive(Debug, Error)]
pub enum HearthError {
    // Caller errors
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already disposed: {0}")]
    AlreadyDisposed(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // Per-item failures
    #[error("External call failed: {0}")]
    ExternalCall(#[from] SourceError),

    // Fatal for the current run
    #[error("Store error: {0}")]
    Store(#[from] DbError),
}

impl HearthError {
    pub fn validation(msg: impl Into<String>) -> Self {
        HearthError::Validation(msg.into())
    }

    /// Returns true if retrying the same call could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HearthError::ExternalCall(e) if e.is_transient())
    }

    /// Returns true if the error was caused by the caller's input.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            HearthError::Validation(_)
                | HearthError::NotFound(_)
                | HearthError::AlreadyDisposed(_)
                | HearthError::Configuration(_)
        )
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            HearthError::Validation(_) => "Fix the request and try again.",
            HearthError::NotFound(_) => "The item may have been dismissed. Refresh the queue.",
            HearthError::AlreadyDisposed(_) => "This item was already handled. No action needed.",
            HearthError::Configuration(_) => "Check your configuration in ~/.hearth/config.json",
            HearthError::ExternalCall(_) => "The mail or AI provider failed. Try again later.",
            HearthError::Store(_) => "Check that ~/.hearth is writable and has free disk space.",
        }
    }
}

/// Serializable error representation for transports (HTTP, CLI, digest links).
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
    pub error_type: ErrorType,
    pub can_retry: bool,
    pub recovery_suggestion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    CallerError,
    Retryable,
    Fatal,
}

impl From<&HearthError> for ErrorPayload {
    fn from(err: &HearthError) -> Self {
        let error_type = if err.is_caller_error() {
            ErrorType::CallerError
        } else if err.is_retryable() {
            ErrorType::Retryable
        } else {
            ErrorType::Fatal
        };

        ErrorPayload {
            message: err.to_string(),
            error_type,
            can_retry: err.is_retryable(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_errors_are_not_retryable() {
        let errs = [
            HearthError::validation("bad range"),
            HearthError::NotFound("tok".into()),
            HearthError::AlreadyDisposed("tok".into()),
        ];
        for err in &errs {
            assert!(err.is_caller_error());
            assert!(!err.is_retryable());
            let payload = ErrorPayload::from(err);
            assert_eq!(payload.error_type, ErrorType::CallerError);
            assert!(!payload.can_retry);
        }
    }

    #[test]
    fn test_timeout_is_retryable() {
        let err = HearthError::from(SourceError::Timeout(30));
        assert!(err.is_retryable());
        assert!(!err.is_caller_error());
        assert_eq!(ErrorPayload::from(&err).error_type, ErrorType::Retryable);
    }

    #[test]
    fn test_store_error_is_fatal() {
        let err = HearthError::from(DbError::Migration("boom".into()));
        assert!(!err.is_retryable());
        assert_eq!(ErrorPayload::from(&err).error_type, ErrorType::Fatal);
    }
}
