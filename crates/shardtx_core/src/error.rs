//! Error types for shardtx core.

use shardtx_driver::{Check, DriverError, RecordId};
use std::error::Error as StdError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while running transactions.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Error raised by the ORM session or connection.
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// Application code asked for the transaction to be retried.
    #[error("transaction must be retried: {reason}")]
    RetryTransaction {
        /// Why the transaction should be retried.
        reason: String,
    },

    /// Operation not permitted in the current state.
    #[error("illegal state: {message}")]
    IllegalState {
        /// Description of the violated state.
        message: String,
    },

    /// An argument was rejected.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the bad argument.
        message: String,
    },

    /// A record required by `load` does not exist.
    #[error("{table}#{id} not found")]
    NotFound {
        /// Table searched.
        table: String,
        /// Id that was not found.
        id: RecordId,
    },

    /// A safety check rejected the operation.
    #[error("{check} check violated: {message}")]
    CheckViolation {
        /// The check that fired.
        check: Check,
        /// What the transaction attempted.
        message: String,
    },

    /// The transaction committed but a post-commit hook failed.
    #[error("post-commit hook failed: {source}")]
    PostCommitHookFailed {
        /// The hook's error.
        #[source]
        source: Box<CoreError>,
    },

    /// The transaction finished but closing its session failed.
    #[error("session close failed: {source}")]
    SessionCloseFailed {
        /// The close or close-hook error.
        #[source]
        source: Box<CoreError>,
    },

    /// A failure that happened while cleaning up after `primary`.
    #[error("{primary} ({} suppressed)", .suppressed.len())]
    WithSuppressed {
        /// The error that caused the cleanup.
        #[source]
        primary: Box<CoreError>,
        /// Errors raised during cleanup.
        suppressed: Vec<CoreError>,
    },

    /// Error raised by application code inside a transaction.
    #[error("application error: {0}")]
    Application(#[source] Box<dyn StdError + Send + Sync>),
}

impl CoreError {
    /// Creates a retry signal.
    pub fn retry(reason: impl Into<String>) -> Self {
        Self::RetryTransaction {
            reason: reason.into(),
        }
    }

    /// Creates an illegal state error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(table: impl Into<String>, id: RecordId) -> Self {
        Self::NotFound {
            table: table.into(),
            id,
        }
    }

    /// Creates a check violation.
    pub fn check_violation(check: Check, message: impl Into<String>) -> Self {
        Self::CheckViolation {
            check,
            message: message.into(),
        }
    }

    /// Wraps an application error.
    pub fn application(error: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::Application(error.into())
    }

    /// Attaches an error raised during cleanup without replacing `self`.
    #[must_use]
    pub fn with_suppressed(self, suppressed: CoreError) -> Self {
        match self {
            Self::WithSuppressed {
                primary,
                suppressed: mut existing,
            } => {
                existing.push(suppressed);
                Self::WithSuppressed {
                    primary,
                    suppressed: existing,
                }
            }
            primary => Self::WithSuppressed {
                primary: Box::new(primary),
                suppressed: vec![suppressed],
            },
        }
    }

    /// Returns the error that caused the failure, ignoring suppressed ones.
    #[must_use]
    pub fn primary(&self) -> &CoreError {
        match self {
            Self::WithSuppressed { primary, .. } => primary.primary(),
            other => other,
        }
    }

    /// Returns the errors suppressed during cleanup.
    #[must_use]
    pub fn suppressed(&self) -> &[CoreError] {
        match self {
            Self::WithSuppressed { suppressed, .. } => suppressed,
            _ => &[],
        }
    }

    /// Returns true if the transaction that raised this error may be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        crate::retry::is_retryable(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppressed_errors_keep_the_primary() {
        let err = CoreError::from(DriverError::LockTimeout("customers".into()))
            .with_suppressed(CoreError::from(DriverError::sql("rollback failed")))
            .with_suppressed(CoreError::illegal_state("still broken"));

        assert!(matches!(
            err.primary(),
            CoreError::Driver(DriverError::LockTimeout(_))
        ));
        assert_eq!(err.suppressed().len(), 2);
        assert_eq!(
            err.to_string(),
            "driver error: lock wait timeout: customers (2 suppressed)"
        );
    }

    #[test]
    fn display() {
        assert_eq!(
            CoreError::retry("balance changed").to_string(),
            "transaction must be retried: balance changed"
        );
        assert_eq!(
            CoreError::check_violation(Check::Cowrite, "two roots").to_string(),
            "COWRITE check violated: two roots"
        );
        assert_eq!(
            CoreError::not_found("customers", RecordId::new(4)).to_string(),
            "customers#4 not found"
        );
    }

    #[test]
    fn application_errors_keep_their_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = CoreError::application(io);
        assert_eq!(err.source().unwrap().to_string(), "disk full");
        assert!(err.suppressed().is_empty());
    }
}
