//! Error types for driver operations.

use crate::record::RecordId;
use thiserror::Error;

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors surfaced by the ORM session and connection collaborators.
///
/// The conflict kinds (`OptimisticLock`, `StaleObject`, `LockTimeout`,
/// `RecoverableConnection`, `TransientSql`) are the ones a transaction
/// engine may safely retry. Everything else is a data or programming error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// An update carried a version that no longer matches the stored row.
    #[error(
        "optimistic lock conflict on {table}#{id}: expected version {expected}, found {actual}"
    )]
    OptimisticLock {
        /// Table of the conflicting row.
        table: String,
        /// Id of the conflicting row.
        id: RecordId,
        /// Version the writer expected.
        expected: u64,
        /// Version actually stored.
        actual: u64,
    },

    /// The row was updated or deleted by another transaction.
    #[error("row {table}#{id} was updated or deleted by another transaction")]
    StaleObject {
        /// Table of the stale row.
        table: String,
        /// Id of the stale row.
        id: RecordId,
    },

    /// A row or table lock could not be acquired in time.
    #[error("lock wait timeout: {0}")]
    LockTimeout(String),

    /// The connection failed in a way a fresh attempt can recover from.
    #[error("recoverable connection error: {0}")]
    RecoverableConnection(String),

    /// A transient SQL condition (deadlock victim, failover in progress).
    #[error("transient SQL error: {0}")]
    TransientSql(String),

    /// A generic SQL error, optionally caused by another driver error.
    #[error("SQL error: {message}")]
    Sql {
        /// Message reported by the database.
        message: String,
        /// Underlying cause, if the driver wrapped one.
        #[source]
        cause: Option<Box<DriverError>>,
    },

    /// A constraint (unique, foreign key, not null) was violated.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// An operation required an active transaction.
    #[error("no active transaction")]
    NoActiveTransaction,

    /// `begin_transaction` was called while one was already active.
    #[error("transaction already active")]
    TransactionAlreadyActive,

    /// The session was used after `close`.
    #[error("session is closed")]
    SessionClosed,
}

impl DriverError {
    /// Creates a generic SQL error.
    pub fn sql(message: impl Into<String>) -> Self {
        Self::Sql {
            message: message.into(),
            cause: None,
        }
    }

    /// Creates a generic SQL error wrapping another driver error.
    pub fn sql_caused_by(message: impl Into<String>, cause: DriverError) -> Self {
        Self::Sql {
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    /// Creates a recoverable connection error.
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self::RecoverableConnection(message.into())
    }

    /// Returns the message of a generic SQL error.
    #[must_use]
    pub fn sql_message(&self) -> Option<&str> {
        match self {
            Self::Sql { message, .. } => Some(message),
            _ => None,
        }
    }
}
