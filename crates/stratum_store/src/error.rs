//! Error types for store operations.

use std::time::Duration;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a write executor or transaction service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A constraint (primary key, foreign key) was violated.
    #[error("constraint violation on {table}: {message}")]
    ConstraintViolation {
        /// The table the violating statement targeted.
        table: String,
        /// Description of the violation.
        message: String,
    },

    /// The command referenced a table the store does not know.
    #[error("unknown table: {table}")]
    UnknownTable {
        /// Name of the table.
        table: String,
    },

    /// A write or commit was attempted with no open transaction.
    #[error("no transaction is open")]
    NoTransaction,

    /// `begin` was called while a transaction was already open.
    #[error("a transaction is already open")]
    TransactionActive,

    /// `begin` gave up waiting for another connection's transaction.
    #[error("timed out after {waited:?} waiting for the write lock")]
    LockTimeout {
        /// How long `begin` waited.
        waited: Duration,
    },

    /// The connection to the store was lost.
    #[error("connection lost: {message}")]
    ConnectionLost {
        /// Description of the failure.
        message: String,
    },
}

impl StoreError {
    /// Creates a constraint violation error.
    pub fn constraint(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Creates a connection lost error.
    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::ConnectionLost {
            message: message.into(),
        }
    }
}
