//! Error types for txkv core.

use crate::types::TransactionId;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in txkv core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] txkv_storage::StorageError),

    /// The transaction was chosen to break a deadlock.
    ///
    /// The caller must abort the transaction before doing anything else.
    /// This is the only retryable error.
    #[error("deadlock: {txid} was chosen as the victim")]
    Deadlock {
        /// The transaction that must abort.
        txid: TransactionId,
    },

    /// No transaction slot is free.
    #[error("transaction limit reached: {max} transactions already active")]
    TransactionLimit {
        /// Configured maximum of concurrently active transactions.
        max: usize,
    },

    /// The calling thread already owns an active transaction.
    #[error("nested transaction: this thread already owns active {active}")]
    NestedTransaction {
        /// The transaction the thread already owns.
        active: TransactionId,
    },

    /// A locking read without a transaction was issued by a thread that owns
    /// an active transaction, which would wait on its own locks forever.
    #[error("self-deadlock: locking read outside of {active} owned by this thread")]
    SelfDeadlock {
        /// The transaction the thread owns.
        active: TransactionId,
    },

    /// The environment was not opened free-threaded and is used from a
    /// thread other than the one that opened it.
    #[error("environment is not free-threaded")]
    NotFreeThreaded,

    /// The record cache has no room for the record.
    #[error("cache full: {requested} bytes requested, {available} bytes available")]
    CacheFull {
        /// Bytes the record needs.
        requested: u64,
        /// Bytes still free.
        available: u64,
    },

    /// The in-memory log buffer has no room for the record.
    #[error("log buffer full: {requested} bytes requested, {available} bytes available")]
    LogFull {
        /// Bytes the log record needs.
        requested: u64,
        /// Bytes still free.
        available: u64,
    },

    /// The exact key/value pair already exists in a sorted-duplicate database.
    #[error("key/value pair already exists")]
    KeyExists,

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Configuration rejected at open.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the rejected setting.
        message: String,
    },

    /// A log record could not be decoded.
    #[error("log corruption: {message}")]
    LogCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// The database handle is closed.
    #[error("database {name} is closed")]
    DatabaseClosed {
        /// Name of the database.
        name: String,
    },

    /// The environment is closed.
    #[error("environment is closed")]
    EnvironmentClosed,
}

impl CoreError {
    /// Creates a deadlock error for the victim transaction.
    pub fn deadlock(txid: TransactionId) -> Self {
        Self::Deadlock { txid }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates a log corruption error.
    pub fn log_corruption(message: impl Into<String>) -> Self {
        Self::LogCorruption {
            message: message.into(),
        }
    }

    /// Returns true if the caller should abort and may retry.
    #[must_use]
    pub fn is_deadlock(&self) -> bool {
        matches!(self, Self::Deadlock { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_deadlock_is_retryable() {
        assert!(CoreError::deadlock(TransactionId::new(3)).is_deadlock());
        assert!(!CoreError::KeyExists.is_deadlock());
        assert!(!CoreError::TransactionLimit { max: 1 }.is_deadlock());
        assert!(!CoreError::SelfDeadlock {
            active: TransactionId::new(1)
        }
        .is_deadlock());
    }

    #[test]
    fn messages_name_the_transaction() {
        let err = CoreError::deadlock(TransactionId::new(9));
        assert_eq!(err.to_string(), "deadlock: txn:9 was chosen as the victim");
    }
}
