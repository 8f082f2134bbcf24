//! Error types for the writer workload.

use thiserror::Error;
use txkv_core::CoreError;

/// Result type for workload operations.
pub type WorkloadResult<T> = Result<T, WorkloadError>;

/// Errors that end a unit of work, a worker or the whole run.
#[derive(Debug, Error)]
pub enum WorkloadError {
    /// The environment or database could not be opened.
    #[error("failed to open {stage}: {source}")]
    Initialization {
        /// What was being opened.
        stage: &'static str,
        /// Underlying store error.
        #[source]
        source: CoreError,
    },

    /// A transaction could not be started.
    #[error("failed to begin transaction: {0}")]
    Begin(#[source] CoreError),

    /// A store operation inside a unit failed.
    #[error("{op} failed: {source}")]
    Operation {
        /// The operation, e.g. `put key 3`.
        op: String,
        /// Underlying store error.
        #[source]
        source: CoreError,
    },

    /// Commit failed.
    #[error("commit failed: {0}")]
    Commit(#[source] CoreError),

    /// Abort failed.
    #[error("abort failed: {0}")]
    Abort(#[source] CoreError),

    /// Every attempt of a unit hit a lock conflict.
    #[error("giving up after {retries} retries")]
    RetryExhausted {
        /// Retries spent on the unit.
        retries: u32,
    },

    /// A handle could not be closed.
    #[error("failed to close {handle}: {source}")]
    Teardown {
        /// Which handle.
        handle: &'static str,
        /// Underlying store error.
        #[source]
        source: CoreError,
    },

    /// A worker thread panicked.
    #[error("worker in slot {slot} panicked")]
    WorkerPanicked {
        /// Pool slot of the worker.
        slot: usize,
    },

    /// Workload configuration rejected.
    #[error("invalid workload configuration: {message}")]
    InvalidConfig {
        /// Description of the rejected setting.
        message: String,
    },
}

impl WorkloadError {
    /// Wraps a store error from the operation `op`.
    pub fn operation(op: impl Into<String>, source: CoreError) -> Self {
        Self::Operation {
            op: op.into(),
            source,
        }
    }

    /// Returns true for a lock conflict: the transaction was chosen as a
    /// deadlock victim and the unit may be retried after aborting it.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Operation { source, .. } | Self::Commit(source) => source.is_deadlock(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use txkv_core::TransactionId;

    #[test]
    fn conflicts_come_from_operations_and_commit() {
        let deadlock = || CoreError::deadlock(TransactionId::new(1));
        assert!(WorkloadError::operation("put key 1", deadlock()).is_conflict());
        assert!(WorkloadError::Commit(deadlock()).is_conflict());

        assert!(!WorkloadError::Begin(deadlock()).is_conflict());
        assert!(!WorkloadError::Abort(deadlock()).is_conflict());
        assert!(!WorkloadError::operation("put key 1", CoreError::KeyExists).is_conflict());
        assert!(!WorkloadError::RetryExhausted { retries: 20 }.is_conflict());
    }

    #[test]
    fn messages_name_the_operation() {
        let err = WorkloadError::operation("put key 3", CoreError::KeyExists);
        assert_eq!(
            err.to_string(),
            "put key 3 failed: key/value pair already exists"
        );
    }
}
