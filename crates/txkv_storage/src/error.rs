//! Error types for storage operations.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend is bounded and the append does not fit.
    #[error("storage full: {requested} bytes requested, {available} bytes available")]
    Full {
        /// Bytes the append needed.
        requested: u64,
        /// Bytes still free.
        available: u64,
    },

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current end offset.
        size: u64,
    },

    /// Attempted to read bytes that were already discarded.
    #[error("offset {offset} was discarded (retained data starts at {start})")]
    Discarded {
        /// The requested read offset.
        offset: u64,
        /// The first retained offset.
        start: u64,
    },
}
