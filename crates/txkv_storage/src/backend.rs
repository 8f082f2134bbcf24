//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level byte store.
///
/// Backends provide append, positional reads and prefix reclamation. The
/// caller owns all format interpretation.
///
/// # Invariants
///
/// - `append` returns the absolute offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset,
///   as long as the offset has not been discarded
/// - `discard_before` never changes the offsets of retained bytes
/// - Backends must be `Send + Sync` for concurrent access
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at absolute `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range was discarded or extends past the end.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the storage.
    ///
    /// Returns the absolute offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::Full`] if a bounded backend cannot hold
    /// the data.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Returns the end offset, which is where the next `append` writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Returns the first offset still retained.
    fn start(&self) -> u64;

    /// Discards every byte before `offset`, freeing its space.
    ///
    /// Offsets past the end are clamped to the end.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot reclaim space.
    fn discard_before(&mut self, offset: u64) -> StorageResult<()>;

    /// Returns the maximum number of retained bytes, if bounded.
    fn capacity(&self) -> Option<u64>;

    /// Returns the number of bytes currently retained.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn retained(&self) -> StorageResult<u64> {
        Ok(self.size()? - self.start())
    }
}
