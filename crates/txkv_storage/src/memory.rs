//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

#[derive(Debug, Default)]
struct Buffer {
    /// Absolute offset of `bytes[0]`.
    start: u64,
    bytes: Vec<u8>,
}

impl Buffer {
    fn end(&self) -> u64 {
        self.start + self.bytes.len() as u64
    }
}

/// A volatile byte store kept entirely in memory.
///
/// With a capacity the backend behaves like a fixed-size log buffer: appends
/// fail once the retained bytes would exceed it, and space comes back only
/// through [`StorageBackend::discard_before`].
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use txkv_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::with_capacity(16);
/// backend.append(b"0123456789").unwrap();
/// assert!(backend.append(b"0123456789").is_err());
///
/// backend.discard_before(10).unwrap();
/// assert_eq!(backend.append(b"0123456789").unwrap(), 10);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    buffer: RwLock<Buffer>,
    capacity: Option<u64>,
}

impl InMemoryBackend {
    /// Creates a new, unbounded, empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty backend that retains at most `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            buffer: RwLock::new(Buffer::default()),
            capacity: Some(capacity),
        }
    }

    /// Returns a copy of the retained bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.buffer.read().bytes.clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let buffer = self.buffer.read();
        if offset < buffer.start {
            return Err(StorageError::Discarded {
                offset,
                start: buffer.start,
            });
        }

        let size = buffer.end();
        let end = offset.saturating_add(len as u64);
        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        let from = (offset - buffer.start) as usize;
        Ok(buffer.bytes[from..from + len].to_vec())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut buffer = self.buffer.write();
        if let Some(capacity) = self.capacity {
            let used = buffer.bytes.len() as u64;
            let requested = data.len() as u64;
            if used + requested > capacity {
                return Err(StorageError::Full {
                    requested,
                    available: capacity.saturating_sub(used),
                });
            }
        }

        let offset = buffer.end();
        buffer.bytes.extend_from_slice(data);
        Ok(offset)
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.buffer.read().end())
    }

    fn start(&self) -> u64 {
        self.buffer.read().start
    }

    fn discard_before(&mut self, offset: u64) -> StorageResult<()> {
        let mut buffer = self.buffer.write();
        let target = offset.min(buffer.end());
        if target <= buffer.start {
            return Ok(());
        }

        let count = (target - buffer.start) as usize;
        buffer.bytes.drain(..count);
        buffer.start = target;
        Ok(())
    }

    fn capacity(&self) -> Option<u64> {
        self.capacity
    }
}
