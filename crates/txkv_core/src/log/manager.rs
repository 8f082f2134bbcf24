//! Log buffer writer and reader.

use crate::error::{CoreError, CoreResult};
use crate::log::record::{LogRecord, LogRecordType};
use crate::types::Lsn;
use parking_lot::Mutex;
use txkv_storage::{StorageBackend, StorageError};

/// Header size for log records.
/// type (1) + length (4) = 5 bytes
const HEADER_SIZE: usize = 5;

/// CRC size.
const CRC_SIZE: usize = 4;

/// Manages the volatile log.
///
/// Records are appended to a bounded backend. Space is reclaimed only up to
/// the first record of the oldest active transaction, so every record an
/// active transaction may need for commit or abort stays readable.
pub struct LogManager {
    backend: Mutex<Box<dyn StorageBackend>>,
}

impl LogManager {
    /// Creates a new log manager over a backend.
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self {
            backend: Mutex::new(backend),
        }
    }

    /// Appends a record and returns its LSN.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogFull`] if the buffer cannot hold the record.
    pub fn append(&self, record: &LogRecord) -> CoreResult<Lsn> {
        let payload = record.encode_payload()?;

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.push(record.record_type().as_byte());
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_operation("log record payload too large"))?;
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);

        let crc = crc32fast::hash(&data);
        data.extend_from_slice(&crc.to_le_bytes());

        let mut backend = self.backend.lock();
        match backend.append(&data) {
            Ok(offset) => Ok(Lsn::new(offset)),
            Err(StorageError::Full {
                requested,
                available,
            }) => Err(CoreError::LogFull {
                requested,
                available,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads the record at `lsn`.
    pub fn read(&self, lsn: Lsn) -> CoreResult<LogRecord> {
        let backend = self.backend.lock();

        let header = backend.read_at(lsn.as_u64(), HEADER_SIZE)?;
        let record_type = LogRecordType::from_byte(header[0]).ok_or_else(|| {
            CoreError::log_corruption(format!("unknown record type {} at {}", header[0], lsn))
        })?;
        let len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;

        let body = backend.read_at(lsn.as_u64() + HEADER_SIZE as u64, len + CRC_SIZE)?;
        drop(backend);

        let (payload, crc_bytes) = body.split_at(len);
        let stored_crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header);
        hasher.update(payload);
        let computed_crc = hasher.finalize();
        if stored_crc != computed_crc {
            return Err(CoreError::log_corruption(format!(
                "checksum mismatch at {}: expected {:08x}, got {:08x}",
                lsn, stored_crc, computed_crc
            )));
        }

        LogRecord::decode_payload(record_type, payload)
    }

    /// Frees every record before `keep_from`, or the whole log when no
    /// record needs to be kept.
    pub fn reclaim(&self, keep_from: Option<Lsn>) -> CoreResult<()> {
        let mut backend = self.backend.lock();
        let target = match keep_from {
            Some(lsn) => lsn.as_u64(),
            None => backend.size()?,
        };
        backend.discard_before(target)?;
        Ok(())
    }

    /// Returns the bytes currently retained.
    pub fn retained(&self) -> CoreResult<u64> {
        Ok(self.backend.lock().retained()?)
    }
}

impl std::fmt::Debug for LogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = self.backend.lock();
        f.debug_struct("LogManager")
            .field("start", &backend.start())
            .field("capacity", &backend.capacity())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DatabaseId, TransactionId};
    use txkv_storage::InMemoryBackend;

    fn put(txid: u64, prev: Option<Lsn>) -> LogRecord {
        LogRecord::Put {
            txid: TransactionId::new(txid),
            prev_lsn: prev,
            db: DatabaseId::new(1),
            key: b"key 1".to_vec(),
            before: None,
            after: vec![1, 2, 3, 4],
        }
    }

    #[test]
    fn append_and_read_chain() {
        let log = LogManager::new(Box::new(InMemoryBackend::new()));
        let first = log.append(&put(1, None)).unwrap();
        let second = log.append(&put(1, Some(first))).unwrap();

        assert!(second > first);
        assert_eq!(log.read(second).unwrap().prev_lsn(), Some(first));
        assert_eq!(log.read(first).unwrap(), put(1, None));
    }

    #[test]
    fn full_buffer_reports_log_full() {
        let log = LogManager::new(Box::new(InMemoryBackend::with_capacity(48)));
        log.append(&put(1, None)).unwrap();

        let result = log.append(&put(1, None));
        assert!(matches!(result, Err(CoreError::LogFull { .. })));
    }

    #[test]
    fn reclaim_keeps_records_from_lsn() {
        let log = LogManager::new(Box::new(InMemoryBackend::new()));
        let first = log.append(&put(1, None)).unwrap();
        let second = log.append(&put(2, None)).unwrap();

        log.reclaim(Some(second)).unwrap();
        assert!(log.read(second).is_ok());
        assert!(matches!(log.read(first), Err(CoreError::Storage(_))));

        log.reclaim(None).unwrap();
        assert_eq!(log.retained().unwrap(), 0);
    }

    #[test]
    fn reclaim_makes_room_again() {
        let log = LogManager::new(Box::new(InMemoryBackend::with_capacity(48)));
        log.append(&put(1, None)).unwrap();
        log.reclaim(None).unwrap();
        assert!(log.append(&put(2, None)).is_ok());
    }
}
