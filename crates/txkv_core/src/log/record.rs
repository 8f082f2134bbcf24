//! Log record types and serialization.

use crate::error::{CoreError, CoreResult};
use crate::types::{DatabaseId, Lsn, TransactionId};

/// Type of log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    /// A record inserted (or replaced) by a transaction.
    Put = 1,
    /// A transaction committed.
    Commit = 2,
}

impl LogRecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Put),
            2 => Some(Self::Commit),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A log record.
///
/// Records of one transaction are chained backwards through `prev_lsn`, so
/// commit and abort can walk exactly the work of that transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// A put.
    Put {
        /// Transaction ID.
        txid: TransactionId,
        /// Previous record of the same transaction.
        prev_lsn: Option<Lsn>,
        /// Database written.
        db: DatabaseId,
        /// Key written.
        key: Vec<u8>,
        /// Value replaced by an overwrite, if any.
        before: Option<Vec<u8>>,
        /// Value written.
        after: Vec<u8>,
    },

    /// A commit.
    Commit {
        /// Transaction ID.
        txid: TransactionId,
        /// Previous record of the same transaction.
        prev_lsn: Option<Lsn>,
    },
}

impl LogRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> LogRecordType {
        match self {
            Self::Put { .. } => LogRecordType::Put,
            Self::Commit { .. } => LogRecordType::Commit,
        }
    }

    /// Returns the owning transaction.
    #[must_use]
    pub fn txid(&self) -> TransactionId {
        match self {
            Self::Put { txid, .. } | Self::Commit { txid, .. } => *txid,
        }
    }

    /// Returns the previous record of the same transaction.
    #[must_use]
    pub fn prev_lsn(&self) -> Option<Lsn> {
        match self {
            Self::Put { prev_lsn, .. } | Self::Commit { prev_lsn, .. } => *prev_lsn,
        }
    }

    /// Serializes the record payload (without envelope).
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();

        match self {
            Self::Put {
                txid,
                prev_lsn,
                db,
                key,
                before,
                after,
            } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
                put_optional_lsn(&mut buf, *prev_lsn);
                buf.extend_from_slice(&db.as_u32().to_le_bytes());
                put_bytes(&mut buf, key)?;
                match before {
                    Some(before) => {
                        buf.push(1);
                        put_bytes(&mut buf, before)?;
                    }
                    None => buf.push(0),
                }
                put_bytes(&mut buf, after)?;
            }

            Self::Commit { txid, prev_lsn } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
                put_optional_lsn(&mut buf, *prev_lsn);
            }
        }

        Ok(buf)
    }

    /// Deserializes a record from its type and payload.
    pub fn decode_payload(record_type: LogRecordType, payload: &[u8]) -> CoreResult<Self> {
        let mut reader = PayloadReader::new(payload);

        let record = match record_type {
            LogRecordType::Put => {
                let txid = TransactionId::new(reader.u64()?);
                let prev_lsn = reader.optional_lsn()?;
                let db = DatabaseId::new(reader.u32()?);
                let key = reader.bytes()?;
                let before = match reader.u8()? {
                    0 => None,
                    _ => Some(reader.bytes()?),
                };
                let after = reader.bytes()?;
                Self::Put {
                    txid,
                    prev_lsn,
                    db,
                    key,
                    before,
                    after,
                }
            }

            LogRecordType::Commit => {
                let txid = TransactionId::new(reader.u64()?);
                let prev_lsn = reader.optional_lsn()?;
                Self::Commit { txid, prev_lsn }
            }
        };

        reader.finish(record_type)?;
        Ok(record)
    }
}

fn put_optional_lsn(buf: &mut Vec<u8>, lsn: Option<Lsn>) {
    match lsn {
        Some(lsn) => {
            buf.push(1);
            buf.extend_from_slice(&lsn.as_u64().to_le_bytes());
        }
        None => buf.push(0),
    }
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) -> CoreResult<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| CoreError::invalid_operation("log record field too large"))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

struct PayloadReader<'a> {
    payload: &'a [u8],
    cursor: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(payload: &'a [u8]) -> Self {
        Self { payload, cursor: 0 }
    }

    fn take(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .cursor
            .checked_add(len)
            .filter(|end| *end <= self.payload.len())
            .ok_or_else(|| CoreError::log_corruption("unexpected end of payload"))?;
        let slice = &self.payload[self.cursor..end];
        self.cursor = end;
        Ok(slice)
    }

    fn u8(&mut self) -> CoreResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> CoreResult<u32> {
        let bytes: [u8; 4] = self
            .take(4)?
            .try_into()
            .map_err(|_| CoreError::log_corruption("invalid u32"))?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn u64(&mut self) -> CoreResult<u64> {
        let bytes: [u8; 8] = self
            .take(8)?
            .try_into()
            .map_err(|_| CoreError::log_corruption("invalid u64"))?;
        Ok(u64::from_le_bytes(bytes))
    }

    fn optional_lsn(&mut self) -> CoreResult<Option<Lsn>> {
        match self.u8()? {
            0 => Ok(None),
            _ => Ok(Some(Lsn::new(self.u64()?))),
        }
    }

    fn bytes(&mut self) -> CoreResult<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn finish(&self, record_type: LogRecordType) -> CoreResult<()> {
        if self.cursor != self.payload.len() {
            return Err(CoreError::log_corruption(format!(
                "trailing bytes in {:?} record: expected {} bytes, got {}",
                record_type,
                self.cursor,
                self.payload.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put_record(before: Option<Vec<u8>>) -> LogRecord {
        LogRecord::Put {
            txid: TransactionId::new(5),
            prev_lsn: Some(Lsn::new(40)),
            db: DatabaseId::new(1),
            key: b"key 3".to_vec(),
            before,
            after: 17i32.to_ne_bytes().to_vec(),
        }
    }

    #[test]
    fn record_type_roundtrip() {
        for t in [LogRecordType::Put, LogRecordType::Commit] {
            assert_eq!(LogRecordType::from_byte(t.as_byte()), Some(t));
        }
        assert_eq!(LogRecordType::from_byte(0), None);
    }

    #[test]
    fn put_with_before_image_decodes() {
        let record = put_record(Some(b"old".to_vec()));
        let payload = record.encode_payload().unwrap();
        let decoded = LogRecord::decode_payload(LogRecordType::Put, &payload).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.prev_lsn(), Some(Lsn::new(40)));
    }

    #[test]
    fn first_commit_has_no_previous() {
        let record = LogRecord::Commit {
            txid: TransactionId::new(2),
            prev_lsn: None,
        };
        let payload = record.encode_payload().unwrap();
        let decoded = LogRecord::decode_payload(LogRecordType::Commit, &payload).unwrap();
        assert_eq!(decoded.txid(), TransactionId::new(2));
        assert_eq!(decoded.prev_lsn(), None);
    }

    #[test]
    fn truncated_payload_is_corruption() {
        let payload = put_record(None).encode_payload().unwrap();
        let result = LogRecord::decode_payload(LogRecordType::Put, &payload[..payload.len() - 1]);
        assert!(matches!(result, Err(CoreError::LogCorruption { .. })));
    }

    #[test]
    fn trailing_bytes_are_corruption() {
        let mut payload = LogRecord::Commit {
            txid: TransactionId::new(1),
            prev_lsn: None,
        }
        .encode_payload()
        .unwrap();
        payload.push(0xFF);
        let result = LogRecord::decode_payload(LogRecordType::Commit, &payload);
        assert!(matches!(result, Err(CoreError::LogCorruption { .. })));
    }
}
