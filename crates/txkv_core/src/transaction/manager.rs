//! Transaction manager.

use crate::error::{CoreError, CoreResult};
use crate::log::{LogManager, LogRecord};
use crate::stats::EnvStats;
use crate::types::{Lsn, TransactionId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct ActiveTransaction {
    owner: ThreadId,
    first_lsn: Option<Lsn>,
}

/// Tracks active transactions and owns the log they write to.
///
/// The active table and log appends share one mutex: a transaction's first
/// record is registered in the same critical section that appends it, so
/// reclamation can never discard a record an active transaction still
/// needs.
pub struct TransactionManager {
    active: Mutex<HashMap<TransactionId, ActiveTransaction>>,
    next_txid: AtomicU64,
    max_active: usize,
    log: LogManager,
    stats: Arc<EnvStats>,
}

impl TransactionManager {
    /// Creates a transaction manager writing to `log`.
    pub fn new(log: LogManager, max_active: usize, stats: Arc<EnvStats>) -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            next_txid: AtomicU64::new(1),
            max_active,
            log,
            stats,
        }
    }

    /// Registers a new active transaction owned by `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NestedTransaction`] if `owner` already owns an
    /// active transaction and [`CoreError::TransactionLimit`] if every slot
    /// is taken.
    pub fn begin(&self, owner: ThreadId) -> CoreResult<TransactionId> {
        let mut active = self.active.lock();

        if let Some((txid, _)) = active.iter().find(|(_, t)| t.owner == owner) {
            return Err(CoreError::NestedTransaction { active: *txid });
        }
        if active.len() >= self.max_active {
            return Err(CoreError::TransactionLimit {
                max: self.max_active,
            });
        }

        let txid = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        active.insert(
            txid,
            ActiveTransaction {
                owner,
                first_lsn: None,
            },
        );
        self.stats.record_transaction_start();
        Ok(txid)
    }

    /// Appends a record on behalf of an active transaction.
    pub fn log(&self, record: &LogRecord) -> CoreResult<Lsn> {
        let txid = record.txid();
        let mut active = self.active.lock();
        let entry = active
            .get_mut(&txid)
            .ok_or_else(|| CoreError::invalid_operation(format!("{txid} is not active")))?;

        let lsn = self.log.append(record)?;
        entry.first_lsn.get_or_insert(lsn);
        self.stats.record_log_append();
        Ok(lsn)
    }

    /// Reads a record back.
    pub fn read(&self, lsn: Lsn) -> CoreResult<LogRecord> {
        self.log.read(lsn)
    }

    /// Removes `txid` from the active table and reclaims log space no
    /// remaining transaction needs.
    pub fn finish(&self, txid: TransactionId) -> CoreResult<()> {
        let mut active = self.active.lock();
        active.remove(&txid);

        let oldest = active.values().filter_map(|t| t.first_lsn).min();
        self.log.reclaim(oldest)?;
        debug!(%txid, keep_from = ?oldest, "log reclaimed");
        Ok(())
    }

    /// Returns the active transaction owned by `owner`, if any.
    #[must_use]
    pub fn owned_by(&self, owner: ThreadId) -> Option<TransactionId> {
        self.active
            .lock()
            .iter()
            .find(|(_, t)| t.owner == owner)
            .map(|(txid, _)| *txid)
    }

    /// Returns the number of active transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Returns the log bytes currently retained.
    pub fn log_retained(&self) -> CoreResult<u64> {
        self.log.retained()
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active_count", &self.active_count())
            .field("max_active", &self.max_active)
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DatabaseId;
    use std::thread;
    use txkv_storage::InMemoryBackend;

    fn manager(max_active: usize) -> TransactionManager {
        TransactionManager::new(
            LogManager::new(Box::new(InMemoryBackend::new())),
            max_active,
            Arc::new(EnvStats::new()),
        )
    }

    fn put(txid: TransactionId, prev_lsn: Option<Lsn>) -> LogRecord {
        LogRecord::Put {
            txid,
            prev_lsn,
            db: DatabaseId::new(1),
            key: b"key 1".to_vec(),
            before: None,
            after: vec![0; 4],
        }
    }

    #[test]
    fn ids_increase() {
        let tm = manager(10);
        let a = tm.begin(thread::current().id()).unwrap();
        let b = thread::scope(|s| s.spawn(|| tm.begin(thread::current().id())).join().unwrap())
            .unwrap();
        assert!(b > a);
        assert_eq!(tm.active_count(), 2);
    }

    #[test]
    fn one_active_transaction_per_thread() {
        let tm = manager(10);
        let me = thread::current().id();
        let first = tm.begin(me).unwrap();

        let err = tm.begin(me).unwrap_err();
        assert!(matches!(err, CoreError::NestedTransaction { active } if active == first));
        assert_eq!(tm.owned_by(me), Some(first));

        tm.finish(first).unwrap();
        assert_eq!(tm.owned_by(me), None);
        assert!(tm.begin(me).is_ok());
    }

    #[test]
    fn limit_is_enforced() {
        let tm = manager(1);
        tm.begin(thread::current().id()).unwrap();
        let err = thread::scope(|s| s.spawn(|| tm.begin(thread::current().id())).join().unwrap())
            .unwrap_err();
        assert!(matches!(err, CoreError::TransactionLimit { max: 1 }));
    }

    #[test]
    fn log_requires_active_transaction() {
        let tm = manager(10);
        let err = tm.log(&put(TransactionId::new(99), None)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
    }

    #[test]
    fn reclaim_stops_at_oldest_active_record() {
        let tm = manager(10);
        let me = thread::current().id();
        let older = tm.begin(me).unwrap();
        let first = tm.log(&put(older, None)).unwrap();

        thread::scope(|s| {
            s.spawn(|| {
                let younger = tm.begin(thread::current().id()).unwrap();
                tm.log(&put(younger, None)).unwrap();
                tm.finish(younger).unwrap();
            });
        });

        // The older transaction's record survives the younger one finishing.
        assert_eq!(tm.read(first).unwrap(), put(older, None));

        tm.finish(older).unwrap();
        assert_eq!(tm.log_retained().unwrap(), 0);
    }
}
