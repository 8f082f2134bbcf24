//! Environment: shared engine state and transaction entry points.

use crate::config::{DbConfig, EnvConfig};
use crate::db::{Database, DbShared};
use crate::error::{CoreError, CoreResult};
use crate::lock::LockManager;
use crate::log::{LogManager, LogRecord};
use crate::stats::{EnvStats, StatsSnapshot};
use crate::transaction::{Transaction, TransactionManager};
use crate::tree::record_size;
use crate::types::{DatabaseId, Lsn, TransactionId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, info};
use txkv_storage::{InMemoryBackend, StorageBackend};

#[derive(Debug, Default)]
struct Catalog {
    by_name: HashMap<String, Arc<DbShared>>,
    by_id: HashMap<DatabaseId, Arc<DbShared>>,
    next_id: u32,
}

/// State shared by the environment, its databases and its transactions.
pub(crate) struct EnvShared {
    pub(crate) config: EnvConfig,
    pub(crate) stats: Arc<EnvStats>,
    pub(crate) locks: LockManager,
    pub(crate) txns: TransactionManager,
    catalog: RwLock<Catalog>,
    cache_used: AtomicU64,
    opener: ThreadId,
    is_open: RwLock<bool>,
}

impl EnvShared {
    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::EnvironmentClosed)
        }
    }

    /// Rejects calls from other threads unless the environment is
    /// free-threaded.
    pub(crate) fn check_thread(&self) -> CoreResult<()> {
        if self.config.free_threaded || thread::current().id() == self.opener {
            Ok(())
        } else {
            Err(CoreError::NotFreeThreaded)
        }
    }

    fn database(&self, id: DatabaseId) -> CoreResult<Arc<DbShared>> {
        self.catalog
            .read()
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::log_corruption(format!("log names unknown {id}")))
    }

    /// Charges `bytes` against the cache.
    pub(crate) fn reserve_cache(&self, bytes: u64) -> CoreResult<()> {
        let limit = self.config.cache_size;
        self.cache_used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|total| *total <= limit)
            })
            .map(|_| ())
            .map_err(|used| CoreError::CacheFull {
                requested: bytes,
                available: limit.saturating_sub(used),
            })
    }

    /// Charges `bytes` without checking the limit. Used when abort restores
    /// a record whose charge was released by the put it undoes.
    fn force_cache(&self, bytes: u64) {
        self.cache_used.fetch_add(bytes, Ordering::AcqRel);
    }

    pub(crate) fn release_cache(&self, bytes: u64) {
        // Saturating: a release never exceeds what was charged.
        let _ = self
            .cache_used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                Some(used.saturating_sub(bytes))
            });
    }

    pub(crate) fn begin(self: &Arc<Self>) -> CoreResult<Transaction> {
        self.ensure_open()?;
        self.check_thread()?;

        let owner = thread::current().id();
        let txid = self.txns.begin(owner)?;
        debug!(%txid, "transaction started");
        Ok(Transaction::new(txid, owner, Arc::clone(self)))
    }

    /// Commits `txn`.
    ///
    /// If the commit record cannot be logged the transaction stays active
    /// and must still be aborted.
    pub(crate) fn commit(self: &Arc<Self>, txn: &mut Transaction) -> CoreResult<()> {
        txn.ensure_active()?;
        txn.belongs_to(self)?;

        let txid = txn.id();
        self.txns.log(&LogRecord::Commit {
            txid,
            prev_lsn: txn.last_lsn(),
        })?;

        self.walk_chain(txid, txn.last_lsn(), |db, key, _, _| {
            db.tree.write().commit(key, txid);
        })?;

        txn.mark_committed();
        let finished = self.txns.finish(txid);
        let released = self.locks.release_all(txid);
        self.stats.record_transaction_commit();
        debug!(%txid, puts = txn.put_count(), released, "transaction committed");
        finished
    }

    /// Aborts `txn`, undoing its puts newest first.
    ///
    /// The transaction always ends aborted with its locks released; an error
    /// means part of the undo could not be applied.
    pub(crate) fn abort(self: &Arc<Self>, txn: &mut Transaction) -> CoreResult<()> {
        txn.ensure_active()?;
        txn.belongs_to(self)?;

        let txid = txn.id();
        let undone = self.walk_chain(txid, txn.last_lsn(), |db, key, before, after| {
            db.tree.write().undo(key, after, before, txid);
            self.release_cache(record_size(key, after));
            if let Some(before) = before {
                self.force_cache(record_size(key, before));
            }
        });

        txn.mark_aborted();
        let finished = self.txns.finish(txid);
        let released = self.locks.release_all(txid);
        self.stats.record_transaction_abort();
        debug!(%txid, puts = txn.put_count(), released, "transaction aborted");

        undone?;
        finished
    }

    /// Visits every put of `txid` from `last` backwards.
    fn walk_chain<F>(&self, txid: TransactionId, last: Option<Lsn>, mut visit: F) -> CoreResult<()>
    where
        F: FnMut(&DbShared, &[u8], Option<&[u8]>, &[u8]),
    {
        let mut next = last;
        while let Some(lsn) = next {
            let record = self.txns.read(lsn)?;
            if record.txid() != txid {
                return Err(CoreError::log_corruption(format!(
                    "{lsn} belongs to {}, expected {txid}",
                    record.txid()
                )));
            }
            next = record.prev_lsn();

            if let LogRecord::Put {
                db,
                key,
                before,
                after,
                ..
            } = &record
            {
                let db = self.database(*db)?;
                visit(&db, key, before.as_deref(), after);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for EnvShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvShared")
            .field("config", &self.config)
            .field("cache_used", &self.cache_used.load(Ordering::Relaxed))
            .field("txns", &self.txns)
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}

/// An environment: the cache, log, lock table and transaction table shared by
/// a set of databases.
///
/// Cloning an `Environment` yields another handle to the same environment.
///
/// ```rust,ignore
/// use txkv_core::{DbConfig, DuplicatePolicy, EnvConfig, Environment};
///
/// let env = Environment::open(EnvConfig::default())?;
/// let db = env.open_database("data", DbConfig::new().duplicates(DuplicatePolicy::Sorted))?;
///
/// let mut txn = env.begin()?;
/// db.put(&mut txn, b"key 1", &7i32.to_ne_bytes())?;
/// let count = db.count_records(&txn)?;
/// env.commit(&mut txn)?;
///
/// db.close()?;
/// env.close()?;
/// ```
#[derive(Clone)]
pub struct Environment {
    shared: Arc<EnvShared>,
}

impl Environment {
    /// Opens a new environment.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] if the configuration is rejected,
    /// including any request for on-disk logging.
    pub fn open(config: EnvConfig) -> CoreResult<Self> {
        let backend = InMemoryBackend::with_capacity(config.log_buffer_size);
        Self::open_with_log_backend(config, Box::new(backend))
    }

    /// Opens a new environment whose log lives in `backend`.
    ///
    /// The backend's own capacity bounds the log; `log_buffer_size` is only
    /// validated.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] if the configuration is rejected.
    pub fn open_with_log_backend(
        config: EnvConfig,
        backend: Box<dyn StorageBackend>,
    ) -> CoreResult<Self> {
        config.validate()?;

        let stats = Arc::new(EnvStats::new());
        let log = LogManager::new(backend);

        let shared = EnvShared {
            locks: LockManager::new(config.deadlock_policy, Arc::clone(&stats)),
            txns: TransactionManager::new(log, config.max_transactions, Arc::clone(&stats)),
            catalog: RwLock::new(Catalog::default()),
            cache_used: AtomicU64::new(0),
            opener: thread::current().id(),
            is_open: RwLock::new(true),
            stats,
            config,
        };

        info!(
            cache_size = shared.config.cache_size,
            log_buffer_size = shared.config.log_buffer_size,
            deadlock_policy = ?shared.config.deadlock_policy,
            "environment opened"
        );
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// Returns the configuration the environment was opened with.
    #[must_use]
    pub fn config(&self) -> &EnvConfig {
        &self.shared.config
    }

    /// Opens the database `name`, creating it if needed.
    ///
    /// Creation is auto-committed. Opening a name that already exists returns
    /// a handle to the same records.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] if `name` exists with a different
    /// duplicate policy.
    pub fn open_database(&self, name: &str, config: DbConfig) -> CoreResult<Database> {
        self.shared.ensure_open()?;
        self.shared.check_thread()?;

        let mut catalog = self.shared.catalog.write();
        if let Some(existing) = catalog.by_name.get(name) {
            if existing.config != config {
                return Err(CoreError::invalid_config(format!(
                    "database {name} exists with {:?}, requested {:?}",
                    existing.config, config
                )));
            }
            return Ok(Database::new(
                Arc::clone(&self.shared),
                Arc::clone(existing),
            ));
        }

        catalog.next_id += 1;
        let id = DatabaseId::new(catalog.next_id);
        let db = Arc::new(DbShared::new(
            id,
            name.to_string(),
            config,
            self.shared.config.page_capacity,
        ));
        catalog.by_name.insert(name.to_string(), Arc::clone(&db));
        catalog.by_id.insert(id, Arc::clone(&db));
        info!(%id, name, duplicates = ?config.duplicates, "database created");

        Ok(Database::new(Arc::clone(&self.shared), db))
    }

    /// Begins a transaction owned by the calling thread.
    ///
    /// # Errors
    ///
    /// - [`CoreError::EnvironmentClosed`] after [`Environment::close`]
    /// - [`CoreError::NotFreeThreaded`] from a foreign thread when the
    ///   environment is not free-threaded
    /// - [`CoreError::NestedTransaction`] if the thread already owns one
    /// - [`CoreError::TransactionLimit`] if every slot is taken
    pub fn begin(&self) -> CoreResult<Transaction> {
        self.shared.begin()
    }

    /// Commits a transaction, making its puts visible and releasing its
    /// locks.
    pub fn commit(&self, txn: &mut Transaction) -> CoreResult<()> {
        self.shared.commit(txn)
    }

    /// Aborts a transaction, undoing its puts and releasing its locks.
    pub fn abort(&self, txn: &mut Transaction) -> CoreResult<()> {
        self.shared.abort(txn)
    }

    /// Returns the number of active transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.shared.txns.active_count()
    }

    /// Returns the bytes of record data currently charged to the cache.
    #[must_use]
    pub fn cache_used(&self) -> u64 {
        self.shared.cache_used.load(Ordering::Acquire)
    }

    /// Returns the log bytes retained for active transactions.
    pub fn log_retained(&self) -> CoreResult<u64> {
        self.shared.txns.log_retained()
    }

    /// Returns a snapshot of the environment counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Closes the environment.
    ///
    /// Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] while transactions are active.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.shared.is_open.write();
        if !*is_open {
            return Ok(());
        }

        let active = self.shared.txns.active_count();
        if active > 0 {
            return Err(CoreError::invalid_operation(format!(
                "{active} transactions still active"
            )));
        }

        *is_open = false;
        info!(stats = ?self.shared.stats.snapshot(), "environment closed");
        Ok(())
    }

    /// Checks if the environment is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.shared.is_open.read()
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("is_open", &self.is_open())
            .field("active_count", &self.active_count())
            .finish_non_exhaustive()
    }
}
