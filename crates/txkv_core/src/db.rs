//! Database handles.

use crate::config::DbConfig;
use crate::cursor::Cursor;
use crate::env::EnvShared;
use crate::error::{CoreError, CoreResult};
use crate::lock::{LockMode, LockObject};
use crate::log::LogRecord;
use crate::transaction::Transaction;
use crate::tree::{record_size, RecordTree};
use crate::types::DatabaseId;
use parking_lot::RwLock;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info};

/// Records and metadata of one database, shared by every handle to it.
#[derive(Debug)]
pub(crate) struct DbShared {
    pub(crate) id: DatabaseId,
    pub(crate) name: String,
    pub(crate) config: DbConfig,
    pub(crate) tree: RwLock<RecordTree>,
}

impl DbShared {
    pub(crate) fn new(id: DatabaseId, name: String, config: DbConfig, page_capacity: usize) -> Self {
        Self {
            id,
            name,
            config,
            tree: RwLock::new(RecordTree::new(config.duplicates, page_capacity)),
        }
    }
}

/// A handle to a database.
///
/// Handles are `Send + Sync` and hold no per-operation state, so one handle
/// can be shared by every worker thread. All mutation goes through a
/// [`Transaction`].
pub struct Database {
    env: Arc<EnvShared>,
    shared: Arc<DbShared>,
    is_open: RwLock<bool>,
}

impl Database {
    pub(crate) fn new(env: Arc<EnvShared>, shared: Arc<DbShared>) -> Self {
        Self {
            env,
            shared,
            is_open: RwLock::new(true),
        }
    }

    /// Returns the database ID.
    #[must_use]
    pub fn id(&self) -> DatabaseId {
        self.shared.id
    }

    /// Returns the database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Returns the configuration the database was created with.
    #[must_use]
    pub fn config(&self) -> DbConfig {
        self.shared.config
    }

    /// Inserts `value` under `key` within `txn`.
    ///
    /// Takes the tree lock shared and the key lock exclusive, and upgrades
    /// the tree lock when the insert creates the key or splits a full page.
    /// All locks are held until `txn` ends.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Deadlock`] if `txn` was chosen to break a deadlock; the
    ///   caller must abort it
    /// - [`CoreError::KeyExists`] for an exact duplicate in a sorted database
    /// - [`CoreError::CacheFull`] or [`CoreError::LogFull`] when out of space
    pub fn put(&self, txn: &mut Transaction, key: &[u8], value: &[u8]) -> CoreResult<()> {
        self.ensure_usable()?;
        txn.ensure_active()?;
        txn.belongs_to(&self.env)?;

        let txid = txn.id();
        let id = self.shared.id;
        let locks = &self.env.locks;
        locks.acquire(txid, LockObject::Tree(id), LockMode::Read)?;
        locks.acquire(txid, LockObject::Key(id, key.to_vec()), LockMode::Write)?;

        // The key lock keeps this group stable until the insert below.
        let (structural, before) = {
            let tree = self.shared.tree.read();
            tree.check_insert(key, value)?;
            (tree.is_structural(key), tree.replaced_value(key))
        };
        if structural {
            locks.acquire(txid, LockObject::Tree(id), LockMode::Write)?;
        }

        let size = record_size(key, value);
        self.env.reserve_cache(size)?;

        let record = LogRecord::Put {
            txid,
            prev_lsn: txn.last_lsn(),
            db: id,
            key: key.to_vec(),
            before: before.clone(),
            after: value.to_vec(),
        };
        let lsn = match self.env.txns.log(&record) {
            Ok(lsn) => lsn,
            Err(e) => {
                self.env.release_cache(size);
                return Err(e);
            }
        };

        self.shared.tree.write().insert(key, value, txid);
        if let Some(before) = &before {
            self.env.release_cache(record_size(key, before));
        }
        txn.record_put(lsn);

        self.env.stats.record_put();
        if structural {
            self.env.stats.record_structural_change();
        }
        Ok(())
    }

    /// Returns every value stored under `key`, as seen by `txn`.
    pub fn get(&self, txn: &Transaction, key: &[u8]) -> CoreResult<Vec<Vec<u8>>> {
        self.ensure_usable()?;
        txn.ensure_active()?;
        txn.belongs_to(&self.env)?;

        let txid = txn.id();
        let id = self.shared.id;
        self.env
            .locks
            .acquire(txid, LockObject::Tree(id), LockMode::Read)?;
        self.env
            .locks
            .acquire(txid, LockObject::Key(id, key.to_vec()), LockMode::Read)?;
        Ok(self.shared.tree.read().values(key))
    }

    /// Opens a locking cursor owned by `txn`.
    ///
    /// The cursor sees `txn`'s own pending puts and blocks on other
    /// transactions' pending puts.
    pub fn cursor<'a>(&'a self, txn: &'a Transaction) -> CoreResult<Cursor<'a>> {
        self.ensure_usable()?;
        txn.ensure_active()?;
        txn.belongs_to(&self.env)?;
        Ok(Cursor::new(self, Some(txn)))
    }

    /// Opens a cursor that takes no locks and sees every stored record,
    /// including other transactions' pending puts.
    pub fn cursor_uncommitted(&self) -> CoreResult<Cursor<'_>> {
        self.ensure_usable()?;
        Ok(Cursor::new(self, None))
    }

    /// Counts every record visible to `txn`, walking a cursor first to last.
    pub fn count_records(&self, txn: &Transaction) -> CoreResult<usize> {
        let cursor = self.cursor(txn)?;
        Self::drain(cursor)
    }

    /// Counts every stored record without locking.
    pub fn count_uncommitted(&self) -> CoreResult<usize> {
        let cursor = self.cursor_uncommitted()?;
        Self::drain(cursor)
    }

    /// Counts committed records in a transaction of its own, committed on
    /// success.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SelfDeadlock`] if the calling thread owns an
    /// active transaction: the scan would wait on that transaction's locks
    /// forever. Returns [`CoreError::Deadlock`] if the scan's own transaction
    /// was chosen as a victim; it has already been aborted.
    pub fn count_committed(&self) -> CoreResult<usize> {
        self.ensure_usable()?;
        if let Some(active) = self.env.txns.owned_by(thread::current().id()) {
            return Err(CoreError::SelfDeadlock { active });
        }

        let mut txn = self.env.begin()?;
        match self.count_records(&txn) {
            Ok(count) => {
                self.env.commit(&mut txn)?;
                Ok(count)
            }
            Err(e) => {
                self.env.abort(&mut txn)?;
                Err(e)
            }
        }
    }

    fn drain(mut cursor: Cursor<'_>) -> CoreResult<usize> {
        let mut count = 0;
        while cursor.next()?.is_some() {
            count += 1;
        }
        cursor.close()?;
        Ok(count)
    }

    /// Returns the number of leaf pages.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.shared.tree.read().pages()
    }

    /// Closes this handle.
    ///
    /// Records stay in the environment; closing twice is a no-op.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }
        *is_open = false;
        info!(id = %self.shared.id, name = %self.shared.name, "database closed");
        Ok(())
    }

    /// Checks if the handle is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    pub(crate) fn ensure_usable(&self) -> CoreResult<()> {
        if !*self.is_open.read() {
            return Err(CoreError::DatabaseClosed {
                name: self.shared.name.clone(),
            });
        }
        self.env.ensure_open()?;
        self.env.check_thread()
    }

    pub(crate) fn shared(&self) -> &DbShared {
        &self.shared
    }

    pub(crate) fn env(&self) -> &EnvShared {
        &self.env
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tree = self.shared.tree.read();
        f.debug_struct("Database")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("is_open", &self.is_open())
            .field("records", &tree.len())
            .field("committed", &tree.committed_len())
            .finish_non_exhaustive()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if self.is_open() {
            debug!(name = %self.shared.name, "database handle dropped without close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DuplicatePolicy, EnvConfig};
    use crate::Environment;

    fn setup(duplicates: DuplicatePolicy) -> (Environment, Database) {
        let env = Environment::open(EnvConfig::default()).unwrap();
        let db = env
            .open_database("test", DbConfig::new().duplicates(duplicates))
            .unwrap();
        (env, db)
    }

    #[test]
    fn read_your_own_writes() {
        let (env, db) = setup(DuplicatePolicy::Sorted);
        let mut txn = env.begin().unwrap();
        for i in 0..10i32 {
            db.put(&mut txn, format!("key {}", i + 1).as_bytes(), &i.to_ne_bytes())
                .unwrap();
        }
        assert_eq!(db.count_records(&txn).unwrap(), 10);
        env.commit(&mut txn).unwrap();
        assert_eq!(db.count_committed().unwrap(), 10);
    }

    #[test]
    fn abort_rolls_back_every_put() {
        let (env, db) = setup(DuplicatePolicy::Sorted);
        let mut txn = env.begin().unwrap();
        db.put(&mut txn, b"key 1", b"a").unwrap();
        env.commit(&mut txn).unwrap();

        let mut txn = env.begin().unwrap();
        db.put(&mut txn, b"key 1", b"b").unwrap();
        db.put(&mut txn, b"key 2", b"c").unwrap();
        assert_eq!(db.count_records(&txn).unwrap(), 3);
        env.abort(&mut txn).unwrap();

        assert_eq!(db.count_committed().unwrap(), 1);
        assert_eq!(env.cache_used(), record_size(b"key 1", b"a"));
    }

    #[test]
    fn overwrite_restores_before_image_on_abort() {
        let (env, db) = setup(DuplicatePolicy::None);
        let mut txn = env.begin().unwrap();
        db.put(&mut txn, b"k", b"old").unwrap();
        env.commit(&mut txn).unwrap();

        let mut txn = env.begin().unwrap();
        db.put(&mut txn, b"k", b"new").unwrap();
        db.put(&mut txn, b"k", b"newer").unwrap();
        assert_eq!(db.get(&txn, b"k").unwrap(), vec![b"newer".to_vec()]);
        env.abort(&mut txn).unwrap();

        let txn = env.begin().unwrap();
        assert_eq!(db.get(&txn, b"k").unwrap(), vec![b"old".to_vec()]);
    }

    #[test]
    fn exact_sorted_duplicate_is_rejected() {
        let (env, db) = setup(DuplicatePolicy::Sorted);
        let mut txn = env.begin().unwrap();
        db.put(&mut txn, b"k", b"v").unwrap();
        assert!(matches!(
            db.put(&mut txn, b"k", b"v"),
            Err(CoreError::KeyExists)
        ));
        assert!(txn.is_active());
        assert_eq!(txn.put_count(), 1);
    }

    #[test]
    fn unsorted_duplicates_split_pages() {
        let env = Environment::open(EnvConfig::new().page_capacity(2)).unwrap();
        let db = env
            .open_database("test", DbConfig::new().duplicates(DuplicatePolicy::Unsorted))
            .unwrap();
        let mut txn = env.begin().unwrap();
        for _ in 0..5 {
            db.put(&mut txn, b"k", b"v").unwrap();
        }
        env.commit(&mut txn).unwrap();

        assert_eq!(db.page_count(), 3);
        // Create plus two splits.
        assert_eq!(env.stats().structural_changes, 3);
    }

    #[test]
    fn cache_full_is_an_operation_error() {
        let env = Environment::open(EnvConfig::new().cache_size(40)).unwrap();
        let db = env.open_database("test", DbConfig::default()).unwrap();
        let mut txn = env.begin().unwrap();
        db.put(&mut txn, b"key 1", &[0; 4]).unwrap();

        let err = db.put(&mut txn, b"key 2", &[0; 4]).unwrap_err();
        assert!(matches!(err, CoreError::CacheFull { .. }));
        assert!(!err.is_deadlock());
    }

    #[test]
    fn log_full_leaves_transaction_abortable() {
        let env = Environment::open(EnvConfig::new().log_buffer_size(4096)).unwrap();
        let db = env
            .open_database("test", DbConfig::new().duplicates(DuplicatePolicy::Unsorted))
            .unwrap();
        let mut txn = env.begin().unwrap();
        let err = loop {
            if let Err(e) = db.put(&mut txn, b"key", &[7; 64]) {
                break e;
            }
        };
        assert!(matches!(err, CoreError::LogFull { .. }));

        env.abort(&mut txn).unwrap();
        assert_eq!(db.count_uncommitted().unwrap(), 0);
        assert_eq!(env.cache_used(), 0);
    }

    #[test]
    fn count_committed_detects_self_deadlock() {
        let (env, db) = setup(DuplicatePolicy::Sorted);
        let mut txn = env.begin().unwrap();
        db.put(&mut txn, b"k", b"v").unwrap();

        let err = db.count_committed().unwrap_err();
        assert!(matches!(err, CoreError::SelfDeadlock { active } if active == txn.id()));
        env.commit(&mut txn).unwrap();
    }

    #[test]
    fn uncommitted_count_sees_pending_puts() {
        let (env, db) = setup(DuplicatePolicy::Sorted);
        let mut txn = env.begin().unwrap();
        db.put(&mut txn, b"k", b"v").unwrap();

        let seen = thread::scope(|s| s.spawn(|| db.count_uncommitted()).join().unwrap());
        assert_eq!(seen.unwrap(), 1);
        env.abort(&mut txn).unwrap();
    }

    #[test]
    fn closed_handle_rejects_operations() {
        let (env, db) = setup(DuplicatePolicy::Sorted);
        db.close().unwrap();
        db.close().unwrap();

        let mut txn = env.begin().unwrap();
        assert!(matches!(
            db.put(&mut txn, b"k", b"v"),
            Err(CoreError::DatabaseClosed { .. })
        ));
        env.abort(&mut txn).unwrap();
    }

    #[test]
    fn crossed_puts_fail_the_younger_transaction() {
        let (env, db) = setup(DuplicatePolicy::Sorted);
        let mut txn = env.begin().unwrap();
        db.put(&mut txn, b"a", b"0").unwrap();
        db.put(&mut txn, b"b", b"0").unwrap();
        env.commit(&mut txn).unwrap();

        let both_hold_one = std::sync::Barrier::new(2);
        let run = |first: &'static [u8], second: &'static [u8]| {
            let mut txn = env.begin().unwrap();
            let id = txn.id();
            db.put(&mut txn, first, b"1").unwrap();
            both_hold_one.wait();
            match db.put(&mut txn, second, b"1") {
                Ok(()) => env.commit(&mut txn).map(|()| id),
                Err(e) => {
                    env.abort(&mut txn).unwrap();
                    Err(e)
                }
            }
        };
        let (older, younger) = thread::scope(|s| {
            let older = s.spawn(|| run(b"a", b"b"));
            // Begin order decides age.
            thread::sleep(std::time::Duration::from_millis(20));
            let younger = s.spawn(|| run(b"b", b"a"));
            (older.join().unwrap(), younger.join().unwrap())
        });

        assert!(older.is_ok());
        assert!(matches!(younger, Err(CoreError::Deadlock { .. })));
        assert_eq!(env.stats().deadlocks, 1);
        assert_eq!(db.count_committed().unwrap(), 4);
    }

    #[test]
    fn handle_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Database>();
    }
}
