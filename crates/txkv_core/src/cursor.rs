//! Cursors over a database's records.

use crate::db::Database;
use crate::error::{CoreError, CoreResult};
use crate::lock::{LockMode, LockObject};
use crate::transaction::Transaction;

/// Walks records first to last: keys in byte order, duplicates in stored
/// order.
///
/// A locking cursor takes the tree lock shared on its first step and each
/// key's lock shared as it enters that key; the locks belong to the owning
/// transaction and outlive the cursor. An uncommitted cursor takes no locks.
///
/// A cursor is released exactly once, by [`Cursor::close`] or on drop.
pub struct Cursor<'a> {
    db: &'a Database,
    txn: Option<&'a Transaction>,
    key: Option<Vec<u8>>,
    index: usize,
    started: bool,
    closed: bool,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(db: &'a Database, txn: Option<&'a Transaction>) -> Self {
        db.env().stats.record_cursor_open();
        Self {
            db,
            txn,
            key: None,
            index: 0,
            started: false,
            closed: false,
        }
    }

    /// Returns the next record, or `None` past the last one.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Deadlock`] if a lock wait made the owning
    /// transaction a deadlock victim.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> CoreResult<Option<(Vec<u8>, Vec<u8>)>> {
        if self.closed {
            return Err(CoreError::invalid_operation("cursor is closed"));
        }
        self.db.ensure_usable()?;
        if let Some(txn) = self.txn {
            txn.ensure_active()?;
        }

        let id = self.db.id();
        if !self.started {
            self.lock(LockObject::Tree(id))?;
            self.started = true;
            self.key = self.enter_after(None)?;
        }

        while let Some(key) = self.key.take() {
            let value = self.db.shared().tree.read().value_at(&key, self.index);
            match value {
                Some(value) => {
                    self.index += 1;
                    let record = (key.clone(), value);
                    self.key = Some(key);
                    return Ok(Some(record));
                }
                None => self.key = self.enter_after(Some(&key))?,
            }
        }
        Ok(None)
    }

    /// Moves to the first key after `key` and locks it.
    fn enter_after(&mut self, key: Option<&[u8]>) -> CoreResult<Option<Vec<u8>>> {
        let next = self.db.shared().tree.read().key_after(key);
        if let Some(next) = &next {
            self.lock(LockObject::Key(self.db.id(), next.clone()))?;
        }
        self.index = 0;
        Ok(next)
    }

    fn lock(&self, object: LockObject) -> CoreResult<()> {
        match self.txn {
            Some(txn) => self.db.env().locks.acquire(txn.id(), object, LockMode::Read),
            None => Ok(()),
        }
    }

    /// Closes the cursor.
    pub fn close(mut self) -> CoreResult<()> {
        self.release();
        Ok(())
    }

    /// Returns true if the cursor takes locks.
    #[must_use]
    pub fn is_locking(&self) -> bool {
        self.txn.is_some()
    }

    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.db.env().stats.record_cursor_close();
        }
    }
}

impl Drop for Cursor<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("db", &self.db.id())
            .field("txid", &self.txn.map(Transaction::id))
            .field("index", &self.index)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{DbConfig, DuplicatePolicy, EnvConfig};
    use crate::error::CoreError;
    use crate::Environment;

    #[test]
    fn walks_keys_then_duplicates() {
        let env = Environment::open(EnvConfig::default()).unwrap();
        let db = env
            .open_database("test", DbConfig::new().duplicates(DuplicatePolicy::Sorted))
            .unwrap();
        let mut txn = env.begin().unwrap();
        db.put(&mut txn, b"b", b"2").unwrap();
        db.put(&mut txn, b"a", b"9").unwrap();
        db.put(&mut txn, b"b", b"1").unwrap();

        let mut cursor = db.cursor(&txn).unwrap();
        let mut seen = Vec::new();
        while let Some((k, v)) = cursor.next().unwrap() {
            seen.push((k, v));
        }
        assert_eq!(
            seen,
            vec![
                (b"a".to_vec(), b"9".to_vec()),
                (b"b".to_vec(), b"1".to_vec()),
                (b"b".to_vec(), b"2".to_vec()),
            ]
        );
        assert_eq!(cursor.next().unwrap(), None);
        cursor.close().unwrap();
    }

    #[test]
    fn every_cursor_is_released_once() {
        let env = Environment::open(EnvConfig::default()).unwrap();
        let db = env.open_database("test", DbConfig::default()).unwrap();
        let txn = env.begin().unwrap();

        let explicit = db.cursor(&txn).unwrap();
        explicit.close().unwrap();
        {
            let mut dropped = db.cursor(&txn).unwrap();
            assert_eq!(dropped.next().unwrap(), None);
        }
        db.count_records(&txn).unwrap();

        let stats = env.stats();
        assert_eq!(stats.cursors_opened, 3);
        assert_eq!(stats.open_cursors(), 0);
    }

    #[test]
    fn cursor_fails_after_transaction_ends() {
        let env = Environment::open(EnvConfig::default()).unwrap();
        let db = env.open_database("test", DbConfig::default()).unwrap();
        let mut txn = env.begin().unwrap();
        env.commit(&mut txn).unwrap();

        assert!(matches!(
            db.cursor(&txn),
            Err(CoreError::InvalidOperation { .. })
        ));
    }
}
