//! The store seam used by writers.
//!
//! Writers only need begin, put, count, commit and abort. [`KvStore`] names
//! exactly those, so the retry loop and the worker can run against the real
//! engine ([`EngineStore`]) or a wrapper that injects faults.

use crate::error::{WorkloadError, WorkloadResult};
use tracing::{error, info};
use txkv_core::{
    CoreResult, Database, DbConfig, DuplicatePolicy, EnvConfig, Environment, Transaction,
    TransactionId,
};

/// Transactional key-value operations a writer performs.
///
/// Implementations are shared by every worker thread.
pub trait KvStore: Sync {
    /// Transaction context type.
    type Txn;

    /// Begins a transaction owned by the calling thread.
    fn begin(&self) -> CoreResult<Self::Txn>;

    /// Returns the identity of `txn`.
    fn transaction_id(&self, txn: &Self::Txn) -> TransactionId;

    /// Inserts `value` under `key`.
    fn put(&self, txn: &mut Self::Txn, key: &[u8], value: &[u8]) -> CoreResult<()>;

    /// Counts records through `txn`.
    fn count_records(&self, txn: &Self::Txn) -> CoreResult<usize>;

    /// Counts every stored record without locking.
    fn count_uncommitted(&self) -> CoreResult<usize>;

    /// Counts committed records in a transaction of the store's own.
    fn count_committed(&self) -> CoreResult<usize>;

    /// Commits `txn`.
    fn commit(&self, txn: &mut Self::Txn) -> CoreResult<()>;

    /// Aborts `txn`.
    fn abort(&self, txn: &mut Self::Txn) -> CoreResult<()>;
}

/// An environment and the one database the writers share.
#[derive(Debug)]
pub struct EngineStore {
    env: Environment,
    db: Database,
}

impl EngineStore {
    /// Opens an environment and the sorted-duplicate database `name`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkloadError::Initialization`] naming the step that failed.
    pub fn open(config: EnvConfig, name: &str) -> WorkloadResult<Self> {
        let env = Environment::open(config).map_err(|source| WorkloadError::Initialization {
            stage: "environment",
            source,
        })?;
        let db = env
            .open_database(name, DbConfig::new().duplicates(DuplicatePolicy::Sorted))
            .map_err(|source| WorkloadError::Initialization {
                stage: "database",
                source,
            })?;
        info!(database = name, "store opened");
        Ok(Self { env, db })
    }

    /// Returns the environment.
    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Returns the database.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Closes the database, then the environment.
    ///
    /// Both closes are attempted even if the first fails; every failure is
    /// logged and the first one is returned.
    pub fn close(&self) -> WorkloadResult<()> {
        let db = self
            .db
            .close()
            .map_err(|source| WorkloadError::Teardown {
                handle: "database",
                source,
            });
        let env = self
            .env
            .close()
            .map_err(|source| WorkloadError::Teardown {
                handle: "environment",
                source,
            });

        for err in [&db, &env].into_iter().filter_map(|r| r.as_ref().err()) {
            error!(error = %err, "teardown failed");
        }
        db.and(env)
    }
}

impl KvStore for EngineStore {
    type Txn = Transaction;

    fn begin(&self) -> CoreResult<Transaction> {
        self.env.begin()
    }

    fn transaction_id(&self, txn: &Transaction) -> TransactionId {
        txn.id()
    }

    fn put(&self, txn: &mut Transaction, key: &[u8], value: &[u8]) -> CoreResult<()> {
        self.db.put(txn, key, value)
    }

    fn count_records(&self, txn: &Transaction) -> CoreResult<usize> {
        self.db.count_records(txn)
    }

    fn count_uncommitted(&self) -> CoreResult<usize> {
        self.db.count_uncommitted()
    }

    fn count_committed(&self) -> CoreResult<usize> {
        self.db.count_committed()
    }

    fn commit(&self, txn: &mut Transaction) -> CoreResult<()> {
        self.env.commit(txn)
    }

    fn abort(&self, txn: &mut Transaction) -> CoreResult<()> {
        self.env.abort(txn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use txkv_core::CoreError;

    #[test]
    fn open_reports_the_failing_stage() {
        let err = EngineStore::open(EnvConfig::new().log_in_memory(false), "db").unwrap_err();
        assert!(matches!(
            err,
            WorkloadError::Initialization {
                stage: "environment",
                source: CoreError::InvalidConfig { .. }
            }
        ));
    }

    #[test]
    fn close_attempts_both_handles() {
        let store = EngineStore::open(EnvConfig::default(), "db").unwrap();
        let mut txn = store.begin().unwrap();

        let err = store.close().unwrap_err();
        assert!(matches!(
            err,
            WorkloadError::Teardown {
                handle: "environment",
                ..
            }
        ));
        assert!(!store.database().is_open());

        store.abort(&mut txn).unwrap();
        store.close().unwrap();
    }
}
