//! Transaction state.

use crate::env::EnvShared;
use crate::error::{CoreError, CoreResult};
use crate::types::{Lsn, TransactionId};
use std::sync::Arc;
use std::thread::ThreadId;
use tracing::warn;

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been aborted.
    Aborted,
}

/// A transaction context.
///
/// Obtained from [`crate::Environment::begin`] and owned by the thread that
/// began it. Every active transaction ends in exactly one of
/// [`crate::Environment::commit`] or [`crate::Environment::abort`]; a
/// transaction dropped while still active is aborted.
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    owner: ThreadId,
    first_lsn: Option<Lsn>,
    last_lsn: Option<Lsn>,
    puts: usize,
    pub(crate) env: Arc<EnvShared>,
}

impl Transaction {
    pub(crate) fn new(id: TransactionId, owner: ThreadId, env: Arc<EnvShared>) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            owner,
            first_lsn: None,
            last_lsn: None,
            puts: 0,
            env,
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Returns the thread that began the transaction.
    #[must_use]
    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    /// Returns the number of puts performed so far.
    #[must_use]
    pub fn put_count(&self) -> usize {
        self.puts
    }

    /// Returns the LSN of the transaction's first log record.
    #[must_use]
    pub fn first_lsn(&self) -> Option<Lsn> {
        self.first_lsn
    }

    /// Returns the LSN of the transaction's most recent log record.
    #[must_use]
    pub fn last_lsn(&self) -> Option<Lsn> {
        self.last_lsn
    }

    pub(crate) fn ensure_active(&self) -> CoreResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(CoreError::invalid_operation(format!(
                "{} is not active (state: {:?})",
                self.id, self.state
            )))
        }
    }

    pub(crate) fn belongs_to(&self, env: &Arc<EnvShared>) -> CoreResult<()> {
        if Arc::ptr_eq(&self.env, env) {
            Ok(())
        } else {
            Err(CoreError::invalid_operation(format!(
                "{} belongs to a different environment",
                self.id
            )))
        }
    }

    pub(crate) fn record_put(&mut self, lsn: Lsn) {
        self.first_lsn.get_or_insert(lsn);
        self.last_lsn = Some(lsn);
        self.puts += 1;
    }

    pub(crate) fn mark_committed(&mut self) {
        self.state = TransactionState::Committed;
    }

    pub(crate) fn mark_aborted(&mut self) {
        self.state = TransactionState::Aborted;
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.is_active() {
            warn!(txid = %self.id, "transaction dropped while active, aborting");
            let env = Arc::clone(&self.env);
            if let Err(e) = env.abort(self) {
                warn!(txid = %self.id, error = %e, "abort on drop failed");
            }
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("owner", &self.owner)
            .field("puts", &self.puts)
            .field("last_lsn", &self.last_lsn)
            .finish_non_exhaustive()
    }
}
