//! Environment statistics.
//!
//! Counters are atomic and may be read while transactions are in flight.
//!
//! ```rust,ignore
//! let env = Environment::open(EnvConfig::default())?;
//! // ... run transactions ...
//! let stats = env.stats();
//! println!("deadlocks: {}", stats.deadlocks);
//! println!("cursors still open: {}", stats.open_cursors());
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Environment counters.
///
/// Values only grow; gauges are derived in [`StatsSnapshot`].
#[derive(Debug, Default)]
pub struct EnvStats {
    // Transaction counters
    transactions_started: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_aborted: AtomicU64,

    // Operation counters
    puts: AtomicU64,
    structural_changes: AtomicU64,
    cursors_opened: AtomicU64,
    cursors_closed: AtomicU64,
    log_records: AtomicU64,

    // Lock counters
    lock_requests: AtomicU64,
    lock_waits: AtomicU64,
    deadlocks: AtomicU64,
}

impl EnvStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_transaction_start(&self) {
        self.transactions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_abort(&self) {
        self.transactions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_structural_change(&self) {
        self.structural_changes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cursor_open(&self) {
        self.cursors_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cursor_close(&self) {
        self.cursors_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_log_append(&self) {
        self.log_records.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lock_request(&self) {
        self.lock_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lock_wait(&self) {
        self.lock_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deadlock(&self) {
        self.deadlocks.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            transactions_started: self.transactions_started.load(Ordering::Relaxed),
            transactions_committed: self.transactions_committed.load(Ordering::Relaxed),
            transactions_aborted: self.transactions_aborted.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            structural_changes: self.structural_changes.load(Ordering::Relaxed),
            cursors_opened: self.cursors_opened.load(Ordering::Relaxed),
            cursors_closed: self.cursors_closed.load(Ordering::Relaxed),
            log_records: self.log_records.load(Ordering::Relaxed),
            lock_requests: self.lock_requests.load(Ordering::Relaxed),
            lock_waits: self.lock_waits.load(Ordering::Relaxed),
            deadlocks: self.deadlocks.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of environment statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Transactions started.
    pub transactions_started: u64,
    /// Transactions committed.
    pub transactions_committed: u64,
    /// Transactions aborted.
    pub transactions_aborted: u64,
    /// Successful puts.
    pub puts: u64,
    /// Puts that created a key group or split a page.
    pub structural_changes: u64,
    /// Cursors opened.
    pub cursors_opened: u64,
    /// Cursors closed.
    pub cursors_closed: u64,
    /// Records appended to the log.
    pub log_records: u64,
    /// Lock requests.
    pub lock_requests: u64,
    /// Lock requests that had to wait.
    pub lock_waits: u64,
    /// Transactions failed to break a deadlock.
    pub deadlocks: u64,
}

impl StatsSnapshot {
    /// Returns the number of cursors not yet closed.
    #[must_use]
    pub fn open_cursors(&self) -> u64 {
        self.cursors_opened.saturating_sub(self.cursors_closed)
    }

    /// Returns the number of transactions not yet resolved.
    #[must_use]
    pub fn unresolved_transactions(&self) -> u64 {
        self.transactions_started
            .saturating_sub(self.transactions_committed + self.transactions_aborted)
    }
}
