//! Lock table and blocking acquisition.

use crate::config::DeadlockPolicy;
use crate::error::{CoreError, CoreResult};
use crate::lock::detector::{self, Candidate};
use crate::stats::EnvStats;
use crate::types::{DatabaseId, TransactionId};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Lock strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Shared.
    Read,
    /// Exclusive.
    Write,
}

impl LockMode {
    /// Returns true if a request in this mode cannot share with `held`.
    #[must_use]
    pub fn conflicts_with(self, held: LockMode) -> bool {
        self == Self::Write || held == Self::Write
    }
}

/// Something a transaction can lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockObject {
    /// The page structure of a database. Shared for every access, exclusive
    /// for structural changes.
    Tree(DatabaseId),
    /// The leaf pages holding one key's records.
    Key(DatabaseId, Vec<u8>),
}

#[derive(Debug, Default)]
struct LockEntry {
    holders: HashMap<TransactionId, LockMode>,
}

#[derive(Debug, Default)]
struct Locker {
    held: HashSet<LockObject>,
    write_locks: usize,
    waiting: Option<(LockObject, LockMode)>,
    victim: bool,
}

#[derive(Debug, Default)]
struct LockTable {
    entries: HashMap<LockObject, LockEntry>,
    lockers: HashMap<TransactionId, Locker>,
}

impl LockTable {
    fn try_grant(&mut self, txid: TransactionId, object: &LockObject, mode: LockMode) -> bool {
        let writer_queued = mode == LockMode::Read && !self.queued_writers(txid, object).is_empty();
        let entry = self.entries.entry(object.clone()).or_default();
        match entry.holders.get(&txid) {
            Some(LockMode::Write) => return true,
            Some(LockMode::Read) if mode == LockMode::Read => return true,
            _ => {}
        }

        // New readers queue behind a waiting writer so an upgrade is not
        // starved by readers that keep arriving.
        if writer_queued {
            return false;
        }

        if entry
            .holders
            .iter()
            .any(|(holder, held)| *holder != txid && mode.conflicts_with(*held))
        {
            return false;
        }

        entry.holders.insert(txid, mode);
        let locker = self.lockers.entry(txid).or_default();
        locker.held.insert(object.clone());
        if mode == LockMode::Write {
            locker.write_locks += 1;
        }
        true
    }

    fn queued_writers(&self, txid: TransactionId, object: &LockObject) -> Vec<TransactionId> {
        self.lockers
            .iter()
            .filter(|(waiter, locker)| {
                **waiter != txid
                    && !locker.victim
                    && matches!(&locker.waiting, Some((o, LockMode::Write)) if o == object)
            })
            .map(|(waiter, _)| *waiter)
            .collect()
    }

    fn blockers(&self, txid: TransactionId, object: &LockObject, mode: LockMode) -> Vec<TransactionId> {
        let mut blockers: Vec<TransactionId> = self
            .entries
            .get(object)
            .map(|entry| {
                entry
                    .holders
                    .iter()
                    .filter(|(holder, held)| **holder != txid && mode.conflicts_with(**held))
                    .map(|(holder, _)| *holder)
                    .collect()
            })
            .unwrap_or_default();

        let holds = self
            .entries
            .get(object)
            .is_some_and(|entry| entry.holders.contains_key(&txid));
        if mode == LockMode::Read && !holds {
            blockers.extend(self.queued_writers(txid, object));
        }
        blockers
    }

    /// Transactions `txid` waits on. Marked victims wait on nobody, so a
    /// cycle that already has a victim is not reported twice.
    fn waits_for(&self, txid: TransactionId) -> Vec<TransactionId> {
        match self.lockers.get(&txid) {
            Some(Locker {
                waiting: Some((object, mode)),
                victim: false,
                ..
            }) => self.blockers(txid, object, *mode),
            _ => Vec::new(),
        }
    }

    fn candidates(&self, cycle: &[TransactionId]) -> Vec<Candidate> {
        cycle
            .iter()
            .map(|txid| {
                let (write_locks, locks) = self
                    .lockers
                    .get(txid)
                    .map(|l| (l.write_locks, l.held.len()))
                    .unwrap_or_default();
                Candidate {
                    txid: *txid,
                    write_locks,
                    locks,
                }
            })
            .collect()
    }

    fn start_waiting(&mut self, txid: TransactionId, object: &LockObject, mode: LockMode) {
        self.lockers.entry(txid).or_default().waiting = Some((object.clone(), mode));
    }

    fn stop_waiting(&mut self, txid: TransactionId) {
        if let Some(locker) = self.lockers.get_mut(&txid) {
            locker.waiting = None;
            locker.victim = false;
        }
    }

    fn mark_victim(&mut self, txid: TransactionId) {
        if let Some(locker) = self.lockers.get_mut(&txid) {
            locker.victim = true;
        }
    }

    fn is_victim(&self, txid: TransactionId) -> bool {
        self.lockers.get(&txid).is_some_and(|l| l.victim)
    }

    fn release_all(&mut self, txid: TransactionId) -> usize {
        let Some(locker) = self.lockers.remove(&txid) else {
            return 0;
        };
        for object in &locker.held {
            if let Some(entry) = self.entries.get_mut(object) {
                entry.holders.remove(&txid);
                if entry.holders.is_empty() {
                    self.entries.remove(object);
                }
            }
        }
        locker.held.len()
    }
}

/// Grants and releases locks for transactions.
///
/// Locks are held until [`LockManager::release_all`] (strict two-phase
/// locking). A request that cannot be granted blocks; before every wait the
/// manager searches the waits-for graph and, if the request closes a cycle,
/// fails exactly one member of the cycle with [`CoreError::Deadlock`]
/// according to the environment's [`DeadlockPolicy`].
pub struct LockManager {
    table: Mutex<LockTable>,
    changed: Condvar,
    policy: DeadlockPolicy,
    stats: Arc<EnvStats>,
}

impl LockManager {
    /// Creates a lock manager.
    pub fn new(policy: DeadlockPolicy, stats: Arc<EnvStats>) -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            changed: Condvar::new(),
            policy,
            stats,
        }
    }

    /// Acquires `object` in `mode` for `txid`, blocking while it conflicts.
    ///
    /// Holding a write lock satisfies a read request; holding a read lock and
    /// asking for write is an upgrade.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Deadlock`] if `txid` was chosen to break a
    /// deadlock. Locks already held stay held until the transaction aborts.
    pub fn acquire(&self, txid: TransactionId, object: LockObject, mode: LockMode) -> CoreResult<()> {
        self.stats.record_lock_request();
        let mut table = self.table.lock();
        if table.try_grant(txid, &object, mode) {
            return Ok(());
        }

        self.stats.record_lock_wait();
        debug!(%txid, ?object, ?mode, "waiting for lock");
        table.start_waiting(txid, &object, mode);

        loop {
            if table.is_victim(txid) {
                table.stop_waiting(txid);
                return Err(self.deadlock(txid));
            }
            if table.try_grant(txid, &object, mode) {
                table.stop_waiting(txid);
                return Ok(());
            }

            if let Some(cycle) = detector::find_cycle(txid, |t| table.waits_for(t)) {
                let candidates = table.candidates(&cycle);
                if let Some(victim) = self.policy.select_victim(&candidates) {
                    if victim == txid {
                        table.stop_waiting(txid);
                        return Err(self.deadlock(txid));
                    }
                    debug!(%txid, %victim, "deadlock detected, signalling victim");
                    table.mark_victim(victim);
                    self.changed.notify_all();
                }
            }

            self.changed.wait(&mut table);
        }
    }

    fn deadlock(&self, txid: TransactionId) -> CoreError {
        // Readers queued behind this request may proceed.
        self.changed.notify_all();
        self.stats.record_deadlock();
        debug!(%txid, "transaction chosen as deadlock victim");
        CoreError::deadlock(txid)
    }

    /// Releases every lock held by `txid` and wakes all waiters.
    ///
    /// Returns the number of locks released.
    pub fn release_all(&self, txid: TransactionId) -> usize {
        let released = self.table.lock().release_all(txid);
        self.changed.notify_all();
        released
    }

    /// Returns the number of locks `txid` holds.
    #[must_use]
    pub fn held_by(&self, txid: TransactionId) -> usize {
        self.table
            .lock()
            .lockers
            .get(&txid)
            .map_or(0, |l| l.held.len())
    }

    /// Returns the number of locked objects.
    #[must_use]
    pub fn locked_objects(&self) -> usize {
        self.table.lock().entries.len()
    }

    /// Returns the mode `txid` holds on `object`, if any.
    #[must_use]
    pub fn mode_of(&self, txid: TransactionId, object: &LockObject) -> Option<LockMode> {
        self.table
            .lock()
            .entries
            .get(object)
            .and_then(|entry| entry.holders.get(&txid).copied())
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("policy", &self.policy)
            .field("locked_objects", &self.locked_objects())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn manager() -> LockManager {
        LockManager::new(DeadlockPolicy::MinWrite, Arc::new(EnvStats::new()))
    }

    fn key(name: &str) -> LockObject {
        LockObject::Key(DatabaseId::new(1), name.as_bytes().to_vec())
    }

    fn tree() -> LockObject {
        LockObject::Tree(DatabaseId::new(1))
    }

    fn t(n: u64) -> TransactionId {
        TransactionId::new(n)
    }

    #[test]
    fn readers_share() {
        let locks = manager();
        locks.acquire(t(1), key("a"), LockMode::Read).unwrap();
        locks.acquire(t(2), key("a"), LockMode::Read).unwrap();
        assert_eq!(locks.locked_objects(), 1);
    }

    #[test]
    fn write_satisfies_read_and_upgrade_when_alone() {
        let locks = manager();
        locks.acquire(t(1), tree(), LockMode::Read).unwrap();
        locks.acquire(t(1), tree(), LockMode::Write).unwrap();
        locks.acquire(t(1), tree(), LockMode::Read).unwrap();
        assert_eq!(locks.mode_of(t(1), &tree()), Some(LockMode::Write));
        assert_eq!(locks.held_by(t(1)), 1);
    }

    #[test]
    fn release_all_frees_everything() {
        let locks = manager();
        locks.acquire(t(1), tree(), LockMode::Read).unwrap();
        locks.acquire(t(1), key("a"), LockMode::Write).unwrap();
        assert_eq!(locks.release_all(t(1)), 2);
        assert_eq!(locks.locked_objects(), 0);
        assert_eq!(locks.held_by(t(1)), 0);
    }

    #[test]
    fn writer_blocks_until_release() {
        let locks = Arc::new(manager());
        locks.acquire(t(1), key("a"), LockMode::Write).unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || {
                let result = locks.acquire(t(2), key("a"), LockMode::Read);
                tx.send(()).unwrap();
                result
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        locks.release_all(t(1));
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap().unwrap();
        assert_eq!(locks.mode_of(t(2), &key("a")), Some(LockMode::Read));
    }

    #[test]
    fn new_reader_queues_behind_waiting_upgrade() {
        let locks = Arc::new(manager());
        locks.acquire(t(1), tree(), LockMode::Read).unwrap();
        locks.acquire(t(2), tree(), LockMode::Read).unwrap();

        let (tx, rx) = mpsc::channel();
        let upgrader = {
            let locks = Arc::clone(&locks);
            let tx = tx.clone();
            thread::spawn(move || {
                locks.acquire(t(2), tree(), LockMode::Write).unwrap();
                tx.send(2).unwrap();
            })
        };
        thread::sleep(Duration::from_millis(50));

        let reader = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || {
                locks.acquire(t(3), tree(), LockMode::Read).unwrap();
                tx.send(3).unwrap();
            })
        };
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        locks.release_all(t(1));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 2);
        upgrader.join().unwrap();

        locks.release_all(t(2));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 3);
        reader.join().unwrap();
        assert_eq!(locks.stats.snapshot().deadlocks, 0);
    }

    #[test]
    fn upgrade_cycle_fails_fewest_writes() {
        // t1 holds tree(R) + a(W) and wants tree(W); t2 holds tree(R) and
        // waits on a. MinWrite picks t2 (no write locks).
        let locks = Arc::new(manager());
        locks.acquire(t(1), tree(), LockMode::Read).unwrap();
        locks.acquire(t(1), key("a"), LockMode::Write).unwrap();
        locks.acquire(t(2), tree(), LockMode::Read).unwrap();

        let blocked = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || {
                let result = locks.acquire(t(2), key("a"), LockMode::Write);
                if result.is_err() {
                    locks.release_all(t(2));
                }
                result
            })
        };

        // Give t2 time to start waiting.
        thread::sleep(Duration::from_millis(50));
        locks.acquire(t(1), tree(), LockMode::Write).unwrap();

        let err = blocked.join().unwrap().unwrap_err();
        assert!(matches!(err, CoreError::Deadlock { txid } if txid == t(2)));
        assert_eq!(locks.mode_of(t(1), &tree()), Some(LockMode::Write));
        assert_eq!(locks.stats.snapshot().deadlocks, 1);
    }

    #[test]
    fn requester_can_be_the_victim() {
        // Youngest policy: t2 closes the cycle and is itself the youngest.
        let locks = Arc::new(LockManager::new(
            DeadlockPolicy::Youngest,
            Arc::new(EnvStats::new()),
        ));
        locks.acquire(t(1), key("a"), LockMode::Write).unwrap();
        locks.acquire(t(2), key("b"), LockMode::Write).unwrap();

        let first = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || locks.acquire(t(1), key("b"), LockMode::Write))
        };
        thread::sleep(Duration::from_millis(50));

        let err = locks.acquire(t(2), key("a"), LockMode::Write).unwrap_err();
        assert!(err.is_deadlock());
        locks.release_all(t(2));

        first.join().unwrap().unwrap();
        assert_eq!(locks.mode_of(t(1), &key("b")), Some(LockMode::Write));
    }
}
