//! Fault injection for the writer workload.
//!
//! [`FaultInjectingStore`] wraps any [`KvStore`] and fails a chosen
//! operation. Injected conflicts are indistinguishable from deadlocks the
//! engine reports, so they drive the retry loop exactly like real ones.

use parking_lot::Mutex;
use txkv_core::{CoreError, CoreResult, TransactionId};
use txkv_workload::KvStore;

/// Where a fault is injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    /// `begin`.
    Begin,
    /// The nth put of a transaction, counting from 1.
    Put(usize),
    /// Any record count.
    Count,
    /// `commit`, before the inner store commits.
    Commit,
    /// `abort`, after the inner store aborted.
    Abort,
}

/// What an injected fault looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The transaction was chosen as a deadlock victim.
    Conflict,
    /// The cache is out of space.
    CacheFull,
    /// Too many active transactions.
    TransactionLimit,
}

impl FaultKind {
    fn error(self, txid: TransactionId) -> CoreError {
        match self {
            Self::Conflict => CoreError::deadlock(txid),
            Self::CacheFull => CoreError::CacheFull {
                requested: 0,
                available: 0,
            },
            Self::TransactionLimit => CoreError::TransactionLimit { max: 0 },
        }
    }
}

/// When and how to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultPlan {
    /// Operation to fail.
    pub point: FaultPoint,
    /// Error to return.
    pub kind: FaultKind,
    /// Matching calls to let through before the first fault.
    pub skip: u32,
    /// Faults to inject; `None` fails every matching call.
    pub times: Option<u32>,
}

impl FaultPlan {
    /// Conflicts at `point` on every call.
    #[must_use]
    pub const fn always(point: FaultPoint) -> Self {
        Self {
            point,
            kind: FaultKind::Conflict,
            skip: 0,
            times: None,
        }
    }

    /// Conflicts at `point` on the first `times` calls.
    #[must_use]
    pub const fn times(point: FaultPoint, times: u32) -> Self {
        Self {
            point,
            kind: FaultKind::Conflict,
            skip: 0,
            times: Some(times),
        }
    }

    /// Sets the injected error.
    #[must_use]
    pub const fn kind(mut self, kind: FaultKind) -> Self {
        self.kind = kind;
        self
    }

    /// Lets the first `skip` matching calls through.
    #[must_use]
    pub const fn after(mut self, skip: u32) -> Self {
        self.skip = skip;
        self
    }
}

#[derive(Debug, Default)]
struct Counters {
    seen: u32,
    injected: u32,
}

/// Transaction of a [`FaultInjectingStore`].
#[derive(Debug)]
pub struct FaultTxn<T> {
    inner: T,
    puts: usize,
}

impl<T> FaultTxn<T> {
    /// Returns the wrapped transaction.
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

/// A store that fails according to a [`FaultPlan`].
#[derive(Debug)]
pub struct FaultInjectingStore<S> {
    inner: S,
    plan: FaultPlan,
    counters: Mutex<Counters>,
}

impl<S: KvStore> FaultInjectingStore<S> {
    /// Wraps `inner`.
    pub fn new(inner: S, plan: FaultPlan) -> Self {
        Self {
            inner,
            plan,
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns the number of faults injected so far.
    pub fn injected(&self) -> u32 {
        self.counters.lock().injected
    }

    fn fault(&self, point: FaultPoint, txid: TransactionId) -> CoreResult<()> {
        if point != self.plan.point {
            return Ok(());
        }
        let mut counters = self.counters.lock();
        counters.seen += 1;
        if counters.seen <= self.plan.skip {
            return Ok(());
        }
        match self.plan.times {
            Some(times) if counters.injected >= times => Ok(()),
            _ => {
                counters.injected += 1;
                Err(self.plan.kind.error(txid))
            }
        }
    }
}

impl<S: KvStore> KvStore for FaultInjectingStore<S> {
    type Txn = FaultTxn<S::Txn>;

    fn begin(&self) -> CoreResult<Self::Txn> {
        self.fault(FaultPoint::Begin, TransactionId::new(0))?;
        Ok(FaultTxn {
            inner: self.inner.begin()?,
            puts: 0,
        })
    }

    fn transaction_id(&self, txn: &Self::Txn) -> TransactionId {
        self.inner.transaction_id(&txn.inner)
    }

    fn put(&self, txn: &mut Self::Txn, key: &[u8], value: &[u8]) -> CoreResult<()> {
        txn.puts += 1;
        self.fault(FaultPoint::Put(txn.puts), self.transaction_id(txn))?;
        self.inner.put(&mut txn.inner, key, value)
    }

    fn count_records(&self, txn: &Self::Txn) -> CoreResult<usize> {
        self.fault(FaultPoint::Count, self.transaction_id(txn))?;
        self.inner.count_records(&txn.inner)
    }

    fn count_uncommitted(&self) -> CoreResult<usize> {
        self.fault(FaultPoint::Count, TransactionId::new(0))?;
        self.inner.count_uncommitted()
    }

    fn count_committed(&self) -> CoreResult<usize> {
        self.fault(FaultPoint::Count, TransactionId::new(0))?;
        self.inner.count_committed()
    }

    fn commit(&self, txn: &mut Self::Txn) -> CoreResult<()> {
        self.fault(FaultPoint::Commit, self.transaction_id(txn))?;
        self.inner.commit(&mut txn.inner)
    }

    fn abort(&self, txn: &mut Self::Txn) -> CoreResult<()> {
        self.inner.abort(&mut txn.inner)?;
        self.fault(FaultPoint::Abort, self.transaction_id(txn))
    }
}
