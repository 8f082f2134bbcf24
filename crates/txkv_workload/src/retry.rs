//! Deadlock-aware retry of a unit of work.
//!
//! A unit runs inside one transaction. A lock conflict anywhere in the unit,
//! commit included, aborts the transaction and restarts the unit from a
//! fresh `begin`, up to the retry cap. Any other failure is fatal.
//!
//! ```text
//! Trying   --ops + commit ok------------------> DoneOk
//! Trying   --lock conflict--------------------> Aborting
//! Trying   --other error----------------------> DoneFatal
//! Aborting --aborted, retries < max-----------> Trying (retries + 1)
//! Aborting --aborted, retries >= max----------> DoneGiveUp
//! Aborting --abort failed---------------------> DoneFatal
//! ```

use crate::error::{WorkloadError, WorkloadResult};
use crate::store::KvStore;
use tracing::warn;

/// State of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    /// Running the unit's operations in a transaction.
    Trying,
    /// Aborting after a lock conflict.
    Aborting,
    /// Committed.
    DoneOk,
    /// Abandoned after exhausting the retry cap.
    DoneGiveUp,
    /// Stopped by a non-retryable error.
    DoneFatal,
}

/// What happened while in a [`UnitState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitEvent {
    /// Every operation and the commit succeeded.
    Completed,
    /// An operation or the commit hit a lock conflict.
    Conflict,
    /// An operation or the commit failed for another reason.
    Failed,
    /// The conflicting transaction was aborted.
    Aborted,
    /// Aborting the conflicting transaction failed.
    AbortFailed,
}

impl UnitEvent {
    /// Classifies the error that ended an attempt.
    #[must_use]
    pub fn from_error(error: &WorkloadError) -> Self {
        if error.is_conflict() {
            Self::Conflict
        } else {
            Self::Failed
        }
    }
}

impl UnitState {
    /// Returns the state after `event`.
    ///
    /// `retries` is the number of retries already spent on the unit. Done
    /// states are final, and an event that cannot occur in a state leaves it
    /// unchanged.
    #[must_use]
    pub fn next(self, event: UnitEvent, retries: u32, max_retries: u32) -> Self {
        match (self, event) {
            (Self::Trying, UnitEvent::Completed) => Self::DoneOk,
            (Self::Trying, UnitEvent::Conflict) => Self::Aborting,
            (Self::Trying, UnitEvent::Failed) => Self::DoneFatal,
            (Self::Aborting, UnitEvent::Aborted) if retries < max_retries => Self::Trying,
            (Self::Aborting, UnitEvent::Aborted) => Self::DoneGiveUp,
            (Self::Aborting, UnitEvent::AbortFailed) => Self::DoneFatal,
            (state, _) => state,
        }
    }

    /// Returns true for the three done states.
    #[must_use]
    pub fn is_done(self) -> bool {
        matches!(self, Self::DoneOk | Self::DoneGiveUp | Self::DoneFatal)
    }
}

/// Retry cap for units of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Lock conflicts tolerated per unit.
    pub max_retries: u32,
}

impl RetryPolicy {
    /// Creates a policy allowing `max_retries` retries per unit.
    #[must_use]
    pub const fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_RETRIES)
    }
}

/// Receives retry-loop events. Every method defaults to doing nothing.
pub trait RetryObserver {
    /// A lock conflict ended an attempt; `retries` were spent before it.
    fn on_conflict(&self, _retries: u32, _error: &WorkloadError) {}

    /// The unit restarts; `retries` now includes this retry.
    fn on_retry(&self, _retries: u32) {}

    /// The unit was abandoned after `retries` retries.
    fn on_give_up(&self, _retries: u32) {}
}

impl RetryObserver for () {}

/// Result of a committed unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOutcome<T> {
    /// What the unit's body returned.
    pub value: T,
    /// Retries spent before the successful attempt.
    pub retries: u32,
}

/// Runs `body` in a transaction and commits, retrying on lock conflicts.
///
/// Each attempt begins a fresh transaction. On a conflict the transaction is
/// aborted before anything else happens.
///
/// # Errors
///
/// - [`WorkloadError::Begin`] if a transaction cannot be started
/// - [`WorkloadError::RetryExhausted`] after `max_retries` retries
/// - [`WorkloadError::Abort`] if aborting after a conflict fails
/// - the body's or commit's own error for anything not a conflict
pub fn run_unit<S, T, F>(
    store: &S,
    policy: RetryPolicy,
    observer: &dyn RetryObserver,
    mut body: F,
) -> WorkloadResult<UnitOutcome<T>>
where
    S: KvStore,
    F: FnMut(&S, &mut S::Txn) -> WorkloadResult<T>,
{
    let mut retries = 0;
    loop {
        let mut txn = store.begin().map_err(WorkloadError::Begin)?;

        let error = match attempt(store, &mut txn, &mut body) {
            Ok(value) => return Ok(UnitOutcome { value, retries }),
            Err(error) => error,
        };

        let event = UnitEvent::from_error(&error);
        if UnitState::Trying.next(event, retries, policy.max_retries) != UnitState::Aborting {
            abort_after_failure(store, &mut txn);
            return Err(error);
        }
        observer.on_conflict(retries, &error);

        let aborted = store.abort(&mut txn);
        let event = match aborted {
            Ok(()) => UnitEvent::Aborted,
            Err(_) => UnitEvent::AbortFailed,
        };
        match UnitState::Aborting.next(event, retries, policy.max_retries) {
            UnitState::Trying => {
                retries += 1;
                observer.on_retry(retries);
            }
            UnitState::DoneGiveUp => {
                observer.on_give_up(retries);
                return Err(WorkloadError::RetryExhausted { retries });
            }
            _ => {
                return Err(match aborted {
                    Err(source) => WorkloadError::Abort(source),
                    Ok(()) => error,
                })
            }
        }
    }
}

fn attempt<S, T, F>(store: &S, txn: &mut S::Txn, body: &mut F) -> WorkloadResult<T>
where
    S: KvStore,
    F: FnMut(&S, &mut S::Txn) -> WorkloadResult<T>,
{
    let value = body(store, txn)?;
    store.commit(txn).map_err(WorkloadError::Commit)?;
    Ok(value)
}

/// Ends a transaction whose unit failed fatally.
fn abort_after_failure<S: KvStore>(store: &S, txn: &mut S::Txn) {
    let txid = store.transaction_id(txn);
    if let Err(e) = store.abort(txn) {
        warn!(%txid, error = %e, "abort after fatal error failed");
    }
}

/// Runs an operation that manages its own transaction, retrying it on lock
/// conflicts under the same cap as a unit.
///
/// `op` names the operation in errors.
pub fn run_autocommit<T, F>(
    op: &str,
    policy: RetryPolicy,
    observer: &dyn RetryObserver,
    mut f: F,
) -> WorkloadResult<UnitOutcome<T>>
where
    F: FnMut() -> txkv_core::CoreResult<T>,
{
    let mut retries = 0;
    loop {
        match f() {
            Ok(value) => return Ok(UnitOutcome { value, retries }),
            Err(source) if source.is_deadlock() => {
                let error = WorkloadError::operation(op, source);
                observer.on_conflict(retries, &error);
                // The operation aborted its own transaction already.
                match UnitState::Aborting.next(UnitEvent::Aborted, retries, policy.max_retries) {
                    UnitState::Trying => {
                        retries += 1;
                        observer.on_retry(retries);
                    }
                    _ => {
                        observer.on_give_up(retries);
                        return Err(WorkloadError::RetryExhausted { retries });
                    }
                }
            }
            Err(source) => return Err(WorkloadError::operation(op, source)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn transitions() {
        use UnitEvent::*;
        use UnitState::*;

        assert_eq!(Trying.next(Completed, 0, 20), DoneOk);
        assert_eq!(Trying.next(Conflict, 0, 20), Aborting);
        assert_eq!(Trying.next(Failed, 0, 20), DoneFatal);
        assert_eq!(Aborting.next(Aborted, 19, 20), Trying);
        assert_eq!(Aborting.next(Aborted, 20, 20), DoneGiveUp);
        assert_eq!(Aborting.next(AbortFailed, 0, 20), DoneFatal);
    }

    #[test]
    fn zero_cap_gives_up_on_first_conflict() {
        assert_eq!(
            UnitState::Aborting.next(UnitEvent::Aborted, 0, 0),
            UnitState::DoneGiveUp
        );
    }

    #[test]
    fn done_states_are_final() {
        for state in [UnitState::DoneOk, UnitState::DoneGiveUp, UnitState::DoneFatal] {
            assert!(state.is_done());
            assert_eq!(state.next(UnitEvent::Conflict, 0, 20), state);
            assert_eq!(state.next(UnitEvent::Aborted, 0, 20), state);
        }
        assert!(!UnitState::Trying.is_done());
        assert!(!UnitState::Aborting.is_done());
    }

    /// Drives the machine through `conflicts` conflicts followed by a
    /// completed attempt.
    fn drive(conflicts: u32, max_retries: u32) -> (UnitState, u32) {
        let mut state = UnitState::Trying;
        let mut retries = 0;
        let mut remaining = conflicts;
        while !state.is_done() {
            let event = match state {
                UnitState::Trying if remaining > 0 => {
                    remaining -= 1;
                    UnitEvent::Conflict
                }
                UnitState::Trying => UnitEvent::Completed,
                _ => UnitEvent::Aborted,
            };
            let next = state.next(event, retries, max_retries);
            if state == UnitState::Aborting && next == UnitState::Trying {
                retries += 1;
            }
            state = next;
        }
        (state, retries)
    }

    proptest! {
        #[test]
        fn succeeds_iff_conflicts_within_cap(conflicts in 0u32..40, max in 0u32..30) {
            let (state, retries) = drive(conflicts, max);
            if conflicts <= max {
                prop_assert_eq!(state, UnitState::DoneOk);
                prop_assert_eq!(retries, conflicts);
            } else {
                prop_assert_eq!(state, UnitState::DoneGiveUp);
                prop_assert_eq!(retries, max);
            }
        }
    }

    #[test]
    fn autocommit_retries_conflicts() {
        use txkv_core::{CoreError, TransactionId};

        let mut calls = 0;
        let outcome = run_autocommit("count", RetryPolicy::new(3), &(), || {
            calls += 1;
            if calls <= 2 {
                Err(CoreError::deadlock(TransactionId::new(calls)))
            } else {
                Ok(calls)
            }
        })
        .unwrap();
        assert_eq!(outcome, UnitOutcome { value: 3, retries: 2 });

        let err = run_autocommit("count", RetryPolicy::new(1), &(), || {
            Err::<(), _>(CoreError::deadlock(TransactionId::new(1)))
        })
        .unwrap_err();
        assert!(matches!(err, WorkloadError::RetryExhausted { retries: 1 }));
    }
}
