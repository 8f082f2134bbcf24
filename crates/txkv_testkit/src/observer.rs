//! Retry observers for tests.

use parking_lot::Mutex;
use txkv_workload::{RetryObserver, WorkloadError};

/// One retry-loop event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryEvent {
    /// An attempt ended in a lock conflict.
    Conflict {
        /// Retries spent before the conflict.
        retries: u32,
    },
    /// The unit restarted.
    Retry {
        /// Retries including this one.
        retries: u32,
    },
    /// The unit was abandoned.
    GiveUp {
        /// Retries spent.
        retries: u32,
    },
}

/// Records every event it observes, in order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<RetryEvent>>,
}

impl RecordingObserver {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the recorded events.
    pub fn events(&self) -> Vec<RetryEvent> {
        self.events.lock().clone()
    }

    /// Returns how many retries were recorded.
    pub fn retries(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, RetryEvent::Retry { .. }))
            .count()
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl RetryObserver for RecordingObserver {
    fn on_conflict(&self, retries: u32, _error: &WorkloadError) {
        self.events.lock().push(RetryEvent::Conflict { retries });
    }

    fn on_retry(&self, retries: u32) {
        self.events.lock().push(RetryEvent::Retry { retries });
    }

    fn on_give_up(&self, retries: u32) {
        self.events.lock().push(RetryEvent::GiveUp { retries });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use txkv_workload::{run_autocommit, RetryPolicy};
    use txkv_core::{CoreError, TransactionId};

    #[test]
    fn records_autocommit_retries() {
        let observer = RecordingObserver::new();
        let mut calls = 0;
        let outcome = run_autocommit("count", RetryPolicy::new(3), &observer, || {
            calls += 1;
            if calls < 3 {
                Err(CoreError::deadlock(TransactionId::new(calls)))
            } else {
                Ok(calls)
            }
        })
        .unwrap();

        assert_eq!(outcome.value, 3);
        assert_eq!(outcome.retries, 2);
        assert_eq!(
            observer.events(),
            vec![
                RetryEvent::Conflict { retries: 0 },
                RetryEvent::Retry { retries: 1 },
                RetryEvent::Conflict { retries: 1 },
                RetryEvent::Retry { retries: 2 },
            ]
        );

        observer.clear();
        assert!(observer.events().is_empty());
    }
}
