//! Test fixtures and store helpers.
//!
//! Provides convenience functions for setting up test stores
//! and common test scenarios.

use txkv_core::EnvConfig;
use txkv_workload::{key_name, EngineStore, KvStore, WorkloadConfig};

/// Name of the database test stores open.
pub const TEST_DATABASE: &str = "test";

/// A test store, closed on drop.
pub struct TestStore {
    /// The store instance.
    pub store: EngineStore,
}

impl TestStore {
    /// Creates a store with the default environment configuration.
    pub fn new() -> Self {
        Self::with_config(EnvConfig::default())
    }

    /// Creates a store with a custom environment configuration.
    pub fn with_config(config: EnvConfig) -> Self {
        Self {
            store: EngineStore::open(config, TEST_DATABASE).expect("Failed to open test store"),
        }
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestStore {
    type Target = EngineStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

impl Drop for TestStore {
    fn drop(&mut self) {
        // Tests that leave transactions open make close fail; that is fine.
        let _ = self.store.close();
    }
}

/// Runs a test with a temporary store.
///
/// # Example
///
/// ```rust,ignore
/// use txkv_testkit::with_store;
///
/// #[test]
/// fn my_test() {
///     with_store(|store| {
///         let mut txn = store.begin().unwrap();
///         // ... test operations
///     });
/// }
/// ```
pub fn with_store<F, R>(f: F) -> R
where
    F: FnOnce(&EngineStore) -> R,
{
    let store = TestStore::new();
    f(&store)
}

/// A workload small enough for unit tests: 2 writers, 5 units, 4 keys.
pub fn small_workload() -> WorkloadConfig {
    WorkloadConfig::new().writers(2).units_per_writer(5).keys(4)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Commits `units` units of `keys` puts each, one transaction per unit.
    pub fn committed_units<S: KvStore>(store: &S, units: usize, keys: usize) {
        for unit in 0..units {
            let mut txn = store.begin().expect("Failed to begin");
            for k in 0..keys {
                let value = i32::try_from(unit * keys + k).expect("value fits i32");
                store
                    .put(&mut txn, key_name(k).as_bytes(), &value.to_ne_bytes())
                    .expect("Failed to put");
            }
            store.commit(&mut txn).expect("Failed to commit");
        }
    }

    /// Creates a store holding `units` committed units of `keys` puts.
    pub fn populated_store(units: usize, keys: usize) -> TestStore {
        let store = TestStore::new();
        committed_units(&*store, units, keys);
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use txkv_core::CoreError;

    #[test]
    fn populated_scenario_counts() {
        let store = scenarios::populated_store(3, 10);
        assert_eq!(store.count_committed().unwrap(), 30);
    }

    #[test]
    fn locking_read_outside_own_transaction_is_self_deadlock() {
        with_store(|store| {
            let mut txn = store.begin().unwrap();
            store.put(&mut txn, b"key 1", &1i32.to_ne_bytes()).unwrap();

            let err = store.count_committed().unwrap_err();
            assert!(matches!(err, CoreError::SelfDeadlock { active } if active == txn.id()));

            // The unit's own transaction still reads its writes.
            assert_eq!(store.count_records(&txn).unwrap(), 1);
            store.abort(&mut txn).unwrap();
        });
    }

    #[test]
    fn abort_leaves_no_partial_unit() {
        let store = scenarios::populated_store(2, 10);
        let mut txn = store.begin().unwrap();
        for k in 0..7 {
            store
                .put(&mut txn, key_name(k).as_bytes(), &(-1i32).to_ne_bytes())
                .unwrap();
        }
        assert_eq!(store.count_records(&txn).unwrap(), 27);
        store.abort(&mut txn).unwrap();

        assert_eq!(store.count_committed().unwrap(), 20);
        assert_eq!(store.environment().stats().unresolved_transactions(), 0);
    }
}
