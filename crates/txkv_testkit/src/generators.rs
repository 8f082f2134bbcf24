//! Property-based test generators using proptest.

use proptest::prelude::*;
use txkv_core::{DeadlockPolicy, EnvConfig};
use txkv_workload::{CountMode, WorkloadConfig};

/// Retry cap for generated workloads. High enough that real contention
/// never exhausts it in a test.
pub const GENEROUS_RETRIES: u32 = 10_000;

/// Strategy for count modes.
pub fn count_mode_strategy() -> impl Strategy<Value = CountMode> {
    prop_oneof![
        Just(CountMode::InTransaction),
        Just(CountMode::ReadUncommitted),
        Just(CountMode::AfterCommit),
    ]
}

/// Strategy for victim selection policies.
pub fn deadlock_policy_strategy() -> impl Strategy<Value = DeadlockPolicy> {
    prop_oneof![
        Just(DeadlockPolicy::MinWrite),
        Just(DeadlockPolicy::MaxWrite),
        Just(DeadlockPolicy::MinLocks),
        Just(DeadlockPolicy::MaxLocks),
        Just(DeadlockPolicy::Oldest),
        Just(DeadlockPolicy::Youngest),
        Just(DeadlockPolicy::Random),
    ]
}

/// Strategy for small workloads: up to 3 writers, 4 units and 6 keys.
pub fn workload_strategy() -> impl Strategy<Value = WorkloadConfig> {
    (1usize..=3, 1usize..=4, 1usize..=6, count_mode_strategy()).prop_map(
        |(writers, units, keys, mode)| {
            WorkloadConfig::new()
                .writers(writers)
                .units_per_writer(units)
                .keys(keys)
                .max_retries(GENEROUS_RETRIES)
                .count_mode(mode)
        },
    )
}

/// Strategy for environments with small pages and any victim policy.
pub fn env_config_strategy() -> impl Strategy<Value = EnvConfig> {
    (deadlock_policy_strategy(), 2usize..=8).prop_map(|(policy, page_capacity)| {
        EnvConfig::new()
            .deadlock_policy(policy)
            .page_capacity(page_capacity)
    })
}

/// One step of a single-threaded unit history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitStep {
    /// Put under the first `keys` keys, then commit.
    Commit {
        /// Keys written.
        keys: usize,
    },
    /// Put under the first `keys` keys, then abort.
    Abort {
        /// Keys written.
        keys: usize,
    },
}

/// Strategy for unit steps, committing twice as often as aborting.
pub fn unit_step_strategy(max_keys: usize) -> impl Strategy<Value = UnitStep> {
    prop_oneof![
        2 => (1..=max_keys).prop_map(|keys| UnitStep::Commit { keys }),
        1 => (1..=max_keys).prop_map(|keys| UnitStep::Abort { keys }),
    ]
}

/// Strategy for a sequence of unit steps.
pub fn unit_history_strategy(
    max_keys: usize,
    min_steps: usize,
    max_steps: usize,
) -> impl Strategy<Value = Vec<UnitStep>> {
    prop::collection::vec(unit_step_strategy(max_keys), min_steps..max_steps)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 64,
            max_shrink_iters: 500,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 16,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TEST_DATABASE;
    use txkv_workload::{key_name, Coordinator, EngineStore, KvStore, WriterIdSequence};

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn every_workload_commits_all_records(
            config in workload_strategy(),
            env in env_config_strategy(),
        ) {
            let store = EngineStore::open(env, TEST_DATABASE).unwrap();
            let ids = WriterIdSequence::new();
            let summary = Coordinator::new(&store, &ids, config.clone()).run().unwrap();

            prop_assert!(summary.succeeded());
            prop_assert_eq!(summary.units_committed(), config.writers * config.units_per_writer);
            prop_assert_eq!(store.count_committed().unwrap(), config.expected_records());
            for report in summary.reports() {
                let count = report.last_count.unwrap();
                prop_assert!(count >= config.keys);
                prop_assert_eq!(count % config.keys, 0);
            }
            store.close().unwrap();
        }

        #[test]
        fn only_committed_units_remain(history in unit_history_strategy(6, 1, 20)) {
            let store = EngineStore::open(EnvConfig::default(), TEST_DATABASE).unwrap();
            let mut expected = 0;

            for (i, step) in history.iter().enumerate() {
                let (keys, commit) = match *step {
                    UnitStep::Commit { keys } => (keys, true),
                    UnitStep::Abort { keys } => (keys, false),
                };
                let mut txn = store.begin().unwrap();
                for k in 0..keys {
                    let value = i32::try_from(i).unwrap();
                    store.put(&mut txn, key_name(k).as_bytes(), &value.to_ne_bytes()).unwrap();
                }
                prop_assert_eq!(store.count_records(&txn).unwrap(), expected + keys);
                if commit {
                    store.commit(&mut txn).unwrap();
                    expected += keys;
                } else {
                    store.abort(&mut txn).unwrap();
                }
                prop_assert_eq!(store.count_committed().unwrap(), expected);
            }
            store.close().unwrap();
        }
    }
}
