//! Stress runs of the writer workload.
//!
//! These drive real contention through the engine: every writer shares one
//! database, so tree-lock upgrades deadlock and victims retry.

use std::time::Duration;
use txkv_core::{EnvConfig, StatsSnapshot};
use txkv_workload::{
    Coordinator, EngineStore, KvStore, RunSummary, WorkloadConfig, WorkloadResult,
    WriterIdSequence,
};

/// Result of a stress run.
#[derive(Debug)]
pub struct StressResult {
    /// The coordinator's summary.
    pub summary: RunSummary,
    /// Committed records counted after every writer finished.
    pub committed: usize,
    /// Engine statistics at the end of the run.
    pub stats: StatsSnapshot,
}

impl StressResult {
    /// Units per second over the run.
    #[must_use]
    pub fn units_per_second(&self) -> f64 {
        let secs = self.summary.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.summary.units_committed() as f64 / secs
        } else {
            0.0
        }
    }

    /// Returns the run's wall time.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.summary.elapsed
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
        println!("Succeeded: {}", self.summary.succeeded());
        println!("Units committed: {}", self.summary.units_committed());
        println!("Retries: {}", self.summary.retries());
        println!("Deadlocks: {}", self.stats.deadlocks);
        println!("Records: {}", self.committed);
        println!("Duration: {:?}", self.duration());
        println!("Throughput: {:.2} units/sec", self.units_per_second());
    }
}

/// Runs `config` against a fresh store opened with `env`.
///
/// # Errors
///
/// Fails if the store cannot be opened or closed, the workload
/// configuration is invalid, or the final count fails.
pub fn stress_workload(env: EnvConfig, config: WorkloadConfig) -> WorkloadResult<StressResult> {
    let store = EngineStore::open(env, &config.database)?;
    let ids = WriterIdSequence::new();
    let summary = Coordinator::new(&store, &ids, config).run()?;
    let committed = store
        .count_committed()
        .map_err(|e| txkv_workload::WorkloadError::operation("count committed records", e))?;
    let stats = store.environment().stats();
    store.close()?;

    Ok(StressResult {
        summary,
        committed,
        stats,
    })
}
