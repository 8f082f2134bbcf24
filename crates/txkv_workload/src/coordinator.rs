//! Worker coordinator.

use crate::config::WorkloadConfig;
use crate::error::{WorkloadError, WorkloadResult};
use crate::store::KvStore;
use crate::worker::{run_writer_counting, WorkerReport, WriterId};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Hands out writer IDs: 1, 2, 3, ...
///
/// The sequence is owned by whoever runs the workload and passed to the
/// [`Coordinator`]; IDs are strictly increasing across every run that
/// shares it.
#[derive(Debug)]
pub struct WriterIdSequence {
    next: Mutex<u32>,
}

impl WriterIdSequence {
    /// Creates a sequence starting at 1.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Creates a sequence starting at `first`.
    #[must_use]
    pub fn starting_at(first: u32) -> Self {
        Self {
            next: Mutex::new(first),
        }
    }

    /// Takes the next ID.
    pub fn next_id(&self) -> WriterId {
        let mut next = self.next.lock();
        let id = WriterId::new(*next);
        *next += 1;
        id
    }
}

impl Default for WriterIdSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// How one worker ended.
#[derive(Debug)]
pub struct WorkerOutcome {
    /// Pool slot the worker ran in.
    pub slot: usize,
    /// Units the worker committed, including those before a failure.
    pub units_committed: usize,
    /// The worker's report, or the error that stopped it.
    pub result: WorkloadResult<WorkerReport>,
}

/// Aggregated result of a run.
#[derive(Debug)]
pub struct RunSummary {
    /// One outcome per worker, in slot order.
    pub outcomes: Vec<WorkerOutcome>,
    /// Wall time of the run.
    pub elapsed: Duration,
}

impl RunSummary {
    /// Returns true if every worker succeeded.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    /// Returns the reports of workers that succeeded.
    pub fn reports(&self) -> impl Iterator<Item = &WorkerReport> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    /// Returns the errors of workers that failed.
    pub fn failures(&self) -> impl Iterator<Item = (usize, &WorkloadError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.slot, e)))
    }

    /// Returns units committed by every worker, failed ones included.
    #[must_use]
    pub fn units_committed(&self) -> usize {
        self.outcomes.iter().map(|o| o.units_committed).sum()
    }

    /// Returns retries spent by successful workers.
    #[must_use]
    pub fn retries(&self) -> u64 {
        self.reports().map(|r| r.retries).sum()
    }

    /// Returns a serializable view of the run.
    #[must_use]
    pub fn to_report(&self) -> SummaryReport {
        SummaryReport {
            succeeded: self.succeeded(),
            elapsed_ms: u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX),
            units_committed: self.units_committed(),
            retries: self.retries(),
            workers: self
                .outcomes
                .iter()
                .map(|o| match &o.result {
                    Ok(report) => WorkerLine {
                        slot: o.slot,
                        report: Some(report.clone()),
                        units_committed: None,
                        error: None,
                    },
                    Err(e) => WorkerLine {
                        slot: o.slot,
                        report: None,
                        units_committed: Some(o.units_committed),
                        error: Some(e.to_string()),
                    },
                })
                .collect(),
        }
    }
}

/// Serializable summary of a run.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryReport {
    /// Whether every worker succeeded.
    pub succeeded: bool,
    /// Wall time in milliseconds.
    pub elapsed_ms: u64,
    /// Units committed by every worker.
    pub units_committed: usize,
    /// Retries spent by successful workers.
    pub retries: u64,
    /// Per-worker lines.
    pub workers: Vec<WorkerLine>,
}

/// One worker in a [`SummaryReport`].
#[derive(Debug, Clone, Serialize)]
pub struct WorkerLine {
    /// Pool slot.
    pub slot: usize,
    /// Report of a successful worker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<WorkerReport>,
    /// Units a failed worker committed before it stopped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units_committed: Option<usize>,
    /// Error of a failed worker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs a fixed pool of writers against a shared store.
pub struct Coordinator<'a, S> {
    store: &'a S,
    ids: &'a WriterIdSequence,
    config: WorkloadConfig,
}

impl<'a, S: KvStore> Coordinator<'a, S> {
    /// Creates a coordinator.
    pub fn new(store: &'a S, ids: &'a WriterIdSequence, config: WorkloadConfig) -> Self {
        Self { store, ids, config }
    }

    /// Returns the workload configuration.
    #[must_use]
    pub fn config(&self) -> &WorkloadConfig {
        &self.config
    }

    /// Launches every writer, waits for all of them and aggregates their
    /// outcomes. A failed or panicked writer does not stop the others.
    ///
    /// # Errors
    ///
    /// Returns [`WorkloadError::InvalidConfig`] before starting any writer.
    pub fn run(&self) -> WorkloadResult<RunSummary> {
        self.config.validate()?;
        let started = Instant::now();
        let store = self.store;
        let ids = self.ids;
        let config = &self.config;

        info!(
            writers = config.writers,
            units = config.units_per_writer,
            keys = config.keys,
            max_retries = config.max_retries,
            "starting writers"
        );

        let committed: Vec<AtomicUsize> =
            (0..config.writers).map(|_| AtomicUsize::new(0)).collect();
        let outcomes = thread::scope(|scope| {
            let handles: Vec<_> = committed
                .iter()
                .map(|units| {
                    scope.spawn(move || run_writer_counting(ids.next_id(), store, config, units))
                })
                .collect();

            handles
                .into_iter()
                .zip(&committed)
                .enumerate()
                .map(|(slot, (handle, units))| {
                    let result = handle
                        .join()
                        .unwrap_or(Err(WorkloadError::WorkerPanicked { slot }));
                    WorkerOutcome {
                        slot,
                        units_committed: units.load(Ordering::Relaxed),
                        result,
                    }
                })
                .collect::<Vec<_>>()
        });

        let summary = RunSummary {
            outcomes,
            elapsed: started.elapsed(),
        };
        for (slot, e) in summary.failures() {
            error!(slot, error = %e, "writer failed");
        }
        info!(
            succeeded = summary.succeeded(),
            units = summary.units_committed(),
            retries = summary.retries(),
            elapsed = ?summary.elapsed,
            "writers finished"
        );
        Ok(summary)
    }
}

impl<S> std::fmt::Debug for Coordinator<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_strictly_increasing_across_threads() {
        let ids = WriterIdSequence::new();
        let mut seen: Vec<u32> = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| (0..10).map(|_| ids.next_id().as_u32()).collect::<Vec<_>>()))
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });
        seen.sort_unstable();
        assert_eq!(seen, (1..=80).collect::<Vec<_>>());
    }

    #[test]
    fn sequence_can_start_elsewhere() {
        let ids = WriterIdSequence::starting_at(10);
        assert_eq!(ids.next_id(), WriterId::new(10));
        assert_eq!(ids.next_id(), WriterId::new(11));
    }

    #[test]
    fn summary_counts_units_of_failed_workers() {
        let report = |id, units| WorkerReport {
            writer: WriterId::new(id),
            units_committed: units,
            retries: 2,
            max_unit_retries: 1,
            last_count: Some(units * 10),
        };
        let summary = RunSummary {
            outcomes: vec![
                WorkerOutcome {
                    slot: 0,
                    units_committed: 50,
                    result: Ok(report(1, 50)),
                },
                WorkerOutcome {
                    slot: 1,
                    units_committed: 7,
                    result: Err(WorkloadError::RetryExhausted { retries: 20 }),
                },
            ],
            elapsed: Duration::from_millis(5),
        };

        assert!(!summary.succeeded());
        assert_eq!(summary.units_committed(), 57);
        assert_eq!(summary.retries(), 2);
        assert_eq!(summary.failures().count(), 1);

        let json = serde_json::to_value(summary.to_report()).unwrap();
        assert_eq!(json["succeeded"], false);
        assert_eq!(json["workers"][0]["report"]["writer"], 1);
        assert_eq!(json["units_committed"], 57);
        assert_eq!(json["workers"][1]["units_committed"], 7);
        assert_eq!(json["workers"][1]["error"], "giving up after 20 retries");
    }
}
