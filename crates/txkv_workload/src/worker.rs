//! Writer worker.

use crate::config::{key_name, CountMode, WorkloadConfig};
use crate::error::{WorkloadError, WorkloadResult};
use crate::retry::{run_autocommit, run_unit, RetryObserver, RetryPolicy};
use crate::store::KvStore;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, info_span, warn};

/// Identity of a writer, assigned once when the writer starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct WriterId(pub u32);

impl WriterId {
    /// Creates a writer ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for WriterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "writer:{}", self.0)
    }
}

/// What a writer accomplished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    /// The writer.
    pub writer: WriterId,
    /// Units committed.
    pub units_committed: usize,
    /// Retries spent across all units.
    pub retries: u64,
    /// Most retries any single unit needed.
    pub max_unit_retries: u32,
    /// Record count observed by the last unit.
    pub last_count: Option<usize>,
}

/// Logs retry events with the writer's identity.
struct WriterObserver {
    writer: WriterId,
    unit: usize,
}

impl RetryObserver for WriterObserver {
    fn on_conflict(&self, retries: u32, error: &WorkloadError) {
        info!(writer = %self.writer, unit = self.unit, retries, %error, "lock conflict, aborting");
    }

    fn on_retry(&self, retries: u32) {
        info!(writer = %self.writer, unit = self.unit, retries, "retrying unit");
    }

    fn on_give_up(&self, retries: u32) {
        warn!(writer = %self.writer, unit = self.unit, retries, "giving up");
    }
}

/// Runs one writer to completion.
///
/// Each unit puts one value under every key in order, counts records as
/// configured and commits, all under the retry loop. Payloads are
/// `random + unit index` as 4 native-endian bytes, drawn from a generator
/// seeded with the writer's ID.
///
/// # Errors
///
/// Returns the first fatal error. Units after it are not run.
pub fn run_writer<S: KvStore>(
    writer: WriterId,
    store: &S,
    config: &WorkloadConfig,
) -> WorkloadResult<WorkerReport> {
    run_writer_counting(writer, store, config, &AtomicUsize::new(0))
}

/// Like [`run_writer`], but also bumps `committed` after every committed
/// unit, so the count survives a later failure.
///
/// # Errors
///
/// Returns the first fatal error. Units after it are not run.
pub fn run_writer_counting<S: KvStore>(
    writer: WriterId,
    store: &S,
    config: &WorkloadConfig,
    committed: &AtomicUsize,
) -> WorkloadResult<WorkerReport> {
    let _span = info_span!("writer", id = writer.as_u32()).entered();
    let policy = RetryPolicy::new(config.max_retries);
    let mut rng = StdRng::seed_from_u64(u64::from(writer.as_u32()));
    let keys: Vec<String> = (0..config.keys).map(key_name).collect();

    let mut report = WorkerReport {
        writer,
        units_committed: 0,
        retries: 0,
        max_unit_retries: 0,
        last_count: None,
    };
    info!(%writer, units = config.units_per_writer, "writer started");

    for unit in 0..config.units_per_writer {
        let observer = WriterObserver { writer, unit };
        // Wrapping keeps the payload 4 bytes for any unit index.
        let offset = unit as i32;

        let outcome = run_unit(store, policy, &observer, |store, txn| {
            debug!(%writer, unit, txid = %store.transaction_id(txn), "unit attempt");
            for key in &keys {
                let payload = rng.gen_range(0..=i32::MAX).wrapping_add(offset);
                store
                    .put(txn, key.as_bytes(), &payload.to_ne_bytes())
                    .map_err(|source| WorkloadError::operation(format!("put {key}"), source))?;
            }
            match config.count_mode {
                CountMode::InTransaction => store
                    .count_records(txn)
                    .map(Some)
                    .map_err(|source| WorkloadError::operation("count records", source)),
                CountMode::ReadUncommitted => store
                    .count_uncommitted()
                    .map(Some)
                    .map_err(|source| WorkloadError::operation("count uncommitted records", source)),
                CountMode::AfterCommit => Ok(None),
            }
        });
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(%writer, unit, error = %e, "writer stopping");
                return Err(e);
            }
        };
        committed.fetch_add(1, Ordering::Relaxed);
        report.retries += u64::from(outcome.retries);
        report.max_unit_retries = report.max_unit_retries.max(outcome.retries);

        let count = match outcome.value {
            Some(count) => count,
            None => {
                let counted = run_autocommit("count committed records", policy, &observer, || {
                    store.count_committed()
                })?;
                report.retries += u64::from(counted.retries);
                counted.value
            }
        };

        report.units_committed += 1;
        report.last_count = Some(count);
        info!(%writer, unit, count, "record count");
    }

    info!(
        %writer,
        units = report.units_committed,
        retries = report.retries,
        "writer finished"
    );
    Ok(report)
}
