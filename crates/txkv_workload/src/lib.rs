//! # txkv workload
//!
//! Concurrent writers grouping puts into atomic units of work.
//!
//! Each writer runs a fixed number of units. A unit puts one value under
//! every key, counts the records and commits, all in one transaction. When
//! the store picks the unit's transaction as a deadlock victim the unit is
//! aborted and retried from the start, up to a retry cap.
//!
//! ```rust,ignore
//! use txkv_core::EnvConfig;
//! use txkv_workload::{Coordinator, EngineStore, WorkloadConfig, WriterIdSequence};
//!
//! let store = EngineStore::open(EnvConfig::default(), "writers")?;
//! let ids = WriterIdSequence::new();
//! let summary = Coordinator::new(&store, &ids, WorkloadConfig::default()).run()?;
//! store.close()?;
//! assert!(summary.succeeded());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod error;
mod retry;
mod store;
mod worker;

pub use config::{key_name, CountMode, WorkloadConfig, DEFAULT_DATABASE, DEFAULT_MAX_RETRIES};
pub use coordinator::{
    Coordinator, RunSummary, SummaryReport, WorkerLine, WorkerOutcome, WriterIdSequence,
};
pub use error::{WorkloadError, WorkloadResult};
pub use retry::{
    run_autocommit, run_unit, RetryObserver, RetryPolicy, UnitEvent, UnitOutcome, UnitState,
};
pub use store::{EngineStore, KvStore};
pub use worker::{run_writer, run_writer_counting, WorkerReport, WriterId};
