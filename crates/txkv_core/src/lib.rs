//! # txkv core
//!
//! In-memory transactional key-value engine.
//!
//! This crate provides:
//! - Environments sharing a record cache, a volatile log and a lock table
//! - Databases with optional sorted or unsorted duplicates
//! - Strict two-phase locking at tree and key granularity
//! - Deadlock detection with configurable victim selection
//! - Cursors that count or walk records inside a transaction
//!
//! Nothing is persisted: the log exists only to commit and abort.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod cursor;
mod db;
mod env;
mod error;
mod lock;
mod log;
mod stats;
mod transaction;
mod tree;
mod types;

pub use config::{DbConfig, DeadlockPolicy, DuplicatePolicy, EnvConfig, MIN_LOG_BUFFER_SIZE};
pub use cursor::Cursor;
pub use db::Database;
pub use env::Environment;
pub use error::{CoreError, CoreResult};
pub use lock::{LockManager, LockMode, LockObject};
pub use log::{LogManager, LogRecord, LogRecordType};
pub use stats::{EnvStats, StatsSnapshot};
pub use transaction::{Transaction, TransactionManager, TransactionState};
pub use tree::{record_size, RECORD_OVERHEAD};
pub use types::{DatabaseId, Lsn, TransactionId};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
