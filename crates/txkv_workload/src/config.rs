//! Workload configuration.

use crate::error::{WorkloadError, WorkloadResult};
use serde::Serialize;

/// Retries allowed per unit of work before the unit is abandoned.
pub const DEFAULT_MAX_RETRIES: u32 = 20;

/// Name of the database the workload writes to.
pub const DEFAULT_DATABASE: &str = "writers";

/// How a unit obtains its record count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CountMode {
    /// Count through the unit's own transaction, before commit.
    #[default]
    InTransaction,
    /// Count without locks, seeing other writers' pending puts.
    ReadUncommitted,
    /// Count committed records in a separate transaction after commit.
    AfterCommit,
}

/// Configuration for a workload run.
#[derive(Debug, Clone, Serialize)]
pub struct WorkloadConfig {
    /// Number of concurrent writers.
    pub writers: usize,

    /// Units of work each writer runs.
    pub units_per_writer: usize,

    /// Puts per unit, one per key `key 1` .. `key N`.
    pub keys: usize,

    /// Lock conflicts tolerated per unit.
    pub max_retries: u32,

    /// Where the per-unit count comes from.
    pub count_mode: CountMode,

    /// Database to write to.
    pub database: String,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            writers: 5,
            units_per_writer: 50,
            keys: 10,
            max_retries: DEFAULT_MAX_RETRIES,
            count_mode: CountMode::InTransaction,
            database: DEFAULT_DATABASE.to_string(),
        }
    }
}

impl WorkloadConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of writers.
    #[must_use]
    pub const fn writers(mut self, writers: usize) -> Self {
        self.writers = writers;
        self
    }

    /// Sets the units each writer runs.
    #[must_use]
    pub const fn units_per_writer(mut self, units: usize) -> Self {
        self.units_per_writer = units;
        self
    }

    /// Sets the puts per unit.
    #[must_use]
    pub const fn keys(mut self, keys: usize) -> Self {
        self.keys = keys;
        self
    }

    /// Sets the retry cap.
    #[must_use]
    pub const fn max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Sets the count mode.
    #[must_use]
    pub const fn count_mode(mut self, mode: CountMode) -> Self {
        self.count_mode = mode;
        self
    }

    /// Sets the database name.
    #[must_use]
    pub fn database(mut self, name: impl Into<String>) -> Self {
        self.database = name.into();
        self
    }

    /// Records a fully successful run leaves behind.
    #[must_use]
    pub fn expected_records(&self) -> usize {
        self.writers * self.units_per_writer * self.keys
    }

    /// Checks the configuration before a run.
    pub fn validate(&self) -> WorkloadResult<()> {
        let invalid = |message: &str| WorkloadError::InvalidConfig {
            message: message.to_string(),
        };
        if self.writers == 0 {
            return Err(invalid("at least one writer is required"));
        }
        if self.keys == 0 {
            return Err(invalid("a unit needs at least one key"));
        }
        if self.database.is_empty() {
            return Err(invalid("database name must not be empty"));
        }
        Ok(())
    }
}

/// Returns the name of key `index` (zero-based): `key 1`, `key 2`, ...
#[must_use]
pub fn key_name(index: usize) -> String {
    format!("key {}", index + 1)
}
