//! Environment and database configuration.

use crate::error::{CoreError, CoreResult};

/// Smallest accepted log buffer.
pub const MIN_LOG_BUFFER_SIZE: u64 = 4 * 1024;

/// Which member of a waits-for cycle receives the deadlock error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeadlockPolicy {
    /// The transaction holding the fewest write locks.
    #[default]
    MinWrite,
    /// The transaction holding the most write locks.
    MaxWrite,
    /// The transaction holding the fewest locks.
    MinLocks,
    /// The transaction holding the most locks.
    MaxLocks,
    /// The oldest transaction.
    Oldest,
    /// The youngest transaction.
    Youngest,
    /// A random member of the cycle.
    Random,
}

/// Configuration for opening an environment.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// Keep the log in memory. On-disk logging is not supported.
    pub log_in_memory: bool,

    /// Size of the in-memory log buffer in bytes.
    pub log_buffer_size: u64,

    /// Bytes of record data the environment may hold.
    pub cache_size: u64,

    /// Victim selection for deadlock detection.
    pub deadlock_policy: DeadlockPolicy,

    /// Whether handles may be used from any thread.
    pub free_threaded: bool,

    /// Maximum number of concurrently active transactions.
    pub max_transactions: usize,

    /// Records per leaf page before an insert splits the page.
    pub page_capacity: usize,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            log_in_memory: true,
            log_buffer_size: 10 * 1024 * 1024, // 10 MB
            cache_size: 10 * 1024 * 1024,      // 10 MB
            deadlock_policy: DeadlockPolicy::MinWrite,
            free_threaded: true,
            max_transactions: 100,
            page_capacity: 16,
        }
    }
}

impl EnvConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether the log is kept in memory.
    #[must_use]
    pub const fn log_in_memory(mut self, value: bool) -> Self {
        self.log_in_memory = value;
        self
    }

    /// Sets the log buffer size.
    #[must_use]
    pub const fn log_buffer_size(mut self, size: u64) -> Self {
        self.log_buffer_size = size;
        self
    }

    /// Sets the cache size.
    #[must_use]
    pub const fn cache_size(mut self, size: u64) -> Self {
        self.cache_size = size;
        self
    }

    /// Sets the deadlock victim policy.
    #[must_use]
    pub const fn deadlock_policy(mut self, policy: DeadlockPolicy) -> Self {
        self.deadlock_policy = policy;
        self
    }

    /// Sets whether handles may be shared across threads.
    #[must_use]
    pub const fn free_threaded(mut self, value: bool) -> Self {
        self.free_threaded = value;
        self
    }

    /// Sets the maximum number of active transactions.
    #[must_use]
    pub const fn max_transactions(mut self, max: usize) -> Self {
        self.max_transactions = max;
        self
    }

    /// Sets the leaf page capacity.
    #[must_use]
    pub const fn page_capacity(mut self, capacity: usize) -> Self {
        self.page_capacity = capacity;
        self
    }

    /// Checks the configuration before an environment is opened.
    pub fn validate(&self) -> CoreResult<()> {
        if !self.log_in_memory {
            return Err(CoreError::invalid_config(
                "on-disk logging is not supported; enable log_in_memory",
            ));
        }
        if self.log_buffer_size < MIN_LOG_BUFFER_SIZE {
            return Err(CoreError::invalid_config(format!(
                "log buffer of {} bytes is below the minimum of {} bytes",
                self.log_buffer_size, MIN_LOG_BUFFER_SIZE
            )));
        }
        if self.cache_size == 0 {
            return Err(CoreError::invalid_config("cache size must be non-zero"));
        }
        if self.max_transactions == 0 {
            return Err(CoreError::invalid_config(
                "max_transactions must be at least 1",
            ));
        }
        if self.page_capacity < 2 {
            return Err(CoreError::invalid_config(
                "page capacity must be at least 2",
            ));
        }
        Ok(())
    }
}

/// How a database treats several values under one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// One value per key; a put replaces the existing value.
    #[default]
    None,
    /// Duplicates kept in insertion order.
    Unsorted,
    /// Duplicates kept in value order; an identical pair is rejected.
    Sorted,
}

impl DuplicatePolicy {
    /// Returns true if a key may hold more than one value.
    #[must_use]
    pub const fn allows_duplicates(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Configuration for opening a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DbConfig {
    /// Duplicate handling.
    pub duplicates: DuplicatePolicy,
}

impl DbConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the duplicate policy.
    #[must_use]
    pub const fn duplicates(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicates = policy;
        self
    }
}
