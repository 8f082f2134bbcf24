//! Volatile log.
//!
//! Every put is logged before it is applied. The log drives commit (which
//! records must be made visible) and abort (which records must be undone),
//! walking each transaction's records backwards through `prev_lsn`.
//!
//! The log lives in a bounded in-memory buffer and is reclaimed as soon as
//! no active transaction needs its records. Nothing is written to disk.
//!
//! ## Record Format
//!
//! ```text
//! | type (1) | length (4) | payload (length) | crc32 (4) |
//! ```

mod manager;
mod record;

pub use manager::LogManager;
pub use record::{LogRecord, LogRecordType};
