//! Transactions.
//!
//! Transactions are strict two-phase: locks taken by a put or a cursor step
//! are held until the transaction commits or aborts. Writes are applied in
//! place and logged with their before image, so other transactions block on
//! them instead of reading them, and abort walks the log backwards to undo.

mod manager;
mod state;

pub use manager::TransactionManager;
pub use state::{Transaction, TransactionState};
