//! Page locking with deadlock detection.
//!
//! Every database has one tree lock, covering its page structure, and one
//! lock per key, covering the leaf pages of that key's records. Readers take
//! both in shared mode. Writers take the tree shared and the key exclusive,
//! and upgrade the tree to exclusive when an insert creates a key or splits
//! a full page.
//!
//! Locks are owned by transactions and released only when the transaction
//! commits or aborts.

mod detector;
mod manager;

pub use manager::{LockManager, LockMode, LockObject};
