//! # txkv Testkit
//!
//! Test utilities for txkv.
//!
//! This crate provides:
//! - Test fixtures and store helpers
//! - A store wrapper that injects lock conflicts and store errors
//! - A retry observer that records what the retry loop did
//! - Property-based test generators using proptest
//! - Stress runs of the writer workload
//!
//! ## Usage
//!
//! ```rust,ignore
//! use txkv_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_store() {
//!     with_store(|store| {
//!         let mut txn = store.begin().unwrap();
//!         // ... test operations
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod observer;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::observer::*;
    pub use crate::stress::*;
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
pub use observer::*;
pub use stress::*;
