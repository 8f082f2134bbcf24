//! # txkv Storage
//!
//! Byte-store backends for the txkv log buffer.
//!
//! Backends are **opaque byte stores**: they hand out offsets and bytes and
//! never interpret what they hold. The log manager in `txkv_core` owns the
//! record format.
//!
//! ## Design Principles
//!
//! - Offsets are absolute and never reused, even after the prefix is discarded
//! - A backend may be bounded; appends that do not fit fail with
//!   [`StorageError::Full`] instead of growing
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - Volatile, optionally bounded buffer
//!
//! ## Example
//!
//! ```rust
//! use txkv_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::with_capacity(64);
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use memory::InMemoryBackend;
