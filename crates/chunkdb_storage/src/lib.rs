//! # chunkdb Storage
//!
//! Transactional key/value backend contract for chunkdb.
//!
//! This crate provides the lowest-level storage abstraction for chunkdb.
//! Backends are **opaque string stores** keyed by string - they do not
//! interpret the records they hold.
//!
//! ## Design Principles
//!
//! - A backend hosts named databases, each with one or more object stores
//! - All reads and writes happen inside transactions
//! - A read-write transaction is atomic and isolated from other writers
//! - Schema changes and deletes notify other open connections
//! - No knowledge of chunk keys, documents or collections
//!
//! ## Available Backends
//!
//! - [`InMemoryKvBackend`] - For testing and ephemeral storage
//!
//! ## Example
//!
//! ```rust
//! use chunkdb_storage::KeyRange;
//!
//! let range = KeyRange::bound("a", "m", false, true);
//! assert!(range.contains("b"));
//! assert!(!range.contains("m"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod memory;
mod range;

pub use backend::{
    KvBackend, KvConnection, KvRecord, KvTransaction, StoreSchema, TransactionMode,
    VersionChangeEvent, VersionChangeHook,
};
pub use error::{StorageError, StorageResult};
pub use memory::{BackendStats, InMemoryKvBackend};
pub use range::KeyRange;
