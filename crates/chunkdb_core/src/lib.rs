//! # chunkdb Core
//!
//! In-memory document model for chunkdb.
//!
//! This crate provides:
//! - Documents with monotonically assigned surrogate ids
//! - The sorted surrogate index and chunk addressing over it
//! - Collections with a dirty ledger of mutated ids
//! - Databases and the snapshots the persistence layer saves
//!
//! It performs no I/O. See `chunkdb_persist` for the save and load pipelines.
//!
//! ## Example
//!
//! ```rust
//! use chunkdb_core::{Database, DEFAULT_CHUNK_SIZE};
//! use serde_json::json;
//!
//! let mut db = Database::new("app");
//! let users = db.add_collection("users").unwrap();
//! for n in 0..250 {
//!     users.insert(json!({ "n": n })).unwrap();
//! }
//!
//! let set = users.materialize().unwrap();
//! let sizes: Vec<usize> = set.chunks(DEFAULT_CHUNK_SIZE).map(|(_, docs)| docs.len()).collect();
//! assert_eq!(sizes, vec![100, 100, 50]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod chunk;
mod collection;
mod database;
mod document;
mod error;
mod index;
mod ledger;
mod version;

pub use chunk::{chunk_bounds, chunk_ordinal, locate_chunk, ChunkRanges, DEFAULT_CHUNK_SIZE};
pub use collection::{Collection, CollectionMeta, DeferredLoader, DocumentSet, SnapshotDocuments};
pub use database::{
    CollectionStub, Database, DatabaseMeta, DatabaseSnapshot, DirtyState, SnapshotCollection,
    ENGINE_VERSION,
};
pub use document::{Document, DocumentMeta, SurrogateId, ID_FIELD, META_FIELD};
pub use error::{CoreError, CoreResult};
pub use index::{OrderViolation, SurrogateIndex};
pub use ledger::DirtyLedger;
pub use version::VersionId;
