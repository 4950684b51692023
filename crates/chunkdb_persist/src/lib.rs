//! # chunkdb Persist
//!
//! Incremental chunked persistence for chunkdb databases.
//!
//! A collection's documents are split into chunks of consecutive surrogate
//! ids, each stored under its own key:
//!
//! | key | value |
//! |-----|-------|
//! | `loki` | the database record, collections reduced to name stubs |
//! | `<collection>.metadata` | the collection record without documents |
//! | `<collection>.chunk.<n>` | documents with ids in `[n * S, (n + 1) * S)` |
//!
//! A save writes only the chunks touched since the previous save. Before
//! writing, it checks inside the same transaction whether another writer
//! saved in the meantime; if so, it rewrites everything instead.
//!
//! ## Example
//!
//! ```rust
//! use chunkdb_core::Database;
//! use chunkdb_persist::{AdapterConfig, IncrementalAdapter, SaveStrategy};
//! use chunkdb_storage::InMemoryKvBackend;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let adapter = IncrementalAdapter::new(
//!     Arc::new(InMemoryKvBackend::new()),
//!     AdapterConfig::builder().chunk_size(10).build()?,
//! );
//!
//! let mut db = Database::new("app");
//! let notes = db.add_collection("notes")?;
//! for n in 0..50 {
//!     notes.insert(json!({ "n": n }))?;
//! }
//! adapter.save(&mut db).await?;
//!
//! db.collection_mut("notes").unwrap().update(42, json!({ "n": -1 }))?;
//! let report = adapter.save(&mut db).await?;
//! assert_eq!(report.strategy, SaveStrategy::Incremental);
//! assert_eq!(report.data_chunks_written("notes"), vec![4]);
//! # Ok::<_, chunkdb_persist::PersistError>(())
//! # }).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod codec;
mod config;
mod connection;
mod error;
mod key;
mod load;
mod save;
mod versions;

pub use adapter::IncrementalAdapter;
pub use codec::{
    AsyncChunkCodec, AsyncChunkTransform, AsyncFnCodec, BoxFuture, ChunkCodec, ChunkTransform,
    FnCodec,
};
pub use config::{
    AdapterConfig, AdapterConfigBuilder, DatabaseHook, DEFAULT_FETCH_BATCH_THRESHOLD,
    DEFAULT_MEGACHUNK_COUNT,
};
pub use connection::{SCHEMA_VERSION, STORE_NAME};
pub use error::{PersistError, PersistResult};
pub use key::{ChunkKey, DATABASE_KEY};
pub use save::{SaveReport, SaveStrategy};
pub use versions::ObservedVersions;
