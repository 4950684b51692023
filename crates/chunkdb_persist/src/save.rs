//! Save pipeline.
//!
//! One save runs inside one read-write transaction:
//!
//! 1. Read the persisted database chunk and compare its version id with the
//!    one this adapter last observed.
//! 2. Equal (or both absent): incremental save. Only the chunks touched by
//!    each collection's dirty ledger are written.
//! 3. Different: another writer saved in the meantime. Every chunk is
//!    rewritten and chunks beyond the new end of each collection are
//!    deleted, as are the chunks of collections no longer in the database.
//! 4. Metadata chunks and the database chunk get fresh version ids.
//!
//! The caller commits, and records the new version ids only once the commit
//! succeeded.

use crate::config::AdapterConfig;
use crate::error::PersistResult;
use crate::key::{ChunkKey, DATABASE_KEY};
use chunkdb_core::{DatabaseMeta, DatabaseSnapshot, SnapshotCollection, VersionId};
use chunkdb_storage::{KvRecord, KvTransaction};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// How a save wrote the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStrategy {
    /// Only chunks changed since the previous save were written.
    Incremental,
    /// Another writer saved since this adapter last looked; everything was
    /// rewritten.
    FullOverwrite,
}

/// Outcome of a committed save.
#[derive(Debug, Clone)]
pub struct SaveReport {
    /// Strategy the save used.
    pub strategy: SaveStrategy,
    /// Chunks written, in write order.
    pub written: Vec<ChunkKey>,
    /// Chunks deleted, in delete order.
    pub deleted: Vec<ChunkKey>,
    /// Total size of the written values.
    pub bytes_written: usize,
    /// Version id of the database chunk.
    pub database_version: VersionId,
    /// Version ids of the collections whose metadata chunk was written.
    pub collection_versions: Vec<(String, VersionId)>,
}

impl SaveReport {
    /// Returns true if the save overwrote another writer's changes.
    #[must_use]
    pub fn is_full_overwrite(&self) -> bool {
        self.strategy == SaveStrategy::FullOverwrite
    }

    /// Returns the ordinals of the data chunks written for `collection`.
    #[must_use]
    pub fn data_chunks_written(&self, collection: &str) -> Vec<u64> {
        self.written
            .iter()
            .filter_map(|key| match key {
                ChunkKey::Data {
                    collection: name,
                    ordinal,
                } if name == collection => Some(*ordinal),
                _ => None,
            })
            .collect()
    }
}

/// Picks the strategy from the persisted database chunk.
///
/// An unreadable database chunk counts as a foreign write.
pub(crate) fn choose_strategy(
    persisted: Option<&str>,
    last_observed: Option<&VersionId>,
) -> SaveStrategy {
    let persisted_version = match persisted {
        None => None,
        Some(raw) => match serde_json::from_str::<DatabaseMeta>(raw) {
            Ok(meta) => meta.version_id,
            Err(err) => {
                warn!(error = %err, "persisted database chunk is unreadable, overwriting");
                return SaveStrategy::FullOverwrite;
            }
        },
    };
    if persisted_version.as_ref() == last_observed {
        return SaveStrategy::Incremental;
    }
    warn!(
        persisted = ?persisted_version,
        observed = ?last_observed,
        "database was saved by another writer, overwriting"
    );
    SaveStrategy::FullOverwrite
}

/// Writes a snapshot into `txn` without committing.
///
/// `snapshot` is called after the strategy is decided.
pub(crate) async fn write_snapshot<F>(
    txn: &dyn KvTransaction,
    config: &AdapterConfig,
    last_observed: Option<&VersionId>,
    snapshot: F,
) -> PersistResult<SaveReport>
where
    F: FnOnce() -> DatabaseSnapshot,
{
    let persisted = txn.get(DATABASE_KEY).await?;
    let strategy = choose_strategy(persisted.as_deref(), last_observed);
    let snapshot = snapshot();

    let mut inventory = if strategy == SaveStrategy::FullOverwrite
        || !snapshot.removed_collections.is_empty()
    {
        Inventory::scan(txn).await?
    } else {
        Inventory::default()
    };
    let mut writer = ChunkWriter::new(txn);

    let purge: Vec<String> = match strategy {
        SaveStrategy::FullOverwrite => {
            let live: HashSet<&str> = snapshot
                .collections
                .iter()
                .map(|c| c.meta.name.as_str())
                .collect();
            inventory
                .collections()
                .filter(|name| !live.contains(name))
                .map(str::to_string)
                .collect()
        }
        SaveStrategy::Incremental => snapshot.removed_collections.clone(),
    };
    for name in &purge {
        let keys = inventory.take(name);
        if !keys.is_empty() {
            warn!(collection = %name, chunks = keys.len(), "deleting chunks of removed collection");
        }
        for key in keys {
            writer.delete(key).await?;
        }
    }

    let mut collection_versions = Vec::new();
    for collection in &snapshot.collections {
        let write_metadata = match strategy {
            SaveStrategy::FullOverwrite => {
                let persisted_max = inventory.max_ordinal(&collection.meta.name);
                write_all_chunks(&mut writer, config, collection, persisted_max).await?;
                true
            }
            SaveStrategy::Incremental => {
                write_dirty_chunks(&mut writer, config, collection).await?;
                collection.dirty || !collection.dirty_ids.is_empty()
            }
        };
        if write_metadata {
            let version = VersionId::generate();
            let mut meta = collection.meta.clone();
            meta.version_id = Some(version.clone());
            writer
                .put(ChunkKey::metadata(&meta.name), serde_json::to_string(&meta)?)
                .await?;
            collection_versions.push((meta.name, version));
        }
    }

    let database_version = VersionId::generate();
    let mut meta = snapshot.meta;
    meta.version_id = Some(database_version.clone());
    writer
        .put(ChunkKey::Database, serde_json::to_string(&meta)?)
        .await?;

    Ok(SaveReport {
        strategy,
        written: writer.written,
        deleted: writer.deleted,
        bytes_written: writer.bytes_written,
        database_version,
        collection_versions,
    })
}

/// Writes chunks `0..=max` of a collection and deletes persisted chunks
/// past the new end.
async fn write_all_chunks(
    writer: &mut ChunkWriter<'_>,
    config: &AdapterConfig,
    collection: &SnapshotCollection,
    persisted_max: Option<u64>,
) -> PersistResult<()> {
    let name = collection.meta.name.as_str();
    let documents = collection.documents.load(name)?;
    let chunks = documents.chunks(config.chunk_size);
    let last = chunks.last_ordinal();
    for (ordinal, documents) in chunks {
        let value = config.hooks.encode(name, documents).await?;
        writer.put(ChunkKey::data(name, ordinal), value).await?;
    }

    if let Some(persisted_max) = persisted_max.filter(|&max| max > last) {
        warn!(
            collection = name,
            from = last + 1,
            to = persisted_max,
            "deleting stale trailing chunks"
        );
        for ordinal in last + 1..=persisted_max {
            writer.delete(ChunkKey::data(name, ordinal)).await?;
        }
    }
    Ok(())
}

/// Writes the chunks touched by the collection's dirty ledger.
///
/// An untouched collection is not decoded.
async fn write_dirty_chunks(
    writer: &mut ChunkWriter<'_>,
    config: &AdapterConfig,
    collection: &SnapshotCollection,
) -> PersistResult<()> {
    let ordinals = collection.dirty_ids.chunk_ordinals(config.chunk_size);
    if ordinals.is_empty() {
        return Ok(());
    }
    let name = collection.meta.name.as_str();
    let documents = collection.documents.load(name)?;
    for ordinal in ordinals {
        let chunk = documents.chunk(ordinal, config.chunk_size);
        let value = config.hooks.encode(name, chunk).await?;
        writer.put(ChunkKey::data(name, ordinal), value).await?;
    }
    Ok(())
}

/// Persisted chunk keys grouped by collection.
#[derive(Debug, Default)]
struct Inventory {
    collections: BTreeMap<String, Vec<ChunkKey>>,
}

impl Inventory {
    async fn scan(txn: &dyn KvTransaction) -> PersistResult<Self> {
        let mut inventory = Self::default();
        for raw in txn.get_all_keys().await? {
            let key = match ChunkKey::parse(&raw) {
                Ok(key) => key,
                Err(_) => {
                    warn!(key = %raw, "ignoring unrecognized key");
                    continue;
                }
            };
            if let Some(name) = key.collection().map(str::to_string) {
                inventory.collections.entry(name).or_default().push(key);
            }
        }
        Ok(inventory)
    }

    fn collections(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    fn max_ordinal(&self, collection: &str) -> Option<u64> {
        self.collections
            .get(collection)?
            .iter()
            .filter_map(|key| match key {
                ChunkKey::Data { ordinal, .. } => Some(*ordinal),
                _ => None,
            })
            .max()
    }

    fn take(&mut self, collection: &str) -> Vec<ChunkKey> {
        self.collections.remove(collection).unwrap_or_default()
    }
}

struct ChunkWriter<'a> {
    txn: &'a dyn KvTransaction,
    written: Vec<ChunkKey>,
    deleted: Vec<ChunkKey>,
    bytes_written: usize,
}

impl<'a> ChunkWriter<'a> {
    fn new(txn: &'a dyn KvTransaction) -> Self {
        Self {
            txn,
            written: Vec::new(),
            deleted: Vec::new(),
            bytes_written: 0,
        }
    }

    async fn put(&mut self, key: ChunkKey, value: String) -> PersistResult<()> {
        debug!(key = %key, bytes = value.len(), "writing chunk");
        self.bytes_written += value.len();
        self.txn.put(KvRecord::new(key.to_string(), value)).await?;
        self.written.push(key);
        Ok(())
    }

    async fn delete(&mut self, key: ChunkKey) -> PersistResult<()> {
        debug!(key = %key, "deleting chunk");
        self.txn.delete(&key.to_string()).await?;
        self.deleted.push(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkdb_core::Database;

    fn loki(version: Option<&str>) -> String {
        let mut meta = Database::new("app").meta();
        meta.version_id = version.map(VersionId::from_string);
        serde_json::to_string(&meta).unwrap()
    }

    #[test]
    fn first_save_on_empty_store_is_incremental() {
        assert_eq!(choose_strategy(None, None), SaveStrategy::Incremental);
    }

    #[test]
    fn matching_version_is_incremental() {
        let observed = VersionId::from_string("v1");
        assert_eq!(
            choose_strategy(Some(&loki(Some("v1"))), Some(&observed)),
            SaveStrategy::Incremental
        );
    }

    #[test]
    fn foreign_version_forces_overwrite() {
        let observed = VersionId::from_string("v1");
        assert_eq!(
            choose_strategy(Some(&loki(Some("v2"))), Some(&observed)),
            SaveStrategy::FullOverwrite
        );
        assert_eq!(
            choose_strategy(Some(&loki(Some("v2"))), None),
            SaveStrategy::FullOverwrite
        );
        assert_eq!(choose_strategy(None, Some(&observed)), SaveStrategy::FullOverwrite);
    }

    #[test]
    fn unreadable_database_chunk_forces_overwrite() {
        assert_eq!(
            choose_strategy(Some("{not json"), None),
            SaveStrategy::FullOverwrite
        );
    }

    #[test]
    fn report_lists_data_chunks_per_collection() {
        let report = SaveReport {
            strategy: SaveStrategy::Incremental,
            written: vec![
                ChunkKey::data("a", 0),
                ChunkKey::data("b", 3),
                ChunkKey::data("a", 2),
                ChunkKey::metadata("a"),
                ChunkKey::Database,
            ],
            deleted: Vec::new(),
            bytes_written: 0,
            database_version: VersionId::from_string("v"),
            collection_versions: Vec::new(),
        };
        assert_eq!(report.data_chunks_written("a"), vec![0, 2]);
        assert!(!report.is_full_overwrite());
    }
}
