//! Load pipeline.

use crate::codec::ChunkHooks;
use crate::config::AdapterConfig;
use crate::error::{PersistError, PersistResult};
use crate::key::{ChunkKey, DATABASE_KEY};
use crate::versions::ObservedVersions;
use chunkdb_core::{Collection, CollectionMeta, CoreError, Database, DatabaseMeta, DeferredLoader};
use chunkdb_storage::{KeyRange, KvRecord, KvTransaction, StorageError};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info};

/// Reads and reassembles a database. Returns `None` if nothing is stored.
pub(crate) async fn read_database(
    txn: Arc<dyn KvTransaction>,
    config: &AdapterConfig,
    name: &str,
) -> PersistResult<Option<(Database, ObservedVersions)>> {
    if let Some(hook) = &config.on_fetch_start {
        hook(name);
    }
    let mut keys = txn.get_all_keys().await?;
    if keys.is_empty() {
        return Ok(None);
    }

    let records = if keys.len() > config.fetch_batch_threshold {
        keys.sort_unstable();
        let ranges = key_ranges(&keys, config.megachunk_count);
        debug!(keys = keys.len(), ranges = ranges.len(), "fetching megachunks");
        fetch_megachunks(&txn, ranges).await?
    } else {
        txn.get_all(&KeyRange::all()).await?
    };
    txn.commit().await?;

    info!(database = name, chunks = records.len(), "fetched chunks");
    assemble(records, config).await.map(Some)
}

/// Splits sorted `keys` into contiguous ranges of `keys.len() / count`
/// keys each.
///
/// The first range is unbounded below and the last unbounded above, so
/// together the ranges cover every key. A remainder yields one extra range.
pub(crate) fn key_ranges(keys: &[String], count: usize) -> Vec<KeyRange> {
    let per_range = (keys.len() / count.max(1)).max(1);
    let mut ranges = Vec::with_capacity(count + 1);
    let mut start = 0;
    while start < keys.len() {
        let end = start + per_range;
        let range = match (start == 0, end >= keys.len()) {
            (true, true) => KeyRange::all(),
            (true, false) => KeyRange::upper_bound(keys[end].as_str(), true),
            (false, true) => KeyRange::lower_bound(keys[start].as_str(), false),
            (false, false) => {
                KeyRange::bound(keys[start].as_str(), keys[end].as_str(), false, true)
            }
        };
        ranges.push(range);
        start = end;
    }
    ranges
}

/// Fetches key ranges in two staggered waves.
///
/// The first half of the ranges is requested at once. Each time a
/// first-wave fetch `i` returns, range `i + half` is requested, so backend
/// reads overlap with the processing of earlier results.
async fn fetch_megachunks(
    txn: &Arc<dyn KvTransaction>,
    ranges: Vec<KeyRange>,
) -> PersistResult<Vec<KvRecord>> {
    let half = ranges.len().div_ceil(2);
    let mut tasks = JoinSet::new();
    for idx in 0..half {
        spawn_fetch(&mut tasks, txn, &ranges, idx);
    }

    let mut records = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (idx, result) = joined.map_err(|err| {
            StorageError::Backend(format!("megachunk fetch task failed: {err}"))
        })?;
        let fetched = result?;
        debug!(megachunk = idx, records = fetched.len(), "megachunk fetched");
        records.extend(fetched);
        if idx < half && idx + half < ranges.len() {
            spawn_fetch(&mut tasks, txn, &ranges, idx + half);
        }
    }
    Ok(records)
}

type FetchOutput = (usize, Result<Vec<KvRecord>, StorageError>);

fn spawn_fetch(
    tasks: &mut JoinSet<FetchOutput>,
    txn: &Arc<dyn KvTransaction>,
    ranges: &[KeyRange],
    idx: usize,
) {
    let txn = Arc::clone(txn);
    let range = ranges[idx].clone();
    tasks.spawn(async move { (idx, txn.get_all(&range).await) });
}

/// Classifies and parses fetched chunks, then rebuilds the database.
async fn assemble(
    records: Vec<KvRecord>,
    config: &AdapterConfig,
) -> PersistResult<(Database, ObservedVersions)> {
    let mut database: Option<DatabaseMeta> = None;
    let mut metadata: HashMap<String, CollectionMeta> = HashMap::new();
    let mut data: HashMap<String, Vec<(u64, Value)>> = HashMap::new();

    for record in &records {
        match ChunkKey::parse(&record.key)? {
            ChunkKey::Database => database = Some(parse_chunk(record)?),
            ChunkKey::Metadata { collection } => {
                let meta: CollectionMeta = parse_chunk(record)?;
                if meta.name != collection {
                    return Err(PersistError::corrupted(format!(
                        "chunk {:?} holds the record of collection {:?}",
                        record.key, meta.name
                    )));
                }
                metadata.insert(collection, meta);
            }
            ChunkKey::Data {
                collection,
                ordinal,
            } => {
                data.entry(collection)
                    .or_default()
                    .push((ordinal, parse_chunk(record)?));
            }
        }
    }
    drop(records);

    let meta = database.ok_or_else(|| {
        PersistError::corrupted(format!("database chunk {DATABASE_KEY:?} is missing"))
    })?;

    let mut collections = Vec::with_capacity(meta.collections.len());
    let mut versions = Vec::new();
    for stub in &meta.collections {
        let record = metadata.remove(&stub.name).ok_or_else(|| {
            PersistError::corrupted(format!(
                "metadata chunk of collection {:?} is missing",
                stub.name
            ))
        })?;
        let mut chunks = data.remove(&stub.name).unwrap_or_default();
        chunks.sort_unstable_by_key(|(ordinal, _)| *ordinal);
        if let Some(version) = &record.version_id {
            versions.push((stub.name.clone(), version.clone()));
        }

        let collection = if config.is_lazy(&stub.name) {
            debug!(collection = %stub.name, chunks = chunks.len(), "deferring collection decode");
            deferred_collection(record, chunks, config.hooks.clone())?
        } else {
            decode_collection(record, chunks, &config.hooks).await?
        };
        collections.push(collection);
    }

    let orphans: BTreeSet<&String> = metadata.keys().chain(data.keys()).collect();
    for orphan in orphans {
        debug!(collection = %orphan, "ignoring chunks of unlisted collection");
    }

    let observed = ObservedVersions::loaded(meta.version_id.clone(), versions);
    Ok((Database::from_parts(meta, collections), observed))
}

fn parse_chunk<T: DeserializeOwned>(record: &KvRecord) -> PersistResult<T> {
    serde_json::from_str(&record.value).map_err(|err| {
        PersistError::corrupted(format!("cannot parse chunk {:?}: {err}", record.key))
    })
}

async fn decode_collection(
    meta: CollectionMeta,
    chunks: Vec<(u64, Value)>,
    hooks: &ChunkHooks,
) -> PersistResult<Collection> {
    let mut documents = Vec::new();
    for (_, chunk) in chunks {
        documents.extend(hooks.decode(&meta.name, chunk).await?);
    }
    Ok(Collection::from_parts(meta, documents)?)
}

fn deferred_collection(
    meta: CollectionMeta,
    chunks: Vec<(u64, Value)>,
    hooks: ChunkHooks,
) -> PersistResult<Collection> {
    let name = meta.name.clone();
    let chunks: Vec<Value> = chunks.into_iter().map(|(_, chunk)| chunk).collect();
    let loader: DeferredLoader = Arc::new(move || {
        let mut documents = Vec::new();
        for chunk in &chunks {
            let decoded = hooks
                .decode_blocking(&name, chunk.clone())
                .map_err(|err| CoreError::materialize(name.as_str(), err.to_string()))?;
            documents.extend(decoded);
        }
        Ok(documents)
    });
    Ok(Collection::deferred(meta, loader)?)
}
