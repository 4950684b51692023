//! Databases: named groups of collections.

use crate::collection::{Collection, CollectionMeta, SnapshotDocuments};
use crate::error::{CoreError, CoreResult};
use crate::ledger::DirtyLedger;
use crate::version::VersionId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Version of the persisted layout written by this crate.
pub const ENGINE_VERSION: u32 = 1;

fn default_engine_version() -> u32 {
    ENGINE_VERSION
}

/// Name-only reference to a collection inside a [`DatabaseMeta`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStub {
    /// Collection name.
    pub name: String,
}

/// The persisted database record.
///
/// Collections appear as name-only stubs. Their records and documents are
/// persisted separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseMeta {
    /// Database name.
    pub name: String,
    /// Layout version.
    #[serde(default = "default_engine_version")]
    pub engine_version: u32,
    /// Collections, in creation order.
    #[serde(default)]
    pub collections: Vec<CollectionStub>,
    /// Version id of the last save.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<VersionId>,
    /// Opaque settings owned by higher layers, persisted as-is.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
}

/// An in-memory database.
///
/// # Example
///
/// ```
/// use chunkdb_core::Database;
/// use serde_json::json;
///
/// let mut db = Database::new("app");
/// let users = db.add_collection("users").unwrap();
/// let id = users.insert(json!({"name": "ada"})).unwrap();
/// assert_eq!(id, 0);
/// assert!(db.has_unsaved_changes());
/// ```
#[derive(Debug)]
pub struct Database {
    name: String,
    engine_version: u32,
    options: Map<String, Value>,
    version_id: Option<VersionId>,
    collections: Vec<Collection>,
    removed: Vec<String>,
}

impl Database {
    /// Creates an empty database.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            engine_version: ENGINE_VERSION,
            options: Map::new(),
            version_id: None,
            collections: Vec::new(),
            removed: Vec::new(),
        }
    }

    /// Reassembles a persisted database from its record and collections.
    ///
    /// The stubs of `meta` are not consulted; `collections` is authoritative.
    #[must_use]
    pub fn from_parts(meta: DatabaseMeta, collections: Vec<Collection>) -> Self {
        Self {
            name: meta.name,
            engine_version: meta.engine_version,
            options: meta.options,
            version_id: meta.version_id,
            collections,
            removed: Vec::new(),
        }
    }

    /// Returns the database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the layout version this database was loaded with.
    #[must_use]
    pub fn engine_version(&self) -> u32 {
        self.engine_version
    }

    /// Returns the version id of the last save or load.
    #[must_use]
    pub fn version_id(&self) -> Option<&VersionId> {
        self.version_id.as_ref()
    }

    /// Returns the persisted options.
    #[must_use]
    pub fn options(&self) -> &Map<String, Value> {
        &self.options
    }

    /// Sets a persisted option.
    pub fn set_option(&mut self, key: impl Into<String>, value: Value) {
        self.options.insert(key.into(), value);
    }

    /// Creates a collection.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CollectionExists`] if the name is taken, or
    /// [`CoreError::InvalidName`] if it is not usable.
    pub fn add_collection(&mut self, name: impl Into<String>) -> CoreResult<&mut Collection> {
        let name = name.into();
        if self.collection(&name).is_some() {
            return Err(CoreError::CollectionExists { name });
        }
        let collection = Collection::new(name)?;
        self.collections.push(collection);
        let last = self.collections.len() - 1;
        Ok(&mut self.collections[last])
    }

    /// Returns a collection by name.
    #[must_use]
    pub fn collection(&self, name: &str) -> Option<&Collection> {
        self.collections.iter().find(|c| c.name() == name)
    }

    /// Returns a collection by name, mutably.
    pub fn collection_mut(&mut self, name: &str) -> Option<&mut Collection> {
        self.collections.iter_mut().find(|c| c.name() == name)
    }

    /// Returns a collection by name, mutably, or an error if absent.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CollectionNotFound`] if there is no such collection.
    pub fn try_collection_mut(&mut self, name: &str) -> CoreResult<&mut Collection> {
        self.collection_mut(name)
            .ok_or_else(|| CoreError::CollectionNotFound {
                name: name.to_string(),
            })
    }

    /// Removes a collection. Its persisted chunks are deleted by the next save.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CollectionNotFound`] if there is no such collection.
    pub fn remove_collection(&mut self, name: &str) -> CoreResult<Collection> {
        let pos = self
            .collections
            .iter()
            .position(|c| c.name() == name)
            .ok_or_else(|| CoreError::CollectionNotFound {
                name: name.to_string(),
            })?;
        if !self.removed.iter().any(|r| r == name) {
            self.removed.push(name.to_string());
        }
        Ok(self.collections.remove(pos))
    }

    /// Iterates over the collections in creation order.
    pub fn collections(&self) -> impl Iterator<Item = &Collection> {
        self.collections.iter()
    }

    /// Returns the collection names in creation order.
    #[must_use]
    pub fn collection_names(&self) -> Vec<&str> {
        self.collections.iter().map(Collection::name).collect()
    }

    /// Returns true if anything changed since the last save.
    #[must_use]
    pub fn has_unsaved_changes(&self) -> bool {
        !self.removed.is_empty()
            || self
                .collections
                .iter()
                .any(|c| c.is_dirty() || !c.dirty_ids().is_empty())
    }

    /// Returns the persisted database record.
    #[must_use]
    pub fn meta(&self) -> DatabaseMeta {
        DatabaseMeta {
            name: self.name.clone(),
            engine_version: self.engine_version,
            collections: self
                .collections
                .iter()
                .map(|c| CollectionStub {
                    name: c.name().to_string(),
                })
                .collect(),
            version_id: self.version_id.clone(),
            options: self.options.clone(),
        }
    }

    /// Captures everything a save needs and clears the dirty state.
    ///
    /// Documents are shared with the snapshot, not copied; the next mutation
    /// of a collection copies its documents if the snapshot is still alive.
    /// Deferred collections stay undecoded. If the save that consumes the
    /// snapshot fails, hand [`DatabaseSnapshot::dirty_state`] back to
    /// [`Database::restore_dirty`].
    pub fn prepare_save(&mut self) -> DatabaseSnapshot {
        let meta = self.meta();
        let collections = self
            .collections
            .iter_mut()
            .map(|collection| {
                let documents = collection.snapshot_documents();
                let (dirty_ids, dirty) = collection.take_dirty();
                SnapshotCollection {
                    meta: collection.meta().clone(),
                    documents,
                    dirty_ids,
                    dirty,
                }
            })
            .collect();

        DatabaseSnapshot {
            meta,
            collections,
            removed_collections: std::mem::take(&mut self.removed),
        }
    }

    /// Puts back dirty state taken by [`Database::prepare_save`].
    ///
    /// Collections removed in the meantime are skipped.
    pub fn restore_dirty(&mut self, state: DirtyState) {
        for (name, ledger, dirty) in state.collections {
            if let Some(collection) = self.collection_mut(&name) {
                collection.restore_dirty(ledger, dirty);
            }
        }
        for name in state.removed {
            if self.collection(&name).is_none() && !self.removed.contains(&name) {
                self.removed.push(name);
            }
        }
    }

    /// Records the version ids assigned by a committed save.
    pub fn apply_saved_versions(
        &mut self,
        database: VersionId,
        collections: &[(String, VersionId)],
    ) {
        self.version_id = Some(database);
        for (name, version) in collections {
            if let Some(collection) = self.collection_mut(name) {
                collection.set_version_id(version.clone());
            }
        }
    }
}

/// One collection captured by [`Database::prepare_save`].
#[derive(Debug, Clone)]
pub struct SnapshotCollection {
    /// The collection record.
    pub meta: CollectionMeta,
    /// The documents.
    pub documents: SnapshotDocuments,
    /// Ids mutated since the previous save.
    pub dirty_ids: DirtyLedger,
    /// Whether the collection record changed since the previous save.
    pub dirty: bool,
}

/// Point-in-time copy of a database, ready to be persisted.
#[derive(Debug, Clone)]
pub struct DatabaseSnapshot {
    /// The database record.
    pub meta: DatabaseMeta,
    /// Collections in creation order.
    pub collections: Vec<SnapshotCollection>,
    /// Collections removed since the previous save.
    pub removed_collections: Vec<String>,
}

impl DatabaseSnapshot {
    /// Returns the dirty state carried by this snapshot, for restoring after
    /// a failed save.
    #[must_use]
    pub fn dirty_state(&self) -> DirtyState {
        DirtyState {
            collections: self
                .collections
                .iter()
                .map(|c| (c.meta.name.clone(), c.dirty_ids.clone(), c.dirty))
                .collect(),
            removed: self.removed_collections.clone(),
        }
    }
}

/// Dirty state detached from a database by a save in progress.
#[derive(Debug, Clone, Default)]
pub struct DirtyState {
    collections: Vec<(String, DirtyLedger, bool)>,
    removed: Vec<String>,
}

impl DirtyState {
    /// Returns true if the state carries no changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
            && self
                .collections
                .iter()
                .all(|(_, ledger, dirty)| ledger.is_empty() && !dirty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn populated() -> Database {
        let mut db = Database::new("app");
        let users = db.add_collection("users").unwrap();
        users.insert(json!({"name": "ada"})).unwrap();
        users.insert(json!({"name": "grace"})).unwrap();
        db.add_collection("empty").unwrap();
        db
    }

    #[test]
    fn add_collection_rejects_duplicates() {
        let mut db = populated();
        assert!(matches!(
            db.add_collection("users"),
            Err(CoreError::CollectionExists { .. })
        ));
    }

    #[test]
    fn meta_lists_stubs_in_order() {
        let db = populated();
        let meta = db.meta();
        let names: Vec<_> = meta.collections.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["users", "empty"]);
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["engineVersion"], json!(ENGINE_VERSION));
        assert!(value.get("versionId").is_none());
    }

    #[test]
    fn prepare_save_clears_dirty_state() {
        let mut db = populated();
        let snapshot = db.prepare_save();
        assert!(!db.has_unsaved_changes());
        assert_eq!(snapshot.collections.len(), 2);
        assert_eq!(snapshot.collections[0].dirty_ids.ids(), &[0, 1]);
        assert!(snapshot.collections[1].dirty);
        let documents = snapshot.collections[0].documents.load("users").unwrap();
        assert_eq!(documents.len(), 2);
    }

    #[test]
    fn snapshot_shares_documents_until_next_mutation() {
        let mut db = populated();
        let snapshot = db.prepare_save();
        let SnapshotDocuments::Loaded(shared) = &snapshot.collections[0].documents else {
            panic!("users should be decoded");
        };
        let live = db.collection("users").unwrap().materialize().unwrap();
        assert!(std::ptr::eq(shared.as_ref(), live));

        db.try_collection_mut("users")
            .unwrap()
            .update(0, json!({"name": "edited"}))
            .unwrap();
        let live = db.collection("users").unwrap().materialize().unwrap();
        assert!(!std::ptr::eq(shared.as_ref(), live));
        assert_eq!(shared.get(0).unwrap().get("name"), Some(&json!("ada")));
        assert_eq!(live.get(0).unwrap().get("name"), Some(&json!("edited")));
    }

    #[test]
    fn deferred_collection_stays_undecoded_in_snapshot() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let logs = Collection::deferred(
            CollectionMeta::new("logs"),
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::materialize("logs", "key unavailable"))
            }),
        )
        .unwrap();
        let mut db = Database::from_parts(populated().meta(), vec![logs]);

        let snapshot = db.prepare_save();
        assert!(snapshot.collections[0].documents.is_deferred());
        assert!(!db.collection("logs").unwrap().is_materialized());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert!(snapshot.collections[0].documents.load("logs").is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn restore_dirty_merges_with_later_changes() {
        let mut db = populated();
        let snapshot = db.prepare_save();
        db.try_collection_mut("users")
            .unwrap()
            .insert(json!({"name": "linus"}))
            .unwrap();

        db.restore_dirty(snapshot.dirty_state());
        let users = db.collection("users").unwrap();
        assert_eq!(users.dirty_ids().ids(), &[0, 1, 2]);
        assert!(db.collection("empty").unwrap().is_dirty());
    }

    #[test]
    fn removed_collections_travel_with_snapshot() {
        let mut db = populated();
        db.remove_collection("empty").unwrap();
        assert!(db.has_unsaved_changes());

        let snapshot = db.prepare_save();
        assert_eq!(snapshot.removed_collections, vec!["empty".to_string()]);
        assert!(!db.has_unsaved_changes());

        db.restore_dirty(snapshot.dirty_state());
        assert!(db.has_unsaved_changes());
    }

    #[test]
    fn readded_collection_is_not_restored_as_removed() {
        let mut db = populated();
        db.remove_collection("empty").unwrap();
        let snapshot = db.prepare_save();
        db.add_collection("empty").unwrap();
        db.restore_dirty(snapshot.dirty_state());
        assert!(db.collection("empty").is_some());
        let again = db.prepare_save();
        assert!(again.removed_collections.is_empty());
    }

    #[test]
    fn remove_missing_collection_errors() {
        let mut db = populated();
        assert!(matches!(
            db.remove_collection("nope"),
            Err(CoreError::CollectionNotFound { .. })
        ));
    }

    #[test]
    fn apply_saved_versions_updates_records() {
        let mut db = populated();
        let v = VersionId::from_string("db1");
        let c = VersionId::from_string("users1");
        db.apply_saved_versions(v.clone(), &[("users".to_string(), c.clone())]);
        assert_eq!(db.version_id(), Some(&v));
        assert_eq!(db.collection("users").unwrap().version_id(), Some(&c));
        assert_eq!(db.collection("empty").unwrap().version_id(), None);
    }

    #[test]
    fn dirty_state_emptiness() {
        let mut db = populated();
        assert!(!db.prepare_save().dirty_state().is_empty());
        assert!(db.prepare_save().dirty_state().is_empty());
    }
}
