//! Collections of documents.

use crate::chunk::{locate_chunk, ChunkRanges};
use crate::document::{into_body, Document, DocumentMeta, SurrogateId};
use crate::error::{CoreError, CoreResult};
use crate::index::SurrogateIndex;
use crate::ledger::DirtyLedger;
use crate::version::VersionId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// The documents of a collection, in ascending surrogate id order, together
/// with their surrogate index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentSet {
    documents: Vec<Document>,
    index: SurrogateIndex,
}

impl DocumentSet {
    /// Builds a set from documents already in ascending surrogate id order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnorderedDocuments`] if the ids do not strictly
    /// increase.
    pub fn from_documents(collection: &str, documents: Vec<Document>) -> CoreResult<Self> {
        let index = SurrogateIndex::build(documents.iter().map(Document::id)).map_err(
            |violation| CoreError::UnorderedDocuments {
                collection: collection.to_string(),
                previous: violation.previous,
                next: violation.next,
            },
        )?;
        Ok(Self { documents, index })
    }

    /// Returns the documents.
    #[must_use]
    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    /// Returns the surrogate index.
    #[must_use]
    pub fn index(&self) -> &SurrogateIndex {
        &self.index
    }

    /// Returns the number of documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Returns true if there are no documents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Returns the highest surrogate id present.
    #[must_use]
    pub fn max_id(&self) -> Option<SurrogateId> {
        self.index.last()
    }

    /// Returns the document with surrogate id `id`.
    #[must_use]
    pub fn get(&self, id: SurrogateId) -> Option<&Document> {
        self.index.position(id).map(|pos| &self.documents[pos])
    }

    /// Returns the documents of chunk `ordinal`.
    #[must_use]
    pub fn chunk(&self, ordinal: u64, chunk_size: usize) -> &[Document] {
        &self.documents[locate_chunk(self, ordinal, chunk_size)]
    }

    /// Iterates over every chunk from ordinal 0 to the highest occupied one.
    #[must_use]
    pub fn chunks(&self, chunk_size: usize) -> ChunkRanges<'_> {
        ChunkRanges::new(self, chunk_size)
    }

    /// Consumes the set, returning its documents.
    #[must_use]
    pub fn into_documents(self) -> Vec<Document> {
        self.documents
    }

    pub(crate) fn push(&mut self, document: Document) {
        self.index.push(document.id());
        self.documents.push(document);
    }

    pub(crate) fn get_mut(&mut self, id: SurrogateId) -> Option<&mut Document> {
        self.index
            .position(id)
            .map(|pos| &mut self.documents[pos])
    }

    pub(crate) fn remove(&mut self, id: SurrogateId) -> Option<Document> {
        let pos = self.index.position(id)?;
        self.index.remove(pos);
        Some(self.documents.remove(pos))
    }
}

/// The persisted record of a collection, without its documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionMeta {
    /// Collection name.
    pub name: String,
    /// Surrogate id the next inserted document receives.
    #[serde(default)]
    pub next_id: SurrogateId,
    /// Version id of the last save that persisted this collection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<VersionId>,
    /// Opaque settings owned by higher layers, persisted as-is.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
}

impl CollectionMeta {
    /// Creates the record of a new, empty collection.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            next_id: 0,
            version_id: None,
            options: Map::new(),
        }
    }
}

/// Produces the documents of a collection whose decoding was deferred.
///
/// Called on first data access. On failure the loader is kept so a later
/// access can retry. A save that must rewrite an undecoded collection calls
/// it too, without decoding the live collection.
pub type DeferredLoader = Arc<dyn Fn() -> CoreResult<Vec<Document>> + Send + Sync>;

/// Documents captured by a save snapshot.
#[derive(Clone)]
pub enum SnapshotDocuments {
    /// Decoded documents, shared with the live collection until its next
    /// mutation.
    Loaded(Arc<DocumentSet>),
    /// A lazily loaded collection that was never accessed.
    Deferred(DeferredLoader),
}

impl SnapshotDocuments {
    /// Returns true if the documents were never decoded.
    #[must_use]
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred(_))
    }

    /// Returns the documents, running the loader if they were never decoded.
    ///
    /// # Errors
    ///
    /// Returns an error if deferred documents fail to decode or arrive out
    /// of order.
    pub fn load(&self, collection: &str) -> CoreResult<Arc<DocumentSet>> {
        match self {
            Self::Loaded(set) => Ok(Arc::clone(set)),
            Self::Deferred(loader) => {
                debug!(collection, "decoding deferred collection for save");
                Ok(Arc::new(DocumentSet::from_documents(collection, loader()?)?))
            }
        }
    }
}

impl fmt::Debug for SnapshotDocuments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loaded(set) => f.debug_tuple("Loaded").field(&set.len()).finish(),
            Self::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

struct LazyData {
    loaded: OnceLock<Arc<DocumentSet>>,
    pending: Mutex<Option<DeferredLoader>>,
}

impl LazyData {
    fn loaded(set: DocumentSet) -> Self {
        Self {
            loaded: OnceLock::from(Arc::new(set)),
            pending: Mutex::new(None),
        }
    }

    fn deferred(loader: DeferredLoader) -> Self {
        Self {
            loaded: OnceLock::new(),
            pending: Mutex::new(Some(loader)),
        }
    }
}

/// A named collection of documents.
///
/// Documents receive monotonically increasing surrogate ids on insert.
/// Every mutation is recorded in the collection's [`DirtyLedger`]; changes
/// to the collection record itself set the dirty flag.
///
/// A collection loaded lazily keeps its documents undecoded until the first
/// access that needs them. Such accesses are fallible for that reason.
pub struct Collection {
    meta: CollectionMeta,
    data: LazyData,
    ledger: DirtyLedger,
    dirty: bool,
}

impl Collection {
    /// Creates a new, empty collection.
    ///
    /// A new collection is dirty, so its record is persisted by the next save.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidName`] if the name is empty or contains `.`.
    pub fn new(name: impl Into<String>) -> CoreResult<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            meta: CollectionMeta::new(name),
            data: LazyData::loaded(DocumentSet::default()),
            ledger: DirtyLedger::new(),
            dirty: true,
        })
    }

    /// Reassembles a persisted collection from its record and documents.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or the documents are not in
    /// ascending surrogate id order.
    pub fn from_parts(meta: CollectionMeta, documents: Vec<Document>) -> CoreResult<Self> {
        validate_name(&meta.name)?;
        let set = DocumentSet::from_documents(&meta.name, documents)?;
        Ok(Self {
            meta,
            data: LazyData::loaded(set),
            ledger: DirtyLedger::new(),
            dirty: false,
        })
    }

    /// Creates a persisted collection whose documents are produced by
    /// `loader` on first access.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidName`] if the name is invalid.
    pub fn deferred(meta: CollectionMeta, loader: DeferredLoader) -> CoreResult<Self> {
        validate_name(&meta.name)?;
        Ok(Self {
            meta,
            data: LazyData::deferred(loader),
            ledger: DirtyLedger::new(),
            dirty: false,
        })
    }

    /// Returns the collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// Returns the collection record.
    #[must_use]
    pub fn meta(&self) -> &CollectionMeta {
        &self.meta
    }

    /// Returns the version id of the last save or load.
    #[must_use]
    pub fn version_id(&self) -> Option<&VersionId> {
        self.meta.version_id.as_ref()
    }

    /// Returns the surrogate id the next insert will use, at least.
    #[must_use]
    pub fn next_id(&self) -> SurrogateId {
        self.meta.next_id
    }

    /// Returns the persisted options.
    #[must_use]
    pub fn options(&self) -> &Map<String, Value> {
        &self.meta.options
    }

    /// Sets a persisted option and marks the collection dirty.
    pub fn set_option(&mut self, key: impl Into<String>, value: Value) {
        self.meta.options.insert(key.into(), value);
        self.dirty = true;
    }

    /// Returns true if the collection record changed since the last save.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Marks the collection record as changed.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Returns the ids mutated since the last save.
    #[must_use]
    pub fn dirty_ids(&self) -> &DirtyLedger {
        &self.ledger
    }

    /// Returns true if the documents are decoded.
    #[must_use]
    pub fn is_materialized(&self) -> bool {
        self.data.loaded.get().is_some()
    }

    /// Returns the document set, decoding deferred documents first if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if deferred documents fail to decode or arrive out
    /// of order.
    pub fn materialize(&self) -> CoreResult<&DocumentSet> {
        if let Some(set) = self.data.loaded.get() {
            return Ok(set.as_ref());
        }
        let mut pending = self.data.pending.lock();
        if let Some(set) = self.data.loaded.get() {
            return Ok(set.as_ref());
        }
        let set = match pending.as_ref() {
            Some(loader) => {
                debug!(collection = %self.meta.name, "materializing deferred collection");
                DocumentSet::from_documents(&self.meta.name, loader()?)?
            }
            None => DocumentSet::default(),
        };
        *pending = None;
        Ok(self.data.loaded.get_or_init(|| Arc::new(set)).as_ref())
    }

    /// Captures the documents for a save without decoding deferred data.
    pub(crate) fn snapshot_documents(&self) -> SnapshotDocuments {
        if let Some(set) = self.data.loaded.get() {
            return SnapshotDocuments::Loaded(Arc::clone(set));
        }
        let pending = self.data.pending.lock();
        match (self.data.loaded.get(), pending.as_ref()) {
            (Some(set), _) => SnapshotDocuments::Loaded(Arc::clone(set)),
            (None, Some(loader)) => SnapshotDocuments::Deferred(Arc::clone(loader)),
            (None, None) => SnapshotDocuments::Loaded(Arc::default()),
        }
    }

    /// Returns the documents in ascending surrogate id order.
    ///
    /// # Errors
    ///
    /// Fails only for a deferred collection that cannot be decoded.
    pub fn documents(&self) -> CoreResult<&[Document]> {
        Ok(self.materialize()?.documents())
    }

    /// Returns the document with surrogate id `id`.
    ///
    /// # Errors
    ///
    /// Fails only for a deferred collection that cannot be decoded.
    pub fn get(&self, id: SurrogateId) -> CoreResult<Option<&Document>> {
        Ok(self.materialize()?.get(id))
    }

    /// Returns the number of documents.
    ///
    /// # Errors
    ///
    /// Fails only for a deferred collection that cannot be decoded.
    pub fn len(&self) -> CoreResult<usize> {
        Ok(self.materialize()?.len())
    }

    /// Returns true if the collection holds no documents.
    ///
    /// # Errors
    ///
    /// Fails only for a deferred collection that cannot be decoded.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.materialize()?.is_empty())
    }

    /// Returns the highest live surrogate id.
    ///
    /// # Errors
    ///
    /// Fails only for a deferred collection that cannot be decoded.
    pub fn max_surrogate_id(&self) -> CoreResult<Option<SurrogateId>> {
        Ok(self.materialize()?.max_id())
    }

    /// Inserts a document and returns its surrogate id.
    ///
    /// # Errors
    ///
    /// Returns an error if `body` is not a JSON object, or if deferred
    /// documents cannot be decoded.
    pub fn insert(&mut self, body: Value) -> CoreResult<SurrogateId> {
        let body = into_body(body)?;
        let floor = self.meta.next_id;
        let set = self.set_mut()?;
        let id = set.max_id().map_or(floor, |max| floor.max(max + 1));
        set.push(Document::new(id, DocumentMeta::default(), body));
        self.meta.next_id = id + 1;
        self.ledger.mark(id);
        Ok(id)
    }

    /// Replaces the body of a document.
    ///
    /// # Errors
    ///
    /// Returns an error if `body` is not a JSON object or no document has
    /// surrogate id `id`.
    pub fn update(&mut self, id: SurrogateId, body: Value) -> CoreResult<()> {
        let body = into_body(body)?;
        let name = self.meta.name.clone();
        let document = self
            .set_mut()?
            .get_mut(id)
            .ok_or(CoreError::DocumentNotFound {
                collection: name,
                id,
            })?;
        document.replace_body(body);
        self.ledger.mark(id);
        Ok(())
    }

    /// Removes a document and returns it.
    ///
    /// # Errors
    ///
    /// Returns an error if no document has surrogate id `id`.
    pub fn remove(&mut self, id: SurrogateId) -> CoreResult<Document> {
        let name = self.meta.name.clone();
        let document = self.set_mut()?.remove(id).ok_or(CoreError::DocumentNotFound {
            collection: name,
            id,
        })?;
        self.ledger.mark(id);
        Ok(document)
    }

    pub(crate) fn take_dirty(&mut self) -> (DirtyLedger, bool) {
        (self.ledger.take(), std::mem::take(&mut self.dirty))
    }

    pub(crate) fn restore_dirty(&mut self, ledger: DirtyLedger, dirty: bool) {
        self.ledger.restore(ledger);
        self.dirty |= dirty;
    }

    pub(crate) fn set_version_id(&mut self, version_id: VersionId) {
        self.meta.version_id = Some(version_id);
    }

    /// Copies the documents first if a snapshot still shares them.
    fn set_mut(&mut self) -> CoreResult<&mut DocumentSet> {
        self.materialize()?;
        let shared = self
            .data
            .loaded
            .get_mut()
            .unwrap_or_else(|| unreachable!("materialized collection has no data"));
        Ok(Arc::make_mut(shared))
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.meta.name)
            .field("next_id", &self.meta.next_id)
            .field("materialized", &self.is_materialized())
            .field("dirty", &self.dirty)
            .field("dirty_ids", &self.ledger.len())
            .finish_non_exhaustive()
    }
}

fn validate_name(name: &str) -> CoreResult<()> {
    let reason = if name.is_empty() {
        "must not be empty"
    } else if name.contains('.') {
        "must not contain '.'"
    } else {
        return Ok(());
    };
    Err(CoreError::InvalidName {
        name: name.to_string(),
        reason,
    })
}
