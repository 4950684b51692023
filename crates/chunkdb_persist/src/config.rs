//! Adapter configuration.

use crate::codec::{
    boxed_async, AsyncChunkCodec, AsyncChunkTransform, AsyncFnCodec, ChunkCodec, ChunkHooks,
    ChunkTransform, FnCodec,
};
use crate::error::{PersistError, PersistResult};
use chunkdb_core::DEFAULT_CHUNK_SIZE;
use chunkdb_storage::{VersionChangeEvent, VersionChangeHook};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Default number of key ranges a large load is split into.
pub const DEFAULT_MEGACHUNK_COUNT: usize = 24;

/// Default key count above which a load is split into key ranges.
pub const DEFAULT_FETCH_BATCH_THRESHOLD: usize = 100;

/// Hook receiving the name of the database an operation runs against.
pub type DatabaseHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Configuration of an [`IncrementalAdapter`](crate::IncrementalAdapter).
///
/// # Example
///
/// ```rust
/// use chunkdb_persist::AdapterConfig;
///
/// let config = AdapterConfig::builder()
///     .megachunk_count(8)
///     .lazy_collection("logs")
///     .on_did_overwrite(|name| eprintln!("{name} was overwritten"))
///     .build()
///     .unwrap();
/// assert_eq!(config.megachunk_count(), 8);
/// assert!(config.is_lazy("logs"));
/// ```
#[derive(Clone)]
pub struct AdapterConfig {
    pub(crate) chunk_size: usize,
    pub(crate) megachunk_count: usize,
    pub(crate) fetch_batch_threshold: usize,
    pub(crate) lazy_collections: BTreeSet<String>,
    pub(crate) hooks: ChunkHooks,
    pub(crate) on_version_change: Option<VersionChangeHook>,
    pub(crate) on_fetch_start: Option<DatabaseHook>,
    pub(crate) on_did_overwrite: Option<DatabaseHook>,
}

impl AdapterConfig {
    /// Starts a builder with default values.
    #[must_use]
    pub fn builder() -> AdapterConfigBuilder {
        AdapterConfigBuilder::default()
    }

    /// Returns the number of surrogate ids per chunk.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Returns the number of key ranges a large load is split into.
    #[must_use]
    pub fn megachunk_count(&self) -> usize {
        self.megachunk_count
    }

    /// Returns the key count above which a load is split into key ranges.
    #[must_use]
    pub fn fetch_batch_threshold(&self) -> usize {
        self.fetch_batch_threshold
    }

    /// Returns true if the data chunks of `collection` are decoded lazily.
    #[must_use]
    pub fn is_lazy(&self, collection: &str) -> bool {
        self.lazy_collections.contains(collection)
    }

    /// Iterates over the lazily decoded collections.
    pub fn lazy_collections(&self) -> impl Iterator<Item = &str> {
        self.lazy_collections.iter().map(String::as_str)
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            megachunk_count: DEFAULT_MEGACHUNK_COUNT,
            fetch_batch_threshold: DEFAULT_FETCH_BATCH_THRESHOLD,
            lazy_collections: BTreeSet::new(),
            hooks: ChunkHooks::Identity,
            on_version_change: None,
            on_fetch_start: None,
            on_did_overwrite: None,
        }
    }
}

impl fmt::Debug for AdapterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterConfig")
            .field("chunk_size", &self.chunk_size)
            .field("megachunk_count", &self.megachunk_count)
            .field("fetch_batch_threshold", &self.fetch_batch_threshold)
            .field("lazy_collections", &self.lazy_collections)
            .field("codec", &self.hooks.describe())
            .field("on_version_change", &self.on_version_change.is_some())
            .field("on_fetch_start", &self.on_fetch_start.is_some())
            .field("on_did_overwrite", &self.on_did_overwrite.is_some())
            .finish()
    }
}

/// Builder for [`AdapterConfig`].
///
/// Codec hooks come in pairs: an encode hook needs the matching decode hook.
/// Synchronous and asynchronous hooks cannot be mixed.
#[derive(Default)]
#[must_use]
pub struct AdapterConfigBuilder {
    chunk_size: Option<usize>,
    megachunk_count: Option<usize>,
    fetch_batch_threshold: Option<usize>,
    lazy_collections: BTreeSet<String>,
    codec: Option<Arc<dyn ChunkCodec>>,
    async_codec: Option<Arc<dyn AsyncChunkCodec>>,
    serialize_chunk: Option<ChunkTransform>,
    deserialize_chunk: Option<ChunkTransform>,
    serialize_chunk_async: Option<AsyncChunkTransform>,
    deserialize_chunk_async: Option<AsyncChunkTransform>,
    on_version_change: Option<VersionChangeHook>,
    on_fetch_start: Option<DatabaseHook>,
    on_did_overwrite: Option<DatabaseHook>,
}

impl AdapterConfigBuilder {
    /// Sets the number of surrogate ids per chunk.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size);
        self
    }

    /// Sets the number of key ranges a large load is split into. Must be at
    /// least 4 and even.
    pub fn megachunk_count(mut self, count: usize) -> Self {
        self.megachunk_count = Some(count);
        self
    }

    /// Sets the key count above which a load is split into key ranges.
    pub fn fetch_batch_threshold(mut self, threshold: usize) -> Self {
        self.fetch_batch_threshold = Some(threshold);
        self
    }

    /// Marks a collection whose data chunks are decoded on first access.
    pub fn lazy_collection(mut self, name: impl Into<String>) -> Self {
        self.lazy_collections.insert(name.into());
        self
    }

    /// Marks several collections as lazily decoded.
    pub fn lazy_collections<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lazy_collections
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Sets a synchronous codec.
    pub fn codec(mut self, codec: impl ChunkCodec + 'static) -> Self {
        self.codec = Some(Arc::new(codec));
        self
    }

    /// Sets an asynchronous codec.
    pub fn async_codec(mut self, codec: impl AsyncChunkCodec + 'static) -> Self {
        self.async_codec = Some(Arc::new(codec));
        self
    }

    /// Sets the synchronous encode hook.
    pub fn serialize_chunk<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, Value) -> PersistResult<Value> + Send + Sync + 'static,
    {
        self.serialize_chunk = Some(Arc::new(f));
        self
    }

    /// Sets the synchronous decode hook.
    pub fn deserialize_chunk<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, Value) -> PersistResult<Value> + Send + Sync + 'static,
    {
        self.deserialize_chunk = Some(Arc::new(f));
        self
    }

    /// Sets the asynchronous encode hook.
    pub fn serialize_chunk_async<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PersistResult<Value>> + Send + 'static,
    {
        self.serialize_chunk_async = Some(boxed_async(f));
        self
    }

    /// Sets the asynchronous decode hook.
    pub fn deserialize_chunk_async<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PersistResult<Value>> + Send + 'static,
    {
        self.deserialize_chunk_async = Some(boxed_async(f));
        self
    }

    /// Sets the hook fired when another writer forces this adapter's
    /// connection closed, typically because the database was deleted
    /// elsewhere.
    pub fn on_version_change<F>(mut self, f: F) -> Self
    where
        F: Fn(&VersionChangeEvent) + Send + Sync + 'static,
    {
        self.on_version_change = Some(Arc::new(f));
        self
    }

    /// Sets the hook fired when a load starts enumerating keys.
    pub fn on_fetch_start<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_fetch_start = Some(Arc::new(f));
        self
    }

    /// Sets the hook fired after a save overwrote changes of another writer.
    pub fn on_did_overwrite<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_did_overwrite = Some(Arc::new(f));
        self
    }

    /// Validates the settings and builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::Config`] if:
    /// - the megachunk count is below 4 or odd
    /// - the chunk size is zero
    /// - a codec hook is set without its counterpart
    /// - synchronous and asynchronous codecs are both set
    /// - lazy collections are combined with an asynchronous codec
    pub fn build(self) -> PersistResult<AdapterConfig> {
        let megachunk_count = self.megachunk_count.unwrap_or(DEFAULT_MEGACHUNK_COUNT);
        if megachunk_count < 4 || megachunk_count % 2 != 0 {
            return Err(PersistError::config(format!(
                "megachunk count must be an even number of at least 4, got {megachunk_count}"
            )));
        }

        let chunk_size = self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);
        if chunk_size == 0 {
            return Err(PersistError::config("chunk size must be positive"));
        }

        let sync_hooks = pair(self.serialize_chunk, self.deserialize_chunk, "")?
            .map(|(s, d)| Arc::new(FnCodec::from_transforms(s, d)) as Arc<dyn ChunkCodec>);
        let async_hooks = pair(
            self.serialize_chunk_async,
            self.deserialize_chunk_async,
            " async",
        )?
        .map(|(s, d)| Arc::new(AsyncFnCodec::from_transforms(s, d)) as Arc<dyn AsyncChunkCodec>);

        let sync = one_of(self.codec, sync_hooks)?;
        let asynchronous = one_of(self.async_codec, async_hooks)?;
        let hooks = match (sync, asynchronous) {
            (Some(_), Some(_)) => {
                return Err(PersistError::config(
                    "synchronous and asynchronous chunk codecs are mutually exclusive",
                ))
            }
            (Some(codec), None) => ChunkHooks::Sync(codec),
            (None, Some(codec)) => ChunkHooks::Async(codec),
            (None, None) => ChunkHooks::Identity,
        };

        if hooks.is_async() && !self.lazy_collections.is_empty() {
            return Err(PersistError::config(
                "lazy collections cannot be combined with an asynchronous chunk codec",
            ));
        }

        Ok(AdapterConfig {
            chunk_size,
            megachunk_count,
            fetch_batch_threshold: self
                .fetch_batch_threshold
                .unwrap_or(DEFAULT_FETCH_BATCH_THRESHOLD),
            lazy_collections: self.lazy_collections,
            hooks,
            on_version_change: self.on_version_change,
            on_fetch_start: self.on_fetch_start,
            on_did_overwrite: self.on_did_overwrite,
        })
    }
}

fn pair<T>(
    serialize: Option<T>,
    deserialize: Option<T>,
    kind: &str,
) -> PersistResult<Option<(T, T)>> {
    match (serialize, deserialize) {
        (Some(s), Some(d)) => Ok(Some((s, d))),
        (None, None) => Ok(None),
        (Some(_), None) => Err(PersistError::config(format!(
            "serialize_chunk{kind} requires deserialize_chunk{kind}"
        ))),
        (None, Some(_)) => Err(PersistError::config(format!(
            "deserialize_chunk{kind} requires serialize_chunk{kind}"
        ))),
    }
}

fn one_of<T>(codec: Option<T>, hooks: Option<T>) -> PersistResult<Option<T>> {
    match (codec, hooks) {
        (Some(_), Some(_)) => Err(PersistError::config(
            "a codec and separate codec hooks cannot both be set",
        )),
        (codec, hooks) => Ok(codec.or(hooks)),
    }
}
