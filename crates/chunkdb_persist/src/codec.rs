//! Chunk codec hooks.
//!
//! A data chunk is persisted as the JSON text of its document array. A codec
//! may transform the array between structural serialization and storage,
//! for example to compress or encrypt it. The transform sees the array as a
//! [`serde_json::Value`] and must return something that serializes to JSON.

use crate::error::{PersistError, PersistResult};
use async_trait::async_trait;
use chunkdb_core::Document;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by asynchronous chunk transforms.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Synchronous transform applied to one chunk of one collection.
pub type ChunkTransform = Arc<dyn Fn(&str, Value) -> PersistResult<Value> + Send + Sync>;

/// Asynchronous transform applied to one chunk of one collection.
pub type AsyncChunkTransform =
    Arc<dyn Fn(String, Value) -> BoxFuture<PersistResult<Value>> + Send + Sync>;

/// Synchronous chunk codec.
pub trait ChunkCodec: Send + Sync {
    /// Transforms a chunk's document array before it is written.
    ///
    /// # Errors
    ///
    /// An error aborts the save.
    fn serialize(&self, collection: &str, chunk: Value) -> PersistResult<Value>;

    /// Reverses [`ChunkCodec::serialize`] after a chunk is read.
    ///
    /// # Errors
    ///
    /// An error fails the load, or the first access of a lazy collection.
    fn deserialize(&self, collection: &str, chunk: Value) -> PersistResult<Value>;
}

/// Asynchronous chunk codec.
#[async_trait]
pub trait AsyncChunkCodec: Send + Sync {
    /// Transforms a chunk's document array before it is written.
    async fn serialize(&self, collection: &str, chunk: Value) -> PersistResult<Value>;

    /// Reverses [`AsyncChunkCodec::serialize`] after a chunk is read.
    async fn deserialize(&self, collection: &str, chunk: Value) -> PersistResult<Value>;
}

/// A [`ChunkCodec`] made of two closures.
#[derive(Clone)]
pub struct FnCodec {
    serialize: ChunkTransform,
    deserialize: ChunkTransform,
}

impl FnCodec {
    /// Creates a codec from an encode and a decode closure.
    pub fn new<S, D>(serialize: S, deserialize: D) -> Self
    where
        S: Fn(&str, Value) -> PersistResult<Value> + Send + Sync + 'static,
        D: Fn(&str, Value) -> PersistResult<Value> + Send + Sync + 'static,
    {
        Self::from_transforms(Arc::new(serialize), Arc::new(deserialize))
    }

    pub(crate) fn from_transforms(serialize: ChunkTransform, deserialize: ChunkTransform) -> Self {
        Self {
            serialize,
            deserialize,
        }
    }
}

impl ChunkCodec for FnCodec {
    fn serialize(&self, collection: &str, chunk: Value) -> PersistResult<Value> {
        (self.serialize)(collection, chunk)
    }

    fn deserialize(&self, collection: &str, chunk: Value) -> PersistResult<Value> {
        (self.deserialize)(collection, chunk)
    }
}

/// An [`AsyncChunkCodec`] made of two closures returning futures.
#[derive(Clone)]
pub struct AsyncFnCodec {
    serialize: AsyncChunkTransform,
    deserialize: AsyncChunkTransform,
}

impl AsyncFnCodec {
    /// Creates a codec from an encode and a decode closure.
    pub fn new<S, SF, D, DF>(serialize: S, deserialize: D) -> Self
    where
        S: Fn(String, Value) -> SF + Send + Sync + 'static,
        SF: Future<Output = PersistResult<Value>> + Send + 'static,
        D: Fn(String, Value) -> DF + Send + Sync + 'static,
        DF: Future<Output = PersistResult<Value>> + Send + 'static,
    {
        Self::from_transforms(boxed_async(serialize), boxed_async(deserialize))
    }

    pub(crate) fn from_transforms(
        serialize: AsyncChunkTransform,
        deserialize: AsyncChunkTransform,
    ) -> Self {
        Self {
            serialize,
            deserialize,
        }
    }
}

#[async_trait]
impl AsyncChunkCodec for AsyncFnCodec {
    async fn serialize(&self, collection: &str, chunk: Value) -> PersistResult<Value> {
        (self.serialize)(collection.to_string(), chunk).await
    }

    async fn deserialize(&self, collection: &str, chunk: Value) -> PersistResult<Value> {
        (self.deserialize)(collection.to_string(), chunk).await
    }
}

pub(crate) fn boxed_async<F, Fut>(f: F) -> AsyncChunkTransform
where
    F: Fn(String, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PersistResult<Value>> + Send + 'static,
{
    Arc::new(
        move |collection: String, chunk: Value| -> BoxFuture<PersistResult<Value>> {
            Box::pin(f(collection, chunk))
        },
    )
}

/// The codec an adapter was configured with.
#[derive(Clone, Default)]
pub(crate) enum ChunkHooks {
    #[default]
    Identity,
    Sync(Arc<dyn ChunkCodec>),
    Async(Arc<dyn AsyncChunkCodec>),
}

impl ChunkHooks {
    pub(crate) fn is_async(&self) -> bool {
        matches!(self, ChunkHooks::Async(_))
    }

    pub(crate) fn describe(&self) -> &'static str {
        match self {
            ChunkHooks::Identity => "identity",
            ChunkHooks::Sync(_) => "sync",
            ChunkHooks::Async(_) => "async",
        }
    }

    /// Serializes a chunk's documents into their persisted form.
    pub(crate) async fn encode(
        &self,
        collection: &str,
        documents: &[Document],
    ) -> PersistResult<String> {
        let encoded = match self {
            ChunkHooks::Identity => return Ok(serde_json::to_string(documents)?),
            ChunkHooks::Sync(codec) => {
                codec.serialize(collection, serde_json::to_value(documents)?)?
            }
            ChunkHooks::Async(codec) => {
                codec
                    .serialize(collection, serde_json::to_value(documents)?)
                    .await?
            }
        };
        Ok(serde_json::to_string(&encoded)?)
    }

    /// Decodes a structurally parsed chunk into documents.
    pub(crate) async fn decode(
        &self,
        collection: &str,
        chunk: Value,
    ) -> PersistResult<Vec<Document>> {
        let decoded = match self {
            ChunkHooks::Async(codec) => codec.deserialize(collection, chunk).await?,
            _ => return self.decode_blocking(collection, chunk),
        };
        into_documents(collection, decoded)
    }

    /// Decodes a chunk without awaiting. Fails for asynchronous codecs.
    pub(crate) fn decode_blocking(
        &self,
        collection: &str,
        chunk: Value,
    ) -> PersistResult<Vec<Document>> {
        let decoded = match self {
            ChunkHooks::Identity => chunk,
            ChunkHooks::Sync(codec) => codec.deserialize(collection, chunk)?,
            ChunkHooks::Async(_) => {
                return Err(PersistError::config(
                    "asynchronous chunk codecs cannot decode lazily",
                ))
            }
        };
        into_documents(collection, decoded)
    }
}

fn into_documents(collection: &str, chunk: Value) -> PersistResult<Vec<Document>> {
    if !chunk.is_array() {
        return Err(PersistError::codec(format!(
            "decoded chunk of {collection} is not an array"
        )));
    }
    Ok(serde_json::from_value(chunk)?)
}
