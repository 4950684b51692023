//! Key/value backend trait definitions.

use crate::error::StorageResult;
use crate::range::KeyRange;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// A single record of an object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvRecord {
    /// The record key.
    pub key: String,
    /// The persisted value.
    pub value: String,
}

impl KvRecord {
    /// Creates a new record.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Reads only. Several read-only transactions may run at once.
    ReadOnly,
    /// Reads and writes. Exclusive with every other transaction.
    ReadWrite,
}

/// Schema requested when opening a database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSchema {
    /// Name of the single object store.
    pub store: String,
    /// Schema version. Opening at a higher version runs the upgrade.
    pub version: u32,
}

impl StoreSchema {
    /// Creates a new schema description.
    pub fn new(store: impl Into<String>, version: u32) -> Self {
        Self {
            store: store.into(),
            version,
        }
    }
}

/// Notification that another party changed the schema version of an open
/// database, or deleted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionChangeEvent {
    /// Database name.
    pub database: String,
    /// Version seen by the notified connection.
    pub old_version: u32,
    /// New version, or `None` when the database is being deleted.
    pub new_version: Option<u32>,
}

impl VersionChangeEvent {
    /// Returns true if the event announces deletion of the database.
    pub fn is_delete(&self) -> bool {
        self.new_version.is_none()
    }
}

/// Callback invoked on version-change notifications.
///
/// The receiver is expected to close its connection; a connection that
/// stays open blocks the upgrade or delete that triggered the event.
pub type VersionChangeHook = Arc<dyn Fn(&VersionChangeEvent) + Send + Sync>;

/// A transactional key/value store holding named databases.
///
/// Each database has a schema version and a set of object stores with
/// string keys. All work happens inside transactions obtained from a
/// [`KvConnection`].
///
/// # Invariants
///
/// - A read-write transaction is isolated from every other transaction on
///   the same database: its reads and writes are atomic with respect to them
/// - Writes become visible only after a successful `commit`
/// - A transaction that is aborted or dropped before commit leaves no trace
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Opens (or creates) a database, upgrading its schema when needed.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another open connection blocks the upgrade
    /// - The requested version is lower than the persisted one
    /// - The requested object store does not exist after opening
    async fn open(
        &self,
        name: &str,
        schema: &StoreSchema,
        on_version_change: Option<VersionChangeHook>,
    ) -> StorageResult<Arc<dyn KvConnection>>;

    /// Deletes a database and every store it contains.
    ///
    /// Deleting a database that does not exist succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::Blocked`] if an open connection does
    /// not close in response to the version-change notification.
    async fn delete_database(&self, name: &str) -> StorageResult<()>;

    /// Lists the names of existing databases.
    async fn database_names(&self) -> StorageResult<Vec<String>>;
}

/// An open connection to one database and one object store.
#[async_trait]
pub trait KvConnection: Send + Sync {
    /// Returns the database name.
    fn name(&self) -> &str;

    /// Returns the schema version the connection was opened at.
    fn version(&self) -> u32;

    /// Starts a transaction against the connection's object store.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::Closed`] if the connection is closed.
    async fn transaction(&self, mode: TransactionMode) -> StorageResult<Arc<dyn KvTransaction>>;

    /// Closes the connection. Running transactions finish normally.
    fn close(&self);

    /// Returns true once the connection has been closed.
    fn is_closed(&self) -> bool;
}

/// A transaction over a single object store.
///
/// Methods take `&self` so that one transaction can serve several
/// concurrent requests. Dropping the last handle of an uncommitted
/// transaction aborts it.
#[async_trait]
pub trait KvTransaction: Send + Sync {
    /// Returns the access mode.
    fn mode(&self) -> TransactionMode;

    /// Reads the value stored under `key`.
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Reads every record whose key falls in `range`, in ascending key order.
    async fn get_all(&self, range: &KeyRange) -> StorageResult<Vec<KvRecord>>;

    /// Lists every key of the store in ascending order.
    async fn get_all_keys(&self) -> StorageResult<Vec<String>>;

    /// Inserts or replaces a record.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadOnly`] in a read-only transaction.
    async fn put(&self, record: KvRecord) -> StorageResult<()>;

    /// Deletes the record stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadOnly`] in a read-only transaction.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Commits all writes atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is inactive or the backend
    /// aborted it. In both cases none of its writes are visible.
    async fn commit(&self) -> StorageResult<()>;

    /// Aborts the transaction, discarding its writes.
    fn abort(&self);
}

impl fmt::Debug for dyn KvConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvConnection")
            .field("name", &self.name())
            .field("version", &self.version())
            .field("closed", &self.is_closed())
            .finish()
    }
}
