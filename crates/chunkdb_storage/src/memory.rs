//! In-memory key/value backend.

use crate::backend::{
    KvBackend, KvConnection, KvRecord, KvTransaction, StoreSchema, TransactionMode,
    VersionChangeEvent, VersionChangeHook,
};
use crate::error::{StorageError, StorageResult};
use crate::range::KeyRange;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, warn};

type Store = BTreeMap<String, String>;
type Stores = HashMap<String, Store>;

/// An in-memory transactional key/value backend.
///
/// Cloning the backend yields another handle onto the same databases,
/// which is how tests simulate several independent writers (for example
/// two browser tabs) sharing one store.
///
/// This backend is suitable for:
/// - Unit and integration tests
/// - Ephemeral databases that don't need persistence
///
/// # Example
///
/// ```rust
/// # let rt = tokio::runtime::Runtime::new().unwrap();
/// # rt.block_on(async {
/// use chunkdb_storage::{InMemoryKvBackend, KvBackend, KvRecord, StoreSchema, TransactionMode};
///
/// let backend = InMemoryKvBackend::new();
/// let conn = backend.open("app", &StoreSchema::new("data", 1), None).await.unwrap();
///
/// let txn = conn.transaction(TransactionMode::ReadWrite).await.unwrap();
/// txn.put(KvRecord::new("a", "1")).await.unwrap();
/// txn.commit().await.unwrap();
///
/// let txn = conn.transaction(TransactionMode::ReadOnly).await.unwrap();
/// assert_eq!(txn.get("a").await.unwrap().as_deref(), Some("1"));
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryKvBackend {
    shared: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    databases: Mutex<HashMap<String, Arc<MemoryDatabase>>>,
    puts: AtomicU64,
    deletes: AtomicU64,
    commits: AtomicU64,
    aborts: AtomicU64,
    fail_next_commit: AtomicBool,
}

/// Counters of committed work, for tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    /// Records written by committed transactions.
    pub puts: u64,
    /// Records deleted by committed transactions.
    pub deletes: u64,
    /// Successfully committed read-write transactions.
    pub commits: u64,
    /// Transactions that ended in an abort.
    pub aborts: u64,
}

#[derive(Debug)]
struct MemoryDatabase {
    name: String,
    version: AtomicU32,
    stores: Arc<RwLock<Stores>>,
    connections: Mutex<Vec<Weak<ConnectionState>>>,
}

struct ConnectionState {
    closed: AtomicBool,
    version: u32,
    on_version_change: Option<VersionChangeHook>,
}

impl std::fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionState")
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl MemoryDatabase {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: AtomicU32::new(0),
            stores: Arc::new(RwLock::new(Stores::new())),
            connections: Mutex::new(Vec::new()),
        }
    }

    fn open_connections(&self) -> Vec<Arc<ConnectionState>> {
        let mut connections = self.connections.lock();
        connections.retain(|weak| {
            weak.upgrade()
                .is_some_and(|state| !state.closed.load(Ordering::SeqCst))
        });
        connections.iter().filter_map(Weak::upgrade).collect()
    }

    /// Sends `event` to every open connection and reports whether any of
    /// them stayed open.
    fn notify_version_change(&self, new_version: Option<u32>) -> StorageResult<()> {
        // Hooks run without holding the connection list lock.
        let open = self.open_connections();
        for state in &open {
            if let Some(hook) = &state.on_version_change {
                let event = VersionChangeEvent {
                    database: self.name.clone(),
                    old_version: state.version,
                    new_version,
                };
                hook(&event);
            }
        }

        if open
            .iter()
            .any(|state| !state.closed.load(Ordering::SeqCst))
        {
            warn!(database = %self.name, "version change blocked by open connection");
            return Err(StorageError::Blocked {
                name: self.name.clone(),
            });
        }
        Ok(())
    }
}

impl InMemoryKvBackend {
    /// Creates a new empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns counters of committed work since creation or the last reset.
    #[must_use]
    pub fn stats(&self) -> BackendStats {
        BackendStats {
            puts: self.shared.puts.load(Ordering::SeqCst),
            deletes: self.shared.deletes.load(Ordering::SeqCst),
            commits: self.shared.commits.load(Ordering::SeqCst),
            aborts: self.shared.aborts.load(Ordering::SeqCst),
        }
    }

    /// Resets all counters to zero.
    pub fn reset_stats(&self) {
        self.shared.puts.store(0, Ordering::SeqCst);
        self.shared.deletes.store(0, Ordering::SeqCst);
        self.shared.commits.store(0, Ordering::SeqCst);
        self.shared.aborts.store(0, Ordering::SeqCst);
    }

    /// Makes the next commit fail and roll back, as if the backend aborted.
    pub fn fail_next_commit(&self) {
        self.shared.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Returns the number of open connections to a database.
    #[must_use]
    pub fn open_connections(&self, name: &str) -> usize {
        self.database(name)
            .map_or(0, |db| db.open_connections().len())
    }

    /// Lists the keys of a store, in ascending order.
    pub async fn keys(&self, name: &str, store: &str) -> Vec<String> {
        let Some(db) = self.database(name) else {
            return Vec::new();
        };
        let stores = db.stores.read().await;
        stores
            .get(store)
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Reads a value directly, bypassing transactions.
    pub async fn raw_get(&self, name: &str, store: &str, key: &str) -> Option<String> {
        let db = self.database(name)?;
        let stores = db.stores.read().await;
        stores.get(store).and_then(|s| s.get(key).cloned())
    }

    /// Writes a value directly, creating the database and store if needed.
    pub async fn raw_put(&self, name: &str, store: &str, key: &str, value: &str) {
        let db = self.database_or_create(name);
        let mut stores = db.stores.write().await;
        stores
            .entry(store.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    /// Deletes a value directly, bypassing transactions.
    pub async fn raw_delete(&self, name: &str, store: &str, key: &str) {
        if let Some(db) = self.database(name) {
            let mut stores = db.stores.write().await;
            if let Some(s) = stores.get_mut(store) {
                s.remove(key);
            }
        }
    }

    fn database(&self, name: &str) -> Option<Arc<MemoryDatabase>> {
        self.shared.databases.lock().get(name).cloned()
    }

    fn database_or_create(&self, name: &str) -> Arc<MemoryDatabase> {
        Arc::clone(
            self.shared
                .databases
                .lock()
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(MemoryDatabase::new(name))),
        )
    }
}

#[async_trait]
impl KvBackend for InMemoryKvBackend {
    async fn open(
        &self,
        name: &str,
        schema: &StoreSchema,
        on_version_change: Option<VersionChangeHook>,
    ) -> StorageResult<Arc<dyn KvConnection>> {
        let db = self.database_or_create(name);
        let existing = db.version.load(Ordering::SeqCst);

        if schema.version < existing {
            return Err(StorageError::VersionError {
                requested: schema.version,
                existing,
            });
        }

        if schema.version > existing {
            db.notify_version_change(Some(schema.version))?;
            let mut stores = db.stores.write().await;
            stores.entry(schema.store.clone()).or_default();
            db.version.store(schema.version, Ordering::SeqCst);
            debug!(
                database = name,
                old_version = existing,
                new_version = schema.version,
                "upgraded database schema"
            );
        }

        if !db.stores.read().await.contains_key(&schema.store) {
            return Err(StorageError::MissingStore(schema.store.clone()));
        }

        let state = Arc::new(ConnectionState {
            closed: AtomicBool::new(false),
            version: schema.version,
            on_version_change,
        });
        db.connections.lock().push(Arc::downgrade(&state));

        Ok(Arc::new(MemoryConnection {
            db,
            store: schema.store.clone(),
            state,
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn delete_database(&self, name: &str) -> StorageResult<()> {
        let Some(db) = self.database(name) else {
            return Ok(());
        };
        db.notify_version_change(None)?;

        let mut databases = self.shared.databases.lock();
        if databases
            .get(name)
            .is_some_and(|current| Arc::ptr_eq(current, &db))
        {
            databases.remove(name);
        }
        debug!(database = name, "deleted database");
        Ok(())
    }

    async fn database_names(&self) -> StorageResult<Vec<String>> {
        let mut names: Vec<String> = self.shared.databases.lock().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[derive(Debug)]
struct MemoryConnection {
    db: Arc<MemoryDatabase>,
    store: String,
    state: Arc<ConnectionState>,
    shared: Arc<Shared>,
}

#[async_trait]
impl KvConnection for MemoryConnection {
    fn name(&self) -> &str {
        &self.db.name
    }

    fn version(&self) -> u32 {
        self.state.version
    }

    async fn transaction(&self, mode: TransactionMode) -> StorageResult<Arc<dyn KvTransaction>> {
        if self.is_closed() {
            return Err(StorageError::Closed);
        }
        let guard = match mode {
            TransactionMode::ReadOnly => {
                Guard::Read(Arc::clone(&self.db.stores).read_owned().await)
            }
            TransactionMode::ReadWrite => {
                Guard::Write(Arc::clone(&self.db.stores).write_owned().await)
            }
        };
        Ok(Arc::new(MemoryTransaction {
            mode,
            store: self.store.clone(),
            shared: Arc::clone(&self.shared),
            inner: Mutex::new(TxnInner {
                guard: Some(guard),
                staged: BTreeMap::new(),
            }),
        }))
    }

    fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.close();
    }
}

enum Guard {
    Read(OwnedRwLockReadGuard<Stores>),
    Write(OwnedRwLockWriteGuard<Stores>),
}

impl Guard {
    fn stores(&self) -> &Stores {
        match self {
            Guard::Read(g) => &**g,
            Guard::Write(g) => &**g,
        }
    }
}

struct TxnInner {
    guard: Option<Guard>,
    /// Pending writes; `None` marks a delete.
    staged: BTreeMap<String, Option<String>>,
}

struct MemoryTransaction {
    mode: TransactionMode,
    store: String,
    shared: Arc<Shared>,
    inner: Mutex<TxnInner>,
}

impl MemoryTransaction {
    fn with_view<T>(
        &self,
        f: impl FnOnce(Option<&Store>, &BTreeMap<String, Option<String>>) -> T,
    ) -> StorageResult<T> {
        let inner = self.inner.lock();
        let guard = inner.guard.as_ref().ok_or(StorageError::Inactive)?;
        Ok(f(guard.stores().get(&self.store), &inner.staged))
    }

    fn stage(&self, key: String, value: Option<String>) -> StorageResult<()> {
        if self.mode == TransactionMode::ReadOnly {
            return Err(StorageError::ReadOnly);
        }
        let mut inner = self.inner.lock();
        if inner.guard.is_none() {
            return Err(StorageError::Inactive);
        }
        inner.staged.insert(key, value);
        Ok(())
    }
}

#[async_trait]
impl KvTransaction for MemoryTransaction {
    fn mode(&self) -> TransactionMode {
        self.mode
    }

    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.with_view(|base, staged| match staged.get(key) {
            Some(value) => value.clone(),
            None => base.and_then(|s| s.get(key).cloned()),
        })
    }

    async fn get_all(&self, range: &KeyRange) -> StorageResult<Vec<KvRecord>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        self.with_view(|base, staged| {
            let mut merged: BTreeMap<&str, &str> = base
                .map(|s| {
                    s.range::<str, _>((range.lower(), range.upper()))
                        .map(|(k, v)| (k.as_str(), v.as_str()))
                        .collect()
                })
                .unwrap_or_default();
            for (key, value) in staged.iter().filter(|(k, _)| range.contains(k)) {
                match value {
                    Some(v) => merged.insert(key.as_str(), v.as_str()),
                    None => merged.remove(key.as_str()),
                };
            }
            merged
                .into_iter()
                .map(|(k, v)| KvRecord::new(k, v))
                .collect()
        })
    }

    async fn get_all_keys(&self) -> StorageResult<Vec<String>> {
        Ok(self
            .get_all(&KeyRange::all())
            .await?
            .into_iter()
            .map(|record| record.key)
            .collect())
    }

    async fn put(&self, record: KvRecord) -> StorageResult<()> {
        self.stage(record.key, Some(record.value))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.stage(key.to_string(), None)
    }

    async fn commit(&self) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        let guard = inner.guard.take().ok_or(StorageError::Inactive)?;
        let staged = std::mem::take(&mut inner.staged);

        let mut guard = match guard {
            Guard::Read(_) => return Ok(()),
            Guard::Write(guard) => guard,
        };

        if self.shared.fail_next_commit.swap(false, Ordering::SeqCst) {
            self.shared.aborts.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::aborted("injected commit failure"));
        }

        let store = guard.entry(self.store.clone()).or_default();
        for (key, value) in staged {
            match value {
                Some(value) => {
                    store.insert(key, value);
                    self.shared.puts.fetch_add(1, Ordering::SeqCst);
                }
                None => {
                    store.remove(&key);
                    self.shared.deletes.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
        self.shared.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn abort(&self) {
        let mut inner = self.inner.lock();
        if inner.guard.take().is_some() {
            inner.staged.clear();
            self.shared.aborts.fetch_add(1, Ordering::SeqCst);
        }
    }
}
