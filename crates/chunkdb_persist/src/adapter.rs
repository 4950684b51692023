//! The incremental persistence adapter.

use crate::config::AdapterConfig;
use crate::connection::ConnectionSlot;
use crate::error::{PersistError, PersistResult};
use crate::load::read_database;
use crate::save::{write_snapshot, SaveReport};
use crate::versions::ObservedVersions;
use chunkdb_core::{Database, DatabaseSnapshot};
use chunkdb_storage::{KvBackend, TransactionMode};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Persists databases as independently addressable chunks, writing only
/// what changed since the previous save.
///
/// One adapter runs one operation at a time. Starting a save, load or
/// delete while another is running fails with
/// [`PersistError::OperationInProgress`]; callers that need queuing must
/// serialize their calls. Several adapters may share a backend: each save
/// compares the persisted database version id with the one this adapter
/// last observed and falls back to a full overwrite when another writer
/// saved in between.
///
/// # Example
///
/// ```rust
/// use chunkdb_core::Database;
/// use chunkdb_persist::{AdapterConfig, IncrementalAdapter};
/// use chunkdb_storage::InMemoryKvBackend;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let backend = Arc::new(InMemoryKvBackend::new());
/// let adapter = IncrementalAdapter::new(backend, AdapterConfig::default());
///
/// let mut db = Database::new("app");
/// db.add_collection("users")?.insert(json!({"name": "ada"}))?;
/// adapter.save(&mut db).await?;
///
/// let loaded = adapter.load_database("app").await?.unwrap();
/// assert_eq!(loaded.collection("users").unwrap().len()?, 1);
/// # Ok::<_, chunkdb_persist::PersistError>(())
/// # }).unwrap();
/// ```
pub struct IncrementalAdapter {
    config: AdapterConfig,
    slot: ConnectionSlot,
    observed: Mutex<ObservedVersions>,
    busy: AtomicBool,
}

impl IncrementalAdapter {
    /// Creates an adapter over `backend`.
    pub fn new(backend: Arc<dyn KvBackend>, config: AdapterConfig) -> Self {
        let slot = ConnectionSlot::new(backend, config.on_version_change.clone());
        Self {
            config,
            slot,
            observed: Mutex::new(ObservedVersions::default()),
            busy: AtomicBool::new(false),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Returns the version ids this adapter last observed.
    #[must_use]
    pub fn observed_versions(&self) -> ObservedVersions {
        self.observed.lock().clone()
    }

    /// Returns true while a save, load or delete is running.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Saves a database snapshot in one read-write transaction.
    ///
    /// `snapshot` is called inside the transaction, once the save strategy
    /// is decided. The observed version ids are updated only after the
    /// transaction commits; the [`on_did_overwrite`] hook fires after a
    /// committed full overwrite.
    ///
    /// # Errors
    ///
    /// - [`PersistError::OperationInProgress`] if another operation is running
    /// - a storage or codec error; the transaction is then rolled back and
    ///   the observed version ids are left untouched
    ///
    /// [`on_did_overwrite`]: crate::AdapterConfigBuilder::on_did_overwrite
    pub async fn save_database<F>(&self, name: &str, snapshot: F) -> PersistResult<SaveReport>
    where
        F: FnOnce() -> DatabaseSnapshot + Send,
    {
        let _guard = OperationGuard::acquire(&self.busy, "save")?;
        let last_observed = self.observed.lock().database().cloned();

        let txn = self.slot.transaction(name, TransactionMode::ReadWrite).await?;
        let report =
            match write_snapshot(&*txn, &self.config, last_observed.as_ref(), snapshot).await {
                Ok(report) => report,
                Err(err) => {
                    error!(database = name, error = %err, "save failed, aborting");
                    txn.abort();
                    return Err(err);
                }
            };
        if let Err(err) = txn.commit().await {
            error!(database = name, error = %err, "save commit failed");
            return Err(err.into());
        }

        self.observed.lock().record_save(&report);
        info!(
            database = name,
            strategy = ?report.strategy,
            written = report.written.len(),
            deleted = report.deleted.len(),
            bytes = report.bytes_written,
            "saved database"
        );
        if report.is_full_overwrite() {
            warn!(database = name, "save overwrote changes of another writer");
            if let Some(hook) = &self.config.on_did_overwrite {
                hook(name);
            }
        }
        Ok(report)
    }

    /// Loads a database. Returns `None` if nothing is stored under `name`.
    ///
    /// Collections configured as lazy are decoded on first access.
    ///
    /// # Errors
    ///
    /// - [`PersistError::OperationInProgress`] if another operation is running
    /// - [`PersistError::Corrupted`] if the stored chunks do not form a
    ///   database
    /// - a storage or codec error
    ///
    /// On any error, and when nothing is stored, the observed version ids
    /// are cleared so the next save overwrites.
    pub async fn load_database(&self, name: &str) -> PersistResult<Option<Database>> {
        let _guard = OperationGuard::acquire(&self.busy, "load")?;

        let result = match self.slot.transaction(name, TransactionMode::ReadOnly).await {
            Ok(txn) => read_database(txn, &self.config, name).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(Some((database, observed))) => {
                info!(
                    database = name,
                    collections = database.collections().count(),
                    "loaded database"
                );
                *self.observed.lock() = observed;
                Ok(Some(database))
            }
            Ok(None) => {
                info!(database = name, "no stored database");
                self.observed.lock().reset();
                Ok(None)
            }
            Err(err) => {
                error!(database = name, error = %err, "load failed");
                self.observed.lock().reset();
                Err(err)
            }
        }
    }

    /// Deletes every chunk of a database by deleting the backend database.
    ///
    /// The adapter's own connection is closed first. The observed version
    /// ids are cleared.
    ///
    /// # Errors
    ///
    /// - [`PersistError::OperationInProgress`] if another operation is running
    /// - a storage error, e.g. `Blocked` if another connection stays open
    pub async fn delete_database(&self, name: &str) -> PersistResult<()> {
        let _guard = OperationGuard::acquire(&self.busy, "delete")?;
        self.slot.close();
        if let Err(err) = self.slot.backend().delete_database(name).await {
            error!(database = name, error = %err, "delete failed");
            return Err(err.into());
        }
        self.observed.lock().reset();
        info!(database = name, "deleted database");
        Ok(())
    }

    /// Saves a live database.
    ///
    /// The dirty state moves into a snapshot before the save starts. On
    /// success the new version ids are recorded in `database`; on failure
    /// the dirty state is merged back so a retry writes the same changes.
    ///
    /// # Errors
    ///
    /// Same as [`IncrementalAdapter::save_database`]. A full overwrite also
    /// fails with a core error if a lazily loaded collection it has to
    /// rewrite cannot be decoded.
    pub async fn save(&self, database: &mut Database) -> PersistResult<SaveReport> {
        if self.is_busy() {
            return Err(PersistError::OperationInProgress { operation: "save" });
        }
        let snapshot = database.prepare_save();
        let dirty = snapshot.dirty_state();
        let name = database.name().to_string();

        match self.save_database(&name, move || snapshot).await {
            Ok(report) => {
                database.apply_saved_versions(
                    report.database_version.clone(),
                    &report.collection_versions,
                );
                Ok(report)
            }
            Err(err) => {
                database.restore_dirty(dirty);
                Err(err)
            }
        }
    }

    /// Closes the backend connection. The next operation reopens it.
    pub fn close(&self) {
        self.slot.close();
    }
}

impl fmt::Debug for IncrementalAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncrementalAdapter")
            .field("config", &self.config)
            .field("observed", &*self.observed.lock())
            .field("busy", &self.is_busy())
            .finish_non_exhaustive()
    }
}

/// Single-flight guard, released on drop.
#[derive(Debug)]
struct OperationGuard<'a> {
    busy: &'a AtomicBool,
}

impl<'a> OperationGuard<'a> {
    fn acquire(busy: &'a AtomicBool, operation: &'static str) -> PersistResult<Self> {
        busy.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| PersistError::OperationInProgress { operation })?;
        Ok(Self { busy })
    }
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
