//! Shared backend connection of an adapter.

use crate::error::{PersistError, PersistResult};
use chunkdb_storage::{
    KvBackend, KvConnection, KvTransaction, StoreSchema, TransactionMode, VersionChangeEvent,
    VersionChangeHook,
};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Object store holding every chunk.
pub const STORE_NAME: &str = "IncrementalData";

/// Schema version of the object store.
pub const SCHEMA_VERSION: u32 = 1;

type ConnectionCell = Arc<OnceCell<Arc<dyn KvConnection>>>;

/// Single-assignment connection future shared by every operation of an
/// adapter.
///
/// The first caller opens the connection; concurrent callers wait for that
/// same open instead of racing their own. A closed connection (closed
/// explicitly, or by a version change from another writer) empties the slot
/// and the next caller reopens.
pub(crate) struct ConnectionSlot {
    backend: Arc<dyn KvBackend>,
    on_version_change: Option<VersionChangeHook>,
    state: Arc<Mutex<SlotState>>,
}

struct SlotState {
    generation: u64,
    name: Option<String>,
    cell: ConnectionCell,
}

impl SlotState {
    fn reset(&mut self) -> Option<Arc<dyn KvConnection>> {
        let previous = self.cell.get().cloned();
        self.generation += 1;
        self.cell = Arc::new(OnceCell::new());
        previous
    }
}

impl ConnectionSlot {
    pub(crate) fn new(
        backend: Arc<dyn KvBackend>,
        on_version_change: Option<VersionChangeHook>,
    ) -> Self {
        Self {
            backend,
            on_version_change,
            state: Arc::new(Mutex::new(SlotState {
                generation: 0,
                name: None,
                cell: Arc::new(OnceCell::new()),
            })),
        }
    }

    pub(crate) fn backend(&self) -> &Arc<dyn KvBackend> {
        &self.backend
    }

    /// Returns the open connection to `name`, opening it if needed.
    pub(crate) async fn connection(
        &self,
        name: &str,
    ) -> PersistResult<(u64, Arc<dyn KvConnection>)> {
        loop {
            let (generation, cell) = {
                let mut state = self.state.lock();
                if state.name.as_deref() != Some(name) {
                    if let Some(previous) = state.reset() {
                        previous.close();
                    }
                    state.name = Some(name.to_string());
                }
                (state.generation, Arc::clone(&state.cell))
            };

            let connection = cell
                .get_or_try_init(|| self.open(name, generation))
                .await?;
            if !connection.is_closed() {
                return Ok((generation, Arc::clone(connection)));
            }
            debug!(database = name, "connection closed, reopening");
            self.invalidate(generation);
        }
    }

    /// Starts a transaction, reopening once if the connection turns out to
    /// be closed.
    pub(crate) async fn transaction(
        &self,
        name: &str,
        mode: TransactionMode,
    ) -> PersistResult<Arc<dyn KvTransaction>> {
        let (generation, connection) = self.connection(name).await?;
        match connection.transaction(mode).await {
            Err(err) if err.is_connection_lost() => {
                self.invalidate(generation);
                let (_, connection) = self.connection(name).await?;
                Ok(connection.transaction(mode).await?)
            }
            result => Ok(result?),
        }
    }

    /// Forgets the connection of `generation` if it is still current.
    pub(crate) fn invalidate(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.generation == generation {
            state.reset();
        }
    }

    /// Closes the current connection, if any.
    pub(crate) fn close(&self) {
        let previous = {
            let mut state = self.state.lock();
            state.name = None;
            state.reset()
        };
        if let Some(connection) = previous {
            connection.close();
        }
    }

    async fn open(&self, name: &str, generation: u64) -> PersistResult<Arc<dyn KvConnection>> {
        debug!(database = name, generation, "opening connection");
        let schema = StoreSchema::new(STORE_NAME, SCHEMA_VERSION);
        let hook = version_change_hook(
            Arc::downgrade(&self.state),
            generation,
            self.on_version_change.clone(),
        );
        self.backend
            .open(name, &schema, Some(hook))
            .await
            .map_err(PersistError::from)
    }
}

/// Builds the hook that closes this slot's connection when another writer
/// bumps the schema or deletes the database.
///
/// The user hook fires only if the connection is still the slot's current
/// one.
fn version_change_hook(
    state: Weak<Mutex<SlotState>>,
    generation: u64,
    user_hook: Option<VersionChangeHook>,
) -> VersionChangeHook {
    Arc::new(move |event: &VersionChangeEvent| {
        let Some(state) = state.upgrade() else {
            return;
        };
        let current = {
            let mut state = state.lock();
            if state.generation != generation {
                return;
            }
            state.reset()
        };
        warn!(
            database = %event.database,
            old_version = event.old_version,
            new_version = ?event.new_version,
            "version change requested by another connection, closing"
        );
        if let Some(connection) = current {
            connection.close();
        }
        if let Some(hook) = &user_hook {
            hook(event);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkdb_storage::InMemoryKvBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn slot(backend: &InMemoryKvBackend, hook: Option<VersionChangeHook>) -> ConnectionSlot {
        ConnectionSlot::new(Arc::new(backend.clone()), hook)
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_open() {
        let backend = InMemoryKvBackend::new();
        let slot = slot(&backend, None);
        let (a, b) = tokio::join!(slot.connection("app"), slot.connection("app"));
        let (gen_a, a) = a.unwrap();
        let (gen_b, b) = b.unwrap();
        assert_eq!(gen_a, gen_b);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(backend.open_connections("app"), 1);
    }

    #[tokio::test]
    async fn closed_connection_is_reopened() {
        let backend = InMemoryKvBackend::new();
        let slot = slot(&backend, None);
        let (first_gen, first) = slot.connection("app").await.unwrap();
        first.close();

        let (second_gen, second) = slot.connection("app").await.unwrap();
        assert!(second_gen > first_gen);
        assert!(!second.is_closed());
    }

    #[tokio::test]
    async fn switching_database_closes_previous() {
        let backend = InMemoryKvBackend::new();
        let slot = slot(&backend, None);
        let (_, first) = slot.connection("one").await.unwrap();
        slot.connection("two").await.unwrap();
        assert!(first.is_closed());
    }

    #[tokio::test]
    async fn foreign_delete_closes_connection_and_fires_hook() {
        let backend = InMemoryKvBackend::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let hook: VersionChangeHook = Arc::new(move |event: &VersionChangeEvent| {
            assert!(event.is_delete());
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let slot = slot(&backend, Some(hook));
        let (_, connection) = slot.connection("app").await.unwrap();

        backend.delete_database("app").await.unwrap();
        assert!(connection.is_closed());
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let (_, reopened) = slot.connection("app").await.unwrap();
        assert!(!reopened.is_closed());
    }

    #[tokio::test]
    async fn stale_hook_is_ignored() {
        let backend = InMemoryKvBackend::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let hook: VersionChangeHook = Arc::new(move |_: &VersionChangeEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let slot = slot(&backend, Some(hook));
        let (generation, _) = slot.connection("app").await.unwrap();
        slot.invalidate(generation);

        let stale = version_change_hook(
            Arc::downgrade(&slot.state),
            generation,
            slot.on_version_change.clone(),
        );
        stale(&VersionChangeEvent {
            database: "app".into(),
            old_version: 1,
            new_version: None,
        });
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transaction_after_close_reopens() {
        let backend = InMemoryKvBackend::new();
        let slot = slot(&backend, None);
        slot.connection("app").await.unwrap();
        slot.close();
        let txn = slot
            .transaction("app", TransactionMode::ReadOnly)
            .await
            .unwrap();
        assert_eq!(txn.mode(), TransactionMode::ReadOnly);
    }
}
