//! Thread-confined store handles.

use crate::config::Configuration;
use crate::error::{CoreError, CoreResult};
use crate::listener::{ChangeListener, ListenerList, ListenerToken};
use crate::queue::MessageQueue;
use crate::thread::ThreadToken;
use crate::transaction::{TransactionController, TransactionState};
use confinedb_storage::Connection;
use parking_lot::Mutex;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// A handle shared by every [`Database`](crate::Database) a thread opened
/// for one configuration.
pub(crate) type SharedHandle = Arc<Mutex<StoreHandle>>;

/// One thread's connection to a store.
///
/// Owned by the thread that opened it and released exactly once, when that
/// thread's open count for the configuration drops to zero.
pub(crate) struct StoreHandle {
    config: Configuration,
    owner: ThreadToken,
    connection: Box<dyn Connection>,
    released: bool,
    transaction: TransactionController,
    /// Set while auto-refresh is on.
    queue: Option<Arc<dyn MessageQueue>>,
    listeners: ListenerList,
}

impl StoreHandle {
    pub(crate) fn new(
        config: Configuration,
        owner: ThreadToken,
        connection: Box<dyn Connection>,
    ) -> Self {
        debug!(path = %config.path().display(), thread = %owner, "acquired store handle");
        Self {
            config,
            owner,
            connection,
            released: false,
            transaction: TransactionController::new(),
            queue: None,
            listeners: ListenerList::new(),
        }
    }

    pub(crate) fn into_shared(self) -> SharedHandle {
        Arc::new(Mutex::new(self))
    }

    pub(crate) fn path(&self) -> &Path {
        self.config.path()
    }

    pub(crate) fn owner(&self) -> ThreadToken {
        self.owner
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released
    }

    /// Fails unless `caller` is the owning thread.
    pub(crate) fn check_thread(&self, caller: ThreadToken) -> CoreResult<()> {
        if caller != self.owner {
            return Err(CoreError::wrong_thread(self.path(), self.owner, caller));
        }
        Ok(())
    }

    /// Checks the handle is usable from `caller`: released first, then thread.
    pub(crate) fn check_valid(&self, caller: ThreadToken) -> CoreResult<()> {
        if self.released {
            return Err(CoreError::already_closed(self.path()));
        }
        self.check_thread(caller)
    }

    /// Like [`check_valid`](Self::check_valid), for transaction entry points
    /// where a released handle is an invalid state.
    pub(crate) fn check_writable(&self, caller: ThreadToken) -> CoreResult<()> {
        if self.released {
            return Err(CoreError::invalid_state(self.path(), "the handle is closed"));
        }
        self.check_thread(caller)
    }

    /// Closes the engine connection. Returns false if already released.
    pub(crate) fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        if self.transaction.abandon() {
            warn!(path = %self.path().display(), "closing handle inside a write transaction, changes discarded");
        }
        self.connection.close();
        self.listeners.clear();
        self.queue = None;
        self.released = true;
        debug!(path = %self.path().display(), thread = %self.owner, "released store handle");
        true
    }

    // Transactions

    pub(crate) fn begin(&mut self) -> CoreResult<()> {
        self.transaction.begin(self.connection.as_mut())
    }

    pub(crate) fn commit(&mut self) -> CoreResult<()> {
        self.transaction.commit(self.connection.as_mut())
    }

    pub(crate) fn cancel(&mut self) -> CoreResult<()> {
        self.transaction.cancel(self.connection.as_mut())
    }

    pub(crate) fn transaction_state(&self) -> TransactionState {
        self.transaction.state()
    }

    /// Moves to the latest committed snapshot.
    pub(crate) fn advance(&mut self) -> CoreResult<()> {
        self.connection.advance_read()?;
        Ok(())
    }

    pub(crate) fn connection(&self) -> &dyn Connection {
        self.connection.as_ref()
    }

    /// Returns the connection for a write, failing outside a transaction.
    pub(crate) fn connection_for_write(&mut self) -> CoreResult<&mut dyn Connection> {
        if self.transaction.state() != TransactionState::Writing {
            return Err(CoreError::invalid_state(
                self.config.path(),
                "writes require a write transaction",
            ));
        }
        Ok(self.connection.as_mut())
    }

    // Auto-refresh

    pub(crate) fn queue(&self) -> Option<&Arc<dyn MessageQueue>> {
        self.queue.as_ref()
    }

    pub(crate) fn set_queue(&mut self, queue: Option<Arc<dyn MessageQueue>>) {
        self.queue = queue;
    }

    // Listeners

    pub(crate) fn listeners_mut(&mut self) -> &mut ListenerList {
        &mut self.listeners
    }

    pub(crate) fn add_listener(&mut self, listener: &Arc<dyn ChangeListener>) -> ListenerToken {
        self.listeners.add(listener)
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("path", &self.config.path())
            .field("owner", &self.owner)
            .field("released", &self.released)
            .field("state", &self.transaction.state())
            .field("auto_refresh", &self.queue.is_some())
            .field("listeners", &self.listeners)
            .finish()
    }
}

impl Drop for StoreHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confinedb_storage::{SnapshotEngine, StorageEngine};

    fn handle(name: &str, owner: ThreadToken) -> (SnapshotEngine, StoreHandle) {
        let engine = SnapshotEngine::new();
        let config = Configuration::builder(format!("/mem/handle/{name}"))
            .in_memory()
            .build()
            .unwrap();
        let connection = engine
            .open_connection(config.path(), None, config.durability())
            .unwrap();
        (engine, StoreHandle::new(config, owner, connection))
    }

    #[test]
    fn wrong_thread_is_rejected() {
        let owner = ThreadToken::simulated();
        let (_engine, handle) = handle("thread", owner);

        assert!(handle.check_valid(owner).is_ok());
        assert!(matches!(
            handle.check_valid(ThreadToken::simulated()),
            Err(CoreError::WrongThread { .. })
        ));
    }

    #[test]
    fn released_is_checked_before_thread() {
        let owner = ThreadToken::simulated();
        let (_engine, mut handle) = handle("order", owner);
        handle.release();

        assert!(matches!(
            handle.check_valid(ThreadToken::simulated()),
            Err(CoreError::AlreadyClosed { .. })
        ));
        assert!(matches!(
            handle.check_writable(ThreadToken::simulated()),
            Err(CoreError::InvalidState { .. })
        ));
    }

    #[test]
    fn release_happens_once() {
        let owner = ThreadToken::simulated();
        let (_engine, mut handle) = handle("once", owner);

        assert!(handle.release());
        assert!(!handle.release());
        assert!(!handle.connection().is_open());
    }

    #[test]
    fn release_discards_open_transaction() {
        let owner = ThreadToken::simulated();
        let (engine, mut handle) = handle("discard", owner);
        let mut other = engine
            .open_connection(handle.path(), None, confinedb_storage::Durability::InMemory)
            .unwrap();

        handle.begin().unwrap();
        handle.connection_for_write().unwrap().put(b"a", b"1").unwrap();
        handle.release();

        other.promote_to_write().unwrap();
        assert_eq!(other.get(b"a").unwrap(), None);
        assert_eq!(other.version(), 0);
    }

    #[test]
    fn writes_require_transaction() {
        let owner = ThreadToken::simulated();
        let (_engine, mut handle) = handle("writes", owner);
        assert!(matches!(
            handle.connection_for_write(),
            Err(CoreError::InvalidState { .. })
        ));
    }
}
