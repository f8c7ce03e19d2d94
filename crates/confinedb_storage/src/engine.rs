//! Engine and connection traits, and the snapshot engine implementing them.

use crate::config::EngineConfig;
use crate::crypto::{EncryptionKey, StoreCipher};
use crate::error::{EngineError, EngineResult};
use crate::image;
use crate::snapshot::Snapshot;
use crate::store::SharedStore;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Whether a store lives on disk or only in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Durability {
    /// The store is backed by a file and survives restarts.
    #[default]
    Persisted,
    /// The store lives in memory until its last connection closes.
    InMemory,
}

impl fmt::Display for Durability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Durability::Persisted => f.write_str("persisted"),
            Durability::InMemory => f.write_str("in-memory"),
        }
    }
}

/// A storage engine that hands out connections to shared stores.
///
/// Engines must be `Send + Sync`: one engine serves every thread of the
/// process.
pub trait StorageEngine: Send + Sync {
    /// Opens a new connection to the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The key doesn't decrypt the store (`WrongKey`)
    /// - The file is corrupted or from a newer format
    /// - Another process holds the store (`Locked`)
    /// - An I/O error occurs
    fn open_connection(
        &self,
        path: &Path,
        key: Option<&EncryptionKey>,
        durability: Durability,
    ) -> EngineResult<Box<dyn Connection>>;
}

/// One connection to a store.
///
/// A connection reads an immutable snapshot until it is advanced, and can
/// be promoted to the store's single writer.
///
/// # Invariants
///
/// - Reads never observe another connection's uncommitted writes
/// - At most one connection per store is promoted at a time
/// - After `close`, every operation except `is_open` fails with `Closed`
pub trait Connection: Send {
    /// Returns the path of the store.
    fn path(&self) -> &Path;

    /// Returns true until `close` is called.
    fn is_open(&self) -> bool;

    /// Closes the connection, rolling back any open write.
    ///
    /// Closing twice is a no-op.
    fn close(&mut self);

    /// Returns the version of the snapshot this connection reads.
    fn version(&self) -> u64;

    /// Returns true while promoted to writer.
    fn is_in_write(&self) -> bool;

    /// Moves the read snapshot to the latest committed one.
    ///
    /// # Errors
    ///
    /// Fails while promoted to writer, or if closed.
    fn advance_read(&mut self) -> EngineResult<()>;

    /// Advances to the latest snapshot and becomes the store's writer.
    ///
    /// Blocks while another connection holds the write slot.
    ///
    /// # Errors
    ///
    /// Fails if already promoted, or if closed.
    fn promote_to_write(&mut self) -> EngineResult<()>;

    /// Persists the write set and continues reading the new snapshot.
    ///
    /// # Errors
    ///
    /// Fails if not promoted, if closed, or if the image can't be written.
    fn commit_and_continue_as_read(&mut self) -> EngineResult<()>;

    /// Discards the write set and returns to the pre-write snapshot.
    ///
    /// # Errors
    ///
    /// Fails if not promoted, or if closed.
    fn rollback_and_continue_as_read(&mut self) -> EngineResult<()>;

    /// Writes a compact copy of the current view to `destination`.
    ///
    /// While promoted, the copy includes uncommitted writes.
    ///
    /// # Errors
    ///
    /// Fails with `DestinationExists` before any I/O if `destination` exists.
    /// A file created at `destination` during the copy is left untouched.
    fn copy_to_file(&self, destination: &Path, key: Option<&EncryptionKey>) -> EngineResult<()>;

    /// Reads a value from the current view.
    ///
    /// # Errors
    ///
    /// Fails if closed.
    fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>>;

    /// Writes a value into the write set.
    ///
    /// # Errors
    ///
    /// Fails if not promoted, or if closed.
    fn put(&mut self, key: &[u8], value: &[u8]) -> EngineResult<()>;

    /// Removes a value from the write set. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Fails if not promoted, or if closed.
    fn delete(&mut self, key: &[u8]) -> EngineResult<bool>;

    /// Returns the number of entries in the current view.
    ///
    /// # Errors
    ///
    /// Fails if closed.
    fn entry_count(&self) -> EngineResult<usize>;
}

/// A process-local engine with snapshot isolation.
///
/// All connections to the same path share one store. The store is dropped
/// when its last connection closes: in-memory data is lost then, persisted
/// data is reloaded from disk on the next open.
///
/// # Example
///
/// ```rust
/// use confinedb_storage::{Connection, Durability, SnapshotEngine, StorageEngine};
/// use std::path::Path;
///
/// let engine = SnapshotEngine::new();
/// let path = Path::new("/mem/engine-doc");
/// let mut writer = engine.open_connection(path, None, Durability::InMemory).unwrap();
/// let mut reader = engine.open_connection(path, None, Durability::InMemory).unwrap();
///
/// writer.promote_to_write().unwrap();
/// writer.put(b"k", b"v").unwrap();
/// writer.commit_and_continue_as_read().unwrap();
///
/// assert_eq!(reader.get(b"k").unwrap(), None);
/// reader.advance_read().unwrap();
/// assert_eq!(reader.get(b"k").unwrap(), Some(b"v".to_vec()));
/// ```
pub struct SnapshotEngine {
    config: EngineConfig,
    stores: Mutex<HashMap<PathBuf, Weak<SharedStore>>>,
}

impl SnapshotEngine {
    /// Creates an engine with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Creates an engine with the given configuration.
    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the number of stores with at least one open connection.
    #[must_use]
    pub fn open_store_count(&self) -> usize {
        self.stores
            .lock()
            .values()
            .filter(|store| store.strong_count() > 0)
            .count()
    }

    /// Opens a concrete [`SnapshotConnection`].
    ///
    /// # Errors
    ///
    /// See [`StorageEngine::open_connection`].
    pub fn connect(
        &self,
        path: &Path,
        key: Option<&EncryptionKey>,
        durability: Durability,
    ) -> EngineResult<SnapshotConnection> {
        let mut stores = self.stores.lock();
        stores.retain(|_, store| store.strong_count() > 0);

        let store = match stores.get(path).and_then(Weak::upgrade) {
            Some(store) => {
                store.check_compatible(key, durability)?;
                store
            }
            None => {
                let store = Arc::new(SharedStore::open(path, key, durability, &self.config)?);
                stores.insert(path.to_path_buf(), Arc::downgrade(&store));
                store
            }
        };

        Ok(SnapshotConnection::new(path, store))
    }
}

impl Default for SnapshotEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine for SnapshotEngine {
    fn open_connection(
        &self,
        path: &Path,
        key: Option<&EncryptionKey>,
        durability: Durability,
    ) -> EngineResult<Box<dyn Connection>> {
        Ok(Box::new(self.connect(path, key, durability)?))
    }
}

impl fmt::Debug for SnapshotEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotEngine")
            .field("config", &self.config)
            .field("open_stores", &self.open_store_count())
            .finish()
    }
}

/// A connection handed out by [`SnapshotEngine`].
pub struct SnapshotConnection {
    path: PathBuf,
    /// `None` once closed.
    store: Option<Arc<SharedStore>>,
    read: Arc<Snapshot>,
    /// Working copy while promoted to writer.
    write_set: Option<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl SnapshotConnection {
    fn new(path: &Path, store: Arc<SharedStore>) -> Self {
        let read = store.latest();
        Self {
            path: path.to_path_buf(),
            store: Some(store),
            read,
            write_set: None,
        }
    }

    fn store(&self) -> EngineResult<Arc<SharedStore>> {
        self.store.clone().ok_or(EngineError::Closed)
    }

    fn not_writing() -> EngineError {
        EngineError::invalid_state("not in a write transaction")
    }

    fn view(&self) -> &BTreeMap<Vec<u8>, Vec<u8>> {
        self.write_set.as_ref().unwrap_or_else(|| self.read.entries())
    }
}

impl Connection for SnapshotConnection {
    fn path(&self) -> &Path {
        &self.path
    }

    fn is_open(&self) -> bool {
        self.store.is_some()
    }

    fn close(&mut self) {
        if let Some(store) = self.store.take() {
            if self.write_set.take().is_some() {
                store.release_writer();
            }
            trace!(path = %self.path.display(), "connection closed");
        }
    }

    fn version(&self) -> u64 {
        self.read.version()
    }

    fn is_in_write(&self) -> bool {
        self.write_set.is_some()
    }

    fn advance_read(&mut self) -> EngineResult<()> {
        let store = self.store()?;
        if self.write_set.is_some() {
            return Err(EngineError::invalid_state(
                "cannot advance the read snapshot inside a write transaction",
            ));
        }
        self.read = store.latest();
        Ok(())
    }

    fn promote_to_write(&mut self) -> EngineResult<()> {
        let store = self.store()?;
        if self.write_set.is_some() {
            return Err(EngineError::invalid_state("already in a write transaction"));
        }
        store.acquire_writer();
        self.read = store.latest();
        self.write_set = Some(self.read.entries().clone());
        debug!(path = %self.path.display(), version = self.read.version(), "promoted to writer");
        Ok(())
    }

    fn commit_and_continue_as_read(&mut self) -> EngineResult<()> {
        let store = self.store()?;
        let entries = self.write_set.as_ref().ok_or_else(Self::not_writing)?;
        let snapshot = store.publish(entries.clone())?;
        self.write_set = None;
        self.read = snapshot;
        store.release_writer();
        Ok(())
    }

    fn rollback_and_continue_as_read(&mut self) -> EngineResult<()> {
        let store = self.store()?;
        self.write_set.take().ok_or_else(Self::not_writing)?;
        store.release_writer();
        debug!(path = %self.path.display(), version = self.read.version(), "rolled back");
        Ok(())
    }

    fn copy_to_file(&self, destination: &Path, key: Option<&EncryptionKey>) -> EngineResult<()> {
        self.store()?;
        if destination.exists() {
            return Err(EngineError::DestinationExists {
                path: destination.to_path_buf(),
            });
        }

        let cipher = key.map(StoreCipher::new).transpose()?;
        let snapshot = Snapshot::new(self.read.version(), self.view().clone());
        let data = image::encode(&snapshot, cipher.as_ref())?;
        image::write_new(destination, &data)?;
        debug!(
            source = %self.path.display(),
            destination = %destination.display(),
            encrypted = key.is_some(),
            "wrote store copy"
        );
        Ok(())
    }

    fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        self.store()?;
        Ok(self.view().get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> EngineResult<()> {
        self.store()?;
        let write_set = self.write_set.as_mut().ok_or_else(Self::not_writing)?;
        write_set.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> EngineResult<bool> {
        self.store()?;
        let write_set = self.write_set.as_mut().ok_or_else(Self::not_writing)?;
        Ok(write_set.remove(key).is_some())
    }

    fn entry_count(&self) -> EngineResult<usize> {
        self.store()?;
        Ok(self.view().len())
    }
}

impl fmt::Debug for SnapshotConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotConnection")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .field("version", &self.version())
            .field("in_write", &self.is_in_write())
            .finish()
    }
}

impl Drop for SnapshotConnection {
    fn drop(&mut self) {
        self.close();
    }
}
