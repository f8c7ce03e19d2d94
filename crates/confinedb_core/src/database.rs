//! Database facade.

use crate::config::Configuration;
use crate::error::{CoreError, CoreResult};
use crate::handle::SharedHandle;
use crate::listener::{ChangeListener, ListenerToken};
use crate::notify::BroadcastReport;
use crate::runtime::{CloseOutcome, Runtime};
use crate::thread::ThreadToken;
use crate::transaction::TransactionState;
use confinedb_storage::{EncryptionKey, KEY_SIZE};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// One open of a store on one thread.
///
/// Every `Database` a thread opens for the same configuration shares one
/// handle and one read snapshot. Each entry point takes the caller's
/// [`ThreadToken`]; calls from any thread but the opener fail with
/// `WrongThread`.
///
/// Dropping a `Database` does not close it. Call [`close`](Self::close)
/// once per [`Runtime::open`].
///
/// # Example
///
/// ```rust
/// use confinedb_core::{ChangeListener, Configuration, Runtime, ThreadToken};
/// use std::sync::Arc;
///
/// let runtime = Runtime::global();
/// let me = ThreadToken::current();
/// let config = Configuration::builder("/mem/database-doc").in_memory().build().unwrap();
/// let db = runtime.open(me, &config).unwrap();
///
/// let listener: Arc<dyn ChangeListener> = Arc::new(|| println!("changed"));
/// db.add_change_listener(me, &listener).unwrap();
///
/// db.write(me, |db| db.put(me, b"k", b"v")).unwrap();
/// db.close(me).unwrap();
/// ```
pub struct Database {
    runtime: Runtime,
    config: Configuration,
    owner: ThreadToken,
    handle: SharedHandle,
}

impl Database {
    pub(crate) fn new(
        runtime: Runtime,
        config: Configuration,
        owner: ThreadToken,
        handle: SharedHandle,
    ) -> Self {
        Self {
            runtime,
            config,
            owner,
            handle,
        }
    }

    /// Returns the canonical store path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.config.path()
    }

    /// Returns the configuration this instance was opened with.
    #[must_use]
    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    /// Returns the thread that opened this instance.
    #[must_use]
    pub fn owner(&self) -> ThreadToken {
        self.owner
    }

    /// Returns true once the thread's handle has been released.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.handle.lock().is_released()
    }

    /// Closes one open of this configuration on the calling thread.
    ///
    /// The handle is released when the thread's last open closes. Closing
    /// more often than opening logs a warning and returns
    /// [`CloseOutcome::AlreadyClosed`].
    ///
    /// # Errors
    ///
    /// Returns `WrongThread` if called from another thread.
    pub fn close(&self, caller: ThreadToken) -> CoreResult<CloseOutcome> {
        self.runtime.close(caller, self.owner, &self.config)
    }

    // Transactions

    /// Starts a write transaction on the latest snapshot.
    ///
    /// Blocks while another connection to the store is writing.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if a transaction is already open or the
    /// handle is closed, `WrongThread` from another thread.
    pub fn begin_transaction(&self, caller: ThreadToken) -> CoreResult<()> {
        let mut handle = self.handle.lock();
        handle.check_writable(caller)?;
        handle.begin()
    }

    /// Commits the write transaction and notifies watchers of the store.
    ///
    /// The calling thread's listeners run before this returns, when its
    /// handle auto-refreshes. Other threads get a change notice.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` outside a transaction, `WrongThread` from
    /// another thread, or an engine error if the commit can't be persisted.
    pub fn commit_transaction(&self, caller: ThreadToken) -> CoreResult<BroadcastReport> {
        let own_queue = {
            let mut handle = self.handle.lock();
            handle.check_writable(caller)?;
            handle.commit()?;
            handle.queue().map(|queue| queue.id())
        };
        Ok(self.runtime.broadcast(self.path(), caller, own_queue))
    }

    /// Discards the write transaction. Nobody is notified.
    ///
    /// # Errors
    ///
    /// Same as [`commit_transaction`](Self::commit_transaction).
    pub fn cancel_transaction(&self, caller: ThreadToken) -> CoreResult<()> {
        let mut handle = self.handle.lock();
        handle.check_writable(caller)?;
        handle.cancel()
    }

    /// Runs `f` in a write transaction.
    ///
    /// Commits if `f` succeeds, cancels if it fails.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, or from beginning or committing.
    pub fn write<F, T>(&self, caller: ThreadToken, f: F) -> CoreResult<T>
    where
        F: FnOnce(&Database) -> CoreResult<T>,
    {
        self.begin_transaction(caller)?;
        let result = f(self).and_then(|value| {
            self.commit_transaction(caller)?;
            Ok(value)
        });
        // A failed commit stays in `Writing` and keeps the writer slot.
        if result.is_err() && self.is_in_transaction() {
            if let Err(cancel_err) = self.cancel_transaction(caller) {
                debug!(path = %self.path().display(), error = %cancel_err, "cancel after failed write");
            }
        }
        result
    }

    /// Returns true inside a write transaction.
    #[must_use]
    pub fn is_in_transaction(&self) -> bool {
        self.handle.lock().transaction_state() == TransactionState::Writing
    }

    /// Moves to the latest committed snapshot now, without waiting for a
    /// change notice.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed` on a closed handle, `WrongThread` from another
    /// thread, or an engine error inside a write transaction.
    pub fn refresh(&self, caller: ThreadToken) -> CoreResult<()> {
        let mut handle = self.handle.lock();
        handle.check_valid(caller)?;
        handle.advance()
    }

    /// Returns the version of the snapshot this thread reads.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed` or `WrongThread`.
    pub fn version(&self, caller: ThreadToken) -> CoreResult<u64> {
        let handle = self.handle.lock();
        handle.check_valid(caller)?;
        Ok(handle.connection().version())
    }

    // Data

    /// Reads a value from the current snapshot, or the write set inside a
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed` or `WrongThread`.
    pub fn get(&self, caller: ThreadToken, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        let handle = self.handle.lock();
        handle.check_valid(caller)?;
        Ok(handle.connection().get(key)?)
    }

    /// Writes a value.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` outside a write transaction.
    pub fn put(&self, caller: ThreadToken, key: &[u8], value: &[u8]) -> CoreResult<()> {
        let mut handle = self.handle.lock();
        handle.check_valid(caller)?;
        handle.connection_for_write()?.put(key, value)?;
        Ok(())
    }

    /// Removes a value. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` outside a write transaction.
    pub fn delete(&self, caller: ThreadToken, key: &[u8]) -> CoreResult<bool> {
        let mut handle = self.handle.lock();
        handle.check_valid(caller)?;
        Ok(handle.connection_for_write()?.delete(key)?)
    }

    /// Returns the number of entries visible to this thread.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed` or `WrongThread`.
    pub fn len(&self, caller: ThreadToken) -> CoreResult<usize> {
        let handle = self.handle.lock();
        handle.check_valid(caller)?;
        Ok(handle.connection().entry_count()?)
    }

    /// Returns true if no entries are visible to this thread.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed` or `WrongThread`.
    pub fn is_empty(&self, caller: ThreadToken) -> CoreResult<bool> {
        Ok(self.len(caller)? == 0)
    }

    // Copies

    /// Writes a compact copy of the store to `destination`.
    ///
    /// Inside a write transaction the copy includes the uncommitted changes.
    ///
    /// # Errors
    ///
    /// Returns `DestinationExists` without touching the store if
    /// `destination` exists, `AlreadyClosed` on a closed handle.
    pub fn write_copy_to(&self, caller: ThreadToken, destination: &Path) -> CoreResult<()> {
        self.copy_to(caller, destination, None)
    }

    /// Writes a compact copy encrypted with `key` to `destination`.
    ///
    /// # Errors
    ///
    /// Same as [`write_copy_to`](Self::write_copy_to), plus
    /// `InvalidKeySize` unless `key` is 64 bytes.
    pub fn write_encrypted_copy_to(
        &self,
        caller: ThreadToken,
        destination: &Path,
        key: &[u8],
    ) -> CoreResult<()> {
        self.copy_to(caller, destination, Some(key))
    }

    fn copy_to(
        &self,
        caller: ThreadToken,
        destination: &Path,
        key: Option<&[u8]>,
    ) -> CoreResult<()> {
        let handle = self.handle.lock();
        handle.check_valid(caller)?;
        let key = match key {
            Some(bytes) if bytes.len() != KEY_SIZE => {
                return Err(CoreError::invalid_key_size(bytes.len(), KEY_SIZE));
            }
            Some(bytes) => Some(EncryptionKey::from_bytes(bytes)?),
            None => None,
        };
        if destination.exists() {
            return Err(CoreError::DestinationExists {
                path: destination.to_path_buf(),
            });
        }
        handle.connection().copy_to_file(destination, key.as_ref())?;
        debug!(
            path = %self.path().display(),
            destination = %destination.display(),
            encrypted = key.is_some(),
            "wrote copy"
        );
        Ok(())
    }

    // Listeners

    /// Registers a listener called after this thread observes a change.
    ///
    /// The store holds the listener weakly: keep the `Arc` alive for as long
    /// as it should fire. Adding the same listener twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed` or `WrongThread`.
    pub fn add_change_listener(
        &self,
        caller: ThreadToken,
        listener: &Arc<dyn ChangeListener>,
    ) -> CoreResult<ListenerToken> {
        let mut handle = self.handle.lock();
        handle.check_valid(caller)?;
        Ok(handle.add_listener(listener))
    }

    /// Removes a listener. Returns whether it was registered.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed` or `WrongThread`.
    pub fn remove_change_listener(
        &self,
        caller: ThreadToken,
        listener: &Arc<dyn ChangeListener>,
    ) -> CoreResult<bool> {
        let mut handle = self.handle.lock();
        handle.check_valid(caller)?;
        Ok(handle.listeners_mut().remove(listener))
    }

    /// Removes the registration behind `token`. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed` or `WrongThread`.
    pub fn remove_change_listener_token(
        &self,
        caller: ThreadToken,
        token: ListenerToken,
    ) -> CoreResult<bool> {
        let mut handle = self.handle.lock();
        handle.check_valid(caller)?;
        Ok(handle.listeners_mut().remove_token(token))
    }

    /// Removes every listener on this thread's handle.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed` or `WrongThread`.
    pub fn remove_all_change_listeners(&self, caller: ThreadToken) -> CoreResult<()> {
        let mut handle = self.handle.lock();
        handle.check_valid(caller)?;
        handle.listeners_mut().clear();
        Ok(())
    }

    /// Returns the number of listener registrations, dead ones included
    /// until the next notification prunes them.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.handle.lock().listener_count()
    }

    // Auto-refresh

    /// Turns automatic refresh on or off.
    ///
    /// While on, commits from other threads post a change notice to the
    /// owning thread's message queue.
    ///
    /// # Errors
    ///
    /// Returns `NoMessageQueue` when turning it on for a thread without a
    /// queue, `AlreadyClosed` or `WrongThread`.
    pub fn set_auto_refresh(&self, caller: ThreadToken, enabled: bool) -> CoreResult<()> {
        self.runtime.set_auto_refresh(caller, &self.handle, enabled)
    }

    /// Returns true while automatic refresh is on.
    #[must_use]
    pub fn is_auto_refresh(&self) -> bool {
        self.handle.lock().queue().is_some()
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.config.path())
            .field("owner", &self.owner)
            .field("handle", &*self.handle.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confinedb_storage::SnapshotEngine;
    use tempfile::tempdir;

    fn open(name: &str) -> (Runtime, ThreadToken, Database) {
        let runtime = Runtime::new(SnapshotEngine::new());
        let me = ThreadToken::simulated();
        let config = Configuration::builder(format!("/mem/database/{name}"))
            .in_memory()
            .build()
            .unwrap();
        let db = runtime.open(me, &config).unwrap();
        (runtime, me, db)
    }

    #[test]
    fn write_commits_on_success() {
        let (_runtime, me, db) = open("write-ok");

        db.write(me, |db| db.put(me, b"a", b"1")).unwrap();

        assert!(!db.is_in_transaction());
        assert_eq!(db.get(me, b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(db.version(me).unwrap(), 1);
    }

    #[test]
    fn write_cancels_on_error() {
        let (_runtime, me, db) = open("write-err");

        let result: CoreResult<()> = db.write(me, |db| {
            db.put(me, b"a", b"1")?;
            Err(CoreError::invalid_state(db.path(), "boom"))
        });

        assert!(result.is_err());
        assert!(!db.is_in_transaction());
        assert_eq!(db.get(me, b"a").unwrap(), None);
    }

    #[test]
    fn write_releases_writer_when_commit_fails() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("sub");
        std::fs::create_dir(&dir).unwrap();
        let runtime = Runtime::new(SnapshotEngine::new());
        let me = ThreadToken::simulated();
        let other = ThreadToken::simulated();
        let config = Configuration::builder(dir.join("store.cdb")).build().unwrap();
        let db = runtime.open(me, &config).unwrap();
        let db_other = runtime.open(other, &config).unwrap();

        std::fs::remove_dir_all(&dir).unwrap();
        let result = db.write(me, |db| db.put(me, b"k", b"v"));

        assert!(matches!(result, Err(CoreError::Engine(_))));
        assert!(!db.is_in_transaction());
        assert_eq!(db.get(me, b"k").unwrap(), None);

        // Blocks forever if the failed write still held the writer slot.
        db_other.begin_transaction(other).unwrap();
        db_other.cancel_transaction(other).unwrap();

        db_other.close(other).unwrap();
        db.close(me).unwrap();
    }

    #[test]
    fn put_outside_transaction_fails() {
        let (_runtime, me, db) = open("put");
        assert!(matches!(
            db.put(me, b"a", b"1"),
            Err(CoreError::InvalidState { .. })
        ));
    }

    #[test]
    fn refresh_inside_transaction_fails() {
        let (_runtime, me, db) = open("refresh");
        db.begin_transaction(me).unwrap();
        assert!(matches!(db.refresh(me), Err(CoreError::Engine(_))));
        db.cancel_transaction(me).unwrap();
        db.refresh(me).unwrap();
    }

    #[test]
    fn closed_handle_rejects_calls() {
        let (_runtime, me, db) = open("closed");
        db.close(me).unwrap();

        assert!(db.is_closed());
        assert!(matches!(db.refresh(me), Err(CoreError::AlreadyClosed { .. })));
        assert!(matches!(db.get(me, b"a"), Err(CoreError::AlreadyClosed { .. })));
        assert!(matches!(
            db.begin_transaction(me),
            Err(CoreError::InvalidState { .. })
        ));
        assert!(matches!(
            db.set_auto_refresh(me, true),
            Err(CoreError::AlreadyClosed { .. })
        ));
    }

    #[test]
    fn closed_handle_rejects_copies() {
        let temp = tempdir().unwrap();
        let plain = temp.path().join("plain.cdb");
        let encrypted = temp.path().join("encrypted.cdb");
        let (_runtime, me, db) = open("closed-copy");
        db.close(me).unwrap();

        assert!(matches!(
            db.write_copy_to(me, &plain),
            Err(CoreError::AlreadyClosed { .. })
        ));
        assert!(matches!(
            db.write_encrypted_copy_to(me, &encrypted, &[2u8; KEY_SIZE]),
            Err(CoreError::AlreadyClosed { .. })
        ));
        assert!(!plain.exists());
        assert!(!encrypted.exists());
    }

    #[test]
    fn copy_to_existing_destination_fails() {
        let temp = tempdir().unwrap();
        let destination = temp.path().join("copy.cdb");
        std::fs::write(&destination, b"taken").unwrap();
        let (_runtime, me, db) = open("copy-exists");

        let err = db
            .write_encrypted_copy_to(me, &destination, &[4u8; KEY_SIZE])
            .unwrap_err();
        assert!(matches!(err, CoreError::DestinationExists { .. }));
        assert_eq!(std::fs::read(&destination).unwrap(), b"taken");
    }

    #[test]
    fn encrypted_copy_needs_full_key() {
        let temp = tempdir().unwrap();
        let (_runtime, me, db) = open("copy-key");

        let err = db
            .write_encrypted_copy_to(me, &temp.path().join("c.cdb"), &[1u8; 16])
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidKeySize { actual: 16, .. }));
    }

    #[test]
    fn copy_can_be_reopened() {
        let temp = tempdir().unwrap();
        let destination = temp.path().join("copy.cdb");
        let (runtime, me, db) = open("copy-open");
        db.write(me, |db| db.put(me, b"a", b"1")).unwrap();
        db.write_encrypted_copy_to(me, &destination, &[4u8; KEY_SIZE])
            .unwrap();

        let copy_config = Configuration::builder(&destination)
            .encryption_key(vec![4u8; KEY_SIZE])
            .build()
            .unwrap();
        let copy = runtime.open(me, &copy_config).unwrap();
        assert_eq!(copy.get(me, b"a").unwrap(), Some(b"1".to_vec()));
        copy.close(me).unwrap();
    }

    #[test]
    fn listener_tokens() {
        let (_runtime, me, db) = open("tokens");
        let listener: Arc<dyn ChangeListener> = Arc::new(|| {});

        let token = db.add_change_listener(me, &listener).unwrap();
        assert_eq!(db.add_change_listener(me, &listener).unwrap(), token);
        assert_eq!(db.listener_count(), 1);
        assert!(db.remove_change_listener_token(me, token).unwrap());
        assert_eq!(db.listener_count(), 0);
    }
}
