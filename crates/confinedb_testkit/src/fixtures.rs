//! Test fixtures and store helpers.
//!
//! Provides convenience functions for setting up test stores,
//! simulated threads and listeners that count their calls.

use confinedb_core::{
    queue, ChangeListener, ChannelQueue, Configuration, ConfigurationBuilder, Database,
    QueueReceiver, Runtime, ThreadToken,
};
use confinedb_storage::SnapshotEngine;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

static NEXT_MEMORY_STORE: AtomicU64 = AtomicU64::new(0);

/// A store configuration bound to its own runtime, with automatic cleanup.
pub struct TestStore {
    /// The runtime the store is opened through.
    pub runtime: Runtime,
    /// The store configuration.
    pub config: Configuration,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates a fixture for a fresh in-memory store.
    pub fn memory() -> Self {
        let n = NEXT_MEMORY_STORE.fetch_add(1, Ordering::Relaxed);
        let config = Configuration::builder(format!("/mem/testkit/store-{n}"))
            .in_memory()
            .build()
            .expect("Failed to build in-memory configuration");
        Self {
            runtime: Runtime::new(SnapshotEngine::new()),
            config,
            _temp_dir: None,
        }
    }

    /// Creates a fixture for a persisted store in a temporary directory.
    pub fn file() -> Self {
        Self::file_with(|builder| builder)
    }

    /// Creates a fixture for a persisted store encrypted with `key`.
    pub fn encrypted(key: &[u8]) -> Self {
        let key = key.to_vec();
        Self::file_with(move |builder| builder.encryption_key(key))
    }

    fn file_with(customize: impl FnOnce(ConfigurationBuilder) -> ConfigurationBuilder) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = customize(Configuration::builder(temp_dir.path().join("test.cdb")))
            .build()
            .expect("Failed to build file configuration");
        Self {
            runtime: Runtime::new(SnapshotEngine::new()),
            config,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the canonical store path.
    pub fn path(&self) -> &Path {
        self.config.path()
    }

    /// Returns the temporary directory, if file-based.
    pub fn dir(&self) -> Option<PathBuf> {
        self._temp_dir.as_ref().map(|d| d.path().to_path_buf())
    }

    /// Opens the store on `thread`.
    pub fn open(&self, thread: ThreadToken) -> Database {
        self.runtime
            .open(thread, &self.config)
            .expect("Failed to open test store")
    }

    /// Mints a simulated thread with a message queue attached.
    pub fn thread_with_queue(&self) -> SimulatedThread {
        SimulatedThread::with_queue(&self.runtime)
    }
}

/// A simulated thread: a fresh token and, optionally, its message queue.
pub struct SimulatedThread {
    /// The thread's token.
    pub token: ThreadToken,
    queue: Option<(Arc<ChannelQueue>, QueueReceiver)>,
}

impl SimulatedThread {
    /// Mints a thread without a message queue.
    pub fn new() -> Self {
        Self {
            token: ThreadToken::simulated(),
            queue: None,
        }
    }

    /// Mints a thread and attaches a fresh queue to it on `runtime`.
    pub fn with_queue(runtime: &Runtime) -> Self {
        let token = ThreadToken::simulated();
        let (queue, receiver) = queue::channel();
        runtime.attach_queue(token, queue.clone());
        Self {
            token,
            queue: Some((queue, receiver)),
        }
    }

    /// Returns the thread's queue, if one is attached.
    pub fn queue(&self) -> Option<&Arc<ChannelQueue>> {
        self.queue.as_ref().map(|(queue, _)| queue)
    }

    /// Returns the number of notices waiting for this thread.
    pub fn pending(&self) -> usize {
        self.queue().map_or(0, |queue| queue.pending_count())
    }

    /// Delivers every waiting notice, as the thread's event loop would.
    pub fn pump(&self, runtime: &Runtime) -> usize {
        match &self.queue {
            Some((_, receiver)) => runtime
                .pump(self.token, receiver)
                .expect("Failed to deliver notices"),
            None => 0,
        }
    }
}

impl Default for SimulatedThread {
    fn default() -> Self {
        Self::new()
    }
}

/// A change listener that counts its invocations.
#[derive(Clone)]
pub struct RecordingListener {
    calls: Arc<AtomicUsize>,
    listener: Arc<dyn ChangeListener>,
}

impl RecordingListener {
    /// Creates a listener with a zero count.
    pub fn new() -> Self {
        let calls = Arc::new(AtomicUsize::new(0));
        let listener: Arc<dyn ChangeListener> = {
            let calls = Arc::clone(&calls);
            Arc::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        Self { calls, listener }
    }

    /// The listener to register with a [`Database`].
    pub fn listener(&self) -> &Arc<dyn ChangeListener> {
        &self.listener
    }

    /// Number of calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for RecordingListener {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a test against a temporary in-memory store.
///
/// The store is closed after `f` returns.
///
/// # Example
///
/// ```rust
/// use confinedb_testkit::with_temp_store;
///
/// with_temp_store(|db, me| {
///     assert!(db.is_empty(me).unwrap());
/// });
/// ```
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&Database, ThreadToken) -> R,
{
    let store = TestStore::memory();
    let me = ThreadToken::simulated();
    let db = store.open(me);
    let result = f(&db, me);
    db.close(me).expect("Failed to close test store");
    result
}

/// Runs a test against a temporary persisted store.
pub fn with_file_store<F, R>(f: F) -> R
where
    F: FnOnce(&Database, ThreadToken, &Path) -> R,
{
    let store = TestStore::file();
    let me = ThreadToken::simulated();
    let db = store.open(me);
    let result = f(&db, me, store.path());
    db.close(me).expect("Failed to close test store");
    result
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates a store with `entries` committed keys, one per transaction.
    ///
    /// Returns the fixture with the handle still open on the returned thread.
    pub fn populated_store(entries: usize) -> (TestStore, ThreadToken, Database) {
        let store = TestStore::memory();
        let me = ThreadToken::simulated();
        let db = store.open(me);

        for i in 0..entries {
            let key = format!("key-{i:04}");
            let value = format!(r#"{{"index":{i}}}"#);
            db.write(me, |db| db.put(me, key.as_bytes(), value.as_bytes()))
                .expect("Failed to populate store");
        }

        (store, me, db)
    }

    /// Opens one store on `readers` simulated threads with queues.
    ///
    /// Each reader's handle starts with auto-refresh on.
    pub fn readers(store: &TestStore, readers: usize) -> Vec<(SimulatedThread, Database)> {
        (0..readers)
            .map(|_| {
                let thread = store.thread_with_queue();
                let db = store.open(thread.token);
                (thread, db)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store() {
        let store = TestStore::memory();
        assert!(store.dir().is_none());
        let me = ThreadToken::simulated();
        let db = store.open(me);
        assert!(db.is_empty(me).unwrap());
        db.close(me).unwrap();
    }

    #[test]
    fn test_memory_stores_are_distinct() {
        let a = TestStore::memory();
        let b = TestStore::memory();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn test_with_file_store() {
        let path = with_file_store(|db, me, path| {
            db.write(me, |db| db.put(me, b"k", b"v")).unwrap();
            assert!(path.exists());
            path.to_path_buf()
        });
        assert!(!path.exists());
    }

    #[test]
    fn test_populated_scenario() {
        let (_store, me, db) = scenarios::populated_store(10);
        assert_eq!(db.len(me).unwrap(), 10);
        assert_eq!(db.version(me).unwrap(), 10);
        db.close(me).unwrap();
    }

    #[test]
    fn test_recording_listener_counts_notifications() {
        let store = TestStore::memory();
        let thread = store.thread_with_queue();
        let db = store.open(thread.token);
        let recorder = RecordingListener::new();
        db.add_change_listener(thread.token, recorder.listener())
            .unwrap();

        db.write(thread.token, |db| db.put(thread.token, b"k", b"v"))
            .unwrap();

        assert_eq!(recorder.calls(), 1);
        db.close(thread.token).unwrap();
    }

    #[test]
    fn test_simulated_thread_without_queue_pumps_nothing() {
        let store = TestStore::memory();
        let thread = SimulatedThread::new();
        assert!(thread.queue().is_none());
        assert_eq!(thread.pending(), 0);
        assert_eq!(thread.pump(&store.runtime), 0);
    }
}
