//! The process-wide context tying the registries together.

use crate::config::Configuration;
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::handle::{SharedHandle, StoreHandle};
use crate::hook::LifecycleHook;
use crate::notify::{self, BroadcastReport, QueueRegistry};
use crate::queue::{ChangeNotice, MessageQueue, QueueId, QueueReceiver};
use crate::refcount::{Decrement, ThreadRefCounter};
use crate::registry::ConfigurationRegistry;
use crate::thread::ThreadToken;
use confinedb_storage::{SnapshotEngine, StorageEngine};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace, warn};

static GLOBAL: OnceLock<Runtime> = OnceLock::new();

/// Outcome of [`Database::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Other opens of the configuration on this thread remain.
    StillOpen {
        /// Opens left on this thread.
        remaining: usize,
    },
    /// This was the thread's last instance; its handle was released.
    Released,
    /// The configuration was not open on this thread. Nothing changed.
    AlreadyClosed,
}

impl CloseOutcome {
    /// Returns true if this close released the thread's handle.
    #[must_use]
    pub fn was_last_instance(self) -> bool {
        self == CloseOutcome::Released
    }
}

struct Inner {
    engine: Box<dyn StorageEngine>,
    registry: ConfigurationRegistry,
    refcounts: ThreadRefCounter,
    queues: QueueRegistry,
    thread_queues: Mutex<HashMap<ThreadToken, Arc<dyn MessageQueue>>>,
    hook: Option<Box<dyn LifecycleHook>>,
}

/// Opens stores and routes change notices between threads.
///
/// A runtime owns the storage engine, the [`ConfigurationRegistry`], the
/// per-thread open counts and the queue registry. Cloning is cheap and
/// shares all of it. Most programs use [`Runtime::global`].
///
/// # Example
///
/// ```rust
/// use confinedb_core::{Configuration, Runtime, ThreadToken};
/// use confinedb_storage::SnapshotEngine;
///
/// let runtime = Runtime::new(SnapshotEngine::new());
/// let me = ThreadToken::current();
/// let config = Configuration::builder("/mem/runtime-doc").in_memory().build().unwrap();
///
/// let db = runtime.open(me, &config).unwrap();
/// db.begin_transaction(me).unwrap();
/// db.put(me, b"greeting", b"hello").unwrap();
/// db.commit_transaction(me).unwrap();
///
/// assert_eq!(db.get(me, b"greeting").unwrap(), Some(b"hello".to_vec()));
/// assert!(db.close(me).unwrap().was_last_instance());
/// ```
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<Inner>,
}

impl Runtime {
    /// Creates a runtime over `engine`.
    pub fn new(engine: impl StorageEngine + 'static) -> Self {
        Self::build(Box::new(engine), None)
    }

    /// Creates a runtime that reports lifecycle events to `hook`.
    pub fn with_hook(engine: impl StorageEngine + 'static, hook: impl LifecycleHook + 'static) -> Self {
        Self::build(Box::new(engine), Some(Box::new(hook)))
    }

    fn build(engine: Box<dyn StorageEngine>, hook: Option<Box<dyn LifecycleHook>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                registry: ConfigurationRegistry::new(),
                refcounts: ThreadRefCounter::new(),
                queues: QueueRegistry::new(),
                thread_queues: Mutex::new(HashMap::new()),
                hook,
            }),
        }
    }

    /// Returns the process-wide runtime over a default [`SnapshotEngine`].
    ///
    /// Constructed on first use and never torn down.
    pub fn global() -> &'static Runtime {
        GLOBAL.get_or_init(|| Runtime::new(SnapshotEngine::new()))
    }

    /// Returns the storage engine.
    #[must_use]
    pub fn engine(&self) -> &dyn StorageEngine {
        self.inner.engine.as_ref()
    }

    /// Returns the configuration registry.
    #[must_use]
    pub fn registry(&self) -> &ConfigurationRegistry {
        &self.inner.registry
    }

    /// Opens `config` on the `caller` thread.
    ///
    /// The first open on a thread validates the configuration against the
    /// ones already open on its path and connects to the engine. Later opens
    /// on the same thread share that connection and bump its open count.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationConflict` if the configuration disagrees with
    /// open ones, or an engine error if the store can't be opened. Neither
    /// leaves a registration behind.
    pub fn open(&self, caller: ThreadToken, config: &Configuration) -> CoreResult<Database> {
        if let Some(handle) = self.inner.refcounts.retain(caller, config) {
            trace!(
                path = %config.path().display(),
                thread = %caller,
                count = self.inner.refcounts.count(caller, config),
                "reused handle"
            );
            return Ok(Database::new(self.clone(), config.clone(), caller, handle));
        }

        self.inner.registry.validate_and_register(config)?;
        let connection = match self.inner.engine.open_connection(
            config.path(),
            config.encryption_key(),
            config.durability(),
        ) {
            Ok(connection) => connection,
            Err(err) => {
                self.inner.registry.unregister(config);
                return Err(err.into());
            }
        };

        let handle = StoreHandle::new(config.clone(), caller, connection).into_shared();
        if let Some(queue) = self.thread_queue(caller) {
            self.enable_auto_refresh(&handle, queue);
        }
        self.inner
            .refcounts
            .insert(caller, config.clone(), Arc::clone(&handle));

        Ok(Database::new(self.clone(), config.clone(), caller, handle))
    }

    /// Closes one open of `config` on the `caller` thread.
    pub(crate) fn close(
        &self,
        caller: ThreadToken,
        owner: ThreadToken,
        config: &Configuration,
    ) -> CoreResult<CloseOutcome> {
        if caller != owner {
            return Err(CoreError::wrong_thread(config.path(), owner, caller));
        }

        match self.inner.refcounts.decrement(caller, config) {
            Decrement::AlreadyClosed => {
                warn!(path = %config.path().display(), thread = %caller, "store is already closed");
                Ok(CloseOutcome::AlreadyClosed)
            }
            Decrement::Remaining(remaining) => {
                trace!(path = %config.path().display(), thread = %caller, remaining, "closed instance");
                Ok(CloseOutcome::StillOpen { remaining })
            }
            Decrement::Last(handle) => {
                {
                    let mut guard = handle.lock();
                    if let Some(queue) = guard.queue().map(|queue| queue.id()) {
                        self.inner.queues.unregister(queue, config.path());
                    }
                    guard.release();
                }

                if self.inner.registry.unregister(config) == Some(0) {
                    debug!(path = %config.path().display(), "last handle closed");
                    if let Some(hook) = &self.inner.hook {
                        hook.store_closed(config);
                    }
                }
                Ok(CloseOutcome::Released)
            }
        }
    }

    /// Binds `queue` to `thread`.
    ///
    /// Handles opened on the thread afterwards default to auto-refresh.
    /// Returns the queue previously bound, if any.
    pub fn attach_queue(
        &self,
        thread: ThreadToken,
        queue: Arc<dyn MessageQueue>,
    ) -> Option<Arc<dyn MessageQueue>> {
        debug!(%thread, queue = %queue.id(), "attached message queue");
        self.inner.thread_queues.lock().insert(thread, queue)
    }

    /// Unbinds the queue from `thread`.
    ///
    /// Handles that already auto-refresh through it keep doing so until
    /// auto-refresh is turned off or they close.
    pub fn detach_queue(&self, thread: ThreadToken) -> Option<Arc<dyn MessageQueue>> {
        let queue = self.inner.thread_queues.lock().remove(&thread);
        if let Some(queue) = &queue {
            debug!(%thread, queue = %queue.id(), "detached message queue");
        }
        queue
    }

    fn thread_queue(&self, thread: ThreadToken) -> Option<Arc<dyn MessageQueue>> {
        self.inner.thread_queues.lock().get(&thread).cloned()
    }

    fn enable_auto_refresh(&self, handle: &SharedHandle, queue: Arc<dyn MessageQueue>) {
        let mut guard = handle.lock();
        self.inner
            .queues
            .register(guard.path(), guard.owner(), Arc::clone(&queue), handle);
        guard.set_queue(Some(queue));
    }

    pub(crate) fn set_auto_refresh(
        &self,
        caller: ThreadToken,
        handle: &SharedHandle,
        enabled: bool,
    ) -> CoreResult<()> {
        let current = {
            let guard = handle.lock();
            guard.check_valid(caller)?;
            guard.queue().map(|queue| queue.id())
        };

        match (enabled, current) {
            (true, Some(_)) | (false, None) => Ok(()),
            (true, None) => {
                let queue = self
                    .thread_queue(caller)
                    .ok_or(CoreError::NoMessageQueue { thread: caller })?;
                self.enable_auto_refresh(handle, queue);
                Ok(())
            }
            (false, Some(queue)) => {
                let mut guard = handle.lock();
                self.inner.queues.unregister(queue, guard.path());
                guard.set_queue(None);
                Ok(())
            }
        }
    }

    /// Fans a commit out to the other threads watching `path`.
    pub(crate) fn broadcast(
        &self,
        path: &Path,
        committer: ThreadToken,
        own_queue: Option<QueueId>,
    ) -> BroadcastReport {
        notify::broadcast(&self.inner.queues, path, committer, own_queue)
    }

    /// Handles a change notice on the thread that owns `queue`.
    ///
    /// Advances that thread's handle to the latest snapshot and runs its
    /// listeners. Returns false, doing nothing, if the registration is gone.
    ///
    /// # Errors
    ///
    /// Returns `WrongThread` if `caller` does not own the registration, or
    /// an engine error if the snapshot can't be advanced.
    pub fn deliver(
        &self,
        caller: ThreadToken,
        queue: QueueId,
        notice: &ChangeNotice,
    ) -> CoreResult<bool> {
        let Some(entry) = self.inner.queues.get(queue, notice.path()) else {
            trace!(path = %notice.path().display(), %queue, "no registration for notice");
            return Ok(false);
        };
        if entry.owner != caller {
            return Err(CoreError::wrong_thread(notice.path(), entry.owner, caller));
        }
        notify::receive(&entry)
    }

    /// Delivers every notice waiting on `receiver`.
    ///
    /// Returns the number of notices that reached a handle.
    ///
    /// # Errors
    ///
    /// Stops at the first delivery error.
    pub fn pump(&self, caller: ThreadToken, receiver: &QueueReceiver) -> CoreResult<usize> {
        let mut delivered = 0;
        while let Some(notice) = receiver.try_recv() {
            if self.deliver(caller, receiver.id(), &notice)? {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// Returns the open count of `config` on `thread`.
    #[must_use]
    pub fn open_count(&self, thread: ThreadToken, config: &Configuration) -> usize {
        self.inner.refcounts.count(thread, config)
    }

    /// Returns the number of configurations open on `thread`.
    #[must_use]
    pub fn open_configurations(&self, thread: ThreadToken) -> usize {
        self.inner.refcounts.configurations_on(thread)
    }

    /// Returns true if `queue` is registered to refresh a handle on `path`.
    #[must_use]
    pub fn is_queue_registered(&self, queue: QueueId, path: &Path) -> bool {
        self.inner.queues.contains(queue, path)
    }

    /// Returns the number of auto-refresh registrations.
    #[must_use]
    pub fn queue_registrations(&self) -> usize {
        self.inner.queues.len()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("paths", &self.inner.registry.path_count())
            .field("queue_registrations", &self.inner.queues.len())
            .field("hook", &self.inner.hook.is_some())
            .finish()
    }
}
