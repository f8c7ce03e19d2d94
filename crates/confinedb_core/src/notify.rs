//! Cross-thread change notification.
//!
//! The [`QueueRegistry`] records which thread queues watch which store
//! path. After a commit, [`broadcast`] walks a snapshot of the registry:
//!
//! - The committing thread's own registration is notified synchronously,
//!   its data is already current.
//! - Every other queue watching the path gets one [`ChangeNotice`], unless
//!   one is already pending there.
//! - Queues whose receiver is gone are skipped.
//!
//! The receiving thread later calls [`receive`] to advance its handle and
//! run its listeners.

use crate::error::CoreResult;
use crate::handle::{SharedHandle, StoreHandle};
use crate::listener::{notify_all, ChangeListener};
use crate::queue::{ChangeNotice, MessageQueue, QueueId};
use crate::thread::ThreadToken;
use crate::transaction::TransactionState;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// One auto-refresh registration.
#[derive(Clone)]
pub(crate) struct QueueEntry {
    pub(crate) owner: ThreadToken,
    pub(crate) queue: Arc<dyn MessageQueue>,
    pub(crate) handle: Weak<Mutex<StoreHandle>>,
}

/// Process-wide map from `(queue, path)` to the handle it refreshes.
#[derive(Default)]
pub(crate) struct QueueRegistry {
    entries: Mutex<HashMap<(QueueId, PathBuf), QueueEntry>>,
}

impl QueueRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, path: &Path, owner: ThreadToken, queue: Arc<dyn MessageQueue>, handle: &SharedHandle) {
        let id = queue.id();
        self.entries.lock().insert(
            (id, path.to_path_buf()),
            QueueEntry {
                owner,
                queue,
                handle: Arc::downgrade(handle),
            },
        );
        debug!(path = %path.display(), queue = %id, thread = %owner, "registered queue");
    }

    /// Removes a registration and withdraws its pending notice.
    pub(crate) fn unregister(&self, queue: QueueId, path: &Path) -> bool {
        let removed = self.entries.lock().remove(&(queue, path.to_path_buf()));
        match removed {
            Some(entry) => {
                entry.queue.cancel(&ChangeNotice::new(path));
                debug!(path = %path.display(), %queue, "unregistered queue");
                true
            }
            None => false,
        }
    }

    pub(crate) fn get(&self, queue: QueueId, path: &Path) -> Option<QueueEntry> {
        self.entries.lock().get(&(queue, path.to_path_buf())).cloned()
    }

    pub(crate) fn contains(&self, queue: QueueId, path: &Path) -> bool {
        self.entries.lock().contains_key(&(queue, path.to_path_buf()))
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Copies out the registrations watching `path`.
    fn watching(&self, path: &Path) -> Vec<(QueueId, QueueEntry)> {
        self.entries
            .lock()
            .iter()
            .filter(|((_, watched), _)| watched == path)
            .map(|((id, _), entry)| (*id, entry.clone()))
            .collect()
    }
}

/// What one broadcast did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    /// The committing thread's listeners ran synchronously.
    pub notified_locally: bool,
    /// Notices enqueued.
    pub posted: usize,
    /// Receivers that already had a notice pending.
    pub coalesced: usize,
    /// Receivers whose thread is gone.
    pub skipped_dead: usize,
}

/// Collects a handle's live listeners, pruning dead registrations.
///
/// The handle lock is released before the caller invokes them.
pub(crate) fn live_listeners(handle: &SharedHandle) -> Vec<Arc<dyn ChangeListener>> {
    let mut guard = handle.lock();
    if guard.is_released() {
        return Vec::new();
    }
    guard.listeners_mut().live()
}

/// Fans a commit on `path` out to every registered queue.
///
/// `own_queue` is the committing handle's queue, if auto-refresh is on.
pub(crate) fn broadcast(
    registry: &QueueRegistry,
    path: &Path,
    committer: ThreadToken,
    own_queue: Option<QueueId>,
) -> BroadcastReport {
    let mut report = BroadcastReport::default();
    let notice = ChangeNotice::new(path);

    for (id, entry) in registry.watching(path) {
        if Some(id) == own_queue && entry.owner == committer {
            if let Some(handle) = entry.handle.upgrade() {
                notify_all(&live_listeners(&handle));
                report.notified_locally = true;
            }
            continue;
        }

        if !entry.queue.is_receiver_alive() {
            warn!(path = %path.display(), queue = %id, thread = %entry.owner, "skipping dead receiver");
            report.skipped_dead += 1;
            continue;
        }

        if entry.queue.post_once(&notice) {
            trace!(path = %path.display(), queue = %id, "posted change notice");
            report.posted += 1;
        } else if entry.queue.is_receiver_alive() {
            trace!(path = %path.display(), queue = %id, "change notice already pending");
            report.coalesced += 1;
        } else {
            warn!(path = %path.display(), queue = %id, thread = %entry.owner, "skipping dead receiver");
            report.skipped_dead += 1;
        }
    }

    debug!(
        path = %path.display(),
        local = report.notified_locally,
        posted = report.posted,
        coalesced = report.coalesced,
        dead = report.skipped_dead,
        "broadcast commit"
    );
    report
}

/// Handles a notice on the receiving thread.
///
/// Advances the handle to the latest snapshot, then runs its listeners. A
/// handle inside a write transaction is already current and only notified.
/// Returns false when there is nothing registered to deliver to.
pub(crate) fn receive(entry: &QueueEntry) -> CoreResult<bool> {
    let Some(handle) = entry.handle.upgrade() else {
        return Ok(false);
    };

    let listeners = {
        let mut guard = handle.lock();
        if guard.is_released() {
            return Ok(false);
        }
        if guard.transaction_state() == TransactionState::ReadOnly {
            guard.advance()?;
        }
        guard.listeners_mut().live()
    };

    notify_all(&listeners);
    Ok(true)
}
