//! Per-thread message queues used to deliver change notices.
//!
//! A thread that wants its handles refreshed automatically owns a
//! [`MessageQueue`]. Committing threads post a [`ChangeNotice`] to it; the
//! owning thread drains its end of the queue and hands each notice to
//! [`Runtime::deliver`](crate::Runtime::deliver).
//!
//! At most one notice per path is outstanding on a queue. Posting while one
//! is pending is a no-op, so a burst of commits wakes a receiver once.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Identity of a message queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(Uuid);

impl QueueId {
    /// Creates a new random queue id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for QueueId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue-{}", self.0.simple())
    }
}

/// "The store at this path changed."
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeNotice {
    path: PathBuf,
}

impl ChangeNotice {
    /// Creates a notice for the store at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the canonical path of the changed store.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A thread's inbox for change notices.
///
/// Implementations can sit on a channel, an event loop or an async
/// scheduler. They must suppress duplicates: `post_once` with a notice that
/// is already pending returns `false` and enqueues nothing.
pub trait MessageQueue: Send + Sync {
    /// Returns the queue's identity.
    fn id(&self) -> QueueId;

    /// Enqueues `notice` unless an equal one is already pending.
    ///
    /// Returns true if a message was enqueued.
    fn post_once(&self, notice: &ChangeNotice) -> bool;

    /// Returns false once the receiving side is gone.
    fn is_receiver_alive(&self) -> bool;

    /// Withdraws a pending `notice`, if any.
    fn cancel(&self, notice: &ChangeNotice);
}

struct QueueState {
    pending: Mutex<HashSet<ChangeNotice>>,
    alive: AtomicBool,
}

/// Sending side of a channel-backed [`MessageQueue`].
pub struct ChannelQueue {
    id: QueueId,
    sender: Mutex<Sender<ChangeNotice>>,
    state: Arc<QueueState>,
}

/// Receiving side of a [`ChannelQueue`], held by the owning thread.
///
/// Dropping it marks the queue dead; later posts are skipped.
pub struct QueueReceiver {
    id: QueueId,
    receiver: Receiver<ChangeNotice>,
    state: Arc<QueueState>,
}

/// Creates a channel-backed message queue.
#[must_use]
pub fn channel() -> (Arc<ChannelQueue>, QueueReceiver) {
    let (tx, rx) = mpsc::channel();
    let id = QueueId::new();
    let state = Arc::new(QueueState {
        pending: Mutex::new(HashSet::new()),
        alive: AtomicBool::new(true),
    });

    let queue = ChannelQueue {
        id,
        sender: Mutex::new(tx),
        state: Arc::clone(&state),
    };
    let receiver = QueueReceiver {
        id,
        receiver: rx,
        state,
    };
    (Arc::new(queue), receiver)
}

impl ChannelQueue {
    /// Returns the number of notices posted but not yet received.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.pending.lock().len()
    }
}

impl MessageQueue for ChannelQueue {
    fn id(&self) -> QueueId {
        self.id
    }

    fn post_once(&self, notice: &ChangeNotice) -> bool {
        if !self.is_receiver_alive() {
            return false;
        }

        let mut pending = self.state.pending.lock();
        if !pending.insert(notice.clone()) {
            return false;
        }
        if self.sender.lock().send(notice.clone()).is_err() {
            pending.remove(notice);
            self.state.alive.store(false, Ordering::SeqCst);
            return false;
        }
        true
    }

    fn is_receiver_alive(&self) -> bool {
        self.state.alive.load(Ordering::SeqCst)
    }

    fn cancel(&self, notice: &ChangeNotice) {
        self.state.pending.lock().remove(notice);
    }
}

impl fmt::Debug for ChannelQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelQueue")
            .field("id", &self.id)
            .field("alive", &self.is_receiver_alive())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl QueueReceiver {
    /// Returns the id of the queue this receiver drains.
    #[must_use]
    pub fn id(&self) -> QueueId {
        self.id
    }

    /// Takes the next notice without blocking.
    ///
    /// Cancelled notices still in the channel are skipped.
    #[must_use]
    pub fn try_recv(&self) -> Option<ChangeNotice> {
        loop {
            match self.receiver.try_recv() {
                Ok(notice) => {
                    if self.accept(&notice) {
                        return Some(notice);
                    }
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return None,
            }
        }
    }

    /// Waits up to `timeout` for the next notice.
    #[must_use]
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ChangeNotice> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match self.receiver.recv_timeout(remaining) {
                Ok(notice) => {
                    if self.accept(&notice) {
                        return Some(notice);
                    }
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Clears the pending mark so the next commit posts again.
    fn accept(&self, notice: &ChangeNotice) -> bool {
        self.state.pending.lock().remove(notice)
    }
}

impl fmt::Debug for QueueReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueReceiver").field("id", &self.id).finish()
    }
}

impl Drop for QueueReceiver {
    fn drop(&mut self) {
        self.state.alive.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_and_receive() {
        let (queue, receiver) = channel();
        let notice = ChangeNotice::new("/stores/a.cdb");

        assert!(queue.post_once(&notice));
        assert_eq!(receiver.try_recv(), Some(notice));
        assert_eq!(receiver.try_recv(), None);
    }

    #[test]
    fn duplicates_are_coalesced() {
        let (queue, receiver) = channel();
        let notice = ChangeNotice::new("/stores/a.cdb");

        assert!(queue.post_once(&notice));
        assert!(!queue.post_once(&notice));
        assert!(!queue.post_once(&notice));
        assert_eq!(queue.pending_count(), 1);

        assert!(receiver.try_recv().is_some());
        assert!(receiver.try_recv().is_none());
    }

    #[test]
    fn receipt_reopens_posting() {
        let (queue, receiver) = channel();
        let notice = ChangeNotice::new("/stores/a.cdb");

        assert!(queue.post_once(&notice));
        assert!(receiver.try_recv().is_some());
        assert!(queue.post_once(&notice));
    }

    #[test]
    fn different_paths_are_independent() {
        let (queue, receiver) = channel();

        assert!(queue.post_once(&ChangeNotice::new("/stores/a.cdb")));
        assert!(queue.post_once(&ChangeNotice::new("/stores/b.cdb")));
        assert!(receiver.try_recv().is_some());
        assert!(receiver.try_recv().is_some());
    }

    #[test]
    fn cancelled_notice_is_skipped() {
        let (queue, receiver) = channel();
        let notice = ChangeNotice::new("/stores/a.cdb");

        assert!(queue.post_once(&notice));
        queue.cancel(&notice);
        assert_eq!(queue.pending_count(), 0);
        assert_eq!(receiver.try_recv(), None);
    }

    #[test]
    fn dropped_receiver_marks_queue_dead() {
        let (queue, receiver) = channel();
        assert!(queue.is_receiver_alive());

        drop(receiver);
        assert!(!queue.is_receiver_alive());
        assert!(!queue.post_once(&ChangeNotice::new("/stores/a.cdb")));
    }

    #[test]
    fn recv_timeout_waits_for_notice() {
        let (queue, receiver) = channel();
        let notice = ChangeNotice::new("/stores/a.cdb");

        let poster = {
            let queue = Arc::clone(&queue);
            let notice = notice.clone();
            std::thread::spawn(move || queue.post_once(&notice))
        };

        assert_eq!(receiver.recv_timeout(Duration::from_secs(5)), Some(notice));
        assert!(poster.join().unwrap());
        assert_eq!(receiver.recv_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn queue_ids_are_unique() {
        let (a, _ra) = channel();
        let (b, _rb) = channel();
        assert_ne!(a.id(), b.id());
    }
}
