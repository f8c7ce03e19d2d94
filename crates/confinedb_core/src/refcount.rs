//! Per-thread open counts.

use crate::config::Configuration;
use crate::handle::SharedHandle;
use crate::thread::ThreadToken;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

struct Entry {
    count: usize,
    handle: SharedHandle,
}

/// Result of decrementing an open count.
pub(crate) enum Decrement {
    /// The count was already zero.
    AlreadyClosed,
    /// Other opens on this thread remain.
    Remaining(usize),
    /// The count went from one to zero; the caller releases the handle.
    Last(SharedHandle),
}

/// Open counts per thread and configuration.
///
/// Counts are independent per thread: the same configuration opened on two
/// threads has two counters and two handles. Each thread only ever touches
/// its own map; the lock guards the outer table.
#[derive(Default)]
pub(crate) struct ThreadRefCounter {
    threads: Mutex<HashMap<ThreadToken, HashMap<Configuration, Entry>>>,
}

impl ThreadRefCounter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the open count of `config` on `thread`.
    pub(crate) fn count(&self, thread: ThreadToken, config: &Configuration) -> usize {
        self.threads
            .lock()
            .get(&thread)
            .and_then(|configs| configs.get(config))
            .map_or(0, |entry| entry.count)
    }

    /// Increments an existing count and returns its handle.
    ///
    /// Returns `None` when the count is zero; the caller opens a handle and
    /// calls [`insert`](Self::insert).
    pub(crate) fn retain(&self, thread: ThreadToken, config: &Configuration) -> Option<SharedHandle> {
        let mut threads = self.threads.lock();
        let entry = threads.get_mut(&thread)?.get_mut(config)?;
        entry.count += 1;
        Some(Arc::clone(&entry.handle))
    }

    /// Records a freshly opened handle with a count of one.
    pub(crate) fn insert(&self, thread: ThreadToken, config: Configuration, handle: SharedHandle) {
        self.threads
            .lock()
            .entry(thread)
            .or_default()
            .insert(config, Entry { count: 1, handle });
    }

    /// Decrements the count, never below zero.
    pub(crate) fn decrement(&self, thread: ThreadToken, config: &Configuration) -> Decrement {
        let mut threads = self.threads.lock();
        let Some(configs) = threads.get_mut(&thread) else {
            return Decrement::AlreadyClosed;
        };
        let Some(entry) = configs.get_mut(config) else {
            return Decrement::AlreadyClosed;
        };

        entry.count -= 1;
        if entry.count > 0 {
            return Decrement::Remaining(entry.count);
        }

        let handle = configs
            .remove(config)
            .map(|entry| entry.handle);
        if configs.is_empty() {
            threads.remove(&thread);
        }
        match handle {
            Some(handle) => Decrement::Last(handle),
            None => Decrement::AlreadyClosed,
        }
    }

    /// Returns the number of configurations open on `thread`.
    pub(crate) fn configurations_on(&self, thread: ThreadToken) -> usize {
        self.threads.lock().get(&thread).map_or(0, HashMap::len)
    }
}
