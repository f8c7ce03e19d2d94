//! Cross-component integration test helpers.
//!
//! Provides a tracking harness for store contents and reusable checks
//! for transactions and cross-thread notification.

use crate::fixtures::{scenarios, RecordingListener, TestStore};
use crate::generators::StoreOperation;
use confinedb_core::{CoreError, Database, ThreadToken};
use std::collections::BTreeMap;

/// A test harness that mirrors every committed write in a model map.
pub struct IntegrationHarness {
    /// The store fixture.
    pub store: TestStore,
    /// The thread that owns `db`.
    pub thread: ThreadToken,
    /// The open handle.
    pub db: Database,
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl IntegrationHarness {
    /// Creates a harness over a fresh in-memory store.
    pub fn new() -> Self {
        let store = TestStore::memory();
        let thread = ThreadToken::simulated();
        let db = store.open(thread);
        Self {
            store,
            thread,
            db,
            entries: BTreeMap::new(),
        }
    }

    /// Puts a value in its own transaction and tracks it.
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        let me = self.thread;
        self.db
            .write(me, |db| db.put(me, key, value))
            .expect("Failed to put value");
        self.entries.insert(key.to_vec(), value.to_vec());
    }

    /// Deletes a key in its own transaction and updates tracking.
    pub fn delete(&mut self, key: &[u8]) {
        let me = self.thread;
        self.db
            .write(me, |db| db.delete(me, key))
            .expect("Failed to delete value");
        self.entries.remove(key);
    }

    /// Reads a key and checks it against the tracked value.
    pub fn get_and_verify(&self, key: &[u8]) -> Option<Vec<u8>> {
        let actual = self.db.get(self.thread, key).expect("Failed to get value");
        assert_eq!(
            actual.as_ref(),
            self.entries.get(key),
            "Value mismatch for key {:?}",
            String::from_utf8_lossy(key)
        );
        actual
    }

    /// Applies one generated operation.
    pub fn apply(&mut self, op: &StoreOperation) {
        match op {
            StoreOperation::Put { key, value } => self.put(key, value),
            StoreOperation::Delete { key } => self.delete(key),
            StoreOperation::Get { key } => {
                self.get_and_verify(key);
            }
        }
    }

    /// Verifies every tracked entry and the entry count.
    pub fn verify_all(&self) {
        for (key, expected) in &self.entries {
            let actual = self.db.get(self.thread, key).expect("Failed to get value");
            assert_eq!(
                actual.as_ref(),
                Some(expected),
                "Value mismatch for key {:?}",
                String::from_utf8_lossy(key)
            );
        }
        assert_eq!(
            self.db.len(self.thread).expect("Failed to count entries"),
            self.entries.len()
        );
    }

    /// Returns the count of tracked entries.
    pub fn tracked_count(&self) -> usize {
        self.entries.len()
    }
}

impl Default for IntegrationHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Transaction checks.
pub mod transaction {
    use super::*;

    /// Checks that a handle keeps its snapshot until it refreshes.
    pub fn check_reader_isolation(store: &TestStore) {
        let writer = ThreadToken::simulated();
        let reader = ThreadToken::simulated();
        let db_w = store.open(writer);
        let db_r = store.open(reader);

        db_w.write(writer, |db| db.put(writer, b"isolated", b"v1"))
            .expect("Failed to commit");
        assert_eq!(db_r.get(reader, b"isolated").expect("Failed to get"), None);

        db_r.refresh(reader).expect("Failed to refresh");
        assert_eq!(
            db_r.get(reader, b"isolated").expect("Failed to get"),
            Some(b"v1".to_vec())
        );

        db_w.close(writer).expect("Failed to close");
        db_r.close(reader).expect("Failed to close");
    }

    /// Checks that a failed `write` leaves the store unchanged.
    pub fn check_abort_restores(db: &Database, me: ThreadToken) {
        db.write(me, |db| db.put(me, b"abort", b"original"))
            .expect("Failed to put initial value");
        let version = db.version(me).expect("Failed to read version");

        let result: Result<(), CoreError> = db.write(me, |db| {
            db.put(me, b"abort", b"modified")?;
            Err(CoreError::invalid_state(db.path(), "simulated abort"))
        });
        assert!(result.is_err());

        assert!(!db.is_in_transaction());
        assert_eq!(db.version(me).expect("Failed to read version"), version);
        assert_eq!(
            db.get(me, b"abort").expect("Failed to get"),
            Some(b"original".to_vec())
        );
    }
}

/// Notification checks.
pub mod notification {
    use super::*;

    /// Commits `commits` times on one thread and checks that each of
    /// `readers` other threads receives exactly one coalesced notice.
    pub fn check_coalesced_fan_out(readers: usize, commits: usize) {
        let store = TestStore::memory();
        let writer = store.thread_with_queue();
        let db_w = store.open(writer.token);
        let readers = scenarios::readers(&store, readers);
        let recorders: Vec<RecordingListener> = readers
            .iter()
            .map(|(thread, db)| {
                let recorder = RecordingListener::new();
                db.add_change_listener(thread.token, recorder.listener())
                    .expect("Failed to add listener");
                recorder
            })
            .collect();

        for i in 0..commits {
            let key = format!("commit-{i}");
            db_w.write(writer.token, |db| db.put(writer.token, key.as_bytes(), b"x"))
                .expect("Failed to commit");
        }

        for ((thread, db), recorder) in readers.iter().zip(&recorders) {
            let expected = usize::from(commits > 0);
            assert_eq!(thread.pending(), expected);
            assert_eq!(thread.pump(&store.runtime), expected);
            assert_eq!(recorder.calls(), expected);
            assert_eq!(
                db.version(thread.token).expect("Failed to read version"),
                commits as u64
            );
        }

        for (thread, db) in &readers {
            db.close(thread.token).expect("Failed to close");
        }
        db_w.close(writer.token).expect("Failed to close");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::with_temp_store;
    use crate::generators::{operation_sequence_strategy, PropTestConfig};
    use proptest::prelude::*;

    #[test]
    fn test_integration_harness() {
        let mut harness = IntegrationHarness::new();
        harness.put(b"a", b"1");
        harness.put(b"b", b"2");
        harness.delete(b"a");
        assert_eq!(harness.tracked_count(), 1);

        assert_eq!(harness.get_and_verify(b"b"), Some(b"2".to_vec()));
        harness.verify_all();
    }

    #[test]
    fn test_reader_isolation() {
        transaction::check_reader_isolation(&TestStore::memory());
    }

    #[test]
    fn test_reader_isolation_on_disk() {
        transaction::check_reader_isolation(&TestStore::file());
    }

    #[test]
    fn test_abort_restores() {
        with_temp_store(transaction::check_abort_restores);
    }

    #[test]
    fn test_coalesced_fan_out() {
        notification::check_coalesced_fan_out(3, 5);
    }

    #[test]
    fn test_fan_out_without_commits() {
        notification::check_coalesced_fan_out(2, 0);
    }

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn harness_tracks_generated_operations(ops in operation_sequence_strategy(1, 30)) {
            let mut harness = IntegrationHarness::new();
            for op in &ops {
                harness.apply(op);
            }
            harness.verify_all();
        }
    }
}
