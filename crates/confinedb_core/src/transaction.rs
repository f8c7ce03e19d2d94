//! Write transaction state machine.

use crate::error::{CoreError, CoreResult};
use confinedb_storage::Connection;
use std::fmt;
use tracing::debug;

/// Transaction state of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    /// Reading a committed snapshot.
    #[default]
    ReadOnly,
    /// Inside a write transaction.
    Writing,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::ReadOnly => f.write_str("read-only"),
            TransactionState::Writing => f.write_str("writing"),
        }
    }
}

/// Drives a connection through `ReadOnly -> Writing -> ReadOnly`.
///
/// Transactions don't nest: `begin` while writing fails and leaves the open
/// transaction untouched.
#[derive(Debug, Default)]
pub(crate) struct TransactionController {
    state: TransactionState,
}

impl TransactionController {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn state(&self) -> TransactionState {
        self.state
    }

    /// Advances to the latest snapshot and starts writing.
    pub(crate) fn begin(&mut self, connection: &mut dyn Connection) -> CoreResult<()> {
        if self.state == TransactionState::Writing {
            return Err(CoreError::invalid_state(
                connection.path(),
                "a write transaction is already in progress",
            ));
        }
        if !connection.is_open() {
            return Err(CoreError::invalid_state(
                connection.path(),
                "the storage connection is closed",
            ));
        }

        connection.promote_to_write()?;
        self.state = TransactionState::Writing;
        debug!(path = %connection.path().display(), version = connection.version(), "began write transaction");
        Ok(())
    }

    /// Persists the write set and returns to reading the new snapshot.
    ///
    /// On engine failure the transaction stays open so it can be cancelled.
    pub(crate) fn commit(&mut self, connection: &mut dyn Connection) -> CoreResult<()> {
        self.require_writing(connection, "commit")?;
        connection.commit_and_continue_as_read()?;
        self.state = TransactionState::ReadOnly;
        debug!(path = %connection.path().display(), version = connection.version(), "committed write transaction");
        Ok(())
    }

    /// Discards the write set and returns to the pre-transaction snapshot.
    pub(crate) fn cancel(&mut self, connection: &mut dyn Connection) -> CoreResult<()> {
        self.require_writing(connection, "cancel")?;
        connection.rollback_and_continue_as_read()?;
        self.state = TransactionState::ReadOnly;
        debug!(path = %connection.path().display(), "cancelled write transaction");
        Ok(())
    }

    /// Forgets an open transaction when the connection is closed under it.
    pub(crate) fn abandon(&mut self) -> bool {
        std::mem::take(&mut self.state) == TransactionState::Writing
    }

    fn require_writing(&self, connection: &dyn Connection, operation: &str) -> CoreResult<()> {
        if self.state != TransactionState::Writing {
            return Err(CoreError::invalid_state(
                connection.path(),
                format!("cannot {operation}: no write transaction in progress"),
            ));
        }
        if !connection.is_open() {
            return Err(CoreError::invalid_state(
                connection.path(),
                "the storage connection is closed",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confinedb_storage::{Durability, SnapshotEngine, StorageEngine};
    use std::path::Path;

    fn connection(engine: &SnapshotEngine, name: &str) -> Box<dyn Connection> {
        engine
            .open_connection(&Path::new("/mem/tx").join(name), None, Durability::InMemory)
            .unwrap()
    }

    #[test]
    fn begin_commit_cycle() {
        let engine = SnapshotEngine::new();
        let mut conn = connection(&engine, "cycle");
        let mut tx = TransactionController::new();

        tx.begin(conn.as_mut()).unwrap();
        assert_eq!(tx.state(), TransactionState::Writing);
        conn.put(b"a", b"1").unwrap();
        tx.commit(conn.as_mut()).unwrap();

        assert_eq!(tx.state(), TransactionState::ReadOnly);
        assert_eq!(conn.version(), 1);
    }

    #[test]
    fn nested_begin_fails_and_keeps_writes() {
        let engine = SnapshotEngine::new();
        let mut conn = connection(&engine, "nested");
        let mut tx = TransactionController::new();

        tx.begin(conn.as_mut()).unwrap();
        conn.put(b"a", b"1").unwrap();

        let err = tx.begin(conn.as_mut()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidState { .. }));
        assert_eq!(tx.state(), TransactionState::Writing);
        assert_eq!(conn.get(b"a").unwrap(), Some(b"1".to_vec()));

        tx.commit(conn.as_mut()).unwrap();
        assert_eq!(conn.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn commit_and_cancel_require_writing() {
        let engine = SnapshotEngine::new();
        let mut conn = connection(&engine, "idle");
        let mut tx = TransactionController::new();

        assert!(matches!(
            tx.commit(conn.as_mut()),
            Err(CoreError::InvalidState { .. })
        ));
        assert!(matches!(
            tx.cancel(conn.as_mut()),
            Err(CoreError::InvalidState { .. })
        ));
    }

    #[test]
    fn cancel_restores_snapshot() {
        let engine = SnapshotEngine::new();
        let mut conn = connection(&engine, "cancel");
        let mut tx = TransactionController::new();

        tx.begin(conn.as_mut()).unwrap();
        conn.put(b"a", b"1").unwrap();
        tx.cancel(conn.as_mut()).unwrap();

        assert_eq!(conn.get(b"a").unwrap(), None);
        assert_eq!(conn.version(), 0);

        tx.begin(conn.as_mut()).unwrap();
        conn.put(b"a", b"2").unwrap();
        tx.commit(conn.as_mut()).unwrap();
        assert_eq!(conn.get(b"a").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn begin_on_closed_connection_fails() {
        let engine = SnapshotEngine::new();
        let mut conn = connection(&engine, "closed");
        conn.close();

        let mut tx = TransactionController::new();
        assert!(matches!(
            tx.begin(conn.as_mut()),
            Err(CoreError::InvalidState { .. })
        ));
    }

    #[test]
    fn abandon_reports_open_transaction() {
        let engine = SnapshotEngine::new();
        let mut conn = connection(&engine, "abandon");
        let mut tx = TransactionController::new();

        assert!(!tx.abandon());
        tx.begin(conn.as_mut()).unwrap();
        assert!(tx.abandon());
        assert_eq!(tx.state(), TransactionState::ReadOnly);
    }
}
