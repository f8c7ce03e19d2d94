//! Error types for ConfineDB core.

use crate::config::ConfigField;
use crate::thread::ThreadToken;
use confinedb_storage::EngineError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in ConfineDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A configuration disagrees with the ones already open on its path.
    #[error(
        "configuration conflict on {}: {field} is {existing} for open handles, got {requested}",
        .path.display()
    )]
    ConfigurationConflict {
        /// Canonical store path.
        path: PathBuf,
        /// The first field that differs.
        field: ConfigField,
        /// Value held by the configurations already open.
        existing: String,
        /// Value of the rejected configuration.
        requested: String,
    },

    /// A handle was used from a thread other than the one that opened it.
    #[error("handle for {} is owned by {owner} but was accessed from {caller}", .path.display())]
    WrongThread {
        /// Canonical store path.
        path: PathBuf,
        /// Thread that opened the handle.
        owner: ThreadToken,
        /// Thread that made the call.
        caller: ThreadToken,
    },

    /// Operation not permitted in the current state.
    #[error("invalid state for {}: {message}", .path.display())]
    InvalidState {
        /// Canonical store path.
        path: PathBuf,
        /// Description of why the operation is invalid.
        message: String,
    },

    /// The handle has already been released.
    #[error("store {} is already closed", .path.display())]
    AlreadyClosed {
        /// Canonical store path.
        path: PathBuf,
    },

    /// Storage engine error.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// A copy destination already exists.
    #[error("destination already exists: {}", .path.display())]
    DestinationExists {
        /// The destination path.
        path: PathBuf,
    },

    /// Auto-refresh needs a message queue on the owning thread.
    #[error("no message queue attached to {thread}")]
    NoMessageQueue {
        /// The thread without a queue.
        thread: ThreadToken,
    },

    /// Invalid encryption key size.
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize {
        /// Expected size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CoreError {
    /// Creates an invalid state error.
    pub fn invalid_state(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::InvalidState {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates an already closed error.
    pub fn already_closed(path: impl Into<PathBuf>) -> Self {
        Self::AlreadyClosed { path: path.into() }
    }

    /// Creates a wrong thread error.
    pub fn wrong_thread(path: impl Into<PathBuf>, owner: ThreadToken, caller: ThreadToken) -> Self {
        Self::WrongThread {
            path: path.into(),
            owner,
            caller,
        }
    }

    /// Creates an invalid key size error.
    pub fn invalid_key_size(actual: usize, expected: usize) -> Self {
        Self::InvalidKeySize { expected, actual }
    }

    /// Returns true for errors caused by misuse of the API rather than by
    /// the environment.
    #[must_use]
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Self::WrongThread { .. }
                | Self::InvalidState { .. }
                | Self::AlreadyClosed { .. }
                | Self::ConfigurationConflict { .. }
        )
    }
}
