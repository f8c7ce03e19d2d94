//! Error types for engine operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur inside the storage engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The store could not be decrypted with the supplied key.
    #[error("wrong encryption key for store {}", .path.display())]
    WrongKey {
        /// Store the key was rejected for.
        path: PathBuf,
    },

    /// The store file is corrupted.
    #[error("store corrupted: {0}")]
    Corrupted(String),

    /// The store file was written by an unsupported format version.
    #[error("incompatible store format: file is v{found}, engine supports up to v{supported}")]
    IncompatibleVersion {
        /// Version found in the file header.
        found: u16,
        /// Highest version this engine reads.
        supported: u16,
    },

    /// The connection has been closed.
    #[error("connection is closed")]
    Closed,

    /// Operation not permitted in the connection's current state.
    #[error("invalid engine state: {0}")]
    InvalidState(String),

    /// Another process holds the store file.
    #[error("store locked: another process has exclusive access to {}", .path.display())]
    Locked {
        /// Locked store path.
        path: PathBuf,
    },

    /// A copy destination already exists.
    #[error("destination already exists: {}", .path.display())]
    DestinationExists {
        /// The destination that was refused.
        path: PathBuf,
    },

    /// Encryption or key derivation failed.
    #[error("encryption error: {0}")]
    Encryption(String),
}

impl EngineError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Creates a wrong key error.
    pub fn wrong_key(path: impl Into<PathBuf>) -> Self {
        Self::WrongKey { path: path.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = EngineError::IncompatibleVersion {
            found: 9,
            supported: 1,
        };
        assert!(err.to_string().contains("v9"));

        let err = EngineError::wrong_key("/tmp/a.cdb");
        assert_eq!(err.to_string(), "wrong encryption key for store /tmp/a.cdb");
    }
}
