//! CLI error types.

use confinedb_core::CoreError;
use confinedb_storage::EngineError;
use thiserror::Error;

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Errors reported by the `confinedb` binary.
#[derive(Debug, Error)]
pub enum CliError {
    /// A key argument has the wrong number of hex digits.
    #[error("key must be {expected} hex digits, got {actual}")]
    KeyLength {
        /// Required digit count.
        expected: usize,
        /// Digit count given.
        actual: usize,
    },

    /// A key argument contains a non-hex character.
    #[error("key has a non-hex digit at position {position}")]
    KeyDigit {
        /// Zero-based character position.
        position: usize,
    },

    /// No store file at the given path.
    #[error("no store found at {}", .path.display())]
    NotFound {
        /// The path given.
        path: std::path::PathBuf,
    },

    /// Failure in the core runtime.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Failure reading the store file.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Failure rendering JSON output.
    #[error("JSON output: {0}")]
    Json(#[from] serde_json::Error),
}
