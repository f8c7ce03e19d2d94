//! Engine configuration.

/// Configuration for a [`crate::SnapshotEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Whether to create a persisted store if its file doesn't exist.
    pub create_if_missing: bool,

    /// Whether to fsync the store image on every commit (safer but slower).
    pub sync_on_commit: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_commit: true,
        }
    }
}

impl EngineConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the store if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to sync the image on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }
}
