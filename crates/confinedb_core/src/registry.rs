//! Process-wide registry of open configurations.

use crate::config::Configuration;
use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Tracks which configurations are open against each canonical path.
///
/// Every configuration registered for a path agrees with the others on
/// key, schema version, schema and durability. A path may hold the same
/// configuration several times, once per thread that has it open.
#[derive(Debug, Default)]
pub struct ConfigurationRegistry {
    entries: Mutex<HashMap<PathBuf, Vec<Configuration>>>,
}

impl ConfigurationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `config` if it agrees with the configurations already open
    /// on its path.
    ///
    /// Only the first configuration on the path is compared. Registration
    /// keeps every entry equivalent, so the first one stands for all.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationConflict` naming the first differing field.
    /// The registry is unchanged on error.
    pub fn validate_and_register(&self, config: &Configuration) -> CoreResult<()> {
        let mut entries = self.entries.lock();
        let open = entries.entry(config.path().to_path_buf()).or_default();

        if let Some(first) = open.first() {
            if let Some((field, existing, requested)) = first.first_conflict(config) {
                return Err(CoreError::ConfigurationConflict {
                    path: config.path().to_path_buf(),
                    field,
                    existing,
                    requested,
                });
            }
        }

        open.push(config.clone());
        debug!(
            path = %config.path().display(),
            open = open.len(),
            "registered configuration"
        );
        Ok(())
    }

    /// Removes one registration of `config`.
    ///
    /// Returns the number of configurations still open on the path, or
    /// `None` if nothing matched. Unknown paths are not an error.
    pub fn unregister(&self, config: &Configuration) -> Option<usize> {
        let mut entries = self.entries.lock();
        let open = entries.get_mut(config.path())?;
        let index = open.iter().position(|c| c == config)?;
        open.swap_remove(index);

        let remaining = open.len();
        if remaining == 0 {
            entries.remove(config.path());
        }
        debug!(
            path = %config.path().display(),
            remaining,
            "unregistered configuration"
        );
        Some(remaining)
    }

    /// Returns the number of configurations open on `path`.
    #[must_use]
    pub fn open_count(&self, path: &Path) -> usize {
        self.entries.lock().get(path).map_or(0, Vec::len)
    }

    /// Returns the configuration new arrivals on `path` are compared against.
    #[must_use]
    pub fn representative(&self, path: &Path) -> Option<Configuration> {
        self.entries
            .lock()
            .get(path)
            .and_then(|open| open.first().cloned())
    }

    /// Returns the number of paths with at least one open configuration.
    #[must_use]
    pub fn path_count(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigField, SchemaIdentity};
    use confinedb_storage::KEY_SIZE;

    fn config(version: u64) -> Configuration {
        Configuration::builder("/stores/registry.cdb")
            .schema_version(version)
            .build()
            .unwrap()
    }

    #[test]
    fn first_registration_creates_entry() {
        let registry = ConfigurationRegistry::new();
        let c = config(1);

        registry.validate_and_register(&c).unwrap();
        assert_eq!(registry.open_count(c.path()), 1);
        assert_eq!(registry.representative(c.path()), Some(c));
    }

    #[test]
    fn duplicates_are_allowed() {
        let registry = ConfigurationRegistry::new();
        let c = config(1);

        registry.validate_and_register(&c).unwrap();
        registry.validate_and_register(&c).unwrap();
        assert_eq!(registry.open_count(c.path()), 2);
    }

    #[test]
    fn conflict_leaves_registry_unchanged() {
        let registry = ConfigurationRegistry::new();
        let c1 = config(1);
        let c2 = config(2);

        registry.validate_and_register(&c1).unwrap();
        let err = registry.validate_and_register(&c2).unwrap_err();

        match err {
            CoreError::ConfigurationConflict {
                field,
                existing,
                requested,
                ..
            } => {
                assert_eq!(field, ConfigField::SchemaVersion);
                assert_eq!(existing, "1");
                assert_eq!(requested, "2");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(registry.open_count(c1.path()), 1);
        registry.validate_and_register(&c1).unwrap();
    }

    #[test]
    fn conflicting_fields_are_reported() {
        let registry = ConfigurationRegistry::new();
        let base = Configuration::builder("/stores/fields.cdb").build().unwrap();
        registry.validate_and_register(&base).unwrap();

        let keyed = Configuration::builder("/stores/fields.cdb")
            .encryption_key(vec![1u8; KEY_SIZE])
            .build()
            .unwrap();
        let schema = Configuration::builder("/stores/fields.cdb")
            .schema(SchemaIdentity::new(["Dog"]))
            .build()
            .unwrap();
        let memory = Configuration::builder("/stores/fields.cdb")
            .in_memory()
            .build()
            .unwrap();

        for (candidate, expected) in [
            (keyed, ConfigField::EncryptionKey),
            (schema, ConfigField::Schema),
            (memory, ConfigField::Durability),
        ] {
            match registry.validate_and_register(&candidate) {
                Err(CoreError::ConfigurationConflict { field, .. }) => assert_eq!(field, expected),
                other => panic!("expected conflict on {expected}, got {other:?}"),
            }
        }
    }

    #[test]
    fn unregister_removes_one_and_reports_remaining() {
        let registry = ConfigurationRegistry::new();
        let c = config(1);

        registry.validate_and_register(&c).unwrap();
        registry.validate_and_register(&c).unwrap();

        assert_eq!(registry.unregister(&c), Some(1));
        assert_eq!(registry.unregister(&c), Some(0));
        assert_eq!(registry.path_count(), 0);
        assert_eq!(registry.unregister(&c), None);
    }

    #[test]
    fn unregister_unknown_path_is_noop() {
        let registry = ConfigurationRegistry::new();
        assert_eq!(registry.unregister(&config(1)), None);
    }

    #[test]
    fn emptied_path_accepts_new_configuration() {
        let registry = ConfigurationRegistry::new();
        let c1 = config(1);
        let c2 = config(2);

        registry.validate_and_register(&c1).unwrap();
        registry.unregister(&c1);
        registry.validate_and_register(&c2).unwrap();
        assert_eq!(registry.representative(c2.path()), Some(c2));
    }
}
