//! Store configuration.

use crate::error::{CoreError, CoreResult};
use confinedb_storage::{Durability, EncryptionKey, KEY_SIZE};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Identity of the schema a configuration maps.
///
/// Two identities are equal when they name the same set of types,
/// regardless of the order they were listed in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SchemaIdentity {
    types: BTreeSet<String>,
}

impl SchemaIdentity {
    /// Creates an identity from a list of mapped type names.
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            types: types.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the mapped type names in sorted order.
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.types.iter().map(String::as_str)
    }
}

impl fmt::Display for SchemaIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, name) in self.types.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(name)?;
        }
        f.write_str("]")
    }
}

/// A configuration field that must agree across handles on one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigField {
    /// The encryption key, including whether one is set at all.
    EncryptionKey,
    /// The schema version.
    SchemaVersion,
    /// The schema identity.
    Schema,
    /// Persisted or in-memory.
    Durability,
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigField::EncryptionKey => f.write_str("encryption key"),
            ConfigField::SchemaVersion => f.write_str("schema version"),
            ConfigField::Schema => f.write_str("schema"),
            ConfigField::Durability => f.write_str("durability"),
        }
    }
}

/// Immutable description of how to open a store.
///
/// Build one with [`Configuration::builder`]. Configurations compare by
/// value; two handles on the same canonical path must use equal
/// configurations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Configuration {
    path: PathBuf,
    encryption_key: Option<EncryptionKey>,
    schema_version: u64,
    schema: SchemaIdentity,
    durability: Durability,
}

impl Configuration {
    /// Starts building a configuration for the store at `path`.
    pub fn builder(path: impl Into<PathBuf>) -> ConfigurationBuilder {
        ConfigurationBuilder::new(path)
    }

    /// Returns the canonical store path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the encryption key, if any.
    #[must_use]
    pub fn encryption_key(&self) -> Option<&EncryptionKey> {
        self.encryption_key.as_ref()
    }

    /// Returns the schema version.
    #[must_use]
    pub fn schema_version(&self) -> u64 {
        self.schema_version
    }

    /// Returns the schema identity.
    #[must_use]
    pub fn schema(&self) -> &SchemaIdentity {
        &self.schema
    }

    /// Returns the durability mode.
    #[must_use]
    pub fn durability(&self) -> Durability {
        self.durability
    }

    /// Returns the first field on which `other` disagrees with `self`,
    /// with both values rendered for display.
    ///
    /// Keys are rendered as a short fingerprint, never as raw bytes.
    #[must_use]
    pub fn first_conflict(&self, other: &Configuration) -> Option<(ConfigField, String, String)> {
        if self.encryption_key != other.encryption_key {
            return Some((
                ConfigField::EncryptionKey,
                key_fingerprint(self.encryption_key.as_ref()),
                key_fingerprint(other.encryption_key.as_ref()),
            ));
        }
        if self.schema_version != other.schema_version {
            return Some((
                ConfigField::SchemaVersion,
                self.schema_version.to_string(),
                other.schema_version.to_string(),
            ));
        }
        if self.schema != other.schema {
            return Some((
                ConfigField::Schema,
                self.schema.to_string(),
                other.schema.to_string(),
            ));
        }
        if self.durability != other.durability {
            return Some((
                ConfigField::Durability,
                self.durability.to_string(),
                other.durability.to_string(),
            ));
        }
        None
    }
}

fn key_fingerprint(key: Option<&EncryptionKey>) -> String {
    match key {
        None => "none".to_string(),
        Some(key) => {
            let digest = Sha256::digest(key.as_bytes());
            let hex: String = digest[..4].iter().map(|b| format!("{b:02x}")).collect();
            format!("key:{hex}")
        }
    }
}

/// Builder for [`Configuration`].
#[derive(Debug, Clone)]
pub struct ConfigurationBuilder {
    path: PathBuf,
    encryption_key: Option<Vec<u8>>,
    schema_version: u64,
    schema: SchemaIdentity,
    durability: Durability,
}

impl ConfigurationBuilder {
    fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            encryption_key: None,
            schema_version: 0,
            schema: SchemaIdentity::default(),
            durability: Durability::Persisted,
        }
    }

    /// Sets the 64-byte encryption key.
    #[must_use]
    pub fn encryption_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.encryption_key = Some(key.into());
        self
    }

    /// Sets the schema version.
    #[must_use]
    pub const fn schema_version(mut self, version: u64) -> Self {
        self.schema_version = version;
        self
    }

    /// Sets the schema identity.
    #[must_use]
    pub fn schema(mut self, schema: SchemaIdentity) -> Self {
        self.schema = schema;
        self
    }

    /// Keeps the store in memory only.
    #[must_use]
    pub const fn in_memory(mut self) -> Self {
        self.durability = Durability::InMemory;
        self
    }

    /// Sets the durability mode.
    #[must_use]
    pub const fn durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    /// Validates the settings and canonicalises the path.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKeySize` if a key was given that isn't 64 bytes, or
    /// an I/O error if the working directory can't be read.
    pub fn build(self) -> CoreResult<Configuration> {
        let encryption_key = match self.encryption_key {
            None => None,
            Some(bytes) if bytes.len() != KEY_SIZE => {
                return Err(CoreError::invalid_key_size(bytes.len(), KEY_SIZE));
            }
            Some(bytes) => Some(EncryptionKey::from_bytes(&bytes)?),
        };

        Ok(Configuration {
            path: canonical_path(&self.path)?,
            encryption_key,
            schema_version: self.schema_version,
            schema: self.schema,
            durability: self.durability,
        })
    }
}

/// Resolves `path` to the identity used to unify handles on one store.
///
/// The result is absolute with `.` and `..` removed. When the file or its
/// parent directory exists, symlinks are resolved through the filesystem.
pub fn canonical_path(path: &Path) -> CoreResult<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let normalized = normalize(&absolute);

    if let Ok(resolved) = fs::canonicalize(&normalized) {
        return Ok(resolved);
    }
    if let (Some(parent), Some(name)) = (normalized.parent(), normalized.file_name()) {
        if let Ok(parent) = fs::canonicalize(parent) {
            return Ok(parent.join(name));
        }
    }
    Ok(normalized)
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
