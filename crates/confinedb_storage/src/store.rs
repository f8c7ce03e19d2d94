//! Process-wide shared state for one store.

use crate::config::EngineConfig;
use crate::crypto::{EncryptionKey, StoreCipher};
use crate::engine::Durability;
use crate::error::{EngineError, EngineResult};
use crate::image;
use crate::snapshot::Snapshot;
use fs2::FileExt;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// State shared by every connection to one store.
///
/// Holds the latest committed snapshot and the single writer slot. For
/// persisted stores it also holds an advisory lock on `<path>.lock` so a
/// second process can't open the same file.
pub(crate) struct SharedStore {
    path: PathBuf,
    durability: Durability,
    key: Option<EncryptionKey>,
    cipher: Option<StoreCipher>,
    sync_on_commit: bool,
    committed: RwLock<Arc<Snapshot>>,
    /// True while a connection holds the write slot.
    writer_busy: Mutex<bool>,
    writer_released: Condvar,
    _lock_file: Option<File>,
}

impl SharedStore {
    /// Opens the store at `path`, loading it from disk when persisted.
    pub(crate) fn open(
        path: &Path,
        key: Option<&EncryptionKey>,
        durability: Durability,
        config: &EngineConfig,
    ) -> EngineResult<Self> {
        let cipher = key.map(StoreCipher::new).transpose()?;

        let (snapshot, lock_file) = match durability {
            Durability::InMemory => (Snapshot::default(), None),
            Durability::Persisted => {
                let lock_file = Self::lock(path, config.create_if_missing)?;
                let snapshot = Self::load(path, cipher.as_ref(), config)?;
                (snapshot, Some(lock_file))
            }
        };

        debug!(
            path = %path.display(),
            %durability,
            version = snapshot.version(),
            "opened shared store"
        );

        Ok(Self {
            path: path.to_path_buf(),
            durability,
            key: key.cloned(),
            cipher,
            sync_on_commit: config.sync_on_commit,
            committed: RwLock::new(Arc::new(snapshot)),
            writer_busy: Mutex::new(false),
            writer_released: Condvar::new(),
            _lock_file: lock_file,
        })
    }

    fn lock(path: &Path, create_if_missing: bool) -> EngineResult<File> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() && create_if_missing {
                fs::create_dir_all(parent)?;
            }
        }

        let mut lock_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        lock_name.push(".lock");
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.with_file_name(lock_name))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(EngineError::Locked {
                path: path.to_path_buf(),
            });
        }
        Ok(lock_file)
    }

    fn load(
        path: &Path,
        cipher: Option<&StoreCipher>,
        config: &EngineConfig,
    ) -> EngineResult<Snapshot> {
        if path.exists() {
            let data = fs::read(path)?;
            return image::decode(path, &data, cipher);
        }

        if !config.create_if_missing {
            return Err(EngineError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("store does not exist: {}", path.display()),
            )));
        }

        let snapshot = Snapshot::default();
        let data = image::encode(&snapshot, cipher)?;
        image::write_atomic(path, &data, config.sync_on_commit)?;
        Ok(snapshot)
    }

    /// Checks that a new connection agrees with how the store was opened.
    pub(crate) fn check_compatible(
        &self,
        key: Option<&EncryptionKey>,
        durability: Durability,
    ) -> EngineResult<()> {
        if self.durability != durability {
            return Err(EngineError::invalid_state(format!(
                "store {} is already open as {}",
                self.path.display(),
                self.durability
            )));
        }
        if self.key.as_ref() != key {
            return Err(EngineError::wrong_key(&self.path));
        }
        Ok(())
    }

    /// Returns the latest committed snapshot.
    pub(crate) fn latest(&self) -> Arc<Snapshot> {
        Arc::clone(&*self.committed.read())
    }

    /// Blocks until the write slot is free, then takes it.
    pub(crate) fn acquire_writer(&self) {
        let mut busy = self.writer_busy.lock();
        while *busy {
            self.writer_released.wait(&mut busy);
        }
        *busy = true;
    }

    /// Frees the write slot and wakes one waiting writer.
    pub(crate) fn release_writer(&self) {
        *self.writer_busy.lock() = false;
        self.writer_released.notify_one();
    }

    /// Publishes `entries` as the next committed snapshot.
    ///
    /// The caller must hold the write slot. Persisted stores write the new
    /// image before it becomes visible.
    pub(crate) fn publish(&self, entries: BTreeMap<Vec<u8>, Vec<u8>>) -> EngineResult<Arc<Snapshot>> {
        let mut committed = self.committed.write();
        let next = Arc::new(Snapshot::new(committed.version() + 1, entries));

        if self.durability == Durability::Persisted {
            let data = image::encode(&next, self.cipher.as_ref())?;
            image::write_atomic(&self.path, &data, self.sync_on_commit)?;
        }

        *committed = Arc::clone(&next);
        debug!(path = %self.path.display(), version = next.version(), "published snapshot");
        Ok(next)
    }
}
