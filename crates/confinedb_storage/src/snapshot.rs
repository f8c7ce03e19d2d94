//! Immutable point-in-time views of a store.

use std::collections::BTreeMap;

/// A committed, immutable view of a store.
///
/// Versions increase by one per commit. Version 0 is the empty store a
/// fresh file starts from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    version: u64,
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl Snapshot {
    /// Creates a snapshot from its parts.
    #[must_use]
    pub fn new(version: u64, entries: BTreeMap<Vec<u8>, Vec<u8>>) -> Self {
        Self { version, entries }
    }

    /// Returns the commit version of this snapshot.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the snapshot holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns all entries in key order.
    #[must_use]
    pub fn entries(&self) -> &BTreeMap<Vec<u8>, Vec<u8>> {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_empty_version_zero() {
        let snapshot = Snapshot::default();
        assert_eq!(snapshot.version(), 0);
        assert!(snapshot.is_empty());
    }

    #[test]
    fn get_returns_entry() {
        let mut entries = BTreeMap::new();
        entries.insert(b"a".to_vec(), b"1".to_vec());
        let snapshot = Snapshot::new(3, entries);

        assert_eq!(snapshot.get(b"a"), Some(&b"1"[..]));
        assert_eq!(snapshot.get(b"b"), None);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.version(), 3);
    }
}
