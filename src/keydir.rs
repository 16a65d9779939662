//! The in-memory index mapping every live key to the on-disk location of
//! its most recent value.

use std::collections::HashMap;

use bytes::Bytes;

/// Location of a live value: the data file holding it, the byte range of
/// the value alone, and the version of the record that wrote it. The entry
/// never points at a tombstone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct KeydirEntry {
    pub file_id: u64,
    pub value_sz: u64,
    pub value_pos: u64,
    pub version: u64,
}

/// Maps keys to [`KeydirEntry`] values and issues record versions.
///
/// Lookups borrow plain key bytes; no owned key is allocated to read. The
/// version counter is volatile and recovers at open as the maximum version
/// installed while the index is rebuilt from the logs.
#[derive(Debug, Default)]
pub(crate) struct KeyDir {
    map: HashMap<Bytes, KeydirEntry>,
    version: u64,
}

impl KeyDir {
    /// Returns the next record version, strictly greater than every version
    /// handed out or installed before.
    pub fn next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    pub fn get(&self, key: &[u8]) -> Option<&KeydirEntry> {
        self.map.get(key)
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut KeydirEntry> {
        self.map.get_mut(key)
    }

    /// Inserts or replaces the entry under `key`. Returns true iff the key
    /// was not present before. The version counter never falls behind an
    /// installed entry.
    pub fn put(&mut self, key: Bytes, entry: KeydirEntry) -> bool {
        if entry.version > self.version {
            self.version = entry.version;
        }
        self.map.insert(key, entry).is_none()
    }

    /// Removes `key`. Returns true iff it was present.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        self.map.remove(key).is_some()
    }

    /// Visits every entry in unspecified order until the visitor returns
    /// false. Returns true iff every entry was visited.
    pub fn traverse<F>(&self, mut visit: F) -> bool
    where
        F: FnMut(&Bytes, &KeydirEntry) -> bool,
    {
        for (key, entry) in &self.map {
            if !visit(key, entry) {
                return false;
            }
        }
        true
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }
}
