//! The public store façade tying the data directory and the keydir
//! together.

use std::path::Path;

use bytes::Bytes;
use tracing::{error, info};

use crate::config::{Config, SyncStrategy};
use crate::datadir::DataDir;
use crate::error::Result;
use crate::keydir::KeyDir;

/// An embeddable key/value store following the
/// [Bitcask](https://riak.com/assets/bitcask-intro.pdf) design: append-only
/// data files on disk, an in-memory index of every live key, and offline
/// compaction through [`Bitcask::merge`].
///
/// A store owns its directory exclusively while open; a second open of the
/// same directory fails until this one is dropped. Reads take `&self`,
/// writes take `&mut self`; the store itself is movable but not clonable.
/// For shared access from several threads, see
/// [`SharedBitcask`](crate::SharedBitcask).
#[derive(Debug)]
pub struct Bitcask {
    datadir: DataDir,
    keydir: KeyDir,
    sync: SyncStrategy,
}

impl Bitcask {
    /// Opens or creates a store at `directory` with the default
    /// configuration, rebuilding the index from the data files found
    /// there.
    pub fn open<P>(directory: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        Config::default().open(directory)
    }

    pub(crate) fn with_config(directory: &Path, config: &Config) -> Result<Self> {
        let datadir = DataDir::open(directory.to_path_buf(), config.max_file_size.as_u64())?;
        let mut keydir = KeyDir::default();
        datadir.build_index(&mut keydir)?;
        info!(path = %directory.display(), keys = keydir.len(), "opened store");
        Ok(Self {
            datadir,
            keydir,
            sync: config.sync,
        })
    }

    /// Size cap over which the active data file is rolled over.
    pub fn max_file_size(&self) -> u64 {
        self.datadir.max_file_size()
    }

    /// Changes the rollover cap. Takes effect before the next append.
    pub fn set_max_file_size(&mut self, size: u64) {
        self.datadir.set_max_file_size(size);
    }

    /// Returns the most recent value stored under `key`, or `None` when
    /// the key does not exist.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        match self.keydir.get(key) {
            Some(entry) => Ok(Some(self.datadir.read(entry)?)),
            None => Ok(None),
        }
    }

    /// Stores `value` under `key`, replacing any previous value. Returns
    /// true iff the key was newly inserted.
    ///
    /// The index is only updated after the record is fully on disk, so a
    /// failed put leaves the store exactly as it was.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        let version = self.keydir.next_version();
        let entry = self.datadir.put(key, value, version)?;
        if let SyncStrategy::Always = self.sync {
            self.datadir.sync()?;
        }
        Ok(self.keydir.put(Bytes::copy_from_slice(key), entry))
    }

    /// Appends a tombstone for `key` and drops the key from the index.
    /// Returns true iff the key existed.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        let version = self.keydir.next_version();
        self.datadir.delete(key, version)?;
        if let SyncStrategy::Always = self.sync {
            self.datadir.sync()?;
        }
        Ok(self.keydir.delete(key))
    }

    /// Visits every live `(key, value)` pair in unspecified order until
    /// the visitor returns false. Returns true iff every pair was visited.
    pub fn traverse<F>(&self, mut visit: F) -> Result<bool>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        let mut failure = None;
        let completed = self.keydir.traverse(|key, entry| match self.datadir.read(entry) {
            Ok(value) => visit(key.as_ref(), value.as_ref()),
            Err(e) => {
                failure = Some(e);
                false
            }
        });
        match failure {
            Some(e) => Err(e),
            None => Ok(completed),
        }
    }

    /// True when no live key is stored.
    pub fn is_empty(&self) -> bool {
        self.keydir.is_empty()
    }

    /// Forces everything appended so far down to disk, regardless of the
    /// configured synchronization strategy.
    pub fn sync(&self) -> Result<()> {
        self.datadir.sync()
    }

    /// Rewrites all live data from the immutable files into fresh segments
    /// with hint files and deletes the superseded files. The mapping held
    /// by the store is unchanged by a merge; only its location on disk is.
    pub fn merge(&mut self) -> Result<()> {
        self.datadir.merge(&mut self.keydir)
    }

    /// Drops every key and every data file, leaving an empty store.
    pub fn clear(&mut self) -> Result<()> {
        self.datadir.clear()?;
        self.keydir.clear();
        Ok(())
    }
}

/// Flush what the OS still buffers for the active file before the
/// directory lock is released.
impl Drop for Bitcask {
    fn drop(&mut self) {
        if let Err(e) = self.datadir.sync() {
            error!(error = %e, "failed to flush active data file");
        }
    }
}
