//! Shared multi-reader/single-writer access to a store.

use std::{path::Path, sync::Arc};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::config::Config;
use crate::error::Result;
use crate::store::Bitcask;

/// A cloneable, thread-safe handle over a [`Bitcask`] store.
///
/// Reads share a read lock, so any number of them run in parallel; writes
/// take the write lock. Each data file additionally serializes access to
/// its descriptor, so concurrent readers never interleave positioned
/// reads. Merge runs under the write lock, which makes every index entry
/// a reader can observe either entirely pre-merge or entirely post-merge,
/// and no input file is deleted while a reader still uses it.
///
/// The on-disk format and recovery behavior are identical to the plain
/// single-threaded [`Bitcask`].
#[derive(Debug, Clone)]
pub struct SharedBitcask {
    inner: Arc<RwLock<Bitcask>>,
}

impl SharedBitcask {
    /// Opens or creates a store at `directory` with the default
    /// configuration.
    pub fn open<P>(directory: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        Config::default().open_shared(directory)
    }

    pub(crate) fn new(store: Bitcask) -> Self {
        Self {
            inner: Arc::new(RwLock::new(store)),
        }
    }

    pub fn max_file_size(&self) -> u64 {
        self.inner.read().max_file_size()
    }

    pub fn set_max_file_size(&self, size: u64) {
        self.inner.write().set_max_file_size(size);
    }

    /// Returns the most recent value stored under `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.inner.read().get(key)
    }

    /// Stores `value` under `key`. Returns true iff the key was newly
    /// inserted.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        self.inner.write().put(key, value)
    }

    /// Deletes `key`. Returns true iff the key existed.
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        self.inner.write().delete(key)
    }

    /// Visits every live `(key, value)` pair. The read lock is held for
    /// the whole pass, so the visitor sees one consistent snapshot even
    /// while writers are waiting.
    pub fn traverse<F>(&self, visit: F) -> Result<bool>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        self.inner.read().traverse(visit)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Forces everything appended so far down to disk.
    pub fn sync(&self) -> Result<()> {
        self.inner.read().sync()
    }

    /// Compacts the immutable data files; see [`Bitcask::merge`].
    pub fn merge(&self) -> Result<()> {
        self.inner.write().merge()
    }

    /// Drops every key and every data file; see [`Bitcask::clear`].
    pub fn clear(&self) -> Result<()> {
        self.inner.write().clear()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use bytesize::ByteSize;
    use proptest::{collection, prelude::*};

    use super::*;

    #[test]
    fn sequential_read_after_write_returns_the_written_data() {
        let dir = tempfile::tempdir().unwrap();
        let store = Config::default()
            .max_file_size(ByteSize::kib(64))
            .to_owned()
            .open_shared(dir.path())
            .unwrap();

        proptest!(|(key in collection::vec(any::<u8>(), 0..64),
                    value in collection::vec(any::<u8>(), 0..256))| {
            store.put(&key, &value).unwrap();
            let read_back = store.get(&key).unwrap();
            prop_assert_eq!(Some(&value[..]), read_back.as_deref());
        });
    }

    #[test]
    fn readers_and_the_writer_make_progress_together() {
        let dir = tempfile::tempdir().unwrap();
        let store = Config::default()
            .max_file_size(ByteSize::kib(4))
            .to_owned()
            .open_shared(dir.path())
            .unwrap();

        for i in 0..100u32 {
            store.put(&i.to_be_bytes(), b"initial").unwrap();
        }

        thread::scope(|s| {
            let writer = store.clone();
            s.spawn(move || {
                for round in 0..20u32 {
                    for i in 0..100u32 {
                        writer
                            .put(&i.to_be_bytes(), format!("round-{round}").as_bytes())
                            .unwrap();
                    }
                    if round % 5 == 0 {
                        writer.merge().unwrap();
                    }
                }
            });

            for _ in 0..4 {
                let reader = store.clone();
                s.spawn(move || {
                    for _ in 0..2000 {
                        for i in (0..100u32).step_by(17) {
                            // Every observed value is one that some round
                            // of the writer actually stored.
                            let value = reader.get(&i.to_be_bytes()).unwrap().unwrap();
                            assert!(value == "initial" || value.starts_with(b"round-"));
                        }
                    }
                });
            }
        });

        for i in 0..100u32 {
            assert_eq!(store.get(&i.to_be_bytes()).unwrap().unwrap(), "round-19");
        }
    }

    #[test]
    fn handles_share_one_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = SharedBitcask::open(dir.path()).unwrap();
        let clone = store.clone();

        assert!(store.put(b"shared", b"value").unwrap());
        assert_eq!(clone.get(b"shared").unwrap().unwrap(), "value");
        assert!(clone.delete(b"shared").unwrap());
        assert!(store.is_empty());
    }
}
