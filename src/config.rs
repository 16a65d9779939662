//! Store configuration.

use std::path::Path;

use bytesize::ByteSize;

use crate::error::Result;
use crate::shared::SharedBitcask;
use crate::store::Bitcask;

/// Controls how appended records reach the disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Data reaches the disk when the operating system flushes its
    /// buffers, and on rollover and close.
    #[default]
    Never,
    /// Force a data sync after every append.
    Always,
}

/// Configuration for a store instance.
///
/// ```no_run
/// use bytesize::ByteSize;
/// use ember::{Config, SyncStrategy};
///
/// # fn main() -> ember::Result<()> {
/// let store = Config::default()
///     .max_file_size(ByteSize::mib(256))
///     .sync(SyncStrategy::Always)
///     .to_owned()
///     .open("/var/lib/ember")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) max_file_size: ByteSize,
    pub(crate) sync: SyncStrategy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_file_size: ByteSize::gib(1),
            sync: SyncStrategy::Never,
        }
    }
}

impl Config {
    /// Opens a store at the given path with these options.
    pub fn open<P>(self, path: P) -> Result<Bitcask>
    where
        P: AsRef<Path>,
    {
        Bitcask::with_config(path.as_ref(), &self)
    }

    /// Opens a store wrapped for shared access from multiple threads.
    pub fn open_shared<P>(self, path: P) -> Result<SharedBitcask>
    where
        P: AsRef<Path>,
    {
        Ok(SharedBitcask::new(self.open(path)?))
    }

    /// Sets the size over which the active data file is rolled over.
    /// Defaults to `1GiB`.
    pub fn max_file_size(&mut self, max_file_size: ByteSize) -> &mut Self {
        self.max_file_size = max_file_size;
        self
    }

    /// Sets the synchronization strategy. Defaults to
    /// [`SyncStrategy::Never`].
    pub fn sync(&mut self, sync: SyncStrategy) -> &mut Self {
        self.sync = sync;
        self
    }
}
