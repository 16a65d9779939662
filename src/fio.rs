//! Low-level file handles shared between readers and the writer.

use std::{
    fs::{self, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use parking_lot::Mutex;

/// A handle over an OS file with positioned reads and appends.
///
/// A single descriptor is shared by everyone reading the file, so the seek
/// position is guarded by a mutex. The logical write position and length
/// are tracked so an append does not need a redundant seek when the cursor
/// is already at the end.
#[derive(Debug)]
pub(crate) struct File {
    path: PathBuf,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    file: fs::File,
    /// Offset the descriptor cursor points at, or `POS_UNKNOWN`.
    pos: u64,
    /// Logical end of file; the next append lands here.
    len: u64,
}

/// Sentinel forcing the next operation to seek. Set whenever an error
/// leaves the real cursor position in doubt.
const POS_UNKNOWN: u64 = u64::MAX;

impl Inner {
    fn seek(&mut self, to: u64) -> io::Result<()> {
        if self.pos != to {
            self.file.seek(SeekFrom::Start(to))?;
            self.pos = to;
        }
        Ok(())
    }
}

impl File {
    /// Opens the file read-only.
    pub fn open<P>(path: P) -> io::Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).open(&path)?;
        Self::from_std(path, file)
    }

    /// Opens the file read-write, creating it when missing. Existing
    /// contents are kept; appends land after them.
    pub fn create<P>(path: P) -> io::Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Self::from_std(path, file)
    }

    fn from_std(path: PathBuf, file: fs::File) -> io::Result<Self> {
        let len = file.metadata()?.len();
        Ok(Self {
            path,
            inner: Mutex::new(Inner { file, pos: 0, len }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Logical size of the file in bytes.
    pub fn len(&self) -> u64 {
        self.inner.lock().len
    }

    /// Reads exactly `buf.len()` bytes starting at `pos`.
    pub fn read_exact_at(&self, buf: &mut [u8], pos: u64) -> io::Result<()> {
        let mut inner = self.inner.lock();
        inner.seek(pos)?;
        if let Err(e) = inner.file.read_exact(buf) {
            inner.pos = POS_UNKNOWN;
            return Err(e);
        }
        inner.pos = pos + buf.len() as u64;
        Ok(())
    }

    /// Appends every part in order as one record and returns the offset it
    /// starts at.
    pub fn append(&self, parts: &[&[u8]]) -> io::Result<u64> {
        let mut inner = self.inner.lock();
        let start = inner.len;
        inner.seek(start)?;
        for part in parts {
            if let Err(e) = inner.file.write_all(part) {
                // Whatever made it to disk sits past `len` and is
                // overwritten by the next append or dropped as a torn
                // record at the next open.
                inner.pos = POS_UNKNOWN;
                return Err(e);
            }
            inner.pos += part.len() as u64;
        }
        inner.len = inner.pos;
        Ok(start)
    }

    /// Reopens the file read-only, dropping write access while keeping the
    /// logical handle valid.
    pub fn reopen_readonly(&self) -> io::Result<()> {
        let file = OpenOptions::new().read(true).open(&self.path)?;
        let mut inner = self.inner.lock();
        inner.file = file;
        inner.pos = 0;
        Ok(())
    }

    /// Cuts the file back to `len` bytes.
    pub fn truncate(&self, len: u64) -> io::Result<()> {
        let mut inner = self.inner.lock();
        inner.file.set_len(len)?;
        inner.file.seek(SeekFrom::Start(len))?;
        inner.pos = len;
        inner.len = len;
        Ok(())
    }

    /// Flushes file contents to disk.
    pub fn sync(&self) -> io::Result<()> {
        self.inner.lock().file.sync_data()
    }
}
