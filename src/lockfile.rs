//! Directory-scoped advisory locking.

use std::{fs, io, path::PathBuf};

use fs4::fs_std::FileExt;

use crate::error::{Error, Result};

/// Holds an exclusive advisory lock on a store directory for the lifetime
/// of the value. Dropping the value releases the lock and removes the lock
/// file again.
#[derive(Debug)]
pub(crate) struct LockFile {
    path: PathBuf,
    _file: fs::File,
}

impl LockFile {
    /// Creates the lock file and takes the exclusive lock, failing with
    /// [`Error::AlreadyLocked`] when it is held elsewhere.
    pub fn acquire(path: PathBuf) -> Result<Self> {
        let file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { path, _file: file }),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(Error::AlreadyLocked(path)),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_released() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("LOCK");

        let held = LockFile::acquire(path.clone()).unwrap();
        assert!(matches!(
            LockFile::acquire(path.clone()),
            Err(Error::AlreadyLocked(_))
        ));

        drop(held);
        assert!(LockFile::acquire(path).is_ok());
    }

    #[test]
    fn lock_file_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("LOCK");
        let held = LockFile::acquire(path.clone()).unwrap();
        assert!(path.exists());
        drop(held);
        assert!(!path.exists());
    }
}
