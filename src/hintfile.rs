//! Hint files sit next to merge-produced data files and list one compact
//! tuple per live record, so recovery can rebuild the index without
//! re-reading any value bytes.

use std::{
    fs,
    io::{BufReader, Read},
    path::PathBuf,
};

use bytes::Bytes;
use tracing::debug;

use crate::error::{Error, Result};
use crate::fio::File;
use crate::keydir::{KeyDir, KeydirEntry};
use crate::record::{Hint, HintHeader, HINT_HEADER_SIZE};

/// A hint file describing exactly one data file, the one sharing its base
/// name. Written only during merge; tombstones never appear because merge
/// drops them.
#[derive(Debug)]
pub(crate) struct HintFile {
    file: File,
}

impl HintFile {
    /// Creates an empty hint file to be filled during merge.
    pub fn create(path: PathBuf) -> Result<Self> {
        Ok(Self {
            file: File::create(path)?,
        })
    }

    /// Opens an existing hint file for recovery.
    pub fn open(path: PathBuf) -> Result<Self> {
        Ok(Self {
            file: File::open(path)?,
        })
    }

    /// Appends one hint tuple.
    pub fn append(&self, hint: &Hint) -> Result<()> {
        let header = hint.encode_header();
        self.file.append(&[&header[..], &hint.key[..]])?;
        Ok(())
    }

    /// Reads every tuple and installs it in the keydir under `file_id`.
    ///
    /// Hints carry no checksum, so the only corruption detected here is a
    /// file whose claimed entry lengths disagree with its size. In that
    /// case nothing is installed at all and the caller falls back to
    /// scanning the sibling data file.
    pub fn build_index(&self, keydir: &mut KeyDir, file_id: u64) -> Result<()> {
        let len = self.file.len();
        let mut reader = BufReader::new(fs::File::open(self.file.path())?);
        let mut staged = Vec::new();
        let mut pos = 0u64;
        while pos < len {
            if pos + HINT_HEADER_SIZE as u64 > len {
                return Err(self.corrupted(pos));
            }
            let mut header = [0u8; HINT_HEADER_SIZE];
            reader.read_exact(&mut header)?;
            let header = HintHeader::decode(&header);

            let end = pos + HINT_HEADER_SIZE as u64 + u64::from(header.ksz);
            if end > len {
                return Err(self.corrupted(pos));
            }
            let mut key = vec![0u8; header.ksz as usize];
            reader.read_exact(&mut key)?;

            staged.push((
                Bytes::from(key),
                KeydirEntry {
                    file_id,
                    value_sz: header.value_sz,
                    value_pos: header.value_pos,
                    version: header.version,
                },
            ));
            pos = end;
        }

        debug!(file_id, entries = staged.len(), "indexed hint file");
        for (key, entry) in staged {
            keydir.put(key, entry);
        }
        Ok(())
    }

    fn corrupted(&self, position: u64) -> Error {
        Error::Corrupted {
            path: self.file.path().to_path_buf(),
            position,
        }
    }
}
