//! A single append-only segment of the store.

use std::{
    fs,
    io::{self, BufReader, Read},
    path::{Path, PathBuf},
};

use bytes::Bytes;
use tracing::warn;

use crate::error::{Error, Result};
use crate::fio::File;
use crate::hintfile::HintFile;
use crate::keydir::{KeyDir, KeydirEntry};
use crate::record::{
    encode_data_header, record_checksum, DataHeader, DATA_HEADER_SIZE, MAX_KEY_SIZE,
    MAX_VALUE_SIZE, TOMBSTONE,
};
use crate::utils;

/// One data file: a numeric id and the file holding its records.
///
/// Appends only happen while the file is active. Once another file takes
/// over, the handle is downgraded with [`DataFile::reopen_readonly`] and
/// the contents are immutable until merge deletes the whole file. The
/// datafile never touches the keydir on its own; appends return the
/// location for the caller to install.
#[derive(Debug)]
pub(crate) struct DataFile {
    id: u64,
    file: File,
}

impl DataFile {
    /// Creates the data file with the given id, opened for writing.
    pub fn create(dir: &Path, id: u64) -> Result<Self> {
        Ok(Self {
            id,
            file: File::create(utils::datafile_name(dir, id))?,
        })
    }

    /// Opens an existing data file; only the active file is writable.
    pub fn open(dir: &Path, id: u64, writable: bool) -> Result<Self> {
        let path = utils::datafile_name(dir, id);
        let file = if writable {
            File::create(path)?
        } else {
            File::open(path)?
        };
        Ok(Self { id, file })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Path of the sibling hint file.
    pub fn hint_path(&self) -> PathBuf {
        let mut name = self.file.path().as_os_str().to_owned();
        name.push(".hint");
        PathBuf::from(name)
    }

    /// Size of the file in bytes.
    pub fn size(&self) -> u64 {
        self.file.len()
    }

    /// Appends a put record and returns the location of the value bytes,
    /// ready to be installed in the keydir.
    pub fn append_put(&self, key: &[u8], value: &[u8], version: u64) -> Result<KeydirEntry> {
        if key.len() as u64 > MAX_KEY_SIZE {
            return Err(Error::InvalidArgument(format!(
                "key length {} exceeds the limit of {MAX_KEY_SIZE}",
                key.len()
            )));
        }
        if value.len() as u64 > MAX_VALUE_SIZE {
            return Err(Error::InvalidArgument(format!(
                "value length {} exceeds the limit of {MAX_VALUE_SIZE}",
                value.len()
            )));
        }

        let header = encode_data_header(version, key, value.len() as u64, value);
        let start = self.file.append(&[&header[..], key, value])?;
        Ok(KeydirEntry {
            file_id: self.id,
            value_sz: value.len() as u64,
            value_pos: start + DATA_HEADER_SIZE as u64 + key.len() as u64,
            version,
        })
    }

    /// Appends a tombstone for `key`.
    pub fn append_delete(&self, key: &[u8], version: u64) -> Result<()> {
        if key.len() as u64 > MAX_KEY_SIZE {
            return Err(Error::InvalidArgument(format!(
                "key length {} exceeds the limit of {MAX_KEY_SIZE}",
                key.len()
            )));
        }
        let header = encode_data_header(version, key, TOMBSTONE, &[]);
        self.file.append(&[&header[..], key])?;
        Ok(())
    }

    /// Reads the value a keydir entry points at. Zero-sized values come
    /// back without touching the file.
    pub fn read_value(&self, entry: &KeydirEntry) -> Result<Bytes> {
        if entry.value_sz == 0 {
            return Ok(Bytes::new());
        }
        let mut value = vec![0u8; entry.value_sz as usize];
        self.file.read_exact_at(&mut value, entry.value_pos)?;
        Ok(value.into())
    }

    /// Decodes records sequentially from offset 0 until clean EOF. The
    /// iterator reads through its own descriptor, so a long scan does not
    /// block value reads on the shared handle.
    pub fn scan(&self) -> Result<ScanIter> {
        let reader = BufReader::new(fs::File::open(self.file.path())?);
        Ok(ScanIter {
            path: self.file.path().to_path_buf(),
            reader,
            pos: 0,
            len: self.file.len(),
        })
    }

    /// Rebuilds keydir entries for this file. The hint file is used when
    /// present; a hint file that cannot be read in full is abandoned in
    /// favor of scanning the data file itself. Within a file, later
    /// records supersede earlier ones and tombstones remove the key.
    ///
    /// `truncate_torn_tail` is set for the active file, where a torn
    /// record is the remnant of an interrupted append: the file is cut
    /// back to the end of the last complete record and recovery continues.
    /// Anywhere else a torn record means lost data and aborts recovery.
    pub fn build_index(&self, keydir: &mut KeyDir, truncate_torn_tail: bool) -> Result<()> {
        let hint_path = self.hint_path();
        if hint_path.exists() {
            match HintFile::open(hint_path)?.build_index(keydir, self.id) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        file_id = self.id,
                        error = %e,
                        "unreadable hint file, scanning the data file instead"
                    );
                }
            }
        }

        let mut iter = self.scan()?;
        loop {
            match iter.next_record() {
                Ok(Some(record)) => match record.value {
                    Some(value) => {
                        keydir.put(
                            record.key,
                            KeydirEntry {
                                file_id: self.id,
                                value_sz: value.value.len() as u64,
                                value_pos: value.value_pos,
                                version: value.version,
                            },
                        );
                    }
                    None => {
                        keydir.delete(&record.key);
                    }
                },
                Ok(None) => return Ok(()),
                Err(ScanError::Torn { position }) if truncate_torn_tail => {
                    warn!(
                        path = %self.path().display(),
                        position,
                        "truncating torn record at end of active data file"
                    );
                    self.file.truncate(position)?;
                    return Ok(());
                }
                Err(ScanError::Torn { position }) | Err(ScanError::Checksum { position }) => {
                    return Err(iter.corrupted(position));
                }
                Err(ScanError::Io(e)) => return Err(e.into()),
            }
        }
    }

    /// Downgrades the handle once another file becomes active.
    pub fn reopen_readonly(&self) -> Result<()> {
        self.file.reopen_readonly()?;
        Ok(())
    }

    /// Flushes the file contents to disk.
    pub fn sync(&self) -> Result<()> {
        self.file.sync()?;
        Ok(())
    }

    /// Deletes the data file and its sibling hint file, if any.
    pub fn remove(self) -> Result<()> {
        let hint_path = self.hint_path();
        fs::remove_file(self.file.path())?;
        if let Err(e) = fs::remove_file(hint_path) {
            if e.kind() != io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }
        Ok(())
    }
}

/// A record yielded by [`DataFile::scan`]. Tombstones carry no value.
#[derive(Debug)]
pub(crate) struct Record {
    pub key: Bytes,
    pub value: Option<RecordValue>,
}

#[derive(Debug)]
pub(crate) struct RecordValue {
    /// Offset of the first value byte in the file.
    pub value_pos: u64,
    pub value: Bytes,
    pub version: u64,
}

/// Why a scan stopped before clean EOF.
pub(crate) enum ScanError {
    /// The record is cut short, as a crashed append leaves behind.
    Torn { position: u64 },
    /// The record is complete but its checksum does not match.
    Checksum { position: u64 },
    Io(io::Error),
}

impl From<io::Error> for ScanError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

pub(crate) struct ScanIter {
    path: PathBuf,
    reader: BufReader<fs::File>,
    /// Offset of the next record header.
    pos: u64,
    /// File length at the time the scan started.
    len: u64,
}

impl ScanIter {
    /// Decodes the record at the current position, distinguishing torn
    /// records from checksum failures so recovery can apply its policy.
    pub(crate) fn next_record(&mut self) -> std::result::Result<Option<Record>, ScanError> {
        if self.pos >= self.len {
            return Ok(None);
        }
        let position = self.pos;
        if position + DATA_HEADER_SIZE as u64 > self.len {
            return Err(ScanError::Torn { position });
        }
        let mut header_buf = [0u8; DATA_HEADER_SIZE];
        self.reader.read_exact(&mut header_buf)?;
        let header = DataHeader::decode(&header_buf);

        let value_sz = if header.is_tombstone() {
            0
        } else {
            header.value_sz
        };
        // Saturating arithmetic keeps a header with garbage sizes from
        // wrapping past the length check into a huge allocation.
        let end = position
            .saturating_add(DATA_HEADER_SIZE as u64)
            .saturating_add(u64::from(header.ksz))
            .saturating_add(value_sz);
        if end > self.len {
            return Err(ScanError::Torn { position });
        }

        let mut key = vec![0u8; header.ksz as usize];
        self.reader.read_exact(&mut key)?;

        let value_pos = position + DATA_HEADER_SIZE as u64 + u64::from(header.ksz);
        let value = if header.is_tombstone() {
            None
        } else {
            let mut value = vec![0u8; header.value_sz as usize];
            self.reader.read_exact(&mut value)?;
            Some(value)
        };

        let crc = record_checksum(&header_buf[4..], &key, value.as_deref().unwrap_or(&[]));
        if crc != header.crc {
            return Err(ScanError::Checksum { position });
        }

        self.pos = end;
        Ok(Some(Record {
            key: Bytes::from(key),
            value: value.map(|value| RecordValue {
                value_pos,
                value: Bytes::from(value),
                version: header.version,
            }),
        }))
    }

    pub(crate) fn corrupted(&self, position: u64) -> Error {
        Error::Corrupted {
            path: self.path.clone(),
            position,
        }
    }
}

impl Iterator for ScanIter {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                // The scan cannot resync after a bad record.
                self.pos = self.len;
                Some(Err(match e {
                    ScanError::Torn { position } | ScanError::Checksum { position } => {
                        self.corrupted(position)
                    }
                    ScanError::Io(e) => e.into(),
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_datafile() -> (DataFile, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let file = DataFile::create(dir.path(), 0).unwrap();
        (file, dir)
    }

    #[test]
    fn append_then_read_value() {
        let (file, _dir) = temp_datafile();
        let entry = file.append_put(b"hello", b"world!", 1).unwrap();
        assert_eq!(entry.file_id, 0);
        assert_eq!(entry.value_sz, 6);
        assert_eq!(entry.value_pos, DATA_HEADER_SIZE as u64 + 5);
        assert_eq!(entry.version, 1);
        assert_eq!(file.read_value(&entry).unwrap(), "world!");
    }

    #[test]
    fn empty_key_and_value_are_legal() {
        let (file, _dir) = temp_datafile();
        let entry = file.append_put(b"", b"", 1).unwrap();
        assert_eq!(entry.value_sz, 0);
        assert_eq!(file.read_value(&entry).unwrap(), "");

        let records: Vec<_> = file.scan().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "");
        assert_eq!(records[0].value.as_ref().unwrap().value, "");
    }

    #[test]
    fn scan_yields_records_and_tombstones_in_order() {
        let (file, _dir) = temp_datafile();
        file.append_put(b"a", b"1", 1).unwrap();
        file.append_delete(b"a", 2).unwrap();
        file.append_put(b"b", b"22", 3).unwrap();

        let records: Vec<_> = file.scan().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 3);

        assert_eq!(records[0].key, "a");
        let value = records[0].value.as_ref().unwrap();
        assert_eq!(value.value, "1");
        assert_eq!(value.version, 1);

        assert_eq!(records[1].key, "a");
        assert!(records[1].value.is_none());

        assert_eq!(records[2].key, "b");
        let value = records[2].value.as_ref().unwrap();
        assert_eq!(value.value, "22");
        assert_eq!(value.version, 3);
    }

    #[test]
    fn build_index_applies_later_records_over_earlier_ones() {
        let (file, _dir) = temp_datafile();
        file.append_put(b"a", b"old", 1).unwrap();
        file.append_put(b"b", b"kept", 2).unwrap();
        file.append_put(b"a", b"new", 3).unwrap();
        file.append_put(b"c", b"gone", 4).unwrap();
        file.append_delete(b"c", 5).unwrap();

        let mut keydir = KeyDir::default();
        file.build_index(&mut keydir, false).unwrap();

        assert_eq!(keydir.len(), 2);
        assert_eq!(file.read_value(keydir.get(b"a").unwrap()).unwrap(), "new");
        assert_eq!(file.read_value(keydir.get(b"b").unwrap()).unwrap(), "kept");
        assert!(keydir.get(b"c").is_none());
    }

    #[test]
    fn torn_tail_is_truncated_for_the_active_file() {
        let (file, dir) = temp_datafile();
        let first = file.append_put(b"whole", b"value", 1).unwrap();
        let end_of_first = first.value_pos + first.value_sz;
        file.append_put(b"torn", b"never lands", 2).unwrap();

        // Cut into the middle of the second record, as a crash would.
        file.sync().unwrap();
        let path = utils::datafile_name(dir.path(), 0);
        let os_file = fs::OpenOptions::new().write(true).open(&path).unwrap();
        os_file.set_len(end_of_first + 7).unwrap();
        drop(os_file);
        drop(file);

        let file = DataFile::open(dir.path(), 0, true).unwrap();
        let mut keydir = KeyDir::default();
        file.build_index(&mut keydir, true).unwrap();

        assert_eq!(keydir.len(), 1);
        assert_eq!(file.read_value(keydir.get(b"whole").unwrap()).unwrap(), "value");
        assert_eq!(file.size(), end_of_first);
    }

    #[test]
    fn torn_record_is_an_error_for_immutable_files() {
        let (file, dir) = temp_datafile();
        let entry = file.append_put(b"whole", b"value", 1).unwrap();
        let end = entry.value_pos + entry.value_sz;
        file.append_put(b"torn", b"never lands", 2).unwrap();
        file.sync().unwrap();

        let path = utils::datafile_name(dir.path(), 0);
        let os_file = fs::OpenOptions::new().write(true).open(&path).unwrap();
        os_file.set_len(end + 3).unwrap();
        drop(os_file);
        drop(file);

        let file = DataFile::open(dir.path(), 0, false).unwrap();
        let mut keydir = KeyDir::default();
        let err = file.build_index(&mut keydir, false).unwrap_err();
        assert!(matches!(err, Error::Corrupted { position, .. } if position == end));
    }

    #[test]
    fn checksum_mismatch_names_the_record_position() {
        let (file, dir) = temp_datafile();
        file.append_put(b"first", b"fine", 1).unwrap();
        let second = file.append_put(b"second", b"breaks", 2).unwrap();
        let second_start = second.value_pos - 6 - DATA_HEADER_SIZE as u64;
        file.sync().unwrap();
        drop(file);

        // Flip one byte inside the second record's value.
        let path = utils::datafile_name(dir.path(), 0);
        let mut contents = fs::read(&path).unwrap();
        contents[second.value_pos as usize] ^= 0x01;
        fs::write(&path, contents).unwrap();

        let file = DataFile::open(dir.path(), 0, true).unwrap();
        let mut keydir = KeyDir::default();
        let err = file.build_index(&mut keydir, true).unwrap_err();
        assert!(
            matches!(err, Error::Corrupted { position, .. } if position == second_start),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn scan_stops_after_the_first_error() {
        let (file, dir) = temp_datafile();
        file.append_put(b"k", b"v", 1).unwrap();
        file.append_put(b"k", b"w", 2).unwrap();
        file.sync().unwrap();
        drop(file);

        let path = utils::datafile_name(dir.path(), 0);
        let mut contents = fs::read(&path).unwrap();
        let len = contents.len();
        contents[len - 1] ^= 0x01;
        fs::write(&path, contents).unwrap();

        let file = DataFile::open(dir.path(), 0, false).unwrap();
        let results: Vec<_> = file.scan().unwrap().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }

    #[test]
    fn build_index_prefers_the_hint_file() {
        let (file, _dir) = temp_datafile();
        file.append_put(b"ignored", b"by hint", 1).unwrap();

        // A hint file claiming different contents proves it took priority.
        let hintfile = HintFile::create(file.hint_path()).unwrap();
        hintfile
            .append(&crate::record::Hint {
                version: 8,
                value_sz: 7,
                value_pos: 31,
                key: Bytes::from_static(b"hinted"),
            })
            .unwrap();
        drop(hintfile);

        let mut keydir = KeyDir::default();
        file.build_index(&mut keydir, false).unwrap();
        assert_eq!(keydir.len(), 1);
        assert_eq!(keydir.get(b"hinted").unwrap().value_pos, 31);
    }

    #[test]
    fn build_index_falls_back_when_the_hint_file_is_cut_short() {
        let (file, _dir) = temp_datafile();
        file.append_put(b"real", b"data", 1).unwrap();

        let hintfile = HintFile::create(file.hint_path()).unwrap();
        hintfile
            .append(&crate::record::Hint {
                version: 8,
                value_sz: 7,
                value_pos: 31,
                key: Bytes::from_static(b"bogus"),
            })
            .unwrap();
        drop(hintfile);
        let os_file = fs::OpenOptions::new()
            .write(true)
            .open(file.hint_path())
            .unwrap();
        os_file.set_len(10).unwrap();
        drop(os_file);

        let mut keydir = KeyDir::default();
        file.build_index(&mut keydir, false).unwrap();
        assert_eq!(keydir.len(), 1);
        assert_eq!(file.read_value(keydir.get(b"real").unwrap()).unwrap(), "data");
    }

    #[test]
    fn remove_takes_the_hint_file_along() {
        let (file, dir) = temp_datafile();
        file.append_put(b"k", b"v", 1).unwrap();
        HintFile::create(file.hint_path()).unwrap();

        let data_path = utils::datafile_name(dir.path(), 0);
        let hint_path = file.hint_path();
        assert!(data_path.exists());
        assert!(hint_path.exists());

        file.remove().unwrap();
        assert!(!data_path.exists());
        assert!(!hint_path.exists());
    }
}
