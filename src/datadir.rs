//! The orchestrator owning the store directory and every open data file.

use std::{collections::BTreeMap, fs, path::PathBuf};

use bytes::Bytes;
use tracing::{debug, info};

use crate::datafile::DataFile;
use crate::error::{Error, Result};
use crate::hintfile::HintFile;
use crate::keydir::{KeyDir, KeydirEntry};
use crate::lockfile::LockFile;
use crate::record::Hint;
use crate::utils;

/// Mask keeping only the high half of a file id.
///
/// Rollover allocates active ids in the high half of the id space, leaving
/// the low half free for merge output ids, which must sort between the
/// last immutable file and the active file. This way merge output lives
/// alongside the existing files the whole time and no rename phase exists.
const ACTIVE_ID_MASK: u64 = 0xFFFF_FFFF_0000_0000;
const ACTIVE_ID_STEP: u64 = 1 << 32;

/// The store directory: the lockfile guaranteeing single-writer access and
/// the open data files keyed by id. The file with the greatest id is the
/// active one; everything else is immutable.
#[derive(Debug)]
pub(crate) struct DataDir {
    directory: PathBuf,
    files: BTreeMap<u64, DataFile>,
    max_file_size: u64,
    _lockfile: LockFile,
}

impl DataDir {
    /// Opens the store directory, creating it when missing, takes the
    /// directory lock, and opens every data file in ascending id order.
    /// The greatest id becomes the active file; an empty directory gets a
    /// fresh active file with id 0.
    pub fn open(directory: PathBuf, max_file_size: u64) -> Result<Self> {
        if directory.exists() {
            if !directory.is_dir() {
                return Err(Error::NotADirectory(directory));
            }
        } else {
            fs::create_dir_all(&directory)?;
        }

        let lockfile = LockFile::acquire(directory.join(utils::LOCKFILE_NAME))?;

        let ids = utils::sorted_file_ids(&directory)?;
        let mut files = BTreeMap::new();
        for (i, &id) in ids.iter().enumerate() {
            let writable = i + 1 == ids.len();
            files.insert(id, DataFile::open(&directory, id, writable)?);
        }
        if files.is_empty() {
            files.insert(0, DataFile::create(&directory, 0)?);
        }

        info!(path = %directory.display(), files = files.len(), "opened data directory");
        Ok(Self {
            directory,
            files,
            max_file_size,
            _lockfile: lockfile,
        })
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    pub fn set_max_file_size(&mut self, size: u64) {
        self.max_file_size = size;
    }

    fn active(&self) -> &DataFile {
        // Open, clear, and rollover all leave a writable file behind, so
        // the map is never empty.
        self.files
            .values()
            .next_back()
            .expect("a data directory always holds an active file")
    }

    /// Rebuilds the keydir by replaying every file in ascending id order,
    /// so records in later files supersede earlier ones and tombstones in
    /// later files delete earlier entries.
    pub fn build_index(&self, keydir: &mut KeyDir) -> Result<()> {
        let active_id = self.active().id();
        for file in self.files.values() {
            file.build_index(keydir, file.id() == active_id)?;
        }
        Ok(())
    }

    /// Reads the value a keydir entry points at.
    pub fn read(&self, entry: &KeydirEntry) -> Result<Bytes> {
        let file = self.files.get(&entry.file_id).ok_or(Error::CorruptIndex {
            file_id: entry.file_id,
        })?;
        file.read_value(entry)
    }

    /// Appends a put record to the active file, rolling it over first when
    /// it is full, and returns the location to install in the keydir.
    pub fn put(&mut self, key: &[u8], value: &[u8], version: u64) -> Result<KeydirEntry> {
        self.rotate_if_full()?;
        self.active().append_put(key, value, version)
    }

    /// Appends a tombstone to the active file.
    pub fn delete(&mut self, key: &[u8], version: u64) -> Result<()> {
        self.rotate_if_full()?;
        self.active().append_delete(key, version)
    }

    /// Flushes the active file to disk.
    pub fn sync(&self) -> Result<()> {
        self.active().sync()
    }

    /// Closes the active file for writing and starts a new one once the
    /// configured size cap is reached. Active ids only ever occupy the
    /// high half of the id space, see [`ACTIVE_ID_MASK`].
    fn rotate_if_full(&mut self) -> Result<()> {
        let active = self.active();
        if active.size() < self.max_file_size {
            return Ok(());
        }
        let next_id = (active.id() + ACTIVE_ID_STEP) & ACTIVE_ID_MASK;
        active.sync()?;
        active.reopen_readonly()?;
        debug!(
            closed = active.id(),
            active = next_id,
            "rolled over active data file"
        );
        let file = DataFile::create(&self.directory, next_id)?;
        self.files.insert(next_id, file);
        Ok(())
    }

    /// Rewrites every live record from the immutable files into fresh
    /// segments with hint files, rewrites the keydir in place, and deletes
    /// each input once it is processed. The active file may still receive
    /// writes and is never an input. With fewer than two files there is
    /// nothing to merge.
    #[tracing::instrument(level = "debug", skip(self, keydir))]
    pub fn merge(&mut self, keydir: &mut KeyDir) -> Result<()> {
        if self.files.len() < 2 {
            return Ok(());
        }

        let active_id = self.active().id();
        let input_ids: Vec<u64> = self
            .files
            .keys()
            .copied()
            .filter(|&id| id != active_id)
            .collect();
        let Some(&last_input_id) = input_ids.last() else {
            return Ok(());
        };

        // Output ids slot in between the last immutable file and the
        // active file; the sparse id scheme reserves the low half of the
        // id space for exactly this.
        let mut next_output_id = last_input_id + 1;
        let mut output_id: Option<u64> = None;
        let mut output_hint: Option<HintFile> = None;

        for &input_id in &input_ids {
            let iter = match self.files.get(&input_id) {
                Some(file) => file.scan()?,
                None => continue,
            };
            for record in iter {
                let record = record?;
                let Some(value) = record.value else {
                    // Tombstones never survive a merge.
                    continue;
                };
                let live = keydir
                    .get(&record.key)
                    .map_or(false, |e| e.version == value.version && e.file_id == input_id);
                if !live {
                    continue;
                }

                let id = match output_id {
                    Some(id) => id,
                    None => {
                        let id = next_output_id;
                        next_output_id += 1;
                        debug_assert!(id < active_id);
                        let datafile = DataFile::create(&self.directory, id)?;
                        output_hint = Some(HintFile::create(datafile.hint_path())?);
                        self.files.insert(id, datafile);
                        output_id = Some(id);
                        debug!(file_id = id, "opened merge output file");
                        id
                    }
                };
                let datafile = self
                    .files
                    .get(&id)
                    .expect("merge output file is in the file map");

                let entry = datafile.append_put(&record.key, &value.value, value.version)?;
                if let Some(hintfile) = output_hint.as_ref() {
                    hintfile.append(&Hint {
                        version: entry.version,
                        value_sz: entry.value_sz,
                        value_pos: entry.value_pos,
                        key: record.key.clone(),
                    })?;
                }
                if let Some(slot) = keydir.get_mut(&record.key) {
                    *slot = entry;
                }

                if datafile.size() >= self.max_file_size {
                    datafile.sync()?;
                    datafile.reopen_readonly()?;
                    drop(output_hint.take());
                    output_id = None;
                }
            }

            if let Some(file) = self.files.remove(&input_id) {
                debug!(file_id = input_id, "deleting merged input file");
                file.remove()?;
            }
        }

        drop(output_hint.take());
        if let Some(id) = output_id.take() {
            if let Some(datafile) = self.files.get(&id) {
                datafile.sync()?;
                datafile.reopen_readonly()?;
            }
        }
        Ok(())
    }

    /// Unlinks every data file and hint file and starts over with a fresh
    /// active file. The directory lock stays held.
    pub fn clear(&mut self) -> Result<()> {
        for (_, file) in std::mem::take(&mut self.files) {
            file.remove()?;
        }
        self.files.insert(0, DataFile::create(&self.directory, 0)?);
        Ok(())
    }
}
