use std::{io, path::PathBuf};

use thiserror::Error;

/// Error returned by store operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The store path exists but is not a directory.
    #[error("{} exists and is not a directory", .0.display())]
    NotADirectory(PathBuf),

    /// Another process holds the lock on the store directory.
    #[error("{} is locked by another process", .0.display())]
    AlreadyLocked(PathBuf),

    /// Error from I/O operations.
    #[error("I/O error - {0}")]
    Io(#[from] io::Error),

    /// A record failed its checksum or was cut short on disk.
    #[error("{}: corrupted record at position {position}", .path.display())]
    Corrupted {
        /// File holding the bad record.
        path: PathBuf,
        /// Byte offset of the record header.
        position: u64,
    },

    /// The index referenced a data file that is not open.
    #[error("index references unknown data file id {file_id:#018x}")]
    CorruptIndex {
        /// The id no open data file answers to.
        file_id: u64,
    },

    /// A key or value does not fit the record format.
    #[error("invalid argument - {0}")]
    InvalidArgument(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
