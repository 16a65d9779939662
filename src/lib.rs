//! An embeddable, persistent key/value store implementing the
//! [Bitcask](https://riak.com/assets/bitcask-intro.pdf) design.
//!
//! A store is a directory of append-only data files. At any moment exactly
//! one file is active for writing; the rest are immutable. Every live key
//! is tracked by an in-memory index, the keydir, pointing at the exact
//! byte range of the key's most recent value, so a read costs a single
//! positioned read from one file. Restarting a store rebuilds the keydir
//! by replaying the data files, or their compact hint files where a
//! previous merge left them behind.
//!
//! Space held by overwritten values and tombstones is reclaimed by
//! [`Bitcask::merge`], which rewrites the live contents of all immutable
//! files into fresh segments and deletes the originals.
//!
//! ```no_run
//! use ember::Bitcask;
//!
//! fn main() -> ember::Result<()> {
//!     let mut store = Bitcask::open("/tmp/ember-demo")?;
//!     store.put(b"hello", b"world!")?;
//!     assert_eq!(store.get(b"hello")?.as_deref(), Some(&b"world!"[..]));
//!     store.delete(b"hello")?;
//!     assert_eq!(store.get(b"hello")?, None);
//!     Ok(())
//! }
//! ```
//!
//! The plain [`Bitcask`] is single-threaded. [`SharedBitcask`] wraps it
//! for concurrent use under a readers/writer discipline; the on-disk
//! format is the same either way.

mod config;
mod datadir;
mod datafile;
mod error;
mod fio;
mod hintfile;
mod keydir;
mod lockfile;
mod record;
mod shared;
mod store;
mod utils;

pub use config::{Config, SyncStrategy};
pub use error::{Error, Result};
pub use shared::SharedBitcask;
pub use store::Bitcask;
