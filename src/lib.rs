//! `caskdb` is a Bitcask-model persistent key-value store.
//!
//! This crate is intentionally opinionated about correctness first:
//! - Every mutation is one CRC-framed record on an append-only log.
//! - Reads go index → segment → record; the index is the single source
//!   of liveness.
//! - Deletes are tombstones; batches commit through a marker record and
//!   are atomic across crashes.
//! - Merge rewrites the live prefix of the log into a staging directory
//!   and swaps it in behind a fsynced marker, so a crash at any point
//!   either keeps the old segments or adopts the new ones, never a mix.
//!
//! The write path is serialized through one writer lock; readers run in
//! parallel against immutable bytes and never wait on the writer.

pub mod batch;
pub mod data_file;
pub mod db;
pub mod error;
pub mod fileset;
pub mod flock;
pub mod hint;
pub mod index;
pub mod io;
pub mod iterator;
mod merge;
pub mod options;
pub mod record;

pub use batch::Batch;
pub use db::{Db, Stats};
pub use error::{Error, Result};
pub use iterator::{DbIterator, IterOptions};
pub use options::{IndexKind, Options};
