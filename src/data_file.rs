//! A single append-only segment.
//!
//! Appends are serialized by the engine's writer lock; reads are
//! positional and safe from any thread because appended bytes are never
//! rewritten. The logical end of the segment is `write_offset`, which can
//! trail the physical file length only transiently during recovery
//! truncation.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};
use crate::fileset;
use crate::io::{self, FileIo, IoKind};
use crate::record::{self, Record, MAX_HEADER_SIZE};

pub struct DataFile {
    file_id: u32,
    path: PathBuf,
    io: Box<dyn FileIo>,
    write_offset: AtomicU64,
}

impl DataFile {
    /// Opens (or creates) the segment `file_id` inside `dir`.
    pub fn open(dir: &Path, file_id: u32, kind: IoKind) -> Result<Self> {
        Self::open_path(fileset::data_path(dir, file_id), file_id, kind)
    }

    pub fn open_path(path: PathBuf, file_id: u32, kind: IoKind) -> Result<Self> {
        let io = io::open(&path, kind)?;
        let write_offset = AtomicU64::new(io.len()?);
        Ok(Self {
            file_id,
            path,
            io,
            write_offset,
        })
    }

    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current logical size, which is also the next append offset.
    pub fn size(&self) -> u64 {
        self.write_offset.load(Ordering::Acquire)
    }

    /// Appends `buf` and returns the offset its first byte landed on.
    pub fn append(&self, buf: &[u8]) -> Result<u64> {
        let offset = self.write_offset.load(Ordering::Acquire);
        self.io.write_all_at(buf, offset)?;
        self.write_offset
            .store(offset + buf.len() as u64, Ordering::Release);
        Ok(offset)
    }

    pub fn sync(&self) -> Result<()> {
        self.io.sync()
    }

    /// Reads and decodes the record starting at `offset`.
    ///
    /// Returns the record and its total encoded size. A record that runs
    /// past the logical end, or fails its checksum, is `CorruptRecord`.
    pub fn read_record(&self, offset: u64) -> Result<(Record, u32)> {
        let size = self.size();
        if offset >= size {
            return Err(Error::CorruptRecord("read past end of segment"));
        }

        let avail = (size - offset).min(MAX_HEADER_SIZE as u64) as usize;
        let mut header = vec![0u8; avail];
        let got = self.io.read_at(&mut header, offset)?;
        let (_, key_len, value_len, _, header_len) = record::decode_header(&header[..got])?;

        let total = header_len as u64 + key_len + value_len;
        if offset + total > size {
            return Err(Error::CorruptRecord("record overruns segment"));
        }

        let mut buf = vec![0u8; total as usize];
        let got = self.io.read_at(&mut buf, offset)?;
        if got < buf.len() {
            return Err(Error::CorruptRecord("record overruns segment"));
        }
        let (decoded, used) = record::decode(&buf)?;
        Ok((decoded, used as u32))
    }

    /// Lazy scan of the segment from `offset`.
    ///
    /// Yields `(record, start_offset, size)`. Stops cleanly at the
    /// logical end; a torn or corrupt record yields one `Err` and ends
    /// the iteration, which recovery interprets as the truncation point.
    pub fn iterate_from(&self, offset: u64) -> DataFileIter<'_> {
        DataFileIter {
            file: self,
            offset,
            done: false,
        }
    }

    /// Cuts the segment back to `offset`, dropping a torn tail.
    pub fn truncate(&self, offset: u64) -> Result<()> {
        let file = std::fs::OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(offset)?;
        file.sync_data()?;
        self.write_offset.store(offset, Ordering::Release);
        Ok(())
    }
}

pub struct DataFileIter<'a> {
    file: &'a DataFile,
    offset: u64,
    done: bool,
}

impl Iterator for DataFileIter<'_> {
    type Item = Result<(Record, u64, u32)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.file.size() {
            return None;
        }
        match self.file.read_record(self.offset) {
            Ok((record, size)) => {
                let start = self.offset;
                self.offset += size as u64;
                Some(Ok((record, start, size)))
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
