//! Segment file IO backends.
//!
//! Appends and positional reads go through a small trait so recovery can
//! scan segments through a read-only mmap and the engine can run them on
//! plain file descriptors afterwards. Offsets are explicit everywhere;
//! nothing here keeps seek state.

use std::fs::File;
use std::io;
use std::path::Path;

use memmap2::Mmap;

use crate::error::Result;

/// Backend selector. `Mmap` is read-only and used for startup scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoKind {
    #[default]
    Standard,
    Mmap,
}

pub trait FileIo: Send + Sync {
    /// Reads up to `buf.len()` bytes at `offset`; returns the count read.
    /// A return of 0 means end of file.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Writes the whole buffer at `offset`.
    fn write_all_at(&self, buf: &[u8], offset: u64) -> Result<()>;

    fn sync(&self) -> Result<()>;

    fn len(&self) -> Result<u64>;
}

pub fn open(path: &Path, kind: IoKind) -> Result<Box<dyn FileIo>> {
    match kind {
        IoKind::Standard => Ok(Box::new(StandardIo::open(path)?)),
        IoKind::Mmap => Ok(Box::new(MmapIo::open(path)?)),
    }
}

/// Plain file descriptor with positional reads and writes.
pub struct StandardIo {
    file: File,
}

impl StandardIo {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::options()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        Ok(Self { file })
    }
}

impl FileIo for StandardIo {
    #[cfg(unix)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        use std::os::unix::fs::FileExt;

        let mut read = 0usize;
        while read < buf.len() {
            let n = self.file.read_at(&mut buf[read..], offset + read as u64)?;
            if n == 0 {
                break;
            }
            read += n;
        }
        Ok(read)
    }

    #[cfg(not(unix))]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        use std::io::{Read, Seek, SeekFrom};

        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(offset))?;
        let mut read = 0usize;
        while read < buf.len() {
            let n = file.read(&mut buf[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        Ok(read)
    }

    #[cfg(unix)]
    fn write_all_at(&self, buf: &[u8], offset: u64) -> Result<()> {
        use std::os::unix::fs::FileExt;

        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn write_all_at(&self, buf: &[u8], offset: u64) -> Result<()> {
        use std::io::{Seek, SeekFrom, Write};

        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

/// Read-only memory map over a whole segment.
pub struct MmapIo {
    mmap: Option<Mmap>,
}

impl MmapIo {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::options().create(true).read(true).write(true).open(path)?;
        // Mapping an empty file fails on some platforms; treat it as EOF.
        let mmap = if file.metadata()?.len() == 0 {
            None
        } else {
            Some(unsafe { Mmap::map(&file)? })
        };
        Ok(Self { mmap })
    }
}

impl FileIo for MmapIo {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let Some(mmap) = &self.mmap else {
            return Ok(0);
        };
        let len = mmap.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let n = buf.len().min((len - offset) as usize);
        let start = offset as usize;
        buf[..n].copy_from_slice(&mmap[start..start + n]);
        Ok(n)
    }

    fn write_all_at(&self, _buf: &[u8], _offset: u64) -> Result<()> {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "mmap segments are read-only",
        )
        .into())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.mmap.as_ref().map_or(0, |m| m.len() as u64))
    }
}
