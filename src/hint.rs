//! Hint sidecars.
//!
//! A merge writes one hint file per merged segment, enumerating the live
//! `(key, pos)` pairs it rewrote into that segment. Recovery loads hints
//! instead of re-parsing record values. Entries are u32-length-framed
//! bincode; a short tail ends the replay silently because hints are
//! always rewritten whole by the next merge.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fileset;
use crate::record::RecordPos;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintEntry {
    pub key: Bytes,
    pub pos: RecordPos,
}

pub struct HintWriter {
    file: File,
    path: PathBuf,
}

impl HintWriter {
    pub fn create(dir: &Path, file_id: u32) -> Result<Self> {
        let path = fileset::hint_path(dir, file_id);
        let file = File::create(&path)?;
        Ok(Self { file, path })
    }

    pub fn append(&mut self, key: &Bytes, pos: RecordPos) -> Result<()> {
        let entry = HintEntry {
            key: key.clone(),
            pos,
        };
        let payload = bincode::serialize(&entry)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        let len = payload.len() as u32;
        let mut buf = Vec::with_capacity(4 + payload.len());
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&payload);
        self.file.write_all(&buf)?;
        Ok(())
    }

    pub fn finish(self) -> Result<()> {
        self.file.sync_data()?;
        drop(self.file);
        if let Some(parent) = self.path.parent() {
            fileset::sync_dir(parent)?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Loads every entry of one hint file.
pub fn load(path: &Path) -> Result<Vec<HintEntry>> {
    let mut data = Vec::new();
    File::open(path)?.read_to_end(&mut data)?;

    let mut entries = Vec::new();
    let mut at = 0usize;
    while at + 4 <= data.len() {
        let len = u32::from_le_bytes(data[at..at + 4].try_into().unwrap()) as usize;
        at += 4;
        if at + len > data.len() {
            break;
        }
        match bincode::deserialize::<HintEntry>(&data[at..at + len]) {
            Ok(entry) => entries.push(entry),
            Err(_) => break,
        }
        at += len;
    }
    Ok(entries)
}
