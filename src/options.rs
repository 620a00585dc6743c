use std::path::PathBuf;

use crate::error::{Error, Result};

/// Which in-memory index structure backs the store.
///
/// All variants share the same contract (point ops + ordered key
/// snapshots); they differ in memory profile and constant factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexKind {
    /// Balanced ordered tree. The default; predictable across workloads.
    #[default]
    BTree,
    /// Path-compressed radix tree; cheaper on long shared key prefixes.
    Radix,
    /// Lock-free skip list; favors heavily concurrent point ops.
    SkipList,
}

/// Open-time configuration.
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory holding segments, hint files, and the lock file.
    pub dir_path: PathBuf,
    /// Segment size ceiling in bytes. The active segment is sealed and a
    /// new one opened before an append would cross it.
    pub max_file_size: u64,
    /// Fsync the active segment after every mutation.
    pub sync_writes: bool,
    /// When > 0 and `sync_writes` is off, fsync after this many written
    /// bytes have accumulated.
    pub bytes_per_sync: u64,
    pub index_kind: IndexKind,
    /// Merge is allowed only when reclaimable bytes / disk bytes reaches
    /// this ratio. Must be in (0, 1].
    pub data_file_merge_ratio: f32,
    /// Maximum number of staged operations per batch.
    pub batch_max_size: usize,
    /// Scan segments through a read-only mmap during recovery, then
    /// reopen them on the standard backend.
    pub mmap_at_startup: bool,
}

impl Options {
    pub fn new(dir_path: impl Into<PathBuf>) -> Self {
        Self {
            dir_path: dir_path.into(),
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.dir_path.as_os_str().is_empty() {
            return Err(Error::InvalidOptions("dir_path is empty".into()));
        }
        if self.max_file_size == 0 {
            return Err(Error::InvalidOptions(
                "max_file_size must be positive".into(),
            ));
        }
        if !(self.data_file_merge_ratio > 0.0 && self.data_file_merge_ratio <= 1.0) {
            return Err(Error::InvalidOptions(format!(
                "data_file_merge_ratio {} outside (0, 1]",
                self.data_file_merge_ratio
            )));
        }
        if self.batch_max_size == 0 {
            return Err(Error::InvalidOptions(
                "batch_max_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dir_path: PathBuf::new(),
            max_file_size: 256 * 1024 * 1024,
            sync_writes: false,
            bytes_per_sync: 0,
            index_kind: IndexKind::default(),
            data_file_merge_ratio: 0.5,
            batch_max_size: 10_000,
            mmap_at_startup: false,
        }
    }
}
