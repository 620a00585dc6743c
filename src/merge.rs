//! Log compaction.
//!
//! A merge seals the active segment (the horizon), rewrites every record
//! of the sealed prefix that the index still points at into a staging
//! directory, emits hint sidecars, then swaps the staged output in for
//! the consumed segments. Foreground writes continue past the horizon
//! while the rewrite runs; the writer is only paused to seal and to cut
//! over.
//!
//! Crash safety hinges on ordering: the finished marker is written and
//! fsynced before anything is deleted, staged files are *copied* into
//! place so the staging directory stays complete until its final
//! removal, and recovery replays the whole cut-over whenever it finds
//! marker plus staging together.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;

use crate::data_file::DataFile;
use crate::db::DbInner;
use crate::error::{Error, Result};
use crate::fileset;
use crate::hint::HintWriter;
use crate::io::IoKind;
use crate::record::{self, Record, RecordKind, RecordPos, NO_TXN_SEQ};

pub(crate) fn run(inner: &DbInner) -> Result<()> {
    inner.ensure_open()?;
    let Some(_merge_guard) = inner.merge_lock.try_lock() else {
        return Err(Error::MergeInProgress);
    };

    if !ratio_reached(inner) {
        return Ok(());
    }

    let dir = inner.options.dir_path.clone();
    let staging = fileset::staging_dir(&dir);

    // Seal the active segment and let the writer continue past it.
    let (horizon, inputs, reclaim_at_start) = {
        let mut writer = inner.writer.lock();
        inner.ensure_open()?;
        writer.active.sync()?;
        let horizon = writer.active.file_id();
        let next = Arc::new(DataFile::open(&dir, horizon + 1, IoKind::Standard)?);
        inner.files.write().insert(horizon + 1, Arc::clone(&next));
        writer.active = next;

        inner.stale_behind_horizon.store(0, Ordering::Release);
        inner.merge_horizon.store(horizon, Ordering::Release);

        let inputs: Vec<Arc<DataFile>> = inner
            .files
            .read()
            .range(..=horizon)
            .map(|(_, file)| Arc::clone(file))
            .collect();
        (horizon, inputs, inner.reclaimable.load(Ordering::Acquire))
    };

    let result = rewrite_and_swap(inner, &dir, &staging, horizon, inputs, reclaim_at_start);
    if result.is_err() {
        inner.merge_horizon.store(0, Ordering::Release);
        let _ = std::fs::remove_dir_all(&staging);
    }
    result
}

fn ratio_reached(inner: &DbInner) -> bool {
    let reclaimable = inner.reclaimable.load(Ordering::Acquire);
    if reclaimable == 0 {
        return false;
    }
    let disk_size: u64 = inner.files.read().values().map(|file| file.size()).sum();
    if disk_size == 0 {
        return false;
    }
    reclaimable as f64 / disk_size as f64 >= inner.options.data_file_merge_ratio as f64
}

fn rewrite_and_swap(
    inner: &DbInner,
    dir: &Path,
    staging: &Path,
    horizon: u32,
    inputs: Vec<Arc<DataFile>>,
    reclaim_at_start: u64,
) -> Result<()> {
    // A marker left by the previous merge must not be allowed to pair
    // with this merge's staging directory after a crash.
    fileset::remove_merge_finished(dir)?;
    if staging.exists() {
        std::fs::remove_dir_all(staging)?;
    }
    std::fs::create_dir_all(staging)?;

    let mut output = MergeOutput::create(staging, inner.options.max_file_size)?;
    for file in &inputs {
        for item in file.iterate_from(0) {
            let (record, offset, _) = item.map_err(|err| {
                Error::CorruptLog(format!(
                    "merge input segment {} unreadable: {err}",
                    file.file_id()
                ))
            })?;
            if record.kind != RecordKind::Normal {
                continue;
            }
            let live = matches!(
                inner.index.get(&record.key),
                Some(cur) if cur.file_id == file.file_id() && cur.offset == offset
            );
            if live {
                output.write(record.key, record.value)?;
            }
        }
    }
    let entries = output.finish()?;

    fileset::write_merge_finished(dir, horizon + 1)?;
    cut_over(inner, dir, staging, horizon, entries, reclaim_at_start)?;
    std::fs::remove_dir_all(staging)?;
    Ok(())
}

/// Swaps staged output in for the consumed prefix. Holds both the writer
/// and the file map, so neither writers nor readers observe the halfway
/// state.
fn cut_over(
    inner: &DbInner,
    dir: &Path,
    staging: &Path,
    horizon: u32,
    entries: Vec<(Bytes, RecordPos)>,
    reclaim_at_start: u64,
) -> Result<()> {
    let _writer = inner.writer.lock();
    let mut files = inner.files.write();

    let consumed: Vec<u32> = files.range(..=horizon).map(|(&id, _)| id).collect();
    for id in consumed {
        files.remove(&id);
        std::fs::remove_file(fileset::data_path(dir, id))?;
        remove_if_present(&fileset::hint_path(dir, id))?;
    }

    for id in fileset::discover(staging)? {
        std::fs::copy(fileset::data_path(staging, id), fileset::data_path(dir, id))?;
        let staged_hint = fileset::hint_path(staging, id);
        if staged_hint.is_file() {
            std::fs::copy(&staged_hint, fileset::hint_path(dir, id))?;
        }
        let file = Arc::new(DataFile::open(dir, id, IoKind::Standard)?);
        file.sync()?;
        files.insert(id, file);
    }
    fileset::sync_dir(dir)?;

    // Re-point keys that still live behind the horizon. Anything the
    // foreground overwrote or deleted mid-merge makes its rewritten copy
    // garbage in the fresh output.
    let mut stale_output = 0u64;
    for (key, pos) in entries {
        match inner.index.get(&key) {
            Some(cur) if cur.file_id <= horizon => {
                inner.index.put(key, pos);
            }
            _ => stale_output += pos.size as u64,
        }
    }

    // Stale bytes at or below the horizon left the disk with the inputs.
    let behind = inner.stale_behind_horizon.swap(0, Ordering::AcqRel);
    let total = inner.reclaimable.load(Ordering::Acquire);
    let remaining = total
        .saturating_sub(reclaim_at_start)
        .saturating_sub(behind)
        + stale_output;
    inner.reclaimable.store(remaining, Ordering::Release);
    inner.merge_horizon.store(0, Ordering::Release);
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Completes a cut-over interrupted by a crash. Called at open, before
/// recovery scans anything.
///
/// Marker and staging together mean the merge finished but the swap may
/// be partial: replaying delete-then-copy is idempotent because staging
/// still holds the complete output. Staging without a marker is a merge
/// that never finished; it is discarded wholesale.
pub(crate) fn finish_pending_cutover(dir: &Path) -> Result<()> {
    let staging = fileset::staging_dir(dir);
    if !staging.is_dir() {
        return Ok(());
    }
    let Some(first_unmerged) = fileset::read_merge_finished(dir)? else {
        std::fs::remove_dir_all(&staging)?;
        return Ok(());
    };
    let horizon = first_unmerged.saturating_sub(1);

    for id in fileset::discover(dir)? {
        if id <= horizon {
            std::fs::remove_file(fileset::data_path(dir, id))?;
            remove_if_present(&fileset::hint_path(dir, id))?;
        }
    }
    for id in fileset::discover(&staging)? {
        std::fs::copy(fileset::data_path(&staging, id), fileset::data_path(dir, id))?;
        let staged_hint = fileset::hint_path(&staging, id);
        if staged_hint.is_file() {
            std::fs::copy(&staged_hint, fileset::hint_path(dir, id))?;
        }
    }
    fileset::sync_dir(dir)?;
    std::fs::remove_dir_all(&staging)?;
    Ok(())
}

/// Write half of the staging database: an active segment with the same
/// rotation rule as the foreground, plus one hint sidecar per segment.
struct MergeOutput {
    dir: PathBuf,
    max_file_size: u64,
    active: DataFile,
    hint: Option<HintWriter>,
    entries: Vec<(Bytes, RecordPos)>,
}

impl MergeOutput {
    fn create(dir: &Path, max_file_size: u64) -> Result<Self> {
        Ok(Self {
            dir: dir.to_path_buf(),
            max_file_size,
            active: DataFile::open(dir, 1, IoKind::Standard)?,
            hint: Some(HintWriter::create(dir, 1)?),
            entries: Vec::new(),
        })
    }

    fn write(&mut self, key: Bytes, value: Bytes) -> Result<()> {
        let record = Record::normal(key.clone(), value, NO_TXN_SEQ);
        let encoded = record::encode(&record);

        if self.active.size() + encoded.len() as u64 > self.max_file_size {
            self.roll()?;
        }
        let offset = self.active.append(&encoded)?;
        let pos = RecordPos::new(self.active.file_id(), offset, encoded.len() as u32);
        self.hint
            .as_mut()
            .expect("hint writer open")
            .append(&key, pos)?;
        self.entries.push((key, pos));
        Ok(())
    }

    fn roll(&mut self) -> Result<()> {
        self.active.sync()?;
        if let Some(hint) = self.hint.take() {
            hint.finish()?;
        }
        let next = self.active.file_id() + 1;
        self.active = DataFile::open(&self.dir, next, IoKind::Standard)?;
        self.hint = Some(HintWriter::create(&self.dir, next)?);
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<(Bytes, RecordPos)>> {
        self.active.sync()?;
        if let Some(hint) = self.hint.take() {
            hint.finish()?;
        }
        fileset::sync_dir(&self.dir)?;
        Ok(self.entries)
    }
}
