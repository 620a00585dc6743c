//! The storage engine.
//!
//! One writer, many readers. Every mutation is appended to the active
//! segment, then reflected in the in-memory index before the call
//! returns; readers resolve positions against immutable bytes and never
//! wait on the writer. Opening a directory replays the log (hint files
//! first, then raw segments) to rebuild the index.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;

use crate::batch::Batch;
use crate::data_file::DataFile;
use crate::error::{Error, Result};
use crate::fileset;
use crate::flock::FileLock;
use crate::hint;
use crate::index::{self, Index};
use crate::io::IoKind;
use crate::iterator::{DbIterator, IterOptions};
use crate::merge;
use crate::options::Options;
use crate::record::{self, Record, RecordKind, RecordPos, NO_TXN_SEQ};

/// Point-in-time counters for the whole store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub key_num: usize,
    pub data_file_num: usize,
    /// Bytes of superseded records awaiting compaction.
    pub reclaimable_size: u64,
    /// Sum of segment sizes on disk.
    pub disk_size: u64,
}

/// Database handle; clones share one engine.
#[derive(Clone)]
pub struct Db {
    pub(crate) inner: Arc<DbInner>,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db").finish_non_exhaustive()
    }
}

pub(crate) struct DbInner {
    pub(crate) options: Options,
    pub(crate) index: Arc<dyn Index>,
    /// Every open segment, the active one included.
    pub(crate) files: RwLock<BTreeMap<u32, Arc<DataFile>>>,
    pub(crate) writer: Mutex<Writer>,
    /// Held for the whole duration of a merge; `try_lock` failure is
    /// `MergeInProgress`.
    pub(crate) merge_lock: Mutex<()>,
    /// Horizon of the running merge; 0 when no merge is active.
    pub(crate) merge_horizon: AtomicU32,
    /// Bytes that went stale during the running merge inside segments at
    /// or below the horizon. Those bytes disappear with the merge input,
    /// so cut-over subtracts them from the reclaimable counter.
    pub(crate) stale_behind_horizon: AtomicU64,
    pub(crate) reclaimable: AtomicU64,
    /// Transaction sequence high-water-mark.
    pub(crate) txn_seq: AtomicU64,
    pub(crate) closed: AtomicBool,
    lock: Mutex<Option<FileLock>>,
}

pub(crate) struct Writer {
    pub(crate) active: Arc<DataFile>,
    bytes_since_sync: u64,
}

impl Db {
    /// Opens the directory, recovering the index from hint and data
    /// files. Fails `InUse` if another process holds the lock and
    /// `CorruptLog` on unrecoverable log damage.
    pub fn open(options: Options) -> Result<Self> {
        options.validate()?;
        let dir = options.dir_path.clone();
        std::fs::create_dir_all(&dir)?;

        let lock = FileLock::acquire(fileset::lock_path(&dir)).map_err(|err| {
            if err.kind() == std::io::ErrorKind::WouldBlock {
                Error::InUse(dir.clone())
            } else {
                Error::Io(err)
            }
        })?;

        merge::finish_pending_cutover(&dir)?;

        let index = index::new_index(options.index_kind);
        let recovered = recover(&dir, &options, index.as_ref())?;

        let mut files = BTreeMap::new();
        for &id in &recovered.segment_ids {
            files.insert(id, Arc::new(DataFile::open(&dir, id, IoKind::Standard)?));
        }
        let active = match files.values().next_back().cloned() {
            Some(file) => file,
            None => {
                let file = Arc::new(DataFile::open(&dir, 1, IoKind::Standard)?);
                files.insert(1, Arc::clone(&file));
                file
            }
        };

        // A pending cut-over was completed above, so the marker has
        // served its purpose.
        fileset::remove_merge_finished(&dir)?;

        Ok(Self {
            inner: Arc::new(DbInner {
                options,
                index,
                files: RwLock::new(files),
                writer: Mutex::new(Writer {
                    active,
                    bytes_since_sync: 0,
                }),
                merge_lock: Mutex::new(()),
                merge_horizon: AtomicU32::new(0),
                stale_behind_horizon: AtomicU64::new(0),
                reclaimable: AtomicU64::new(recovered.reclaimable),
                txn_seq: AtomicU64::new(recovered.txn_high_water),
                closed: AtomicBool::new(false),
                lock: Mutex::new(Some(lock)),
            }),
        })
    }

    pub fn put(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<()> {
        self.inner.put(key.into(), value.into())
    }

    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Bytes> {
        self.inner.get(key.as_ref())
    }

    /// Removes `key`. Deleting an absent key succeeds without writing.
    pub fn delete(&self, key: impl AsRef<[u8]>) -> Result<()> {
        self.inner.delete(key.as_ref())
    }

    /// All live keys in ascending byte order.
    pub fn list_keys(&self) -> Result<Vec<Bytes>> {
        self.inner.ensure_open()?;
        Ok(self.inner.index.snapshot_keys(false))
    }

    pub fn new_batch(&self) -> Result<Batch> {
        self.inner.ensure_open()?;
        Ok(Batch::new(self.clone()))
    }

    pub fn iterator(&self, options: IterOptions) -> Result<DbIterator> {
        self.inner.ensure_open()?;
        Ok(DbIterator::new(Arc::clone(&self.inner), options))
    }

    /// Applies `f` to each live pair in key order until it returns false.
    pub fn fold(&self, mut f: impl FnMut(&Bytes, &Bytes) -> bool) -> Result<()> {
        self.inner.ensure_open()?;
        for key in self.inner.index.snapshot_keys(false) {
            match self.inner.get(&key) {
                Ok(value) => {
                    if !f(&key, &value) {
                        break;
                    }
                }
                // Deleted between snapshot and resolution.
                Err(Error::KeyNotFound) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Compacts the log if the reclaimable ratio allows it.
    pub fn merge(&self) -> Result<()> {
        merge::run(&self.inner)
    }

    pub fn sync(&self) -> Result<()> {
        self.inner.ensure_open()?;
        let writer = self.inner.writer.lock();
        self.inner.ensure_open()?;
        writer.active.sync()
    }

    pub fn stats(&self) -> Result<Stats> {
        self.inner.ensure_open()?;
        let files = self.inner.files.read();
        let disk_size = files.values().map(|file| file.size()).sum();
        Ok(Stats {
            key_num: self.inner.index.len(),
            data_file_num: files.len(),
            reclaimable_size: self.inner.reclaimable.load(Ordering::Acquire),
            disk_size,
        })
    }

    /// Flushes and closes. Further operations fail `Closed`; the handle
    /// may be dropped at any time afterwards.
    pub fn close(&self) -> Result<()> {
        self.inner.close()
    }
}

impl DbInner {
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn put(&self, key: Bytes, value: Bytes) -> Result<()> {
        self.ensure_open()?;
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }

        let record = Record::normal(key.clone(), value, NO_TXN_SEQ);
        let encoded = record::encode(&record);

        let mut writer = self.writer.lock();
        self.ensure_open()?;
        let pos = self.append_locked(&mut writer, &encoded)?;
        self.sync_policy_locked(&mut writer, encoded.len() as u64)?;

        if let Some(old) = self.index.put(key, pos) {
            self.add_reclaimable(old.size as u64, old.file_id);
        }
        Ok(())
    }

    pub(crate) fn get(&self, key: &[u8]) -> Result<Bytes> {
        self.ensure_open()?;
        let (file, pos) = self.locate(key)?;
        let (record, _) = file.read_record(pos.offset)?;
        if record.kind != RecordKind::Normal || record.key != key {
            return Err(Error::CorruptRecord("index and log disagree"));
        }
        Ok(record.value)
    }

    fn locate(&self, key: &[u8]) -> Result<(Arc<DataFile>, RecordPos)> {
        // The files guard spans the index lookup so a concurrent merge
        // cut-over cannot retire a segment between the two steps.
        let files = self.files.read();
        let pos = match self.index.get(key) {
            Some(pos) if !key.is_empty() => pos,
            _ => return Err(Error::KeyNotFound),
        };
        let file = files
            .get(&pos.file_id)
            .cloned()
            .ok_or(Error::CorruptRecord("index points at missing segment"))?;
        Ok((file, pos))
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.ensure_open()?;
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }

        let mut writer = self.writer.lock();
        self.ensure_open()?;
        if self.index.get(key).is_none() {
            return Ok(());
        }

        let record = Record::tombstone(Bytes::copy_from_slice(key), NO_TXN_SEQ);
        let encoded = record::encode(&record);
        let pos = self.append_locked(&mut writer, &encoded)?;
        self.sync_policy_locked(&mut writer, encoded.len() as u64)?;

        if let Some(old) = self.index.remove(key) {
            self.add_reclaimable(old.size as u64, old.file_id);
        }
        // The tombstone itself is dead on arrival.
        self.add_reclaimable(pos.size as u64, pos.file_id);
        Ok(())
    }

    /// Appends one encoded record, rotating the active segment when the
    /// append would cross the size ceiling. Caller holds the writer lock.
    pub(crate) fn append_locked(&self, writer: &mut Writer, encoded: &[u8]) -> Result<RecordPos> {
        let len = encoded.len() as u64;
        if len > self.options.max_file_size {
            return Err(Error::RecordTooLarge {
                size: len,
                max: self.options.max_file_size,
            });
        }

        if writer.active.size() + len > self.options.max_file_size {
            writer.active.sync()?;
            let next_id = writer.active.file_id() + 1;
            let file = Arc::new(DataFile::open(
                &self.options.dir_path,
                next_id,
                IoKind::Standard,
            )?);
            self.files.write().insert(next_id, Arc::clone(&file));
            writer.active = file;
        }

        let offset = writer.active.append(encoded)?;
        Ok(RecordPos::new(
            writer.active.file_id(),
            offset,
            encoded.len() as u32,
        ))
    }

    /// Durability policy after an append: every write when configured,
    /// otherwise after `bytes_per_sync` accumulated bytes. Batch commits
    /// call this once for the whole batch.
    pub(crate) fn sync_policy_locked(&self, writer: &mut Writer, appended: u64) -> Result<()> {
        writer.bytes_since_sync += appended;
        let due = self.options.sync_writes
            || (self.options.bytes_per_sync > 0
                && writer.bytes_since_sync >= self.options.bytes_per_sync);
        if due {
            writer.active.sync()?;
            writer.bytes_since_sync = 0;
        }
        Ok(())
    }

    /// Counts `bytes` at `file_id` as reclaimable; a running merge splits
    /// them by its horizon.
    pub(crate) fn add_reclaimable(&self, bytes: u64, file_id: u32) {
        self.reclaimable.fetch_add(bytes, Ordering::AcqRel);
        let horizon = self.merge_horizon.load(Ordering::Acquire);
        if horizon != 0 && file_id <= horizon {
            self.stale_behind_horizon.fetch_add(bytes, Ordering::AcqRel);
        }
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Wait out a running merge before tearing files down.
        let _merge = self.merge_lock.lock();
        let writer = self.writer.lock();
        let result = writer.active.sync();
        self.files.write().clear();
        *self.lock.lock() = None;
        result
    }
}

impl Drop for DbInner {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            let writer = self.writer.lock();
            let _ = writer.active.sync();
        }
    }
}

struct Recovered {
    segment_ids: Vec<u32>,
    reclaimable: u64,
    txn_high_water: u64,
}

/// Rebuilds the index from the directory.
///
/// Hint files cover merged segments and are loaded in parallel; every
/// other segment is scanned in file-id order, buffering batch members
/// until their commit marker. A torn record truncates the newest segment
/// and is fatal anywhere else.
fn recover(dir: &Path, options: &Options, index: &dyn Index) -> Result<Recovered> {
    let segment_ids = fileset::discover(dir)?;
    let mut recovered = Recovered {
        segment_ids,
        reclaimable: 0,
        txn_high_water: 0,
    };
    if recovered.segment_ids.is_empty() {
        return Ok(recovered);
    }

    let (hinted, scanned): (Vec<u32>, Vec<u32>) = recovered
        .segment_ids
        .iter()
        .partition(|&&id| fileset::hint_path(dir, id).is_file());

    let hint_sets: Vec<Vec<hint::HintEntry>> = hinted
        .par_iter()
        .map(|&id| hint::load(&fileset::hint_path(dir, id)))
        .collect::<Result<_>>()?;
    for entry in hint_sets.into_iter().flatten() {
        index.put(entry.key, entry.pos);
    }

    let scan_kind = if options.mmap_at_startup {
        IoKind::Mmap
    } else {
        IoKind::Standard
    };
    let last_id = *recovered.segment_ids.last().unwrap();
    let mut pending: HashMap<u64, Vec<(Record, RecordPos)>> = HashMap::new();

    for &id in &scanned {
        let file = DataFile::open(dir, id, scan_kind)?;
        let mut clean_end = 0u64;
        for item in file.iterate_from(0) {
            let (record, offset, size) = match item {
                Ok(item) => item,
                Err(Error::CorruptRecord(_)) if id == last_id => {
                    // Torn tail from a crash mid-append; cut it off.
                    file.truncate(clean_end)?;
                    break;
                }
                Err(Error::CorruptRecord(reason)) => {
                    return Err(Error::CorruptLog(format!(
                        "segment {id} corrupt mid-stream: {reason}"
                    )));
                }
                Err(err) => return Err(err),
            };
            clean_end = offset + size as u64;
            let pos = RecordPos::new(id, offset, size);
            apply_recovered(index, &mut recovered, &mut pending, record, pos);
        }
    }

    // Batches with no commit marker on disk never happened.
    for members in pending.into_values() {
        for (_, pos) in members {
            recovered.reclaimable += pos.size as u64;
        }
    }
    Ok(recovered)
}

fn apply_recovered(
    index: &dyn Index,
    recovered: &mut Recovered,
    pending: &mut HashMap<u64, Vec<(Record, RecordPos)>>,
    record: Record,
    pos: RecordPos,
) {
    match record.kind {
        RecordKind::TxnCommit => {
            let seq = record.txn_seq;
            recovered.txn_high_water = recovered.txn_high_water.max(seq);
            // The marker itself is never live.
            recovered.reclaimable += pos.size as u64;
            for (member, member_pos) in pending.remove(&seq).unwrap_or_default() {
                promote(index, recovered, member, member_pos);
            }
        }
        _ if record.txn_seq != NO_TXN_SEQ => {
            pending.entry(record.txn_seq).or_default().push((record, pos));
        }
        _ => promote(index, recovered, record, pos),
    }
}

fn promote(index: &dyn Index, recovered: &mut Recovered, record: Record, pos: RecordPos) {
    match record.kind {
        RecordKind::Normal => {
            if let Some(old) = index.put(record.key, pos) {
                recovered.reclaimable += old.size as u64;
            }
        }
        RecordKind::Tombstone => {
            if let Some(old) = index.remove(&record.key) {
                recovered.reclaimable += old.size as u64;
            }
            recovered.reclaimable += pos.size as u64;
        }
        RecordKind::TxnCommit => unreachable!("commit markers are never buffered"),
    }
}
