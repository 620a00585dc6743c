//! Atomic multi-operation batches.
//!
//! Staged mutations live in insertion order with last-write-wins per
//! key. Commit appends every member with a fresh transaction sequence,
//! then a single commit marker; recovery discards members whose marker
//! never reached the disk, so a batch is all-or-nothing across crashes.

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use bytes::Bytes;

use crate::db::Db;
use crate::error::{Error, Result};
use crate::record::{self, Record};

pub struct Batch {
    db: Db,
    committed: bool,
    /// `None` value stages a delete.
    ops: Vec<(Bytes, Option<Bytes>)>,
    slots: HashMap<Bytes, usize>,
}

impl Batch {
    pub(crate) fn new(db: Db) -> Self {
        Self {
            db,
            committed: false,
            ops: Vec::new(),
            slots: HashMap::new(),
        }
    }

    pub fn put(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<()> {
        self.stage(key.into(), Some(value.into()))
    }

    pub fn delete(&mut self, key: impl Into<Bytes>) -> Result<()> {
        self.stage(key.into(), None)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn stage(&mut self, key: Bytes, value: Option<Bytes>) -> Result<()> {
        if self.committed {
            return Err(Error::BatchCommitted);
        }
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        if let Some(&at) = self.slots.get(&key) {
            self.ops[at].1 = value;
            return Ok(());
        }
        if self.ops.len() >= self.db.inner.options.batch_max_size {
            return Err(Error::BatchTooLarge {
                len: self.ops.len(),
                max: self.db.inner.options.batch_max_size,
            });
        }
        self.slots.insert(key.clone(), self.ops.len());
        self.ops.push((key, value));
        Ok(())
    }

    /// Appends all staged records plus the commit marker, then applies
    /// the batch to the index. Consumes the batch; an empty batch is a
    /// no-op.
    pub fn commit(&mut self) -> Result<()> {
        if self.committed {
            return Err(Error::BatchCommitted);
        }
        let inner = &self.db.inner;
        inner.ensure_open()?;
        if self.ops.is_empty() {
            self.committed = true;
            return Ok(());
        }

        let mut writer = inner.writer.lock();
        inner.ensure_open()?;

        // Burn the sequence even if the commit fails below; reusing it
        // could resurrect a partially appended batch after restart.
        let seq = inner.txn_seq.fetch_add(1, Ordering::AcqRel) + 1;

        let mut records = Vec::with_capacity(self.ops.len() + 1);
        for (key, value) in &self.ops {
            let record = match value {
                Some(value) => Record::normal(key.clone(), value.clone(), seq),
                None => Record::tombstone(key.clone(), seq),
            };
            if record.encoded_len() > inner.options.max_file_size {
                return Err(Error::RecordTooLarge {
                    size: record.encoded_len(),
                    max: inner.options.max_file_size,
                });
            }
            records.push(record);
        }
        records.push(Record::txn_commit(seq));

        let mut appended = 0u64;
        let mut positions = Vec::with_capacity(records.len());
        for record in &records {
            let encoded = record::encode(record);
            positions.push(inner.append_locked(&mut writer, &encoded)?);
            appended += encoded.len() as u64;
        }
        inner.sync_policy_locked(&mut writer, appended)?;

        // Visibility point: apply to the index in staged order.
        for ((key, value), pos) in self.ops.iter().zip(&positions) {
            match value {
                Some(_) => {
                    if let Some(old) = inner.index.put(key.clone(), *pos) {
                        inner.add_reclaimable(old.size as u64, old.file_id);
                    }
                }
                None => {
                    if let Some(old) = inner.index.remove(key) {
                        inner.add_reclaimable(old.size as u64, old.file_id);
                    }
                    // The tombstone record is dead the moment it lands.
                    inner.add_reclaimable(pos.size as u64, pos.file_id);
                }
            }
        }
        let marker = positions.last().expect("commit marker position");
        inner.add_reclaimable(marker.size as u64, marker.file_id);

        self.committed = true;
        Ok(())
    }
}
