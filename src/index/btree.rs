use std::collections::BTreeMap;

use bytes::Bytes;
use parking_lot::RwLock;

use super::Index;
use crate::record::RecordPos;

/// Balanced ordered tree. Point ops take the write lock briefly; key
/// snapshots copy the key set under the read lock.
#[derive(Default)]
pub struct BTreeIndex {
    map: RwLock<BTreeMap<Bytes, RecordPos>>,
}

impl BTreeIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Index for BTreeIndex {
    fn put(&self, key: Bytes, pos: RecordPos) -> Option<RecordPos> {
        self.map.write().insert(key, pos)
    }

    fn get(&self, key: &[u8]) -> Option<RecordPos> {
        self.map.read().get(key).copied()
    }

    fn remove(&self, key: &[u8]) -> Option<RecordPos> {
        self.map.write().remove(key)
    }

    fn len(&self) -> usize {
        self.map.read().len()
    }

    fn snapshot_keys(&self, reverse: bool) -> Vec<Bytes> {
        let guard = self.map.read();
        let mut keys: Vec<Bytes> = guard.keys().cloned().collect();
        if reverse {
            keys.reverse();
        }
        keys
    }
}
