use bytes::Bytes;
use crossbeam_skiplist::SkipMap;
use parking_lot::Mutex;

use super::Index;
use crate::record::RecordPos;

/// Lock-free skip list. Reads never block; the mutation mutex only
/// serializes the read-old-then-replace pair so `put`/`remove` can report
/// the displaced position, which the reclaim counter depends on.
pub struct SkipListIndex {
    map: SkipMap<Bytes, RecordPos>,
    write: Mutex<()>,
}

impl SkipListIndex {
    pub fn new() -> Self {
        Self {
            map: SkipMap::new(),
            write: Mutex::new(()),
        }
    }
}

impl Default for SkipListIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl Index for SkipListIndex {
    fn put(&self, key: Bytes, pos: RecordPos) -> Option<RecordPos> {
        let _guard = self.write.lock();
        let old = self.map.get(&key[..]).map(|entry| *entry.value());
        self.map.insert(key, pos);
        old
    }

    fn get(&self, key: &[u8]) -> Option<RecordPos> {
        self.map.get(key).map(|entry| *entry.value())
    }

    fn remove(&self, key: &[u8]) -> Option<RecordPos> {
        let _guard = self.write.lock();
        self.map.remove(key).map(|entry| *entry.value())
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn snapshot_keys(&self, reverse: bool) -> Vec<Bytes> {
        let mut keys: Vec<Bytes> = self.map.iter().map(|entry| entry.key().clone()).collect();
        if reverse {
            keys.reverse();
        }
        keys
    }
}
