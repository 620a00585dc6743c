//! In-memory key → record position index.
//!
//! Point operations are internally synchronized; ordered traversal is a
//! snapshot of the key set taken under a shared lock, so iterators never
//! observe later mutations. Ordering is lexicographic over raw bytes for
//! every variant.

mod btree;
mod radix;
mod skiplist;

use std::sync::Arc;

use bytes::Bytes;

pub use btree::BTreeIndex;
pub use radix::RadixIndex;
pub use skiplist::SkipListIndex;

use crate::options::IndexKind;
use crate::record::RecordPos;

pub trait Index: Send + Sync {
    /// Inserts or replaces; returns the displaced position if any.
    fn put(&self, key: Bytes, pos: RecordPos) -> Option<RecordPos>;

    fn get(&self, key: &[u8]) -> Option<RecordPos>;

    /// Removes; returns the removed position if the key was present.
    fn remove(&self, key: &[u8]) -> Option<RecordPos>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ordered snapshot of all keys, reversed on request.
    fn snapshot_keys(&self, reverse: bool) -> Vec<Bytes>;
}

pub fn new_index(kind: IndexKind) -> Arc<dyn Index> {
    match kind {
        IndexKind::BTree => Arc::new(BTreeIndex::new()),
        IndexKind::Radix => Arc::new(RadixIndex::new()),
        IndexKind::SkipList => Arc::new(SkipListIndex::new()),
    }
}
