//! Database iterator.
//!
//! The key set is frozen when the iterator is built; values are resolved
//! lazily through the current index. A key overwritten after
//! construction therefore yields its newest value, and a key deleted
//! after construction yields `None`. Iterators stay bound to the engine
//! and report `Closed` once the database shuts down.

use std::sync::Arc;

use bytes::Bytes;

use crate::db::DbInner;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct IterOptions {
    /// Restrict traversal to keys starting with this prefix.
    pub prefix: Option<Bytes>,
    pub reverse: bool,
}

impl IterOptions {
    pub fn prefix(prefix: impl Into<Bytes>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    pub fn reverse() -> Self {
        Self {
            reverse: true,
            ..Self::default()
        }
    }
}

pub struct DbIterator {
    inner: Arc<DbInner>,
    keys: Vec<Bytes>,
    reverse: bool,
    at: usize,
}

impl DbIterator {
    pub(crate) fn new(inner: Arc<DbInner>, options: IterOptions) -> Self {
        let mut keys = inner.index.snapshot_keys(options.reverse);
        if let Some(prefix) = &options.prefix {
            keys.retain(|key| key.starts_with(prefix));
        }
        Self {
            inner,
            keys,
            reverse: options.reverse,
            at: 0,
        }
    }

    /// Back to the first key of the traversal.
    pub fn rewind(&mut self) {
        self.at = 0;
    }

    /// Positions at the first key at or past `target` in traversal
    /// order: the smallest key `>= target` going forward, the largest
    /// key `<= target` in reverse.
    pub fn seek(&mut self, target: impl AsRef<[u8]>) {
        let target = target.as_ref();
        self.at = if self.reverse {
            self.keys.partition_point(|key| &key[..] > target)
        } else {
            self.keys.partition_point(|key| &key[..] < target)
        };
    }

    pub fn valid(&self) -> bool {
        self.at < self.keys.len()
    }

    pub fn key(&self) -> Option<&Bytes> {
        self.keys.get(self.at)
    }

    /// Resolves the current key through the live index.
    ///
    /// `Ok(None)` means the key was deleted after this iterator was
    /// built.
    pub fn value(&self) -> Result<Option<Bytes>> {
        let Some(key) = self.key() else {
            return Ok(None);
        };
        match self.inner.get(key) {
            Ok(value) => Ok(Some(value)),
            Err(Error::KeyNotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn next(&mut self) {
        if self.at < self.keys.len() {
            self.at += 1;
        }
    }
}
