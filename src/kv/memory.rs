//! In-process ordered key-value store: the default [`KvBackend`] and the one
//! this crate's test suite runs against. Mirrors the shared-cache shape of
//! an `Arc<Inner>` guarded by a `parking_lot::RwLock`, just keyed by an
//! ordered `BTreeMap` rather than a hash map — prefix scans over tagged keys
//! are load-bearing here, unlike in a plain graph property store.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;

use super::{KvBackend, KvTransaction};

#[derive(Default)]
struct Inner {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

/// A cheaply-cloneable handle to a shared in-memory ordered store.
#[derive(Clone, Default)]
pub struct MemoryKv {
    inner: Arc<Inner>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvBackend for MemoryKv {
    type Tx = MemoryTx;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.map.read().get(key).cloned())
    }

    fn iter_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let map = self.inner.map.read();
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn iter_range(&self, prefix: &[u8], from: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let map = self.inner.map.read();
        Ok(map
            .range(from.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.inner.map.write().insert(key, value);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner.map.write().remove(key);
        Ok(())
    }

    fn begin_transaction(&self) -> Self::Tx {
        MemoryTx { backend: self.clone(), pending: BTreeMap::new() }
    }

    /// Rebuilds the map node-by-node, the only "reclaim space" a `BTreeMap`
    /// can offer after a burst of deletes (it has no capacity to shrink).
    fn compaction(&self) -> Result<()> {
        let mut map = self.inner.map.write();
        let rebuilt: BTreeMap<Vec<u8>, Vec<u8>> = std::mem::take(&mut *map).into_iter().collect();
        *map = rebuilt;
        Ok(())
    }
}

enum PendingOp {
    Put(Vec<u8>),
    Delete,
}

/// A buffered batch over a [`MemoryKv`]: reads see this batch's own pending
/// puts/deletes before falling back to the committed map; `commit` applies
/// everything in one locked pass.
pub struct MemoryTx {
    backend: MemoryKv,
    pending: BTreeMap<Vec<u8>, PendingOp>,
}

impl KvTransaction for MemoryTx {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.pending.get(key) {
            Some(PendingOp::Put(value)) => Ok(Some(value.clone())),
            Some(PendingOp::Delete) => Ok(None),
            None => self.backend.get(key),
        }
    }

    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.pending.insert(key, PendingOp::Put(value));
    }

    fn delete(&mut self, key: Vec<u8>) {
        self.pending.insert(key, PendingOp::Delete);
    }

    fn commit(self) -> Result<bool> {
        let mut map = self.backend.inner.map.write();
        for (key, op) in self.pending {
            match op {
                PendingOp::Put(value) => {
                    map.insert(key, value);
                }
                PendingOp::Delete => {
                    map.remove(&key);
                }
            }
        }
        Ok(true)
    }

    fn rollback(self) {
        // Dropping `self.pending` without touching the backend is the rollback.
    }
}
