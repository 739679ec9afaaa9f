//! Write-back cache layered over a base store.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{Batch, StorageResult, Store};

/// Accumulates changes in memory over any base [`Store`] and flushes them
/// in one atomic batch on [`CachedStore::persist`].
///
/// The ledger uses two layers of these: one per block being applied (so a
/// failing block leaves no trace) and one for the chain itself (flushed to
/// the backing store by the housekeeping task).
pub struct CachedStore {
    base: Arc<dyn Store>,
    /// `None` marks a pending delete.
    overlay: RwLock<BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
}

impl CachedStore {
    pub fn new(base: Arc<dyn Store>) -> Self {
        CachedStore {
            base,
            overlay: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of pending (not yet persisted) changes.
    pub fn pending(&self) -> usize {
        self.overlay.read().len()
    }

    /// Flushes every pending change to the base store in one batch.
    pub fn persist(&self) -> StorageResult<usize> {
        let drained: BTreeMap<_, _> = {
            let mut overlay = self.overlay.write();
            std::mem::take(&mut *overlay)
        };
        let count = drained.len();
        let mut batch = Batch::new();
        for (key, value) in drained {
            match value {
                Some(value) => batch.put(key, value),
                None => batch.delete(key),
            }
        }
        self.base.write_batch(batch)?;
        Ok(count)
    }

    /// Drops every pending change.
    pub fn discard(&self) {
        self.overlay.write().clear();
    }
}

impl Store for CachedStore {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        if let Some(entry) = self.overlay.read().get(key) {
            return Ok(entry.clone());
        }
        self.base.get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.overlay
            .write()
            .insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> StorageResult<()> {
        self.overlay.write().insert(key.to_vec(), None);
        Ok(())
    }

    fn seek(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.base.seek(prefix)?.into_iter().collect();
        let overlay = self.overlay.read();
        for (key, value) in overlay
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
        {
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    fn write_batch(&self, batch: Batch) -> StorageResult<()> {
        let mut overlay = self.overlay.write();
        for op in batch.ops {
            match op {
                super::BatchOp::Put(k, v) => {
                    overlay.insert(k, Some(v));
                }
                super::BatchOp::Delete(k) => {
                    overlay.insert(k, None);
                }
            }
        }
        Ok(())
    }
}
