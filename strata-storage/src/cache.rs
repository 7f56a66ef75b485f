use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::StorageError;
use crate::traits::{BatchOp, KvPairs, KvStore, SharedStore};

/// Buffered write overlay above a parent store.
///
/// Reads see buffered puts and deletes first, then fall through to the
/// parent. Nothing reaches the parent until [`commit`](Self::commit); a cache
/// that is dropped without committing leaves the parent untouched.
pub struct CacheStore {
    parent: SharedStore,
    /// `Some(value)` for a buffered put, `None` for a buffered delete.
    writes: RwLock<BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
}

impl CacheStore {
    pub fn new(parent: SharedStore) -> Self {
        Self {
            parent,
            writes: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.writes.read().map(|w| !w.is_empty()).unwrap_or(false)
    }

    /// Flush buffered writes into the parent as one batch and reset the buffer.
    pub fn commit(&self) -> Result<usize, StorageError> {
        let mut writes = self.writes.write().map_err(|e| StorageError::WriteError {
            reason: e.to_string(),
        })?;
        let ops: Vec<BatchOp> = std::mem::take(&mut *writes)
            .into_iter()
            .map(|(key, value)| match value {
                Some(value) => BatchOp::Put { key, value },
                None => BatchOp::Delete { key },
            })
            .collect();
        let count = ops.len();
        if count > 0 {
            self.parent.write_batch(ops)?;
        }
        Ok(count)
    }

    /// Drop all buffered writes.
    pub fn discard(&self) {
        if let Ok(mut writes) = self.writes.write() {
            writes.clear();
        }
    }
}

impl KvStore for CacheStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        {
            let writes = self.writes.read().map_err(|e| StorageError::ReadError {
                reason: e.to_string(),
            })?;
            if let Some(buffered) = writes.get(key) {
                return Ok(buffered.clone());
            }
        }
        self.parent.get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let mut writes = self.writes.write().map_err(|e| StorageError::WriteError {
            reason: e.to_string(),
        })?;
        writes.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        let mut writes = self.writes.write().map_err(|e| StorageError::WriteError {
            reason: e.to_string(),
        })?;
        writes.insert(key.to_vec(), None);
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool, StorageError> {
        Ok(self.get(key)?.is_some())
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<KvPairs, StorageError> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.parent.prefix_scan(prefix)?.into_iter().collect();
        let writes = self.writes.read().map_err(|e| StorageError::ReadError {
            reason: e.to_string(),
        })?;
        for (key, value) in writes
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

    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), StorageError> {
        let mut writes = self.writes.write().map_err(|e| StorageError::BatchError {
            reason: e.to_string(),
        })?;
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    writes.insert(key, Some(value));
                }
                BatchOp::Delete { key } => {
                    writes.insert(key, None);
                }
            }
        }
        Ok(())
    }
}
