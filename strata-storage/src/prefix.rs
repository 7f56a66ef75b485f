use crate::error::StorageError;
use crate::traits::{prefixed_key, BatchOp, KvPairs, KvStore, SharedStore};

/// View of a store restricted to keys beginning with a fixed prefix.
///
/// Keys passed in are relative; keys returned by scans have the prefix
/// stripped.
#[derive(Clone)]
pub struct PrefixStore {
    inner: SharedStore,
    prefix: Vec<u8>,
}

impl PrefixStore {
    pub fn new(inner: SharedStore, prefix: Vec<u8>) -> Self {
        Self { inner, prefix }
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    fn full_key(&self, key: &[u8]) -> Vec<u8> {
        prefixed_key(&self.prefix, key)
    }
}

impl KvStore for PrefixStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(&self.full_key(key))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.inner.put(&self.full_key(key), value)
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        self.inner.delete(&self.full_key(key))
    }

    fn exists(&self, key: &[u8]) -> Result<bool, StorageError> {
        self.inner.exists(&self.full_key(key))
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<KvPairs, StorageError> {
        let strip = self.prefix.len();
        Ok(self
            .inner
            .prefix_scan(&self.full_key(prefix))?
            .into_iter()
            .map(|(k, v)| (k[strip..].to_vec(), v))
            .collect())
    }

    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), StorageError> {
        let ops = ops
            .into_iter()
            .map(|op| match op {
                BatchOp::Put { key, value } => BatchOp::Put {
                    key: self.full_key(&key),
                    value,
                },
                BatchOp::Delete { key } => BatchOp::Delete {
                    key: self.full_key(&key),
                },
            })
            .collect();
        self.inner.write_batch(ops)
    }
}
