use strata_types::contract::CodeRecord;
use strata_types::primitives::{Checksum, CodeId};

use crate::error::StorageError;
use crate::traits::{prefixed_key, KvStore};
use crate::{decode, encode};

const CODE_BLOB_PREFIX: &[u8] = b"code:blob:";
const CODE_RECORD_PREFIX: &[u8] = b"code:record:";
const CODE_LAST_ID_KEY: &[u8] = b"code:last_id";

/// Content-addressed bytecode blobs plus the code records that point at them.
///
/// Blobs are keyed by checksum, so identical bytecode is stored once no matter
/// how many records reference it. Records are keyed by big-endian code id so
/// scans return them in id order.
pub struct CodeStore<S: KvStore> {
    store: S,
}

impl<S: KvStore> CodeStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Store a blob under its checksum. Idempotent.
    pub fn save_blob(&self, checksum: &Checksum, bytecode: &[u8]) -> Result<bool, StorageError> {
        let key = prefixed_key(CODE_BLOB_PREFIX, checksum);
        if self.store.exists(&key)? {
            return Ok(false);
        }
        self.store.put(&key, bytecode)?;
        Ok(true)
    }

    pub fn load_blob(&self, checksum: &Checksum) -> Result<Option<Vec<u8>>, StorageError> {
        self.store.get(&prefixed_key(CODE_BLOB_PREFIX, checksum))
    }

    pub fn has_blob(&self, checksum: &Checksum) -> Result<bool, StorageError> {
        self.store.exists(&prefixed_key(CODE_BLOB_PREFIX, checksum))
    }

    /// Highest code id assigned so far (0 when none).
    pub fn last_code_id(&self) -> Result<CodeId, StorageError> {
        match self.store.get(CODE_LAST_ID_KEY)? {
            Some(bytes) => decode(&bytes),
            None => Ok(0),
        }
    }

    /// Allocate the next code id.
    pub fn next_code_id(&self) -> Result<CodeId, StorageError> {
        let next = self.last_code_id()? + 1;
        self.store.put(CODE_LAST_ID_KEY, &encode(&next)?)?;
        Ok(next)
    }

    pub fn save_record(&self, record: &CodeRecord) -> Result<(), StorageError> {
        let key = prefixed_key(CODE_RECORD_PREFIX, &record.code_id.to_be_bytes());
        self.store.put(&key, &encode(record)?)
    }

    pub fn load_record(&self, code_id: CodeId) -> Result<Option<CodeRecord>, StorageError> {
        match self
            .store
            .get(&prefixed_key(CODE_RECORD_PREFIX, &code_id.to_be_bytes()))?
        {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn has_record(&self, code_id: CodeId) -> Result<bool, StorageError> {
        self.store
            .exists(&prefixed_key(CODE_RECORD_PREFIX, &code_id.to_be_bytes()))
    }

    /// Install a record under an explicit id, as during state import.
    ///
    /// Fails with `DuplicateKey` if the id is taken. Advances the id counter
    /// past the imported id.
    pub fn import_code(&self, record: &CodeRecord, bytecode: &[u8]) -> Result<(), StorageError> {
        let key = prefixed_key(CODE_RECORD_PREFIX, &record.code_id.to_be_bytes());
        if self.store.exists(&key)? {
            return Err(StorageError::duplicate(&key));
        }
        self.save_blob(&record.checksum, bytecode)?;
        self.store.put(&key, &encode(record)?)?;
        if record.code_id > self.last_code_id()? {
            self.store.put(CODE_LAST_ID_KEY, &encode(&record.code_id)?)?;
        }
        Ok(())
    }

    /// Records with id greater than `start_after`, at most `limit` of them.
    pub fn list_records(
        &self,
        start_after: Option<CodeId>,
        limit: usize,
    ) -> Result<Vec<CodeRecord>, StorageError> {
        let floor = start_after.unwrap_or(0);
        let mut records = Vec::new();
        if limit == 0 {
            return Ok(records);
        }
        for (key, value) in self.store.prefix_scan(CODE_RECORD_PREFIX)? {
            let id_bytes: [u8; 8] = key[CODE_RECORD_PREFIX.len()..]
                .try_into()
                .map_err(|_| StorageError::DeserializationError {
                    reason: "malformed code record key".to_string(),
                })?;
            let id = CodeId::from_be_bytes(id_bytes);
            if start_after.is_some() && id <= floor {
                continue;
            }
            records.push(decode(&value)?);
            if records.len() >= limit {
                break;
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use strata_types::contract::CodeMetadata;

    use super::*;
    use crate::memory::MemoryStore;

    fn record(code_id: CodeId, checksum: Checksum) -> CodeRecord {
        CodeRecord {
            code_id,
            checksum,
            creator: [1u8; 20],
            deps: vec!["wasm_env_1".to_string()],
            metadata: CodeMetadata::default(),
            pinned: false,
        }
    }

    #[test]
    fn test_blob_is_stored_once() {
        let store = CodeStore::new(MemoryStore::new());
        assert!(store.save_blob(&[7u8; 32], b"code").unwrap());
        assert!(!store.save_blob(&[7u8; 32], b"code").unwrap());
        assert_eq!(store.load_blob(&[7u8; 32]).unwrap(), Some(b"code".to_vec()));
    }

    #[test]
    fn test_code_ids_are_monotonic() {
        let store = CodeStore::new(MemoryStore::new());
        assert_eq!(store.next_code_id().unwrap(), 1);
        assert_eq!(store.next_code_id().unwrap(), 2);
        assert_eq!(store.last_code_id().unwrap(), 2);
    }

    #[test]
    fn test_import_duplicate_id_fails() {
        let store = CodeStore::new(MemoryStore::new());
        store.import_code(&record(5, [1u8; 32]), b"a").unwrap();
        assert_eq!(store.last_code_id().unwrap(), 5);
        let err = store.import_code(&record(5, [2u8; 32]), b"b").unwrap_err();
        assert!(matches!(err, StorageError::DuplicateKey { .. }));
        assert_eq!(store.next_code_id().unwrap(), 6);
    }

    #[test]
    fn test_list_records_paginates_in_id_order() {
        let store = CodeStore::new(MemoryStore::new());
        for id in [3u64, 1, 2, 300] {
            store.save_record(&record(id, [id as u8; 32])).unwrap();
        }
        let first: Vec<_> = store
            .list_records(None, 2)
            .unwrap()
            .into_iter()
            .map(|r| r.code_id)
            .collect();
        assert_eq!(first, vec![1, 2]);
        let rest: Vec<_> = store
            .list_records(Some(2), 10)
            .unwrap()
            .into_iter()
            .map(|r| r.code_id)
            .collect();
        assert_eq!(rest, vec![3, 300]);
    }
}
