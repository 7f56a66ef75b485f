use strata_types::contract::ContractInfo;
use strata_types::primitives::{Address, CodeId};

use crate::error::StorageError;
use crate::traits::{prefixed_key, KvStore};
use crate::{decode, encode};

const CONTRACT_INFO_PREFIX: &[u8] = b"contract:info:";
const CONTRACT_BY_CODE_PREFIX: &[u8] = b"contract:by_code:";

/// Contract records and the code-id secondary index.
pub struct ContractRegistryStore<S: KvStore> {
    store: S,
}

impl<S: KvStore> ContractRegistryStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    fn by_code_key(code_id: CodeId, address: &Address) -> Vec<u8> {
        let mut key = prefixed_key(CONTRACT_BY_CODE_PREFIX, &code_id.to_be_bytes());
        key.extend_from_slice(address);
        key
    }

    /// Save a contract record, keeping the code index in step.
    pub fn save_info(&self, address: &Address, info: &ContractInfo) -> Result<(), StorageError> {
        if let Some(previous) = self.load_info(address)? {
            if previous.code_id != info.code_id {
                self.store
                    .delete(&Self::by_code_key(previous.code_id, address))?;
            }
        }
        self.store
            .put(&prefixed_key(CONTRACT_INFO_PREFIX, address), &encode(info)?)?;
        self.store.put(&Self::by_code_key(info.code_id, address), &[])
    }

    pub fn load_info(&self, address: &Address) -> Result<Option<ContractInfo>, StorageError> {
        match self.store.get(&prefixed_key(CONTRACT_INFO_PREFIX, address))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn has_info(&self, address: &Address) -> Result<bool, StorageError> {
        self.store
            .exists(&prefixed_key(CONTRACT_INFO_PREFIX, address))
    }

    /// Addresses instantiated from `code_id`, ordered by address, strictly
    /// after `start_after`, at most `limit`.
    pub fn contracts_by_code(
        &self,
        code_id: CodeId,
        start_after: Option<&Address>,
        limit: usize,
    ) -> Result<Vec<Address>, StorageError> {
        let prefix = prefixed_key(CONTRACT_BY_CODE_PREFIX, &code_id.to_be_bytes());
        let mut out = Vec::new();
        for (key, _) in self.store.prefix_scan(&prefix)? {
            if out.len() >= limit {
                break;
            }
            let address: Address = key[prefix.len()..].try_into().map_err(|_| {
                StorageError::DeserializationError {
                    reason: "malformed contract index key".to_string(),
                }
            })?;
            if start_after.is_some_and(|after| address <= *after) {
                continue;
            }
            out.push(address);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use strata_types::contract::StorageClass;

    use super::*;
    use crate::memory::MemoryStore;

    fn info(code_id: CodeId) -> ContractInfo {
        ContractInfo {
            code_id,
            creator: [9u8; 20],
            provenance: None,
            label: "c".to_string(),
            init_message: Vec::new(),
            storage_class: StorageClass::CoreConsensus,
        }
    }

    #[test]
    fn test_save_and_load() {
        let store = ContractRegistryStore::new(MemoryStore::new());
        assert!(!store.has_info(&[1u8; 20]).unwrap());
        store.save_info(&[1u8; 20], &info(1)).unwrap();
        assert_eq!(store.load_info(&[1u8; 20]).unwrap(), Some(info(1)));
    }

    #[test]
    fn test_code_index_pagination() {
        let store = ContractRegistryStore::new(MemoryStore::new());
        for b in [3u8, 1, 2] {
            store.save_info(&[b; 20], &info(4)).unwrap();
        }
        store.save_info(&[8u8; 20], &info(5)).unwrap();
        assert_eq!(
            store.contracts_by_code(4, None, 2).unwrap(),
            vec![[1u8; 20], [2u8; 20]]
        );
        assert_eq!(
            store.contracts_by_code(4, Some(&[2u8; 20]), 10).unwrap(),
            vec![[3u8; 20]]
        );
    }

    #[test]
    fn test_code_change_moves_index_entry() {
        let store = ContractRegistryStore::new(MemoryStore::new());
        store.save_info(&[1u8; 20], &info(1)).unwrap();
        store.save_info(&[1u8; 20], &info(2)).unwrap();
        assert!(store.contracts_by_code(1, None, 10).unwrap().is_empty());
        assert_eq!(store.contracts_by_code(2, None, 10).unwrap().len(), 1);
    }
}
