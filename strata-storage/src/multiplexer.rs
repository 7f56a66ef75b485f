//! Per-contract routing of key/value state onto storage classes.

use strata_types::contract::StorageClass;
use strata_types::primitives::Address;
use tracing::debug;

use crate::error::StorageError;
use crate::prefix::PrefixStore;
use crate::store_set::StoreSet;
use crate::traits::{BatchOp, KvPairs, KvStore};

/// Key prefix under which contract state lives in every class.
pub const CONTRACT_STATE_PREFIX: &[u8] = b"cs/";

/// Per-contract key prefix: `cs/` + address + `/`.
pub fn contract_prefix(address: &Address) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(CONTRACT_STATE_PREFIX.len() + 21);
    prefix.extend_from_slice(CONTRACT_STATE_PREFIX);
    prefix.extend_from_slice(address);
    prefix.push(b'/');
    prefix
}

impl StoreSet {
    /// Key/value view of one contract's state in the given class.
    ///
    /// Two different addresses never observe each other's keys.
    pub fn contract_store(&self, address: &Address, class: StorageClass) -> PrefixStore {
        PrefixStore::new(self.store(class).clone(), contract_prefix(address))
    }

    /// Every pair of a contract's state in the given class, in key order.
    pub fn contract_state(
        &self,
        address: &Address,
        class: StorageClass,
    ) -> Result<KvPairs, StorageError> {
        self.contract_store(address, class).prefix_scan(&[])
    }

    /// Move a contract's state from one class to another.
    ///
    /// Copies every pair into `to`, then deletes them from `from`. A no-op
    /// when the classes are equal. Returns the number of pairs moved.
    pub fn migrate_contract_storage(
        &self,
        address: &Address,
        from: StorageClass,
        to: StorageClass,
    ) -> Result<usize, StorageError> {
        if from == to {
            return Ok(0);
        }
        let source = self.contract_store(address, from);
        let target = self.contract_store(address, to);
        let pairs = source.prefix_scan(&[])?;
        let count = pairs.len();

        let (puts, deletes): (Vec<BatchOp>, Vec<BatchOp>) = pairs
            .into_iter()
            .map(|(key, value)| {
                (
                    BatchOp::Put {
                        key: key.clone(),
                        value,
                    },
                    BatchOp::Delete { key },
                )
            })
            .unzip();
        target.write_batch(puts)?;
        source.write_batch(deletes)?;

        debug!(
            contract = %strata_types::primitives::format_address(address),
            %from,
            %to,
            count,
            "migrated contract storage"
        );
        Ok(count)
    }

    /// Install externally supplied state for a contract.
    ///
    /// Fails with `DuplicateKey` if any key already exists; in that case
    /// nothing is written.
    pub fn import_contract_state(
        &self,
        address: &Address,
        class: StorageClass,
        pairs: &[(Vec<u8>, Vec<u8>)],
    ) -> Result<(), StorageError> {
        let store = self.contract_store(address, class);
        for (key, _) in pairs {
            if store.exists(key)? {
                return Err(StorageError::duplicate(key));
            }
        }
        let mut seen = std::collections::BTreeSet::new();
        for (key, _) in pairs {
            if !seen.insert(key.as_slice()) {
                return Err(StorageError::duplicate(key));
            }
        }
        store.write_batch(
            pairs
                .iter()
                .map(|(key, value)| BatchOp::Put {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect(),
        )
    }
}
