use strata_types::contract::Role;
use strata_types::primitives::Address;

use crate::error::StorageError;
use crate::traits::{prefixed_key, KvStore};
use crate::{decode, encode};

const ROLE_ADDRESS_PREFIX: &[u8] = b"roles:by_role:";
const ROLE_LABEL_PREFIX: &[u8] = b"roles:by_label:";
const ROLE_BY_ADDRESS_PREFIX: &[u8] = b"roles:by_address:";
const ROLE_HISTORY_PREFIX: &[u8] = b"roles:history:";

/// The three role indexes (role → address, label → role record,
/// address → label) plus the per-role binding history.
pub struct RoleStore<S: KvStore> {
    store: S,
}

impl<S: KvStore> RoleStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    fn history_prefix(role: &str) -> Vec<u8> {
        let mut key = prefixed_key(ROLE_HISTORY_PREFIX, role.as_bytes());
        key.push(0);
        key
    }

    pub fn role_address(&self, role: &str) -> Result<Option<Address>, StorageError> {
        match self
            .store
            .get(&prefixed_key(ROLE_ADDRESS_PREFIX, role.as_bytes()))?
        {
            Some(bytes) => Ok(Some(bytes.as_slice().try_into().map_err(|_| {
                StorageError::DeserializationError {
                    reason: format!("malformed address for role '{role}'"),
                }
            })?)),
            None => Ok(None),
        }
    }

    pub fn set_role_address(&self, role: &str, address: &Address) -> Result<(), StorageError> {
        self.store
            .put(&prefixed_key(ROLE_ADDRESS_PREFIX, role.as_bytes()), address)
    }

    pub fn remove_role_address(&self, role: &str) -> Result<(), StorageError> {
        self.store
            .delete(&prefixed_key(ROLE_ADDRESS_PREFIX, role.as_bytes()))
    }

    pub fn role_by_label(&self, label: &str) -> Result<Option<Role>, StorageError> {
        match self
            .store
            .get(&prefixed_key(ROLE_LABEL_PREFIX, label.as_bytes()))?
        {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn save_label(&self, role: &Role) -> Result<(), StorageError> {
        self.store.put(
            &prefixed_key(ROLE_LABEL_PREFIX, role.label.as_bytes()),
            &encode(role)?,
        )
    }

    pub fn remove_label(&self, label: &str) -> Result<(), StorageError> {
        self.store
            .delete(&prefixed_key(ROLE_LABEL_PREFIX, label.as_bytes()))
    }

    pub fn label_by_address(&self, address: &Address) -> Result<Option<String>, StorageError> {
        match self.store.get(&prefixed_key(ROLE_BY_ADDRESS_PREFIX, address))? {
            Some(bytes) => String::from_utf8(bytes).map(Some).map_err(|e| {
                StorageError::DeserializationError {
                    reason: e.to_string(),
                }
            }),
            None => Ok(None),
        }
    }

    pub fn set_address_label(&self, address: &Address, label: &str) -> Result<(), StorageError> {
        self.store
            .put(&prefixed_key(ROLE_BY_ADDRESS_PREFIX, address), label.as_bytes())
    }

    pub fn remove_address_label(&self, address: &Address) -> Result<(), StorageError> {
        self.store
            .delete(&prefixed_key(ROLE_BY_ADDRESS_PREFIX, address))
    }

    /// Append an address to the role's binding history. Rebinding the
    /// address already at the end adds nothing.
    pub fn push_history(&self, role: &str, address: &Address) -> Result<u32, StorageError> {
        let prefix = Self::history_prefix(role);
        let entries = self.store.prefix_scan(&prefix)?;
        let seq = entries.len() as u32;
        if let Some((_, last)) = entries.last() {
            if last.as_slice() == address.as_slice() {
                return Ok(seq - 1);
            }
        }
        let mut key = prefix;
        key.extend_from_slice(&seq.to_be_bytes());
        self.store.put(&key, address)?;
        Ok(seq)
    }

    /// Every address the role has been bound to, oldest first.
    pub fn history(&self, role: &str) -> Result<Vec<Address>, StorageError> {
        self.store
            .prefix_scan(&Self::history_prefix(role))?
            .into_iter()
            .map(|(_, v)| {
                v.as_slice()
                    .try_into()
                    .map_err(|_| StorageError::DeserializationError {
                        reason: "malformed role history entry".to_string(),
                    })
            })
            .collect()
    }

    /// All roles with a current binding, ordered by role name.
    pub fn list_roles(&self) -> Result<Vec<(String, Address)>, StorageError> {
        let mut out = Vec::new();
        for (key, value) in self.store.prefix_scan(ROLE_ADDRESS_PREFIX)? {
            let role = String::from_utf8_lossy(&key[ROLE_ADDRESS_PREFIX.len()..]).into_owned();
            let address: Address = value.as_slice().try_into().map_err(|_| {
                StorageError::DeserializationError {
                    reason: format!("malformed address for role '{role}'"),
                }
            })?;
            out.push((role, address));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[test]
    fn test_indexes() {
        let store = RoleStore::new(MemoryStore::new());
        let role = Role {
            role: "bank".to_string(),
            label: "bank_v1".to_string(),
            contract_address: [4u8; 20],
        };
        store.set_role_address(&role.role, &role.contract_address).unwrap();
        store.save_label(&role).unwrap();
        store
            .set_address_label(&role.contract_address, &role.label)
            .unwrap();

        assert_eq!(store.role_address("bank").unwrap(), Some([4u8; 20]));
        assert_eq!(store.role_by_label("bank_v1").unwrap(), Some(role.clone()));
        assert_eq!(
            store.label_by_address(&[4u8; 20]).unwrap().as_deref(),
            Some("bank_v1")
        );
        assert_eq!(store.list_roles().unwrap(), vec![("bank".to_string(), [4u8; 20])]);
    }

    #[test]
    fn test_history_does_not_mix_similar_role_names() {
        let store = RoleStore::new(MemoryStore::new());
        store.push_history("bank", &[1u8; 20]).unwrap();
        store.push_history("bank", &[2u8; 20]).unwrap();
        store.push_history("bank2", &[3u8; 20]).unwrap();
        assert_eq!(store.history("bank").unwrap(), vec![[1u8; 20], [2u8; 20]]);
        assert_eq!(store.history("bank2").unwrap(), vec![[3u8; 20]]);
    }

    #[test]
    fn test_rebinding_current_address_keeps_history() {
        let store = RoleStore::new(MemoryStore::new());
        assert_eq!(store.push_history("bank", &[1u8; 20]).unwrap(), 0);
        assert_eq!(store.push_history("bank", &[1u8; 20]).unwrap(), 0);
        assert_eq!(store.push_history("bank", &[2u8; 20]).unwrap(), 1);
        assert_eq!(store.push_history("bank", &[1u8; 20]).unwrap(), 2);
        assert_eq!(store.history("bank").unwrap(), vec![[1u8; 20], [2u8; 20], [1u8; 20]]);
    }
}
