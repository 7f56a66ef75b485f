//! Accounts and their sequence numbers.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use strata_storage::store_set::StoreSet;
use strata_storage::traits::{prefixed_key, KvStore, SharedStore};
use strata_types::contract::StorageClass;
use strata_types::primitives::{format_address, parse_address, Address, PublicKey};

use super::QueryHandler;
use crate::error::CoreError;

/// Query route returning an account's sequence.
pub const QUERY_ACCOUNT: &str = "/auth/account";

const ACCOUNT_PREFIX: &[u8] = b"auth:account:";

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Account {
    pub address: Address,
    pub sequence: u64,
    pub pubkey: Option<PublicKey>,
}

/// Account records in the core consensus class.
pub struct AuthKeeper {
    store: SharedStore,
}

impl AuthKeeper {
    pub fn new(view: &StoreSet) -> Self {
        Self {
            store: view.store(StorageClass::CoreConsensus).clone(),
        }
    }

    pub fn account(&self, address: &Address) -> Result<Option<Account>, CoreError> {
        match self.store.get(&prefixed_key(ACCOUNT_PREFIX, address))? {
            Some(bytes) => Ok(Some(Account::try_from_slice(&bytes).map_err(|e| {
                CoreError::invalid(format!("corrupt account record: {e}"))
            })?)),
            None => Ok(None),
        }
    }

    fn save(&self, account: &Account) -> Result<(), CoreError> {
        let bytes = borsh::to_vec(account)
            .map_err(|e| CoreError::invalid(format!("account encoding: {e}")))?;
        self.store
            .put(&prefixed_key(ACCOUNT_PREFIX, &account.address), &bytes)?;
        Ok(())
    }

    /// Current sequence, 0 for an unknown account.
    pub fn sequence(&self, address: &Address) -> Result<u64, CoreError> {
        Ok(self.account(address)?.map(|a| a.sequence).unwrap_or(0))
    }

    /// Return the current sequence and advance it by one, creating the
    /// account when it does not exist yet.
    pub fn consume_sequence(&self, address: &Address) -> Result<u64, CoreError> {
        let mut account = self.account(address)?.unwrap_or(Account {
            address: *address,
            sequence: 0,
            pubkey: None,
        });
        let current = account.sequence;
        account.sequence = current
            .checked_add(1)
            .ok_or_else(|| CoreError::invalid("account sequence overflow"))?;
        self.save(&account)?;
        Ok(current)
    }

    /// Record the public key the account signs with, if it has none yet.
    pub fn ensure_pubkey(&self, address: &Address, pubkey: &PublicKey) -> Result<(), CoreError> {
        let mut account = self.account(address)?.unwrap_or(Account {
            address: *address,
            sequence: 0,
            pubkey: None,
        });
        if account.pubkey.is_none() {
            account.pubkey = Some(*pubkey);
            self.save(&account)?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountRequest {
    pub address: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountResponse {
    pub address: String,
    pub sequence: u64,
    pub exists: bool,
}

pub struct AccountQuery;

impl QueryHandler for AccountQuery {
    fn query(&self, view: &StoreSet, payload: &[u8]) -> Result<Vec<u8>, CoreError> {
        let req: AccountRequest = serde_json::from_slice(payload)
            .map_err(|e| CoreError::invalid(format!("account query: {e}")))?;
        let address = parse_address(&req.address)?;
        let account = AuthKeeper::new(view).account(&address)?;
        let resp = AccountResponse {
            address: format_address(&address),
            sequence: account.as_ref().map(|a| a.sequence).unwrap_or(0),
            exists: account.is_some(),
        };
        serde_json::to_vec(&resp).map_err(|e| CoreError::invalid(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_creates_and_advances() {
        let set = StoreSet::in_memory();
        let auth = AuthKeeper::new(&set);
        assert_eq!(auth.sequence(&[1u8; 20]).unwrap(), 0);
        assert_eq!(auth.consume_sequence(&[1u8; 20]).unwrap(), 0);
        assert_eq!(auth.consume_sequence(&[1u8; 20]).unwrap(), 1);
        assert_eq!(auth.sequence(&[1u8; 20]).unwrap(), 2);
        assert!(auth.account(&[2u8; 20]).unwrap().is_none());
    }

    #[test]
    fn test_pubkey_is_set_once() {
        let set = StoreSet::in_memory();
        let auth = AuthKeeper::new(&set);
        auth.ensure_pubkey(&[1u8; 20], &[7u8; 32]).unwrap();
        auth.ensure_pubkey(&[1u8; 20], &[8u8; 32]).unwrap();
        assert_eq!(
            auth.account(&[1u8; 20]).unwrap().unwrap().pubkey,
            Some([7u8; 32])
        );
    }

    #[test]
    fn test_account_query() {
        let set = StoreSet::in_memory();
        AuthKeeper::new(&set).consume_sequence(&[3u8; 20]).unwrap();
        let payload = format!(r#"{{"address":"{}"}}"#, format_address(&[3u8; 20]));
        let out = AccountQuery.query(&set, payload.as_bytes()).unwrap();
        let resp: AccountResponse = serde_json::from_slice(&out).unwrap();
        assert!(resp.exists);
        assert_eq!(resp.sequence, 1);
    }
}
