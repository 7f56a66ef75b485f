//! Read-only query surface over one chain's state.
//!
//! Listings are paginated by key: a page holds at most `limit` items and a
//! `next_key` to pass back as `start_after` while more remain.

use serde::{Deserialize, Serialize};
use strata_storage::code_store::CodeStore;
use strata_storage::contract_store::ContractRegistryStore;
use strata_storage::store_set::StoreSet;
use strata_storage::traits::SharedStore;
use strata_types::contract::{CodeRecord, ContractInfo, StorageClass};
use strata_types::env::ContractResponse;
use strata_types::primitives::{format_address, Address, BlockContext, CodeId, Gas};

use crate::error::CoreError;
use crate::manager::{ContractManager, QueryRequest};
use crate::roles::RoleRegistry;

pub const DEFAULT_PAGE_LIMIT: usize = 100;
pub const MAX_PAGE_LIMIT: usize = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest<K> {
    #[serde(default)]
    pub start_after: Option<K>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl<K> Default for PageRequest<K> {
    fn default() -> Self {
        Self {
            start_after: None,
            limit: None,
        }
    }
}

impl<K> PageRequest<K> {
    pub fn after(start_after: K, limit: usize) -> Self {
        Self {
            start_after: Some(start_after),
            limit: Some(limit),
        }
    }

    pub fn first(limit: usize) -> Self {
        Self {
            start_after: None,
            limit: Some(limit),
        }
    }

    fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T, K> {
    pub items: Vec<T>,
    pub next_key: Option<K>,
}

impl<T, K> Page<T, K> {
    /// Build a page from up to `limit + 1` fetched items.
    fn from_fetched(mut items: Vec<T>, limit: usize, key_of: impl Fn(&T) -> K) -> Self {
        let next_key = if items.len() > limit {
            items.truncate(limit);
            items.last().map(key_of)
        } else {
            None
        };
        Self { items, next_key }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractInfoResponse {
    pub address: String,
    #[serde(flatten)]
    pub info: ContractInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleEntry {
    pub role: String,
    pub address: String,
    pub label: Option<String>,
}

pub struct QueryService<'a> {
    manager: &'a ContractManager,
    view: &'a StoreSet,
}

impl<'a> QueryService<'a> {
    pub fn new(manager: &'a ContractManager, view: &'a StoreSet) -> Self {
        Self { manager, view }
    }

    fn codes(&self) -> CodeStore<SharedStore> {
        CodeStore::new(self.view.store(StorageClass::CoreConsensus).clone())
    }

    fn contracts(&self) -> ContractRegistryStore<SharedStore> {
        ContractRegistryStore::new(self.view.store(StorageClass::CoreConsensus).clone())
    }

    fn info(&self, address: &Address) -> Result<ContractInfo, CoreError> {
        self.contracts().load_info(address)?.ok_or_else(|| {
            CoreError::not_found(format!("contract {}", format_address(address)))
        })
    }

    pub fn contract_info(&self, address: &Address) -> Result<ContractInfoResponse, CoreError> {
        Ok(ContractInfoResponse {
            address: format_address(address),
            info: self.info(address)?,
        })
    }

    pub fn code_info(&self, code_id: CodeId) -> Result<CodeRecord, CoreError> {
        self.codes()
            .load_record(code_id)?
            .ok_or_else(|| CoreError::not_found(format!("code {code_id}")))
    }

    pub fn code(&self, code_id: CodeId) -> Result<Vec<u8>, CoreError> {
        let record = self.code_info(code_id)?;
        self.manager.get_code(self.view, &record.checksum, &record.deps)
    }

    pub fn codes_page(&self, page: &PageRequest<CodeId>) -> Result<Page<CodeRecord, CodeId>, CoreError> {
        let limit = page.effective_limit();
        let records = self.codes().list_records(page.start_after, limit + 1)?;
        Ok(Page::from_fetched(records, limit, |r| r.code_id))
    }

    pub fn contracts_by_code(
        &self,
        code_id: CodeId,
        page: &PageRequest<Address>,
    ) -> Result<Page<Address, Address>, CoreError> {
        let limit = page.effective_limit();
        let addresses =
            self.contracts()
                .contracts_by_code(code_id, page.start_after.as_ref(), limit + 1)?;
        Ok(Page::from_fetched(addresses, limit, |a| *a))
    }

    pub fn raw_state(&self, address: &Address, key: &[u8]) -> Result<Option<Vec<u8>>, CoreError> {
        self.manager.query_raw(self.view, address, key)
    }

    /// Run the contract's query entry point. `contract` may be a role.
    pub fn smart_state(
        &self,
        block: &BlockContext,
        sender: Address,
        contract: &str,
        msg: Vec<u8>,
        gas_limit: Gas,
    ) -> Result<ContractResponse, CoreError> {
        self.manager.query(
            self.view,
            block,
            QueryRequest {
                sender,
                contract: contract.to_string(),
                msg,
                gas_limit,
            },
        )
    }

    pub fn all_state(
        &self,
        address: &Address,
        page: &PageRequest<Vec<u8>>,
    ) -> Result<Page<(Vec<u8>, Vec<u8>), Vec<u8>>, CoreError> {
        let info = self.info(address)?;
        let limit = page.effective_limit();
        let pairs: Vec<_> = self
            .view
            .contract_state(address, info.storage_class)?
            .into_iter()
            .filter(|(key, _)| page.start_after.as_ref().map_or(true, |after| key > after))
            .take(limit + 1)
            .collect();
        Ok(Page::from_fetched(pairs, limit, |(k, _)| k.clone()))
    }

    pub fn roles(&self) -> Result<Vec<RoleEntry>, CoreError> {
        let registry = RoleRegistry::new(self.view);
        registry
            .list_roles()?
            .into_iter()
            .map(|(role, address)| {
                Ok(RoleEntry {
                    label: registry.label_by_address(&address)?,
                    address: format_address(&address),
                    role,
                })
            })
            .collect()
    }

    /// Every contract a role has been bound to, oldest first.
    pub fn role_history(&self, role: &str) -> Result<Vec<Address>, CoreError> {
        RoleRegistry::new(self.view).history(role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::tests::{block, deploy, exec, manager, set_msg, upload, wasm_deps, ALICE, GAS, KV_WAT};

    #[test]
    fn test_codes_page_walks_all_records() {
        let mgr = manager();
        let set = StoreSet::in_memory();
        for _ in 0..5 {
            upload(&mgr, &set, KV_WAT, wasm_deps());
        }
        let svc = QueryService::new(&mgr, &set);

        let first = svc.codes_page(&PageRequest::first(2)).unwrap();
        assert_eq!(first.items.iter().map(|r| r.code_id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(first.next_key, Some(2));

        let second = svc.codes_page(&PageRequest::after(2, 2)).unwrap();
        assert_eq!(second.items.iter().map(|r| r.code_id).collect::<Vec<_>>(), vec![3, 4]);
        let last = svc.codes_page(&PageRequest::after(4, 2)).unwrap();
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.next_key, None);
    }

    #[test]
    fn test_contract_and_state_queries() {
        let mgr = manager();
        let set = StoreSet::in_memory();
        let address = deploy(&mgr, &set, KV_WAT);
        for key in [b"a", b"b", b"c"] {
            mgr.execute(&set, &block(), exec(&address, set_msg(key, b"v"), GAS))
                .unwrap();
        }
        let svc = QueryService::new(&mgr, &set);

        let info = svc.contract_info(&address).unwrap();
        assert_eq!(info.info.creator, ALICE);
        assert_eq!(svc.code(info.info.code_id).unwrap()[..4], *b"\0asm");

        let by_code = svc
            .contracts_by_code(info.info.code_id, &PageRequest::default())
            .unwrap();
        assert_eq!(by_code.items, vec![address]);

        // "a", "b", "c" and the constructor's "init".
        let page = svc.all_state(&address, &PageRequest::first(3)).unwrap();
        assert_eq!(page.items.len(), 3);
        assert_eq!(page.next_key, Some(b"c".to_vec()));
        let rest = svc
            .all_state(&address, &PageRequest::after(b"c".to_vec(), 3))
            .unwrap();
        assert_eq!(rest.items, vec![(b"init".to_vec(), b"boot".to_vec())]);

        assert_eq!(svc.raw_state(&address, b"b").unwrap(), Some(b"v".to_vec()));
        let smart = svc
            .smart_state(&block(), ALICE, &format_address(&address), b"a".to_vec(), GAS)
            .unwrap();
        assert_eq!(smart.data, b"v".to_vec());
    }

    #[test]
    fn test_role_listing_and_history() {
        let mgr = manager();
        let set = StoreSet::in_memory();
        let registry = RoleRegistry::new(&set);
        registry.register_role("bank", "bank_v1", &[1u8; 20]).unwrap();
        registry.register_role("bank", "bank_v2", &[2u8; 20]).unwrap();

        let svc = QueryService::new(&mgr, &set);
        let roles = svc.roles().unwrap();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].label.as_deref(), Some("bank_v2"));
        assert_eq!(svc.role_history("bank").unwrap(), vec![[1u8; 20], [2u8; 20]]);
        assert!(matches!(svc.code_info(9), Err(CoreError::NotFound { .. })));
    }
}
