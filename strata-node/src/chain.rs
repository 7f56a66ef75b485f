//! One hosted chain: its state, its engine, and transaction delivery.
//!
//! A transaction is admitted (chain id, signature, sequence), its sequence is
//! consumed, and its messages then run in a branch of their own. A failing
//! message discards every message of the transaction but keeps the consumed
//! sequence. Under an atomic bundle the whole transaction is instead held in
//! a prepared branch until the coordinator decides.

use std::path::Path;
use std::sync::Arc;

use strata_core::native::auth::AuthKeeper;
use strata_core::{
    transact, ContractManager, CoreError, EngineConfig, ExecuteRequest, InstantiateRequest,
    QueryService,
};
use strata_crypto::address::pubkey_to_address;
use strata_crypto::keys::verify;
use strata_storage::memory::MemoryStore;
use strata_storage::sqlite::SqliteStore;
use strata_storage::store_set::{Branch, StoreSet};
use strata_storage::traits::{BatchOp, KvStore, SharedStore};
use strata_types::contract::StorageClass;
use strata_types::env::ContractResponse;
use strata_types::primitives::{
    format_address, Address, BlockContext, ChainId, Gas, Hash, Timestamp, ZERO_ADDRESS,
};
use strata_types::tx::{Tx, TxMsg, TxResult};
use tracing::{debug, info, warn};

use crate::config::{ChainConfig, StorageBackend};
use crate::error::NodeError;

/// Seconds between consecutive block timestamps.
pub const BLOCK_INTERVAL_SECS: Timestamp = 5;

/// Block gas limit reported to contracts.
pub const BLOCK_GAS_LIMIT: Gas = 100_000_000;

struct PreparedBundle {
    id: Hash,
    branch: Branch,
}

pub struct Chain {
    root: StoreSet,
    manager: ContractManager,
    block: BlockContext,
    prepared: Option<PreparedBundle>,
}

/// Open the per-class stores of a chain.
///
/// Durable classes go to the configured backend. The memory and transient
/// classes always live in process memory.
pub fn open_store_set(config: &ChainConfig) -> Result<StoreSet, NodeError> {
    match config.storage.backend {
        StorageBackend::Memory => Ok(StoreSet::in_memory()),
        StorageBackend::Sqlite => {
            std::fs::create_dir_all(&config.storage.data_dir)?;
            let path = Path::new(&config.storage.data_dir).join(format!("{}.db", config.chain_id));
            let path = path.to_string_lossy().into_owned();
            let mut durable = Vec::new();
            for class in StorageClass::ALL {
                if class.is_durable() {
                    durable.push((class, Arc::new(SqliteStore::open(&path, class.as_str())?)));
                }
            }
            Ok(StoreSet::from_fn(|class| {
                match durable.iter().find(|(c, _)| *c == class) {
                    Some((_, store)) => store.clone() as SharedStore,
                    None => Arc::new(MemoryStore::new()) as SharedStore,
                }
            }))
        }
    }
}

impl Chain {
    pub fn new(chain_id: impl Into<ChainId>, root: StoreSet, manager: ContractManager) -> Self {
        Self {
            root,
            manager,
            block: BlockContext {
                chain_id: chain_id.into(),
                height: 1,
                time: 0,
                gas_limit: BLOCK_GAS_LIMIT,
                proposer: ZERO_ADDRESS,
            },
            prepared: None,
        }
    }

    pub fn open(config: &ChainConfig, engine: EngineConfig) -> Result<Self, NodeError> {
        let root = open_store_set(config)?;
        let manager = ContractManager::with_defaults(engine)?;
        let chain = Self::new(config.chain_id.clone(), root, manager);
        let warmed = chain.manager.warm_pinned(&chain.root)?;
        info!(
            chain_id = %config.chain_id,
            backend = ?config.storage.backend,
            warmed,
            "chain opened"
        );
        Ok(chain)
    }

    pub fn chain_id(&self) -> &str {
        &self.block.chain_id
    }

    pub fn block(&self) -> &BlockContext {
        &self.block
    }

    pub fn state(&self) -> &StoreSet {
        &self.root
    }

    pub fn manager(&self) -> &ContractManager {
        &self.manager
    }

    pub fn queries(&self) -> QueryService<'_> {
        QueryService::new(&self.manager, &self.root)
    }

    pub fn has_prepared_bundle(&self) -> bool {
        self.prepared.is_some()
    }

    fn ensure_idle(&self) -> Result<(), NodeError> {
        if self.prepared.is_some() {
            return Err(NodeError::BundlePending {
                chain_id: self.block.chain_id.clone(),
            });
        }
        Ok(())
    }

    /// Write state directly, outside any transaction, as at genesis.
    pub fn init_state<T>(
        &self,
        f: impl FnOnce(&StoreSet, &ContractManager, &BlockContext) -> Result<T, CoreError>,
    ) -> Result<T, NodeError> {
        self.ensure_idle()?;
        Ok(transact(&self.root, |view| f(view, &self.manager, &self.block))?)
    }

    /// Admission checks, returning the signer's address.
    fn check_tx(&self, view: &StoreSet, tx: &Tx) -> Result<Address, NodeError> {
        let body = &tx.body;
        if body.chain_id != self.block.chain_id {
            return Err(NodeError::invalid_tx(format!(
                "transaction for chain {} delivered to {}",
                body.chain_id, self.block.chain_id
            )));
        }
        if let Some(ext) = &body.extension {
            if ext.chain_id != body.chain_id {
                return Err(NodeError::invalid_tx(format!(
                    "sub-transaction extension names chain {}",
                    ext.chain_id
                )));
            }
        }
        verify(&body.signing_bytes(), &tx.signature, &body.signer)
            .map_err(|e| NodeError::invalid_tx(e.to_string()))?;
        let signer = pubkey_to_address(&body.signer);
        let expected = AuthKeeper::new(view).sequence(&signer)?;
        if body.sequence != expected {
            return Err(NodeError::invalid_tx(format!(
                "sequence {} for {}, expected {expected}",
                body.sequence,
                format_address(&signer)
            )));
        }
        Ok(signer)
    }

    /// Admit, consume the sequence, then run the messages in their own branch.
    fn apply_tx(&self, view: &StoreSet, tx: &Tx) -> Result<TxResult, NodeError> {
        let signer = self.check_tx(view, tx)?;
        let auth = AuthKeeper::new(view);
        auth.consume_sequence(&signer)?;
        auth.ensure_pubkey(&signer, &tx.body.signer)?;

        let gas_limit = tx.body.gas_limit;
        let mut spent: Gas = 0;
        let result = transact(view, |view| {
            let mut result = TxResult::default();
            for msg in &tx.body.msgs {
                let remaining = gas_limit.saturating_sub(result.gas_used);
                let (response, created) = self.run_msg(view, &signer, msg, remaining)?;
                if response.gas_used > remaining {
                    return Err(CoreError::OutOfGas {
                        wanted: gas_limit,
                        consumed: result.gas_used.saturating_add(response.gas_used),
                    });
                }
                result.gas_used += response.gas_used;
                spent = result.gas_used;
                result.created.extend(created);
                result.msg_results.push(response);
            }
            Ok(result)
        });
        match result {
            Ok(result) => {
                debug!(
                    chain_id = %self.block.chain_id,
                    signer = %format_address(&signer),
                    msgs = tx.body.msgs.len(),
                    gas_used = result.gas_used,
                    "transaction applied"
                );
                Ok(result)
            }
            Err(err) => {
                let gas_used = spent.saturating_add(err.gas_used()).min(gas_limit);
                debug!(chain_id = %self.block.chain_id, gas_used, error = %err, "transaction failed");
                Err(NodeError::TxFailed {
                    error: err,
                    gas_used,
                })
            }
        }
    }

    fn run_msg(
        &self,
        view: &StoreSet,
        signer: &Address,
        msg: &TxMsg,
        gas_limit: Gas,
    ) -> Result<(ContractResponse, Option<Address>), CoreError> {
        match msg {
            TxMsg::StoreCode {
                bytecode,
                deps,
                metadata,
            } => {
                let stored = self.manager.store_code(
                    view,
                    signer,
                    bytecode,
                    deps.clone(),
                    metadata.clone(),
                )?;
                Ok((
                    ContractResponse {
                        data: stored.code_id.to_be_bytes().to_vec(),
                        events: stored.events,
                        gas_used: stored.gas_used,
                    },
                    None,
                ))
            }
            TxMsg::Instantiate {
                code_id,
                label,
                init_msg,
                funds,
                address_mode,
                storage_class,
            } => {
                let created = self.manager.instantiate(
                    view,
                    &self.block,
                    InstantiateRequest {
                        sender: *signer,
                        code_id: *code_id,
                        label: label.clone(),
                        init_msg: init_msg.clone(),
                        funds: *funds,
                        address_mode: address_mode.clone(),
                        storage_class: *storage_class,
                        gas_limit,
                    },
                )?;
                Ok((created.response, Some(created.address)))
            }
            TxMsg::Execute {
                contract,
                msg,
                funds,
            } => {
                let response = self.manager.execute(
                    view,
                    &self.block,
                    ExecuteRequest {
                        sender: *signer,
                        contract: contract.clone(),
                        msg: msg.clone(),
                        funds: *funds,
                        gas_limit,
                    },
                )?;
                Ok((response, None))
            }
            TxMsg::Native(any) => {
                let outcome =
                    self.manager
                        .execute_native(view, &self.block, signer, any, gas_limit)?;
                Ok((
                    ContractResponse {
                        data: outcome.data,
                        events: outcome.events,
                        gas_used: outcome.gas_used,
                    },
                    None,
                ))
            }
        }
    }

    /// Deliver a stand-alone transaction against the committed state.
    pub fn deliver_tx(&mut self, tx: &Tx) -> Result<TxResult, NodeError> {
        self.ensure_idle()?;
        self.apply_tx(&self.root, tx)
    }

    pub fn deliver_tx_bytes(&mut self, bytes: &[u8]) -> Result<TxResult, NodeError> {
        let tx = Tx::decode(bytes)?;
        self.deliver_tx(&tx)
    }

    /// Close the block: clear the transient class and advance height and time.
    pub fn end_block(&mut self) -> Result<usize, NodeError> {
        self.ensure_idle()?;
        let transient = self.root.store(StorageClass::Transient);
        let ops: Vec<BatchOp> = transient
            .prefix_scan(&[])?
            .into_iter()
            .map(|(key, _)| BatchOp::Delete { key })
            .collect();
        let cleared = ops.len();
        transient.write_batch(ops)?;
        self.block.height += 1;
        self.block.time += BLOCK_INTERVAL_SECS;
        debug!(
            chain_id = %self.block.chain_id,
            height = self.block.height,
            cleared,
            "block ended"
        );
        Ok(cleared)
    }

    // ─── Two-phase participation ────────────────────────────────────────────

    /// Admission checks for a bundle's sub-transaction, without side effects.
    pub fn verify_sub_tx(&self, tx: &Tx) -> Result<(), NodeError> {
        self.ensure_idle()?;
        if tx.body.extension.is_none() {
            return Err(NodeError::invalid_tx(
                "sub-transaction carries no bundle extension",
            ));
        }
        self.check_tx(&self.root, tx).map(|_| ())
    }

    /// Apply `tx` in a held branch. Any failure leaves no trace, including
    /// the sequence.
    pub fn prepare(&mut self, bundle_id: Hash, tx: &Tx) -> Result<TxResult, NodeError> {
        self.ensure_idle()?;
        let branch = self.root.branch();
        match self.apply_tx(branch.view(), tx) {
            Ok(result) => {
                debug!(chain_id = %self.block.chain_id, bundle = %hex::encode(bundle_id), "bundle prepared");
                self.prepared = Some(PreparedBundle {
                    id: bundle_id,
                    branch,
                });
                Ok(result)
            }
            Err(err) => {
                branch.discard();
                warn!(
                    chain_id = %self.block.chain_id,
                    bundle = %hex::encode(bundle_id),
                    error = %err,
                    "refused to prepare bundle"
                );
                Err(err)
            }
        }
    }

    pub fn commit_prepared(&mut self, bundle_id: Hash) -> Result<usize, NodeError> {
        match self.prepared.take() {
            Some(prepared) if prepared.id == bundle_id => {
                let flushed = prepared.branch.commit()?;
                info!(
                    chain_id = %self.block.chain_id,
                    bundle = %hex::encode(bundle_id),
                    flushed,
                    "bundle committed"
                );
                Ok(flushed)
            }
            other => {
                self.prepared = other;
                Err(NodeError::NotPrepared {
                    chain_id: self.block.chain_id.clone(),
                    bundle: hex::encode(bundle_id),
                })
            }
        }
    }

    /// Drop the prepared bundle `bundle_id`. Returns whether one was held.
    pub fn abort_prepared(&mut self, bundle_id: Hash) -> bool {
        match self.prepared.take() {
            Some(prepared) if prepared.id == bundle_id => {
                prepared.branch.discard();
                debug!(chain_id = %self.block.chain_id, bundle = %hex::encode(bundle_id), "bundle aborted");
                true
            }
            other => {
                self.prepared = other;
                false
            }
        }
    }
}
