//! The contract execution orchestrator.
//!
//! Every state-changing entry point runs in its own branch of the caller's
//! state view: resolve the target, load its records, dispatch to the backend
//! its code labels select, then commit on success or discard on failure.
//! Queries always discard.

use std::sync::Arc;

use strata_crypto::hash::sha256;
use strata_storage::code_store::CodeStore;
use strata_storage::contract_store::ContractRegistryStore;
use strata_storage::store_set::StoreSet;
use strata_storage::traits::{KvStore, SharedStore};
use strata_types::constants::events::{
    ATTR_CHECKSUM, ATTR_CODE_ID, ATTR_CONTRACT, ATTR_CREATOR, EXECUTE, INSTANTIATE, PIN_CODE,
    STORE_CODE, UNPIN_CODE,
};
use strata_types::constants::PROTECTED_LABEL_PREFIXES;
use strata_types::contract::{deps_are_interpreted, CodeMetadata, CodeRecord, ContractInfo, StorageClass};
use strata_types::env::{
    BlockInfo, ChainInfo, ContractEnv, ContractResponse, EntryPoint, Env, Event, MessageInfo,
};
use strata_types::primitives::{
    format_address, is_system_address, Address, Amount, BlockContext, Checksum, CodeId, Gas,
};
use strata_types::tx::{AddressMode, AnyMsg};
use strata_vm::bridge::{InterpreterCode, NativeOutcome};
use strata_vm::error::VmError;
use strata_vm::gas::GasMeter;
use strata_vm::guard::run_guarded;
use strata_vm::runtime::{Invocation, RuntimeRegistry};
use tracing::{debug, info};

use crate::address::{derive_address_classic, derive_address_predictable};
use crate::bridge::CallBridge;
use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::native::bank::BankKeeper;
use crate::native::{attribute_events, NativeModules};
use crate::roles::RoleRegistry;

/// Run `f` against a branch of `view`, committing only if it succeeds.
pub fn transact<T>(
    view: &StoreSet,
    f: impl FnOnce(&StoreSet) -> Result<T, CoreError>,
) -> Result<T, CoreError> {
    let branch = view.branch();
    match f(branch.view()) {
        Ok(value) => {
            branch.commit()?;
            Ok(value)
        }
        Err(err) => {
            branch.discard();
            Err(err)
        }
    }
}

/// Whether any label is reserved for system contracts.
pub fn has_protected_label(deps: &[String]) -> bool {
    deps.iter()
        .any(|d| PROTECTED_LABEL_PREFIXES.iter().any(|p| d.starts_with(p)))
}

fn code_store(view: &StoreSet) -> CodeStore<SharedStore> {
    CodeStore::new(view.store(StorageClass::CoreConsensus).clone())
}

fn contract_store(view: &StoreSet) -> ContractRegistryStore<SharedStore> {
    ContractRegistryStore::new(view.store(StorageClass::CoreConsensus).clone())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCode {
    pub code_id: CodeId,
    pub checksum: Checksum,
    /// Storage cost of the bytecode.
    pub gas_used: Gas,
    pub events: Vec<Event>,
}

#[derive(Debug, Clone)]
pub struct InstantiateRequest {
    pub sender: Address,
    pub code_id: CodeId,
    pub label: String,
    pub init_msg: Vec<u8>,
    pub funds: Amount,
    pub address_mode: AddressMode,
    /// Defaults to the configured class.
    pub storage_class: Option<StorageClass>,
    pub gas_limit: Gas,
}

#[derive(Debug, Clone)]
pub struct Instantiated {
    pub address: Address,
    pub response: ContractResponse,
}

#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub sender: Address,
    /// Role, role label, or hex address.
    pub contract: String,
    pub msg: Vec<u8>,
    pub funds: Amount,
    pub gas_limit: Gas,
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub sender: Address,
    pub contract: String,
    pub msg: Vec<u8>,
    /// Capped at the configured query ceiling.
    pub gas_limit: Gas,
}

/// One dispatch of one contract entry point.
pub(crate) struct Call {
    pub entry: EntryPoint,
    pub address: Address,
    pub sender: Address,
    pub origin: Address,
    pub funds: Amount,
    pub msg: Vec<u8>,
    pub gas_limit: Gas,
    pub depth: u32,
}

struct Inner {
    config: EngineConfig,
    runtimes: RuntimeRegistry,
    natives: NativeModules,
}

/// Code lifecycle and contract execution for one chain.
///
/// Holds no chain state of its own: every operation takes the state view it
/// runs against. Cloning is cheap.
#[derive(Clone)]
pub struct ContractManager {
    inner: Arc<Inner>,
}

impl ContractManager {
    pub fn new(config: EngineConfig, runtimes: RuntimeRegistry, natives: NativeModules) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                runtimes,
                natives,
            }),
        }
    }

    /// A manager with every built-in backend and the bank and auth modules.
    pub fn with_defaults(config: EngineConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let runtimes = strata_vm::default_registry()?;
        Ok(Self::new(config, runtimes, NativeModules::default()))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // ─── Code ───────────────────────────────────────────────────────────────

    /// Store bytecode and allocate a code id for it.
    ///
    /// Identical bytecode shares one blob; every upload gets its own record.
    pub fn store_code(
        &self,
        view: &StoreSet,
        creator: &Address,
        bytecode: &[u8],
        deps: Vec<String>,
        metadata: CodeMetadata,
    ) -> Result<StoredCode, CoreError> {
        if bytecode.is_empty() {
            return Err(CoreError::invalid("bytecode must not be empty"));
        }
        let max = self.inner.config.code_size_limit(deps_are_interpreted(&deps));
        if bytecode.len() > max {
            return Err(CoreError::SizeLimitExceeded {
                size: bytecode.len(),
                max,
            });
        }
        let (_, runtime) = self.inner.runtimes.select(&deps)?;
        runtime.validate(bytecode)?;
        let checksum = sha256(bytecode);

        transact(view, |view| {
            let codes = code_store(view);
            codes.save_blob(&checksum, bytecode)?;
            let code_id = codes.next_code_id()?;
            codes.save_record(&CodeRecord {
                code_id,
                checksum,
                creator: *creator,
                deps,
                metadata,
                pinned: false,
            })?;
            info!(code_id, checksum = %hex::encode(checksum), runtime = runtime.name(), "stored code");
            Ok(StoredCode {
                code_id,
                checksum,
                gas_used: self
                    .inner
                    .config
                    .per_byte_cost
                    .saturating_mul(bytecode.len() as u64),
                events: vec![Event::new(STORE_CODE)
                    .attr(ATTR_CODE_ID, code_id.to_string())
                    .attr(ATTR_CHECKSUM, hex::encode(checksum))
                    .attr(ATTR_CREATOR, format_address(creator))],
            })
        })
    }

    /// Bytecode stored under `checksum`, provided `deps` select a backend.
    pub fn get_code(
        &self,
        view: &StoreSet,
        checksum: &Checksum,
        deps: &[String],
    ) -> Result<Vec<u8>, CoreError> {
        self.inner.runtimes.select(deps)?;
        code_store(view)
            .load_blob(checksum)?
            .ok_or_else(|| CoreError::not_found(format!("code blob {}", hex::encode(checksum))))
    }

    /// Install a code record under its own id, as during state import.
    pub fn import_code(
        &self,
        view: &StoreSet,
        record: &CodeRecord,
        bytecode: &[u8],
    ) -> Result<(), CoreError> {
        if sha256(bytecode) != record.checksum {
            return Err(CoreError::invalid(format!(
                "checksum of imported code {} does not match its bytecode",
                record.code_id
            )));
        }
        let max = self.inner.config.code_size_limit(record.is_interpreted());
        if bytecode.len() > max {
            return Err(CoreError::SizeLimitExceeded {
                size: bytecode.len(),
                max,
            });
        }
        transact(view, |view| Ok(code_store(view).import_code(record, bytecode)?))
    }

    /// Install a contract record and its state, as during state import.
    pub fn import_contract(
        &self,
        view: &StoreSet,
        address: &Address,
        info: &ContractInfo,
        state: &[(Vec<u8>, Vec<u8>)],
    ) -> Result<(), CoreError> {
        transact(view, |view| {
            let contracts = contract_store(view);
            if contracts.has_info(address)? {
                return Err(CoreError::DuplicateKey {
                    key: format!("contract {}", format_address(address)),
                });
            }
            if !code_store(view).has_record(info.code_id)? {
                return Err(CoreError::not_found(format!("code {}", info.code_id)));
            }
            contracts.save_info(address, info)?;
            view.import_contract_state(address, info.storage_class, state)?;
            Ok(())
        })
    }

    fn load_code(&self, view: &StoreSet, code_id: CodeId) -> Result<(CodeRecord, Vec<u8>), CoreError> {
        let codes = code_store(view);
        let record = codes
            .load_record(code_id)?
            .ok_or_else(|| CoreError::not_found(format!("code {code_id}")))?;
        let bytecode = codes.load_blob(&record.checksum)?.ok_or_else(|| {
            CoreError::not_found(format!("code blob {}", hex::encode(record.checksum)))
        })?;
        Ok((record, bytecode))
    }

    /// Keep the compiled artifact of `code_id` warm.
    pub fn pin_code(&self, view: &StoreSet, code_id: CodeId) -> Result<Event, CoreError> {
        transact(view, |view| {
            let (mut record, bytecode) = self.load_code(view, code_id)?;
            let (_, runtime) = self.inner.runtimes.select(&record.deps)?;
            runtime.pin(&record.checksum, &bytecode)?;
            record.pinned = true;
            code_store(view).save_record(&record)?;
            debug!(code_id, "pinned code");
            Ok(Event::new(PIN_CODE).attr(ATTR_CODE_ID, code_id.to_string()))
        })
    }

    pub fn unpin_code(&self, view: &StoreSet, code_id: CodeId) -> Result<Event, CoreError> {
        transact(view, |view| {
            let codes = code_store(view);
            let mut record = codes
                .load_record(code_id)?
                .ok_or_else(|| CoreError::not_found(format!("code {code_id}")))?;
            let (_, runtime) = self.inner.runtimes.select(&record.deps)?;
            runtime.unpin(&record.checksum);
            record.pinned = false;
            codes.save_record(&record)?;
            debug!(code_id, "unpinned code");
            Ok(Event::new(UNPIN_CODE).attr(ATTR_CODE_ID, code_id.to_string()))
        })
    }

    /// Re-pin every code record marked pinned, as after a restart.
    pub fn warm_pinned(&self, view: &StoreSet) -> Result<usize, CoreError> {
        let mut warmed = 0;
        for record in code_store(view).list_records(None, usize::MAX)? {
            if !record.pinned {
                continue;
            }
            let (record, bytecode) = self.load_code(view, record.code_id)?;
            let (_, runtime) = self.inner.runtimes.select(&record.deps)?;
            runtime.pin(&record.checksum, &bytecode)?;
            warmed += 1;
        }
        Ok(warmed)
    }

    // ─── Contracts ──────────────────────────────────────────────────────────

    /// Create a contract at a derived address.
    pub fn instantiate(
        &self,
        view: &StoreSet,
        block: &BlockContext,
        req: InstantiateRequest,
    ) -> Result<Instantiated, CoreError> {
        transact(view, |view| {
            let (record, _) = self.load_code(view, req.code_id)?;
            if has_protected_label(&record.deps) {
                return Err(CoreError::unauthorized(format!(
                    "code {} carries system labels and needs a system address",
                    req.code_id
                )));
            }
            let address = match &req.address_mode {
                AddressMode::Classic => derive_address_classic(view, &req.sender)?,
                AddressMode::Predictable { salt } => {
                    derive_address_predictable(&req.sender, salt, &record.checksum)?
                }
            };
            self.create(view, block, address, req)
        })
    }

    /// Create a contract at a fixed address, as for system contracts.
    pub fn instantiate_with_address(
        &self,
        view: &StoreSet,
        block: &BlockContext,
        address: Address,
        req: InstantiateRequest,
    ) -> Result<Instantiated, CoreError> {
        transact(view, |view| {
            let (record, _) = self.load_code(view, req.code_id)?;
            if has_protected_label(&record.deps) && !is_system_address(&address) {
                return Err(CoreError::unauthorized(format!(
                    "code {} carries system labels; {} is not a system address",
                    req.code_id,
                    format_address(&address)
                )));
            }
            self.create(view, block, address, req)
        })
    }

    fn create(
        &self,
        view: &StoreSet,
        block: &BlockContext,
        address: Address,
        req: InstantiateRequest,
    ) -> Result<Instantiated, CoreError> {
        let contracts = contract_store(view);
        if contracts.has_info(&address)? {
            return Err(CoreError::DuplicateKey {
                key: format!("contract {}", format_address(&address)),
            });
        }
        let info = ContractInfo {
            code_id: req.code_id,
            creator: req.sender,
            provenance: None,
            label: req.label,
            init_message: req.init_msg.clone(),
            storage_class: req
                .storage_class
                .unwrap_or(self.inner.config.default_storage_class),
        };
        if req.funds > 0 {
            BankKeeper::new(view).send(&req.sender, &address, req.funds)?;
        }

        let mut response = self.run(
            view,
            block,
            Call {
                entry: EntryPoint::Instantiate,
                address,
                sender: req.sender,
                origin: req.sender,
                funds: req.funds,
                msg: req.init_msg,
                gas_limit: req.gas_limit,
                depth: 0,
            },
            &info,
        )?;

        // Only a successful constructor leaves a contract record behind.
        contracts.save_info(&address, &info)?;
        response.events.insert(
            0,
            Event::new(INSTANTIATE)
                .attr(ATTR_CONTRACT, format_address(&address))
                .attr(ATTR_CODE_ID, info.code_id.to_string())
                .attr(ATTR_CREATOR, format_address(&info.creator)),
        );
        info!(
            contract = %format_address(&address),
            code_id = info.code_id,
            class = %info.storage_class,
            "instantiated contract"
        );
        Ok(Instantiated { address, response })
    }

    pub fn execute(
        &self,
        view: &StoreSet,
        block: &BlockContext,
        req: ExecuteRequest,
    ) -> Result<ContractResponse, CoreError> {
        transact(view, |view| {
            let address = RoleRegistry::new(view).get_address_or_role(&req.contract)?;
            self.can_call_system_contract(view, &req.sender, &address)?;
            if req.funds > 0 {
                BankKeeper::new(view).send(&req.sender, &address, req.funds)?;
            }
            let mut response = self.dispatch(
                view,
                block,
                Call {
                    entry: EntryPoint::Execute,
                    address,
                    sender: req.sender,
                    origin: req.sender,
                    funds: req.funds,
                    msg: req.msg,
                    gas_limit: req.gas_limit,
                    depth: 0,
                },
            )?;
            response
                .events
                .insert(0, Event::new(EXECUTE).attr(ATTR_CONTRACT, format_address(&address)));
            Ok(response)
        })
    }

    /// Run a contract's query entry point. Nothing it writes is kept.
    pub fn query(
        &self,
        view: &StoreSet,
        block: &BlockContext,
        req: QueryRequest,
    ) -> Result<ContractResponse, CoreError> {
        let branch = view.branch();
        let result = RoleRegistry::new(branch.view())
            .get_address_or_role(&req.contract)
            .and_then(|address| {
                self.dispatch(
                    branch.view(),
                    block,
                    Call {
                        entry: EntryPoint::Query,
                        address,
                        sender: req.sender,
                        origin: req.sender,
                        funds: 0,
                        msg: req.msg,
                        gas_limit: req.gas_limit.min(self.inner.config.query_gas_limit),
                        depth: 0,
                    },
                )
            });
        branch.discard();
        result
    }

    /// The value stored under `key` in a contract's own class.
    pub fn query_raw(
        &self,
        view: &StoreSet,
        address: &Address,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, CoreError> {
        let info = contract_store(view).load_info(address)?.ok_or_else(|| {
            CoreError::not_found(format!("contract {}", format_address(address)))
        })?;
        Ok(view.contract_store(address, info.storage_class).get(key)?)
    }

    /// Reject calls from outside the system into code carrying system labels.
    ///
    /// Allowed callers are the contract itself, system addresses, and
    /// contracts bound to a role.
    pub fn can_call_system_contract(
        &self,
        view: &StoreSet,
        caller: &Address,
        target: &Address,
    ) -> Result<(), CoreError> {
        if caller == target || is_system_address(caller) {
            return Ok(());
        }
        let Some(info) = contract_store(view).load_info(target)? else {
            return Ok(());
        };
        let Some(record) = code_store(view).load_record(info.code_id)? else {
            return Ok(());
        };
        if !has_protected_label(&record.deps) {
            return Ok(());
        }
        if RoleRegistry::new(view).label_by_address(caller)?.is_some() {
            return Ok(());
        }
        Err(CoreError::unauthorized(format!(
            "{} may not call system contract {}",
            format_address(caller),
            format_address(target)
        )))
    }

    // ─── Native bridge ──────────────────────────────────────────────────────

    pub fn execute_native(
        &self,
        view: &StoreSet,
        block: &BlockContext,
        caller: &Address,
        msg: &AnyMsg,
        gas_limit: Gas,
    ) -> Result<NativeOutcome, CoreError> {
        transact(view, |view| {
            self.inner
                .natives
                .execute(view, block, caller, msg, gas_limit)
        })
    }

    pub fn query_native(
        &self,
        view: &StoreSet,
        path: &str,
        payload: &[u8],
    ) -> Result<Vec<u8>, CoreError> {
        self.inner.natives.query(view, path, payload)
    }

    /// The interpreter contract registered under a script label.
    pub fn resolve_interpreter(
        &self,
        view: &StoreSet,
        label: &str,
    ) -> Result<InterpreterCode, CoreError> {
        let registry = RoleRegistry::new(view);
        let address = match registry.role_by_label(label)? {
            Some(role) => role.contract_address,
            None => registry
                .role_address(label)?
                .ok_or_else(|| CoreError::UnsupportedRuntime {
                    labels: vec![label.to_string()],
                })?,
        };
        let info = contract_store(view).load_info(&address)?.ok_or_else(|| {
            CoreError::not_found(format!("interpreter contract {}", format_address(&address)))
        })?;
        let (record, bytecode) = self.load_code(view, info.code_id)?;
        Ok(InterpreterCode {
            address,
            checksum: record.checksum,
            deps: record.deps,
            bytecode,
            pinned: record.pinned,
        })
    }

    // ─── Dispatch ───────────────────────────────────────────────────────────

    /// Run an entry point of an existing contract against `view`.
    pub(crate) fn dispatch(
        &self,
        view: &StoreSet,
        block: &BlockContext,
        call: Call,
    ) -> Result<ContractResponse, CoreError> {
        let info = contract_store(view).load_info(&call.address)?.ok_or_else(|| {
            CoreError::not_found(format!("contract {}", format_address(&call.address)))
        })?;
        self.run(view, block, call, &info)
    }

    fn run(
        &self,
        view: &StoreSet,
        block: &BlockContext,
        call: Call,
        info: &ContractInfo,
    ) -> Result<ContractResponse, CoreError> {
        let (record, bytecode) = self.load_code(view, info.code_id)?;
        let (pattern, runtime) = self.inner.runtimes.select(&record.deps)?;

        let instance_cost = self.inner.config.instance_cost;
        let mut meter = GasMeter::new(call.gas_limit);
        meter.charge(instance_cost)?;

        let inv = Invocation {
            env: Env {
                chain: ChainInfo {
                    chain_id: block.chain_id.clone(),
                },
                block: BlockInfo {
                    height: block.height,
                    time: block.time,
                    gas_limit: block.gas_limit,
                    proposer: block.proposer,
                },
                contract: ContractEnv {
                    address: call.address,
                    code_hash: record.checksum,
                    bytecode,
                },
            },
            info: MessageInfo {
                origin: call.origin,
                sender: call.sender,
                funds: call.funds,
                gas_limit: meter.remaining(),
                data: call.msg,
            },
            store: view.contract_store(&call.address, info.storage_class),
            bridge: Arc::new(CallBridge::new(self.clone(), view.clone(), block.clone())),
            deps: record.deps.clone(),
            pinned: record.pinned,
            depth: call.depth,
        };

        debug!(
            contract = %format_address(&call.address),
            entry = call.entry.export_name(),
            runtime = runtime.name(),
            pattern = %pattern,
            depth = call.depth,
            "dispatching"
        );
        let result = run_guarded(runtime.name(), || runtime.invoke(call.entry, inv));
        let mut response = result.map_err(|err| match err {
            // Report gas in the caller's terms, loading cost included.
            VmError::OutOfGas { wanted, consumed } => CoreError::OutOfGas {
                wanted: wanted.saturating_add(instance_cost),
                consumed: consumed.saturating_add(instance_cost),
            },
            VmError::ContractFailed {
                reason,
                data,
                gas_used,
            } => CoreError::ContractFailed {
                reason,
                data,
                gas_used: gas_used.saturating_add(instance_cost),
            },
            other => other.into(),
        })?;
        response.gas_used = response.gas_used.saturating_add(instance_cost);
        attribute_events(&mut response.events, &call.address);
        Ok(response)
    }
}
