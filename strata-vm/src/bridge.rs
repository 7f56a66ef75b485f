//! The host side a backend calls back into: other contracts, native modules,
//! and the interpreter registry.

use serde::{Deserialize, Serialize};
use strata_types::env::{ContractResponse, Event};
use strata_types::primitives::{Address, Amount, Checksum, Gas};
use strata_types::tx::AnyMsg;

use crate::error::VmError;

/// A cross-contract call requested by a running contract.
#[derive(Debug, Clone)]
pub struct SubCall {
    /// The calling contract, which becomes the callee's sender.
    pub caller: Address,
    pub origin: Address,
    /// Role, role label, or hex address of the callee.
    pub target: String,
    pub msg: Vec<u8>,
    pub funds: Amount,
    pub gas_limit: Gas,
    /// Run the callee's query entry point instead of execute.
    pub read_only: bool,
    /// Depth of the caller.
    pub depth: u32,
}

/// Result of a native message executed through the bridge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativeOutcome {
    pub data: Vec<u8>,
    /// Events already attributed to the calling contract.
    pub events: Vec<Event>,
    pub gas_used: Gas,
}

/// Wasm bytecode of an interpreter contract resolved by label.
#[derive(Debug, Clone)]
pub struct InterpreterCode {
    pub address: Address,
    pub checksum: Checksum,
    pub deps: Vec<String>,
    pub bytecode: Vec<u8>,
    pub pinned: bool,
}

/// JSON envelope contracts use to submit native messages:
/// `{"type_url": "/bank.MsgSend", "value": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeEnvelope {
    pub type_url: String,
    pub value: serde_json::Value,
}

impl NativeEnvelope {
    pub fn into_any(self) -> Result<AnyMsg, VmError> {
        let value = serde_json::to_vec(&self.value).map_err(|e| VmError::InvalidArgument {
            reason: format!("native message value: {e}"),
        })?;
        Ok(AnyMsg::new(self.type_url, value))
    }
}

/// Services the engine exposes to running backends.
///
/// A bridge is bound to the state view of the call that created it, so work
/// done through it lands in the caller's pending writes.
pub trait HostBridge: Send + Sync {
    /// Dispatch a call to another contract.
    fn call_contract(&self, call: SubCall) -> Result<ContractResponse, VmError>;

    /// Execute a native module message on behalf of `caller`.
    ///
    /// The message's declared signer must equal `caller`.
    fn execute_native(
        &self,
        caller: &Address,
        msg: &AnyMsg,
        gas_limit: Gas,
    ) -> Result<NativeOutcome, VmError>;

    /// Run a native module query.
    fn query_native(&self, path: &str, payload: &[u8]) -> Result<Vec<u8>, VmError>;

    /// Resolve an interpreter label to the contract implementing it.
    fn resolve_interpreter(&self, label: &str) -> Result<InterpreterCode, VmError>;
}

/// A bridge that refuses every request. Useful for standalone execution.
pub struct DetachedBridge;

impl HostBridge for DetachedBridge {
    fn call_contract(&self, call: SubCall) -> Result<ContractResponse, VmError> {
        Err(VmError::NotFound {
            what: format!("contract {}", call.target),
        })
    }

    fn execute_native(
        &self,
        _caller: &Address,
        msg: &AnyMsg,
        _gas_limit: Gas,
    ) -> Result<NativeOutcome, VmError> {
        Err(VmError::NotFound {
            what: format!("native handler {}", msg.type_url),
        })
    }

    fn query_native(&self, path: &str, _payload: &[u8]) -> Result<Vec<u8>, VmError> {
        Err(VmError::NotFound {
            what: format!("native query {path}"),
        })
    }

    fn resolve_interpreter(&self, label: &str) -> Result<InterpreterCode, VmError> {
        Err(VmError::UnsupportedRuntime {
            labels: vec![label.to_string()],
        })
    }
}
