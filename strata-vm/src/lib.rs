//! Contract execution backends for the Strata engine.
//!
//! A [`runtime::RuntimeRegistry`] maps dependency labels to backends; every
//! backend implements [`runtime::Runtime`] over the same invocation shape.

pub mod bridge;
pub mod error;
pub mod evm;
pub mod fsm;
pub mod gas;
pub mod guard;
pub mod interpreter;
pub mod runtime;
pub mod wasm;

use std::sync::Arc;

use strata_types::constants::{
    INTERPRETER_EVM_LABEL, INTERPRETER_FSM_LABEL, INTERPRETER_LABEL, WASM_COMPACT_LABEL,
    WASM_ENV_LABEL,
};

use crate::error::VmError;
use crate::runtime::RuntimeRegistry;
use crate::wasm::{WasmAbi, WasmEngine, WasmRuntime};

/// Build a registry with every built-in backend registered under its label.
pub fn default_registry() -> Result<RuntimeRegistry, VmError> {
    let engine = Arc::new(WasmEngine::new()?);
    let mut registry = RuntimeRegistry::new();
    registry.register(
        WASM_ENV_LABEL,
        Arc::new(WasmRuntime::new(engine.clone(), WasmAbi::Default)),
    );
    registry.register(
        WASM_COMPACT_LABEL,
        Arc::new(WasmRuntime::new(engine.clone(), WasmAbi::Compact)),
    );
    registry.register(INTERPRETER_EVM_LABEL, Arc::new(evm::EvmRuntime::new()));
    registry.register(INTERPRETER_FSM_LABEL, Arc::new(fsm::FsmRuntime::new()));
    registry.register(
        INTERPRETER_LABEL,
        Arc::new(interpreter::DelegatingInterpreter::new(engine)),
    );
    Ok(registry)
}
