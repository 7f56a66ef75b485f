//! Script contracts executed by an interpreter contract.
//!
//! Code labelled `interpreter_<lang>_…` carries source text instead of a
//! module. The interpreter for the language is itself a Wasm contract bound to
//! a role; its module runs against the script contract's invocation, reading
//! the source through the `code_len`/`code_read` host calls and using the
//! script contract's own storage.

use std::sync::Arc;

use strata_types::constants::{INTERPRETER_LABEL, WASM_COMPACT_LABEL};
use strata_types::env::{ContractResponse, EntryPoint};
use tracing::debug;

use crate::error::VmError;
use crate::guard::run_guarded;
use crate::runtime::{most_specific_label, Invocation, Runtime};
use crate::wasm::{WasmAbi, WasmEngine};

pub struct DelegatingInterpreter {
    engine: Arc<WasmEngine>,
}

impl DelegatingInterpreter {
    pub fn new(engine: Arc<WasmEngine>) -> Self {
        Self { engine }
    }

    fn run(&self, entry: EntryPoint, inv: Invocation) -> Result<ContractResponse, VmError> {
        let label = most_specific_label(&inv.deps, INTERPRETER_LABEL)
            .map(str::to_string)
            .ok_or_else(|| VmError::UnsupportedRuntime {
                labels: inv.deps.clone(),
            })?;
        let code = inv.bridge.resolve_interpreter(&label)?;
        let abi = if code.deps.iter().any(|d| d.starts_with(WASM_COMPACT_LABEL)) {
            WasmAbi::Compact
        } else {
            WasmAbi::Default
        };
        debug!(
            %label,
            interpreter = %strata_types::primitives::format_address(&code.address),
            "delegating script execution"
        );
        self.engine
            .execute_module(abi, &code.bytecode, &code.checksum, code.pinned, entry, inv)
    }
}

impl Runtime for DelegatingInterpreter {
    fn name(&self) -> &'static str {
        "interpreter"
    }

    fn invoke(&self, entry: EntryPoint, inv: Invocation) -> Result<ContractResponse, VmError> {
        run_guarded(self.name(), || self.run(entry, inv))
    }

    /// Scripts are UTF-8 source text.
    fn validate(&self, bytecode: &[u8]) -> Result<(), VmError> {
        std::str::from_utf8(bytecode)
            .map(|_| ())
            .map_err(|e| VmError::InvalidBytecode {
                reason: format!("script is not utf8: {e}"),
            })
    }
}
