//! Wasm backends on wasmtime with fuel metering.
//!
//! Two ABIs share one engine and module cache:
//!
//! * default: entry points `instantiate|execute|query(ptr: i32, len: i32) -> i32`,
//!   where 0 is success. Output comes from the `finish` host call, or from the
//!   `__strata_output_ptr`/`__strata_output_len` exports.
//! * compact: entry points take and return one `i64` packing `ptr << 32 | len`.

pub mod host;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use strata_types::env::{ContractResponse, EntryPoint};
use strata_types::primitives::Checksum;
use tracing::debug;
use wasmtime::{Config, Engine, Instance, Module, Store, Trap};

use crate::error::VmError;
use crate::guard::run_guarded;
use crate::runtime::{Invocation, Runtime};
use host::WasmHostState;

/// Entry point calling convention of a Wasm module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WasmAbi {
    Default,
    Compact,
}

/// Shared wasmtime engine plus the cache of pinned compiled modules.
pub struct WasmEngine {
    engine: Engine,
    pinned: Mutex<HashMap<Checksum, Module>>,
}

impl WasmEngine {
    /// Create an engine with fuel metering enabled.
    pub fn new() -> Result<Self, VmError> {
        let mut config = Config::new();
        config.consume_fuel(true);
        let engine = Engine::new(&config)
            .map_err(|e| VmError::host(format!("failed to create wasmtime engine: {e}")))?;
        Ok(Self {
            engine,
            pinned: Mutex::new(HashMap::new()),
        })
    }

    pub fn validate(&self, bytecode: &[u8]) -> Result<(), VmError> {
        Module::validate(&self.engine, bytecode).map_err(|e| VmError::InvalidBytecode {
            reason: format!("invalid wasm module: {e}"),
        })
    }

    fn compile(&self, bytecode: &[u8]) -> Result<Module, VmError> {
        Module::new(&self.engine, bytecode).map_err(|e| VmError::InvalidBytecode {
            reason: format!("failed to compile wasm module: {e}"),
        })
    }

    fn cache(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Checksum, Module>>, VmError> {
        self.pinned
            .lock()
            .map_err(|e| VmError::host(format!("module cache poisoned: {e}")))
    }

    /// Compile `bytecode` and keep the module until unpinned.
    pub fn pin(&self, checksum: &Checksum, bytecode: &[u8]) -> Result<(), VmError> {
        if self.is_pinned(checksum) {
            return Ok(());
        }
        let module = self.compile(bytecode)?;
        self.cache()?.insert(*checksum, module);
        debug!(checksum = %hex::encode(checksum), "pinned wasm module");
        Ok(())
    }

    pub fn unpin(&self, checksum: &Checksum) {
        if let Ok(mut cache) = self.cache() {
            if cache.remove(checksum).is_some() {
                debug!(checksum = %hex::encode(checksum), "unpinned wasm module");
            }
        }
    }

    pub fn is_pinned(&self, checksum: &Checksum) -> bool {
        self.cache().map(|c| c.contains_key(checksum)).unwrap_or(false)
    }

    /// The compiled module for `checksum`, from the cache when pinned.
    fn module(&self, checksum: &Checksum, bytecode: &[u8], pinned: bool) -> Result<Module, VmError> {
        if let Some(module) = self.cache()?.get(checksum) {
            return Ok(module.clone());
        }
        let module = self.compile(bytecode)?;
        if pinned {
            self.cache()?.insert(*checksum, module.clone());
        }
        Ok(module)
    }

    /// Run one entry point of a Wasm module.
    ///
    /// `bytecode` is the module to run, which is not necessarily the
    /// contract's own code: interpreter contracts run their Wasm against a
    /// script contract's invocation.
    pub fn execute_module(
        &self,
        abi: WasmAbi,
        bytecode: &[u8],
        checksum: &Checksum,
        pinned: bool,
        entry: EntryPoint,
        inv: Invocation,
    ) -> Result<ContractResponse, VmError> {
        let module = self.module(checksum, bytecode, pinned)?;
        let gas_limit = inv.info.gas_limit;
        let input = inv.info.data.clone();
        let read_only = entry == EntryPoint::Query;

        let mut store = Store::new(&self.engine, WasmHostState::new(inv, read_only));
        store.limiter(|state| &mut state.store_limits);
        store
            .set_fuel(gas_limit)
            .map_err(|e| VmError::host(format!("failed to set fuel: {e}")))?;

        let linker = host::linker(&self.engine)?;
        let instance = match linker.instantiate(&mut store, &module) {
            Ok(instance) => instance,
            Err(e) => {
                let used = gas_limit.saturating_sub(store.get_fuel().unwrap_or(0));
                return Err(classify(e, gas_limit).charged(used));
            }
        };

        let mut call = WasmCall {
            store,
            instance,
            gas_limit,
        };
        let ran = match abi {
            WasmAbi::Default => call.run_default(entry, &input),
            WasmAbi::Compact => call.run_compact(entry, &input),
        };
        let data = ran.map_err(|e| e.charged(call.gas_used()))?;
        let gas_used = call.gas_used();
        let state = call.store.into_data();
        Ok(ContractResponse {
            data,
            events: state.events,
            gas_used,
        })
    }
}

/// Map a wasmtime failure to the engine's error type: fuel exhaustion
/// becomes `OutOfGas`, host errors come back as themselves, other traps are
/// contract failures.
fn classify(err: wasmtime::Error, gas_limit: u64) -> VmError {
    if matches!(err.downcast_ref::<Trap>(), Some(Trap::OutOfFuel)) {
        return VmError::OutOfGas {
            wanted: gas_limit,
            consumed: gas_limit,
        };
    }
    match err.downcast::<VmError>() {
        Ok(err) => err,
        Err(err) => VmError::failed(format!("wasm trap: {err}")),
    }
}

struct WasmCall {
    store: Store<WasmHostState>,
    instance: Instance,
    gas_limit: u64,
}

impl WasmCall {
    fn gas_used(&self) -> u64 {
        let remaining = self.store.get_fuel().unwrap_or(0);
        self.gas_limit.saturating_sub(remaining)
    }

    /// Write input into guest memory using `__strata_alloc` if exported,
    /// falling back to offset 1024.
    fn write_input(&mut self, input: &[u8]) -> Result<(i32, i32), VmError> {
        if input.is_empty() {
            return Ok((0, 0));
        }
        let memory = self
            .instance
            .get_memory(&mut self.store, "memory")
            .ok_or_else(|| VmError::InvalidBytecode {
                reason: "module takes input but exports no memory".to_string(),
            })?;

        if let Ok(alloc) = self
            .instance
            .get_typed_func::<i32, i32>(&mut self.store, "__strata_alloc")
        {
            let ptr = alloc
                .call(&mut self.store, input.len() as i32)
                .map_err(|e| classify(e, self.gas_limit))?;
            let offset = ptr as u32 as usize;
            if ptr > 0 && offset + input.len() <= memory.data_size(&self.store) {
                memory.data_mut(&mut self.store)[offset..offset + input.len()]
                    .copy_from_slice(input);
                return Ok((ptr, input.len() as i32));
            }
        }

        let mem_size = memory.data_size(&self.store);
        let offset = 1024.min(mem_size.saturating_sub(input.len()));
        if offset + input.len() > mem_size {
            return Err(VmError::InvalidArgument {
                reason: format!("input of {} bytes does not fit guest memory", input.len()),
            });
        }
        memory.data_mut(&mut self.store)[offset..offset + input.len()].copy_from_slice(input);
        Ok((offset as i32, input.len() as i32))
    }

    fn read_memory(&mut self, ptr: u32, len: u32) -> Result<Vec<u8>, VmError> {
        let memory = self
            .instance
            .get_memory(&mut self.store, "memory")
            .ok_or_else(|| VmError::failed("module returned data but exports no memory"))?;
        let start = ptr as usize;
        let end = start + len as usize;
        let data = memory.data(&self.store);
        if end > data.len() {
            return Err(VmError::failed("output out of bounds"));
        }
        Ok(data[start..end].to_vec())
    }

    /// Output buffer exported by SDK-style modules.
    fn exported_output(&mut self) -> Result<Option<Vec<u8>>, VmError> {
        let ptr = self
            .instance
            .get_typed_func::<(), i32>(&mut self.store, "__strata_output_ptr")
            .ok()
            .and_then(|f| f.call(&mut self.store, ()).ok());
        let len = self
            .instance
            .get_typed_func::<(), i32>(&mut self.store, "__strata_output_len")
            .ok()
            .and_then(|f| f.call(&mut self.store, ()).ok());
        match (ptr, len) {
            (Some(ptr), Some(len)) if len > 0 => {
                Ok(Some(self.read_memory(ptr as u32, len as u32)?))
            }
            _ => Ok(None),
        }
    }

    fn has_export(&mut self, name: &str) -> bool {
        self.instance.get_export(&mut self.store, name).is_some()
    }

    fn run_default(&mut self, entry: EntryPoint, input: &[u8]) -> Result<Vec<u8>, VmError> {
        let name = entry.export_name();
        if entry == EntryPoint::Instantiate && !self.has_export(name) {
            return Ok(Vec::new());
        }
        let func = self
            .instance
            .get_typed_func::<(i32, i32), i32>(&mut self.store, name)
            .map_err(|e| VmError::InvalidBytecode {
                reason: format!("{name} export missing or not (i32, i32) -> i32: {e}"),
            })?;
        let (ptr, len) = self.write_input(input)?;
        let code = func
            .call(&mut self.store, (ptr, len))
            .map_err(|e| classify(e, self.gas_limit))?;

        let output = match self.store.data_mut().output.take() {
            Some(output) => output,
            None => self.exported_output()?.unwrap_or_default(),
        };
        if code != 0 {
            return Err(VmError::ContractFailed {
                reason: format!("{name} exited with code {code}"),
                data: output,
                gas_used: 0,
            });
        }
        Ok(output)
    }

    fn run_compact(&mut self, entry: EntryPoint, input: &[u8]) -> Result<Vec<u8>, VmError> {
        let name = entry.export_name();
        if entry == EntryPoint::Instantiate && !self.has_export(name) {
            return Ok(Vec::new());
        }
        let func = self
            .instance
            .get_typed_func::<i64, i64>(&mut self.store, name)
            .map_err(|e| VmError::InvalidBytecode {
                reason: format!("{name} export missing or not (i64) -> i64: {e}"),
            })?;
        let (ptr, len) = self.write_input(input)?;
        let packed_in = ((ptr as u32 as i64) << 32) | (len as u32 as i64);
        let packed_out = func
            .call(&mut self.store, packed_in)
            .map_err(|e| classify(e, self.gas_limit))?;

        if let Some(output) = self.store.data_mut().output.take() {
            return Ok(output);
        }
        if packed_out == 0 {
            return Ok(Vec::new());
        }
        let out_ptr = (packed_out as u64 >> 32) as u32;
        let out_len = packed_out as u64 as u32;
        self.read_memory(out_ptr, out_len)
    }
}

/// Runtime for contracts whose code is itself a Wasm module.
pub struct WasmRuntime {
    engine: Arc<WasmEngine>,
    abi: WasmAbi,
}

impl WasmRuntime {
    pub fn new(engine: Arc<WasmEngine>, abi: WasmAbi) -> Self {
        Self { engine, abi }
    }
}

impl Runtime for WasmRuntime {
    fn name(&self) -> &'static str {
        match self.abi {
            WasmAbi::Default => "wasm",
            WasmAbi::Compact => "wasm-compact",
        }
    }

    fn invoke(&self, entry: EntryPoint, inv: Invocation) -> Result<ContractResponse, VmError> {
        run_guarded(self.name(), || {
            let bytecode = inv.env.contract.bytecode.clone();
            let checksum = inv.env.contract.code_hash;
            let pinned = inv.pinned;
            self.engine
                .execute_module(self.abi, &bytecode, &checksum, pinned, entry, inv)
        })
    }

    fn validate(&self, bytecode: &[u8]) -> Result<(), VmError> {
        self.engine.validate(bytecode)
    }

    fn pin(&self, checksum: &Checksum, bytecode: &[u8]) -> Result<(), VmError> {
        self.engine.pin(checksum, bytecode)
    }

    fn unpin(&self, checksum: &Checksum) {
        self.engine.unpin(checksum)
    }
}
