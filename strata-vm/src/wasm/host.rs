use std::sync::Arc;

use strata_storage::prefix::PrefixStore;
use strata_storage::traits::KvStore;
use strata_types::env::{Env, Event, MessageInfo};
use strata_types::primitives::{format_address, Address};
use tracing::debug;
use wasmtime::{Caller, Engine, Linker, Memory, StoreLimits, StoreLimitsBuilder};

use crate::bridge::{HostBridge, NativeEnvelope, SubCall};
use crate::error::VmError;
use crate::gas::*;
use crate::runtime::Invocation;

/// Import module name for every host function.
pub const HOST_NAMESPACE: &str = "strata";

/// Host-side state owned by the wasmtime `Store` for one call.
pub struct WasmHostState {
    pub env: Env,
    pub info: MessageInfo,
    pub store: PrefixStore,
    pub bridge: Arc<dyn HostBridge>,
    pub depth: u32,
    /// Query calls may not write state or dispatch mutating messages.
    pub read_only: bool,
    pub gas_limit: u64,
    pub events: Vec<Event>,
    /// Output set through `finish`.
    pub output: Option<Vec<u8>>,
    /// Data produced by the most recent `call`, `native_execute` or
    /// `native_query`.
    pub return_data: Vec<u8>,
    pub store_limits: StoreLimits,
}

impl WasmHostState {
    pub fn new(inv: Invocation, read_only: bool) -> Self {
        let gas_limit = inv.info.gas_limit;
        Self {
            env: inv.env,
            info: inv.info,
            store: inv.store,
            bridge: inv.bridge,
            depth: inv.depth,
            read_only,
            gas_limit,
            events: Vec::new(),
            output: None,
            return_data: Vec::new(),
            store_limits: StoreLimitsBuilder::new()
                .memory_size(MAX_WASM_MEMORY_BYTES)
                .build(),
        }
    }

    fn push_event(&mut self, event: Event) -> Result<(), VmError> {
        if self.events.len() >= MAX_EVENTS {
            return Err(VmError::failed("event limit reached"));
        }
        self.events.push(event);
        Ok(())
    }

    fn require_writable(&self, what: &str) -> Result<(), VmError> {
        if self.read_only {
            return Err(VmError::Unauthorized {
                reason: format!("{what} is not allowed in a read-only call"),
            });
        }
        Ok(())
    }
}

type HostResult<T> = Result<T, wasmtime::Error>;

fn trap(err: VmError) -> wasmtime::Error {
    wasmtime::Error::new(err)
}

fn out_of_bounds() -> wasmtime::Error {
    trap(VmError::failed("out of bounds memory access"))
}

fn memory(caller: &mut Caller<'_, WasmHostState>) -> HostResult<Memory> {
    caller
        .get_export("memory")
        .and_then(|e| e.into_memory())
        .ok_or_else(|| trap(VmError::failed("missing memory export")))
}

fn read_bytes(caller: &mut Caller<'_, WasmHostState>, ptr: i32, len: i32) -> HostResult<Vec<u8>> {
    let memory = memory(caller)?;
    let start = ptr as u32 as usize;
    let end = start
        .checked_add(len as u32 as usize)
        .ok_or_else(out_of_bounds)?;
    let data = memory.data(&*caller);
    if end > data.len() {
        return Err(out_of_bounds());
    }
    Ok(data[start..end].to_vec())
}

fn write_bytes(caller: &mut Caller<'_, WasmHostState>, ptr: i32, bytes: &[u8]) -> HostResult<()> {
    let memory = memory(caller)?;
    let start = ptr as u32 as usize;
    let end = start.checked_add(bytes.len()).ok_or_else(out_of_bounds)?;
    let data = memory.data_mut(&mut *caller);
    if end > data.len() {
        return Err(out_of_bounds());
    }
    data[start..end].copy_from_slice(bytes);
    Ok(())
}

fn read_string(caller: &mut Caller<'_, WasmHostState>, ptr: i32, len: i32) -> HostResult<String> {
    String::from_utf8(read_bytes(caller, ptr, len)?).map_err(|e| {
        trap(VmError::InvalidArgument {
            reason: format!("invalid utf8 from guest: {e}"),
        })
    })
}

/// Deduct host-side gas from the instance's remaining fuel.
fn charge(caller: &mut Caller<'_, WasmHostState>, amount: u64) -> HostResult<()> {
    let fuel = caller.get_fuel()?;
    if amount > fuel {
        let limit = caller.data().gas_limit;
        let used = limit.saturating_sub(fuel);
        caller.set_fuel(0)?;
        return Err(trap(VmError::OutOfGas {
            wanted: limit,
            consumed: used.saturating_add(amount),
        }));
    }
    caller.set_fuel(fuel - amount)?;
    Ok(())
}

fn write_address(caller: &mut Caller<'_, WasmHostState>, out_ptr: i32, addr: Address) -> HostResult<()> {
    charge(caller, GAS_BYTE_COPY * addr.len() as u64)?;
    write_bytes(caller, out_ptr, &addr)
}

/// Record a bridge result: data goes into the return buffer and the status
/// code is handed back to the guest. Failures that must abort the caller
/// become traps; the rest still bill the gas the callee burned.
fn settle(
    caller: &mut Caller<'_, WasmHostState>,
    result: Result<Vec<u8>, VmError>,
) -> HostResult<i32> {
    match result {
        Ok(data) => {
            caller.data_mut().return_data = data;
            Ok(0)
        }
        Err(err) if err.aborts_caller() => Err(trap(err)),
        Err(err) => {
            charge(caller, err.gas_used())?;
            debug!(error = %err, "bridge request failed");
            caller.data_mut().return_data = err.to_string().into_bytes();
            Ok(1)
        }
    }
}

/// Build a linker exposing the host interface to guest modules.
pub fn linker(engine: &Engine) -> Result<Linker<WasmHostState>, VmError> {
    let mut linker = Linker::new(engine);
    register(&mut linker).map_err(|e| VmError::host(format!("failed to register host functions: {e}")))?;
    Ok(linker)
}

fn register(linker: &mut Linker<WasmHostState>) -> wasmtime::Result<()> {
    // ── Diagnostics ──────────────────────────────────────────────────────
    linker.func_wrap(
        HOST_NAMESPACE,
        "log",
        |mut caller: Caller<'_, WasmHostState>, ptr: i32, len: i32| -> HostResult<()> {
            charge(&mut caller, GAS_LOG)?;
            let bytes = read_bytes(&mut caller, ptr, len)?;
            let contract = format_address(&caller.data().env.contract.address);
            debug!(%contract, msg = %String::from_utf8_lossy(&bytes), "contract log");
            Ok(())
        },
    )?;

    // ── Storage ──────────────────────────────────────────────────────────
    // storage_get(key_ptr, key_len, out_ptr, out_max_len) -> i32
    // out_ptr == 0 queries the length. -1: not found, -2: buffer too small.
    linker.func_wrap(
        HOST_NAMESPACE,
        "storage_get",
        |mut caller: Caller<'_, WasmHostState>,
         key_ptr: i32,
         key_len: i32,
         out_ptr: i32,
         out_max_len: i32|
         -> HostResult<i32> {
            charge(&mut caller, GAS_STATE_READ)?;
            let key = read_bytes(&mut caller, key_ptr, key_len)?;
            let value = caller.data().store.get(&key).map_err(|e| trap(e.into()))?;
            let Some(value) = value else {
                return Ok(-1);
            };
            charge(&mut caller, GAS_BYTE_READ * value.len() as u64)?;
            if out_ptr == 0 {
                return Ok(value.len() as i32);
            }
            if (out_max_len as u32 as usize) < value.len() {
                return Ok(-2);
            }
            write_bytes(&mut caller, out_ptr, &value)?;
            Ok(value.len() as i32)
        },
    )?;

    linker.func_wrap(
        HOST_NAMESPACE,
        "storage_set",
        |mut caller: Caller<'_, WasmHostState>,
         key_ptr: i32,
         key_len: i32,
         val_ptr: i32,
         val_len: i32|
         -> HostResult<()> {
            caller
                .data()
                .require_writable("storage_set")
                .map_err(trap)?;
            let key = read_bytes(&mut caller, key_ptr, key_len)?;
            let value = read_bytes(&mut caller, val_ptr, val_len)?;
            if key.len() > MAX_KEY_SIZE || value.len() > MAX_VALUE_SIZE {
                return Err(trap(VmError::InvalidArgument {
                    reason: format!(
                        "storage entry too large (key {} bytes, value {} bytes)",
                        key.len(),
                        value.len()
                    ),
                }));
            }
            charge(
                &mut caller,
                GAS_STATE_WRITE + GAS_BYTE_WRITE * (key.len() + value.len()) as u64,
            )?;
            caller
                .data()
                .store
                .put(&key, &value)
                .map_err(|e| trap(e.into()))
        },
    )?;

    linker.func_wrap(
        HOST_NAMESPACE,
        "storage_delete",
        |mut caller: Caller<'_, WasmHostState>, key_ptr: i32, key_len: i32| -> HostResult<()> {
            caller
                .data()
                .require_writable("storage_delete")
                .map_err(trap)?;
            charge(&mut caller, GAS_STATE_WRITE)?;
            let key = read_bytes(&mut caller, key_ptr, key_len)?;
            caller
                .data()
                .store
                .delete(&key)
                .map_err(|e| trap(e.into()))
        },
    )?;

    // ── Context ──────────────────────────────────────────────────────────
    linker.func_wrap(
        HOST_NAMESPACE,
        "sender",
        |mut caller: Caller<'_, WasmHostState>, out_ptr: i32| -> HostResult<()> {
            let addr = caller.data().info.sender;
            write_address(&mut caller, out_ptr, addr)
        },
    )?;

    linker.func_wrap(
        HOST_NAMESPACE,
        "origin",
        |mut caller: Caller<'_, WasmHostState>, out_ptr: i32| -> HostResult<()> {
            let addr = caller.data().info.origin;
            write_address(&mut caller, out_ptr, addr)
        },
    )?;

    linker.func_wrap(
        HOST_NAMESPACE,
        "self_address",
        |mut caller: Caller<'_, WasmHostState>, out_ptr: i32| -> HostResult<()> {
            let addr = caller.data().env.contract.address;
            write_address(&mut caller, out_ptr, addr)
        },
    )?;

    linker.func_wrap(
        HOST_NAMESPACE,
        "funds",
        |caller: Caller<'_, WasmHostState>| -> i64 {
            i64::try_from(caller.data().info.funds).unwrap_or(i64::MAX)
        },
    )?;

    linker.func_wrap(
        HOST_NAMESPACE,
        "block_height",
        |caller: Caller<'_, WasmHostState>| -> i64 { caller.data().env.block.height as i64 },
    )?;

    linker.func_wrap(
        HOST_NAMESPACE,
        "block_time",
        |caller: Caller<'_, WasmHostState>| -> i64 { caller.data().env.block.time as i64 },
    )?;

    // Source handed to interpreter contracts.
    linker.func_wrap(
        HOST_NAMESPACE,
        "code_len",
        |caller: Caller<'_, WasmHostState>| -> i32 {
            caller.data().env.contract.bytecode.len() as i32
        },
    )?;

    linker.func_wrap(
        HOST_NAMESPACE,
        "code_read",
        |mut caller: Caller<'_, WasmHostState>, out_ptr: i32| -> HostResult<i32> {
            let code = caller.data().env.contract.bytecode.clone();
            charge(&mut caller, GAS_BYTE_COPY * code.len() as u64)?;
            write_bytes(&mut caller, out_ptr, &code)?;
            Ok(code.len() as i32)
        },
    )?;

    // ── Events ───────────────────────────────────────────────────────────
    // emit_event(ty_ptr, ty_len, attrs_ptr, attrs_len), attributes as a
    // JSON array of [key, value] pairs.
    linker.func_wrap(
        HOST_NAMESPACE,
        "emit_event",
        |mut caller: Caller<'_, WasmHostState>,
         ty_ptr: i32,
         ty_len: i32,
         attrs_ptr: i32,
         attrs_len: i32|
         -> HostResult<()> {
            charge(&mut caller, GAS_EMIT_EVENT)?;
            let ty = read_string(&mut caller, ty_ptr, ty_len)?;
            let attributes: Vec<(String, String)> = if attrs_len == 0 {
                Vec::new()
            } else {
                let raw = read_bytes(&mut caller, attrs_ptr, attrs_len)?;
                serde_json::from_slice(&raw).map_err(|e| {
                    trap(VmError::InvalidArgument {
                        reason: format!("event attributes: {e}"),
                    })
                })?
            };
            caller
                .data_mut()
                .push_event(Event { ty, attributes })
                .map_err(trap)
        },
    )?;

    // ── Bridge ───────────────────────────────────────────────────────────
    // call(target_ptr, target_len, msg_ptr, msg_len, read_only) -> i32
    // 0 on success, 1 when the callee failed; the return buffer holds the
    // callee's data or the failure message.
    linker.func_wrap(
        HOST_NAMESPACE,
        "call",
        |mut caller: Caller<'_, WasmHostState>,
         target_ptr: i32,
         target_len: i32,
         msg_ptr: i32,
         msg_len: i32,
         read_only: i32|
         -> HostResult<i32> {
            let read_only = read_only != 0 || caller.data().read_only;
            charge(&mut caller, GAS_CALL)?;
            let target = read_string(&mut caller, target_ptr, target_len)?;
            let msg = read_bytes(&mut caller, msg_ptr, msg_len)?;
            let gas_limit = caller.get_fuel()?;
            let state = caller.data();
            let call = SubCall {
                caller: state.env.contract.address,
                origin: state.info.origin,
                target,
                msg,
                funds: 0,
                gas_limit,
                read_only,
                depth: state.depth,
            };
            let bridge = state.bridge.clone();
            let result = match bridge.call_contract(call) {
                Ok(response) => {
                    charge(&mut caller, response.gas_used)?;
                    for event in response.events {
                        caller.data_mut().push_event(event).map_err(trap)?;
                    }
                    Ok(response.data)
                }
                Err(err) => Err(err),
            };
            settle(&mut caller, result)
        },
    )?;

    // native_execute(envelope_ptr, envelope_len) -> i32, envelope is
    // `{"type_url": ..., "value": ...}`.
    linker.func_wrap(
        HOST_NAMESPACE,
        "native_execute",
        |mut caller: Caller<'_, WasmHostState>, ptr: i32, len: i32| -> HostResult<i32> {
            caller
                .data()
                .require_writable("native_execute")
                .map_err(trap)?;
            charge(&mut caller, GAS_NATIVE)?;
            let raw = read_bytes(&mut caller, ptr, len)?;
            let envelope: NativeEnvelope = serde_json::from_slice(&raw).map_err(|e| {
                trap(VmError::InvalidArgument {
                    reason: format!("native envelope: {e}"),
                })
            })?;
            let msg = envelope.into_any().map_err(trap)?;
            let gas_limit = caller.get_fuel()?;
            let contract = caller.data().env.contract.address;
            let bridge = caller.data().bridge.clone();
            let result = match bridge.execute_native(&contract, &msg, gas_limit) {
                Ok(outcome) => {
                    charge(&mut caller, outcome.gas_used)?;
                    for event in outcome.events {
                        caller.data_mut().push_event(event).map_err(trap)?;
                    }
                    Ok(outcome.data)
                }
                Err(err) => Err(err),
            };
            settle(&mut caller, result)
        },
    )?;

    linker.func_wrap(
        HOST_NAMESPACE,
        "native_query",
        |mut caller: Caller<'_, WasmHostState>,
         path_ptr: i32,
         path_len: i32,
         payload_ptr: i32,
         payload_len: i32|
         -> HostResult<i32> {
            charge(&mut caller, GAS_NATIVE)?;
            let path = read_string(&mut caller, path_ptr, path_len)?;
            let payload = read_bytes(&mut caller, payload_ptr, payload_len)?;
            let bridge = caller.data().bridge.clone();
            let result = bridge.query_native(&path, &payload);
            settle(&mut caller, result)
        },
    )?;

    linker.func_wrap(
        HOST_NAMESPACE,
        "return_len",
        |caller: Caller<'_, WasmHostState>| -> i32 { caller.data().return_data.len() as i32 },
    )?;

    linker.func_wrap(
        HOST_NAMESPACE,
        "return_read",
        |mut caller: Caller<'_, WasmHostState>, out_ptr: i32| -> HostResult<i32> {
            let data = caller.data().return_data.clone();
            charge(&mut caller, GAS_BYTE_COPY * data.len() as u64)?;
            write_bytes(&mut caller, out_ptr, &data)?;
            Ok(data.len() as i32)
        },
    )?;

    // ── Results ──────────────────────────────────────────────────────────
    linker.func_wrap(
        HOST_NAMESPACE,
        "finish",
        |mut caller: Caller<'_, WasmHostState>, ptr: i32, len: i32| -> HostResult<()> {
            let data = read_bytes(&mut caller, ptr, len)?;
            charge(&mut caller, GAS_BYTE_COPY * data.len() as u64)?;
            caller.data_mut().output = Some(data);
            Ok(())
        },
    )?;

    // Abort the call; the bytes are carried on the failure.
    linker.func_wrap(
        HOST_NAMESPACE,
        "revert",
        |mut caller: Caller<'_, WasmHostState>, ptr: i32, len: i32| -> HostResult<()> {
            let data = read_bytes(&mut caller, ptr, len)?;
            Err(trap(VmError::ContractFailed {
                reason: "reverted".to_string(),
                data,
                gas_used: 0,
            }))
        },
    )?;

    Ok(())
}
