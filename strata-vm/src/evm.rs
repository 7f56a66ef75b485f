//! EVM-compatible stack machine over 256-bit words.
//!
//! Words are big-endian, storage slots are 32-byte keys in the contract's own
//! store, and `LOGn` becomes an `evm_log` event. Instantiation runs the code
//! as init code; if it returns bytes, those become the runtime code.

use primitive_types::U256;
use strata_crypto::hash::keccak256;
use strata_storage::traits::KvStore;
use strata_types::env::{ContractResponse, EntryPoint, Event};
use strata_types::primitives::{format_address, Address};
use tracing::debug;

use crate::bridge::SubCall;
use crate::error::VmError;
use crate::gas::{GasMeter, GAS_CALL, GAS_EMIT_EVENT, GAS_STATE_READ, GAS_STATE_WRITE};
use crate::guard::run_guarded;
use crate::runtime::{Invocation, Runtime};

/// Storage key holding the runtime code returned by the constructor.
pub const RUNTIME_CODE_KEY: &[u8] = b"\x00evm:code";

/// Event type for `LOG0`..`LOG4`.
pub const EVM_LOG_EVENT: &str = "evm_log";

const MAX_STACK: usize = 1024;
const MAX_MEMORY: usize = 1 << 22;

const GAS_BASE: u64 = 2;
const GAS_VERY_LOW: u64 = 3;
const GAS_LOW: u64 = 5;
const GAS_MID: u64 = 8;
const GAS_HIGH: u64 = 10;
const GAS_JUMPDEST: u64 = 1;
const GAS_EXP_BYTE: u64 = 50;
const GAS_KECCAK: u64 = 30;
const GAS_PER_WORD: u64 = 3;
const GAS_KECCAK_WORD: u64 = 6;
const GAS_LOG_BYTE: u64 = 8;
const GAS_LOG_TOPIC: u64 = 375;

mod op {
    pub const STOP: u8 = 0x00;
    pub const ADD: u8 = 0x01;
    pub const MUL: u8 = 0x02;
    pub const SUB: u8 = 0x03;
    pub const DIV: u8 = 0x04;
    pub const MOD: u8 = 0x06;
    pub const EXP: u8 = 0x0a;
    pub const LT: u8 = 0x10;
    pub const GT: u8 = 0x11;
    pub const EQ: u8 = 0x14;
    pub const ISZERO: u8 = 0x15;
    pub const AND: u8 = 0x16;
    pub const OR: u8 = 0x17;
    pub const XOR: u8 = 0x18;
    pub const NOT: u8 = 0x19;
    pub const BYTE: u8 = 0x1a;
    pub const SHL: u8 = 0x1b;
    pub const SHR: u8 = 0x1c;
    pub const KECCAK256: u8 = 0x20;
    pub const ADDRESS: u8 = 0x30;
    pub const ORIGIN: u8 = 0x32;
    pub const CALLER: u8 = 0x33;
    pub const CALLVALUE: u8 = 0x34;
    pub const CALLDATALOAD: u8 = 0x35;
    pub const CALLDATASIZE: u8 = 0x36;
    pub const CALLDATACOPY: u8 = 0x37;
    pub const CODESIZE: u8 = 0x38;
    pub const CODECOPY: u8 = 0x39;
    pub const RETURNDATASIZE: u8 = 0x3d;
    pub const RETURNDATACOPY: u8 = 0x3e;
    pub const TIMESTAMP: u8 = 0x42;
    pub const NUMBER: u8 = 0x43;
    pub const GASLIMIT: u8 = 0x45;
    pub const POP: u8 = 0x50;
    pub const MLOAD: u8 = 0x51;
    pub const MSTORE: u8 = 0x52;
    pub const MSTORE8: u8 = 0x53;
    pub const SLOAD: u8 = 0x54;
    pub const SSTORE: u8 = 0x55;
    pub const JUMP: u8 = 0x56;
    pub const JUMPI: u8 = 0x57;
    pub const PC: u8 = 0x58;
    pub const MSIZE: u8 = 0x59;
    pub const GAS: u8 = 0x5a;
    pub const JUMPDEST: u8 = 0x5b;
    pub const PUSH0: u8 = 0x5f;
    pub const PUSH1: u8 = 0x60;
    pub const PUSH32: u8 = 0x7f;
    pub const DUP1: u8 = 0x80;
    pub const DUP16: u8 = 0x8f;
    pub const SWAP1: u8 = 0x90;
    pub const SWAP16: u8 = 0x9f;
    pub const LOG0: u8 = 0xa0;
    pub const LOG4: u8 = 0xa4;
    pub const CALL: u8 = 0xf1;
    pub const RETURN: u8 = 0xf3;
    pub const STATICCALL: u8 = 0xfa;
    pub const REVERT: u8 = 0xfd;
    pub const INVALID: u8 = 0xfe;
}

/// Big-endian bytes of a word.
fn word_bytes(value: U256) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = value.byte(31 - i);
    }
    out
}

fn address_word(addr: &Address) -> U256 {
    U256::from_big_endian(addr)
}

fn word_address(value: U256) -> Address {
    let bytes = word_bytes(value);
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&bytes[12..]);
    addr
}

fn bool_word(b: bool) -> U256 {
    if b {
        U256::one()
    } else {
        U256::zero()
    }
}

/// Positions of valid `JUMPDEST`s, skipping push data.
fn jump_destinations(code: &[u8]) -> Vec<bool> {
    let mut dests = vec![false; code.len()];
    let mut pc = 0;
    while pc < code.len() {
        let opcode = code[pc];
        if opcode == op::JUMPDEST {
            dests[pc] = true;
        }
        if (op::PUSH1..=op::PUSH32).contains(&opcode) {
            pc += (opcode - op::PUSH1 + 1) as usize;
        }
        pc += 1;
    }
    dests
}

enum Halt {
    Stop,
    Return(Vec<u8>),
    Revert(Vec<u8>),
}

struct Machine<'a> {
    code: &'a [u8],
    jumpdests: Vec<bool>,
    pc: usize,
    stack: Vec<U256>,
    memory: Vec<u8>,
    gas: GasMeter,
    return_data: Vec<u8>,
    events: Vec<Event>,
    inv: &'a Invocation,
    read_only: bool,
}

impl<'a> Machine<'a> {
    fn new(code: &'a [u8], inv: &'a Invocation, read_only: bool) -> Self {
        Self {
            code,
            jumpdests: jump_destinations(code),
            pc: 0,
            stack: Vec::with_capacity(64),
            memory: Vec::new(),
            gas: GasMeter::new(inv.info.gas_limit),
            return_data: Vec::new(),
            events: Vec::new(),
            inv,
            read_only,
        }
    }

    fn fault(&self, what: &str) -> VmError {
        VmError::failed(format!("evm: {what} at pc {}", self.pc))
    }

    fn push(&mut self, value: U256) -> Result<(), VmError> {
        if self.stack.len() >= MAX_STACK {
            return Err(self.fault("stack overflow"));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<U256, VmError> {
        match self.stack.pop() {
            Some(v) => Ok(v),
            None => Err(self.fault("stack underflow")),
        }
    }

    fn pop_usize(&mut self) -> Result<usize, VmError> {
        let value = self.pop()?;
        if value > U256::from(u32::MAX) {
            return Err(self.fault("offset out of range"));
        }
        Ok(value.low_u64() as usize)
    }

    fn require_writable(&self, what: &str) -> Result<(), VmError> {
        if self.read_only {
            return Err(VmError::Unauthorized {
                reason: format!("evm: {what} in a read-only call"),
            });
        }
        Ok(())
    }

    /// Grow memory to cover `[offset, offset + size)`, charging per new word.
    fn expand(&mut self, offset: usize, size: usize) -> Result<(), VmError> {
        if size == 0 {
            return Ok(());
        }
        let end = offset
            .checked_add(size)
            .ok_or_else(|| self.fault("memory range overflow"))?;
        let new_len = end.div_ceil(32) * 32;
        if new_len <= self.memory.len() {
            return Ok(());
        }
        if new_len > MAX_MEMORY {
            return Err(self.fault("memory limit exceeded"));
        }
        let new_words = (new_len - self.memory.len()) / 32;
        self.gas.charge(GAS_PER_WORD * new_words as u64)?;
        self.memory.resize(new_len, 0);
        Ok(())
    }

    fn mem_read(&mut self, offset: usize, size: usize) -> Result<Vec<u8>, VmError> {
        if size == 0 {
            return Ok(Vec::new());
        }
        self.expand(offset, size)?;
        Ok(self.memory[offset..offset + size].to_vec())
    }

    /// Copy `source[src_offset..src_offset + size]` into memory, zero-filling
    /// past the end of `source`.
    fn mem_copy_from(
        &mut self,
        dest: usize,
        source: &[u8],
        src_offset: usize,
        size: usize,
    ) -> Result<(), VmError> {
        if size == 0 {
            return Ok(());
        }
        self.gas
            .charge(GAS_PER_WORD * size.div_ceil(32) as u64)?;
        self.expand(dest, size)?;
        for i in 0..size {
            self.memory[dest + i] = source.get(src_offset.saturating_add(i)).copied().unwrap_or(0);
        }
        Ok(())
    }

    fn binary(&mut self, f: impl FnOnce(U256, U256) -> U256) -> Result<(), VmError> {
        let a = self.pop()?;
        let b = self.pop()?;
        self.push(f(a, b))
    }

    fn slot_key(slot: U256) -> [u8; 32] {
        word_bytes(slot)
    }

    fn run(&mut self) -> Result<Halt, VmError> {
        loop {
            let Some(&opcode) = self.code.get(self.pc) else {
                return Ok(Halt::Stop);
            };
            match opcode {
                op::STOP => return Ok(Halt::Stop),
                op::ADD => {
                    self.gas.charge(GAS_VERY_LOW)?;
                    self.binary(|a, b| a.overflowing_add(b).0)?;
                }
                op::MUL => {
                    self.gas.charge(GAS_LOW)?;
                    self.binary(|a, b| a.overflowing_mul(b).0)?;
                }
                op::SUB => {
                    self.gas.charge(GAS_VERY_LOW)?;
                    self.binary(|a, b| a.overflowing_sub(b).0)?;
                }
                op::DIV => {
                    self.gas.charge(GAS_LOW)?;
                    self.binary(|a, b| if b.is_zero() { U256::zero() } else { a / b })?;
                }
                op::MOD => {
                    self.gas.charge(GAS_LOW)?;
                    self.binary(|a, b| if b.is_zero() { U256::zero() } else { a % b })?;
                }
                op::EXP => {
                    let base = self.pop()?;
                    let exponent = self.pop()?;
                    let exp_bytes = exponent.bits().div_ceil(8) as u64;
                    self.gas.charge(GAS_HIGH + GAS_EXP_BYTE * exp_bytes)?;
                    self.push(base.overflowing_pow(exponent).0)?;
                }
                op::LT => {
                    self.gas.charge(GAS_VERY_LOW)?;
                    self.binary(|a, b| bool_word(a < b))?;
                }
                op::GT => {
                    self.gas.charge(GAS_VERY_LOW)?;
                    self.binary(|a, b| bool_word(a > b))?;
                }
                op::EQ => {
                    self.gas.charge(GAS_VERY_LOW)?;
                    self.binary(|a, b| bool_word(a == b))?;
                }
                op::ISZERO => {
                    self.gas.charge(GAS_VERY_LOW)?;
                    let a = self.pop()?;
                    self.push(bool_word(a.is_zero()))?;
                }
                op::AND => {
                    self.gas.charge(GAS_VERY_LOW)?;
                    self.binary(|a, b| a & b)?;
                }
                op::OR => {
                    self.gas.charge(GAS_VERY_LOW)?;
                    self.binary(|a, b| a | b)?;
                }
                op::XOR => {
                    self.gas.charge(GAS_VERY_LOW)?;
                    self.binary(|a, b| a ^ b)?;
                }
                op::NOT => {
                    self.gas.charge(GAS_VERY_LOW)?;
                    let a = self.pop()?;
                    self.push(!a)?;
                }
                op::BYTE => {
                    self.gas.charge(GAS_VERY_LOW)?;
                    self.binary(|i, x| {
                        if i < U256::from(32) {
                            U256::from(x.byte(31 - i.low_u64() as usize))
                        } else {
                            U256::zero()
                        }
                    })?;
                }
                op::SHL => {
                    self.gas.charge(GAS_VERY_LOW)?;
                    self.binary(|shift, value| {
                        if shift >= U256::from(256) {
                            U256::zero()
                        } else {
                            value << shift.low_u64() as usize
                        }
                    })?;
                }
                op::SHR => {
                    self.gas.charge(GAS_VERY_LOW)?;
                    self.binary(|shift, value| {
                        if shift >= U256::from(256) {
                            U256::zero()
                        } else {
                            value >> shift.low_u64() as usize
                        }
                    })?;
                }
                op::KECCAK256 => {
                    let offset = self.pop_usize()?;
                    let size = self.pop_usize()?;
                    self.gas
                        .charge(GAS_KECCAK + GAS_KECCAK_WORD * size.div_ceil(32) as u64)?;
                    let data = self.mem_read(offset, size)?;
                    self.push(U256::from_big_endian(&keccak256(&data)))?;
                }
                op::ADDRESS => {
                    self.gas.charge(GAS_BASE)?;
                    self.push(address_word(&self.inv.env.contract.address))?;
                }
                op::ORIGIN => {
                    self.gas.charge(GAS_BASE)?;
                    self.push(address_word(&self.inv.info.origin))?;
                }
                op::CALLER => {
                    self.gas.charge(GAS_BASE)?;
                    self.push(address_word(&self.inv.info.sender))?;
                }
                op::CALLVALUE => {
                    self.gas.charge(GAS_BASE)?;
                    self.push(U256::from(self.inv.info.funds))?;
                }
                op::CALLDATALOAD => {
                    self.gas.charge(GAS_VERY_LOW)?;
                    let offset = self.pop()?;
                    let data = &self.inv.info.data;
                    let mut word = [0u8; 32];
                    if offset < U256::from(data.len()) {
                        let start = offset.low_u64() as usize;
                        for (i, byte) in word.iter_mut().enumerate() {
                            *byte = data.get(start + i).copied().unwrap_or(0);
                        }
                    }
                    self.push(U256::from_big_endian(&word))?;
                }
                op::CALLDATASIZE => {
                    self.gas.charge(GAS_BASE)?;
                    self.push(U256::from(self.inv.info.data.len()))?;
                }
                op::CALLDATACOPY => {
                    self.gas.charge(GAS_VERY_LOW)?;
                    let dest = self.pop_usize()?;
                    let offset = self.pop_usize()?;
                    let size = self.pop_usize()?;
                    let data = self.inv.info.data.clone();
                    self.mem_copy_from(dest, &data, offset, size)?;
                }
                op::CODESIZE => {
                    self.gas.charge(GAS_BASE)?;
                    self.push(U256::from(self.code.len()))?;
                }
                op::CODECOPY => {
                    self.gas.charge(GAS_VERY_LOW)?;
                    let dest = self.pop_usize()?;
                    let offset = self.pop_usize()?;
                    let size = self.pop_usize()?;
                    let code = self.code;
                    self.mem_copy_from(dest, code, offset, size)?;
                }
                op::RETURNDATASIZE => {
                    self.gas.charge(GAS_BASE)?;
                    self.push(U256::from(self.return_data.len()))?;
                }
                op::RETURNDATACOPY => {
                    self.gas.charge(GAS_VERY_LOW)?;
                    let dest = self.pop_usize()?;
                    let offset = self.pop_usize()?;
                    let size = self.pop_usize()?;
                    if offset.saturating_add(size) > self.return_data.len() {
                        return Err(self.fault("return data out of bounds"));
                    }
                    let data = std::mem::take(&mut self.return_data);
                    let result = self.mem_copy_from(dest, &data, offset, size);
                    self.return_data = data;
                    result?;
                }
                op::TIMESTAMP => {
                    self.gas.charge(GAS_BASE)?;
                    self.push(U256::from(self.inv.env.block.time))?;
                }
                op::NUMBER => {
                    self.gas.charge(GAS_BASE)?;
                    self.push(U256::from(self.inv.env.block.height))?;
                }
                op::GASLIMIT => {
                    self.gas.charge(GAS_BASE)?;
                    self.push(U256::from(self.inv.info.gas_limit))?;
                }
                op::POP => {
                    self.gas.charge(GAS_BASE)?;
                    self.pop()?;
                }
                op::MLOAD => {
                    self.gas.charge(GAS_VERY_LOW)?;
                    let offset = self.pop_usize()?;
                    let bytes = self.mem_read(offset, 32)?;
                    self.push(U256::from_big_endian(&bytes))?;
                }
                op::MSTORE => {
                    self.gas.charge(GAS_VERY_LOW)?;
                    let offset = self.pop_usize()?;
                    let value = self.pop()?;
                    self.expand(offset, 32)?;
                    self.memory[offset..offset + 32].copy_from_slice(&word_bytes(value));
                }
                op::MSTORE8 => {
                    self.gas.charge(GAS_VERY_LOW)?;
                    let offset = self.pop_usize()?;
                    let value = self.pop()?;
                    self.expand(offset, 1)?;
                    self.memory[offset] = value.byte(0);
                }
                op::SLOAD => {
                    self.gas.charge(GAS_STATE_READ)?;
                    let slot = self.pop()?;
                    let value = match self.inv.store.get(&Self::slot_key(slot))? {
                        Some(bytes) => U256::from_big_endian(&bytes),
                        None => U256::zero(),
                    };
                    self.push(value)?;
                }
                op::SSTORE => {
                    self.require_writable("SSTORE")?;
                    self.gas.charge(GAS_STATE_WRITE)?;
                    let slot = self.pop()?;
                    let value = self.pop()?;
                    let key = Self::slot_key(slot);
                    if value.is_zero() {
                        self.inv.store.delete(&key)?;
                    } else {
                        self.inv.store.put(&key, &word_bytes(value))?;
                    }
                }
                op::JUMP => {
                    self.gas.charge(GAS_MID)?;
                    let dest = self.pop()?;
                    self.jump(dest)?;
                    continue;
                }
                op::JUMPI => {
                    self.gas.charge(GAS_HIGH)?;
                    let dest = self.pop()?;
                    let cond = self.pop()?;
                    if !cond.is_zero() {
                        self.jump(dest)?;
                        continue;
                    }
                }
                op::PC => {
                    self.gas.charge(GAS_BASE)?;
                    self.push(U256::from(self.pc))?;
                }
                op::MSIZE => {
                    self.gas.charge(GAS_BASE)?;
                    self.push(U256::from(self.memory.len()))?;
                }
                op::GAS => {
                    self.gas.charge(GAS_BASE)?;
                    self.push(U256::from(self.gas.remaining()))?;
                }
                op::JUMPDEST => {
                    self.gas.charge(GAS_JUMPDEST)?;
                }
                op::PUSH0 => {
                    self.gas.charge(GAS_BASE)?;
                    self.push(U256::zero())?;
                }
                op::PUSH1..=op::PUSH32 => {
                    self.gas.charge(GAS_VERY_LOW)?;
                    let n = (opcode - op::PUSH1 + 1) as usize;
                    let mut word = [0u8; 32];
                    for i in 0..n {
                        word[32 - n + i] = self.code.get(self.pc + 1 + i).copied().unwrap_or(0);
                    }
                    self.push(U256::from_big_endian(&word))?;
                    self.pc += n;
                }
                op::DUP1..=op::DUP16 => {
                    self.gas.charge(GAS_VERY_LOW)?;
                    let depth = (opcode - op::DUP1 + 1) as usize;
                    if self.stack.len() < depth {
                        return Err(self.fault("stack underflow"));
                    }
                    let value = self.stack[self.stack.len() - depth];
                    self.push(value)?;
                }
                op::SWAP1..=op::SWAP16 => {
                    self.gas.charge(GAS_VERY_LOW)?;
                    let depth = (opcode - op::SWAP1 + 1) as usize;
                    let len = self.stack.len();
                    if len <= depth {
                        return Err(self.fault("stack underflow"));
                    }
                    self.stack.swap(len - 1, len - 1 - depth);
                }
                op::LOG0..=op::LOG4 => {
                    self.require_writable("LOG")?;
                    let topics = (opcode - op::LOG0) as usize;
                    let offset = self.pop_usize()?;
                    let size = self.pop_usize()?;
                    self.gas.charge(
                        GAS_EMIT_EVENT + GAS_LOG_TOPIC * topics as u64 + GAS_LOG_BYTE * size as u64,
                    )?;
                    let mut event = Event::new(EVM_LOG_EVENT)
                        .attr("address", format_address(&self.inv.env.contract.address));
                    for i in 0..topics {
                        let topic = self.pop()?;
                        event = event.attr(format!("topic{i}"), hex::encode(word_bytes(topic)));
                    }
                    let data = self.mem_read(offset, size)?;
                    event = event.attr("data", hex::encode(data));
                    self.events.push(event);
                }
                op::CALL | op::STATICCALL => {
                    self.call(opcode == op::STATICCALL)?;
                }
                op::RETURN => {
                    let offset = self.pop_usize()?;
                    let size = self.pop_usize()?;
                    return Ok(Halt::Return(self.mem_read(offset, size)?));
                }
                op::REVERT => {
                    let offset = self.pop_usize()?;
                    let size = self.pop_usize()?;
                    return Ok(Halt::Revert(self.mem_read(offset, size)?));
                }
                op::INVALID => return Err(self.fault("invalid opcode")),
                other => return Err(self.fault(&format!("unsupported opcode 0x{other:02x}"))),
            }
            self.pc += 1;
        }
    }

    fn jump(&mut self, dest: U256) -> Result<(), VmError> {
        if dest >= U256::from(self.code.len()) || !self.jumpdests[dest.low_u64() as usize] {
            return Err(self.fault("invalid jump destination"));
        }
        self.pc = dest.low_u64() as usize;
        Ok(())
    }

    /// `CALL(gas, to, value, in_off, in_len, out_off, out_len)` or
    /// `STATICCALL(gas, to, in_off, in_len, out_off, out_len)`. Pushes 1 on
    /// success, 0 when the callee failed.
    fn call(&mut self, is_static: bool) -> Result<(), VmError> {
        self.gas.charge(GAS_CALL)?;
        let requested = self.pop()?;
        let to = word_address(self.pop()?);
        let value = if is_static { U256::zero() } else { self.pop()? };
        let in_offset = self.pop_usize()?;
        let in_size = self.pop_usize()?;
        let out_offset = self.pop_usize()?;
        let out_size = self.pop_usize()?;

        let read_only = is_static || self.read_only;
        if read_only && !value.is_zero() {
            return Err(VmError::Unauthorized {
                reason: "evm: value transfer in a read-only call".to_string(),
            });
        }
        if value > U256::from(u128::MAX) {
            return Err(self.fault("call value out of range"));
        }
        let msg = self.mem_read(in_offset, in_size)?;
        let remaining = self.gas.remaining();
        let gas_limit = if requested > U256::from(remaining) {
            remaining
        } else {
            requested.low_u64()
        };

        let sub = SubCall {
            caller: self.inv.env.contract.address,
            origin: self.inv.info.origin,
            target: format_address(&to),
            msg,
            funds: value.low_u128(),
            gas_limit,
            read_only,
            depth: self.inv.depth,
        };
        debug!(target = %sub.target, read_only, "evm call");
        match self.inv.bridge.call_contract(sub) {
            Ok(response) => {
                self.gas.charge(response.gas_used)?;
                self.events.extend(response.events);
                self.return_data = response.data;
                self.push(U256::one())?;
            }
            Err(err) if err.aborts_caller() => return Err(err),
            Err(err) => {
                self.gas.charge(err.gas_used())?;
                self.return_data = match err {
                    VmError::ContractFailed { data, .. } => data,
                    _ => Vec::new(),
                };
                self.push(U256::zero())?;
            }
        }
        let copy_len = out_size.min(self.return_data.len());
        let data = std::mem::take(&mut self.return_data);
        let result = self.mem_copy_from(out_offset, &data, 0, copy_len);
        self.return_data = data;
        result
    }
}

/// Runtime for `interpreter_evm_*` code.
#[derive(Default)]
pub struct EvmRuntime;

impl EvmRuntime {
    pub fn new() -> Self {
        Self
    }

    fn run(&self, entry: EntryPoint, inv: &Invocation) -> Result<ContractResponse, VmError> {
        let stored_runtime = match entry {
            EntryPoint::Instantiate => None,
            _ => inv.store.get(RUNTIME_CODE_KEY)?,
        };
        let code = stored_runtime
            .as_deref()
            .unwrap_or(&inv.env.contract.bytecode);

        let mut machine = Machine::new(code, inv, entry == EntryPoint::Query);
        let halt = machine.run().map_err(|e| e.charged(machine.gas.used()))?;
        let gas_used = machine.gas.used();
        let events = std::mem::take(&mut machine.events);
        match halt {
            Halt::Revert(data) => Err(VmError::ContractFailed {
                reason: "evm: execution reverted".to_string(),
                data,
                gas_used,
            }),
            Halt::Return(data) if entry == EntryPoint::Instantiate => {
                if !data.is_empty() {
                    inv.store.put(RUNTIME_CODE_KEY, &data)?;
                }
                Ok(ContractResponse {
                    data: Vec::new(),
                    events,
                    gas_used,
                })
            }
            Halt::Return(data) => Ok(ContractResponse {
                data,
                events,
                gas_used,
            }),
            Halt::Stop => Ok(ContractResponse {
                data: Vec::new(),
                events,
                gas_used,
            }),
        }
    }
}

impl Runtime for EvmRuntime {
    fn name(&self) -> &'static str {
        "evm"
    }

    fn invoke(&self, entry: EntryPoint, inv: Invocation) -> Result<ContractResponse, VmError> {
        run_guarded(self.name(), || self.run(entry, &inv))
    }

    fn validate(&self, bytecode: &[u8]) -> Result<(), VmError> {
        if bytecode.is_empty() {
            return Err(VmError::InvalidBytecode {
                reason: "empty evm code".to_string(),
            });
        }
        Ok(())
    }
}
