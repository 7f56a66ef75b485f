use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::primitives::{Address, Amount, Checksum, Gas, Timestamp};

/// Contract entry points.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EntryPoint {
    Instantiate,
    Execute,
    Query,
}

impl EntryPoint {
    /// Name of the exported function implementing the entry point.
    pub fn export_name(&self) -> &'static str {
        match self {
            EntryPoint::Instantiate => "instantiate",
            EntryPoint::Execute => "execute",
            EntryPoint::Query => "query",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInfo {
    pub chain_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub height: u64,
    pub time: Timestamp,
    pub gas_limit: Gas,
    pub proposer: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractEnv {
    pub address: Address,
    pub code_hash: Checksum,
    /// Bytecode of the contract, or the script source for interpreted code.
    #[serde(skip)]
    pub bytecode: Vec<u8>,
}

/// Execution environment handed to every backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Env {
    pub chain: ChainInfo,
    pub block: BlockInfo,
    pub contract: ContractEnv,
}

/// Per-call message information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageInfo {
    /// Account that signed the outer transaction.
    pub origin: Address,
    /// Immediate caller (account or contract).
    pub sender: Address,
    pub funds: Amount,
    pub gas_limit: Gas,
    /// Call payload.
    pub data: Vec<u8>,
}

/// Structured event emitted during execution.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct Event {
    pub ty: String,
    pub attributes: Vec<(String, String)>,
}

impl Event {
    pub fn new(ty: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            attributes: Vec::new(),
        }
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// First value for the given attribute key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Result of a successful contract call.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct ContractResponse {
    pub data: Vec<u8>,
    pub events: Vec<Event>,
    pub gas_used: Gas,
}
