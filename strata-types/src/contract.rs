use std::fmt;
use std::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::error::TypesError;
use crate::primitives::{Address, Checksum, CodeId};

/// Durability and replication class of a contract's key/value state.
///
/// The class fixes which backing keyspace a contract's reads and writes go to.
/// It is recorded on the contract at instantiation and only changes through a
/// storage migration.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StorageClass {
    /// Replicated, consensus-bound, durable.
    CoreConsensus,
    /// Consensus-bound metadata keyspace.
    MetaConsensus,
    /// Single-node-consensus keyspace.
    SingleConsensus,
    /// Process memory; survives blocks, lost on restart.
    Memory,
    /// Cleared at the end of every block.
    Transient,
}

impl StorageClass {
    /// All classes in tag order.
    pub const ALL: [StorageClass; 5] = [
        StorageClass::CoreConsensus,
        StorageClass::MetaConsensus,
        StorageClass::SingleConsensus,
        StorageClass::Memory,
        StorageClass::Transient,
    ];

    /// Stable one-byte tag.
    pub fn tag(&self) -> u8 {
        match self {
            StorageClass::CoreConsensus => 0,
            StorageClass::MetaConsensus => 1,
            StorageClass::SingleConsensus => 2,
            StorageClass::Memory => 3,
            StorageClass::Transient => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageClass::CoreConsensus => "core_consensus",
            StorageClass::MetaConsensus => "meta_consensus",
            StorageClass::SingleConsensus => "single_consensus",
            StorageClass::Memory => "memory",
            StorageClass::Transient => "transient",
        }
    }

    /// Whether values in this class are written to the durable backend.
    pub fn is_durable(&self) -> bool {
        matches!(
            self,
            StorageClass::CoreConsensus
                | StorageClass::MetaConsensus
                | StorageClass::SingleConsensus
        )
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageClass {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StorageClass::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| TypesError::UnknownStorageClass {
                name: s.to_string(),
            })
    }
}

/// Where a piece of code was copied from, when it was imported.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct CodeOrigin {
    pub chain_id: String,
    pub address: Address,
}

/// Descriptive metadata attached to stored code.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct CodeMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub abi: Option<String>,
    #[serde(default)]
    pub json_schema: Option<String>,
    #[serde(default)]
    pub origin: Option<CodeOrigin>,
}

/// Record of a stored bytecode blob.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct CodeRecord {
    pub code_id: CodeId,
    pub checksum: Checksum,
    pub creator: Address,
    /// Dependency labels selecting the execution backend and host interfaces.
    pub deps: Vec<String>,
    pub metadata: CodeMetadata,
    /// Compiled artifact is kept warm in the backend cache.
    pub pinned: bool,
}

impl CodeRecord {
    /// Whether any label names an interpreter backend.
    pub fn is_interpreted(&self) -> bool {
        deps_are_interpreted(&self.deps)
    }
}

/// Whether a dependency list selects an interpreted backend.
pub fn deps_are_interpreted(deps: &[String]) -> bool {
    deps.iter().any(|d| d.contains("interpreter"))
}

/// Record of an instantiated contract.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct ContractInfo {
    pub code_id: CodeId,
    pub creator: Address,
    /// Contract that created this one, if it was created by a contract.
    pub provenance: Option<Address>,
    pub label: String,
    pub init_message: Vec<u8>,
    pub storage_class: StorageClass,
}

/// A named system role bound to a contract.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct Role {
    pub role: String,
    pub label: String,
    pub contract_address: Address,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_class_parse_and_tag() {
        for (i, class) in StorageClass::ALL.iter().enumerate() {
            assert_eq!(class.tag() as usize, i);
            assert_eq!(class.as_str().parse::<StorageClass>().unwrap(), *class);
        }
        assert!("archive".parse::<StorageClass>().is_err());
    }

    #[test]
    fn test_interpreted_detection() {
        assert!(deps_are_interpreted(&["interpreter_evm_shanghai_1".into()]));
        assert!(!deps_are_interpreted(&["wasm_env_1".into()]));
    }
}
