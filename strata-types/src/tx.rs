use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::contract::{CodeMetadata, StorageClass};
use crate::primitives::{serde_sig, Address, Amount, ChainId, CodeId, Gas, PublicKey, Signature};

/// A native module message: a type URL plus its JSON-encoded body.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct AnyMsg {
    pub type_url: String,
    pub value: Vec<u8>,
}

impl AnyMsg {
    pub fn new(type_url: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            type_url: type_url.into(),
            value,
        }
    }
}

/// How the address of a new contract is chosen.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub enum AddressMode {
    /// Derived from the creator and its sequence.
    Classic,
    /// Derived from the creator, a 32-byte salt, and the code checksum.
    Predictable { salt: Vec<u8> },
}

/// A single message inside a transaction.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub enum TxMsg {
    StoreCode {
        bytecode: Vec<u8>,
        deps: Vec<String>,
        metadata: CodeMetadata,
    },
    Instantiate {
        code_id: CodeId,
        label: String,
        init_msg: Vec<u8>,
        funds: Amount,
        address_mode: AddressMode,
        storage_class: Option<StorageClass>,
    },
    Execute {
        /// Role, role label, or hex address.
        contract: String,
        msg: Vec<u8>,
        funds: Amount,
    },
    Native(AnyMsg),
}

/// Extension carried by every sub-transaction of an atomic bundle.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct SubTxExtension {
    pub chain_id: ChainId,
    pub index: u32,
    pub total: u32,
}

/// The signed portion of a transaction.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct TxBody {
    pub chain_id: ChainId,
    pub signer: PublicKey,
    pub sequence: u64,
    pub gas_limit: Gas,
    pub msgs: Vec<TxMsg>,
    pub extension: Option<SubTxExtension>,
}

/// A signed transaction for a single chain.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct Tx {
    pub body: TxBody,
    #[serde(with = "serde_sig")]
    pub signature: Signature,
}

impl TxBody {
    /// Canonical bytes covered by the signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        // Borsh encoding of in-memory values cannot fail.
        borsh::to_vec(self).unwrap_or_default()
    }
}

impl Tx {
    pub fn encode(&self) -> Vec<u8> {
        borsh::to_vec(self).unwrap_or_default()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, crate::error::TypesError> {
        Tx::try_from_slice(bytes).map_err(|e| crate::error::TypesError::InvalidEncoding {
            reason: e.to_string(),
        })
    }
}

/// Per-transaction result returned after delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResult {
    pub msg_results: Vec<crate::env::ContractResponse>,
    pub gas_used: Gas,
    /// Addresses of contracts instantiated by this transaction, in order.
    pub created: Vec<Address>,
}
