use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::error::TypesError;

/// 32-byte hash (bundle ids, transaction hashes).
pub type Hash = [u8; 32];

/// 32-byte SHA-256 digest identifying a bytecode blob.
pub type Checksum = [u8; 32];

/// 32-byte Ed25519 public key.
pub type PublicKey = [u8; 32];

/// 64-byte Ed25519 signature.
pub type Signature = [u8; 64];

/// 20-byte account or contract address.
pub type Address = [u8; 20];

/// Monotonic identifier assigned to stored bytecode.
pub type CodeId = u64;

/// Gas units.
pub type Gas = u64;

/// Native token amount.
pub type Amount = u128;

/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// Identifier of a sub-chain.
pub type ChainId = String;

/// The zero address.
pub const ZERO_ADDRESS: Address = [0u8; 20];

/// Number of leading zero bytes that mark a system address.
pub const SYSTEM_ADDRESS_ZERO_PREFIX: usize = 18;

/// Build a system address from a small index (`0x…0001`, `0x…0002`, ...).
pub fn system_address(index: u16) -> Address {
    let mut addr = [0u8; 20];
    addr[18..].copy_from_slice(&index.to_be_bytes());
    addr
}

/// Whether the address is in the reserved system range.
pub fn is_system_address(addr: &Address) -> bool {
    addr[..SYSTEM_ADDRESS_ZERO_PREFIX].iter().all(|b| *b == 0) && *addr != ZERO_ADDRESS
}

/// Format an address as `0x`-prefixed lowercase hex.
pub fn format_address(addr: &Address) -> String {
    format!("0x{}", hex::encode(addr))
}

/// Parse a `0x`-prefixed (or bare) hex address.
pub fn parse_address(s: &str) -> Result<Address, TypesError> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(stripped).map_err(|e| TypesError::InvalidAddress {
        reason: format!("{s}: {e}"),
    })?;
    bytes.try_into().map_err(|_| TypesError::InvalidAddress {
        reason: format!("{s}: expected 20 bytes"),
    })
}

/// Serde helper for [u8; 64] fields.
pub mod serde_sig {
    use serde::{self, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(value: &[u8; 64], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.as_slice().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 64], D::Error>
    where
        D: Deserializer<'de>,
    {
        let v: Vec<u8> = Vec::deserialize(deserializer)?;
        v.try_into()
            .map_err(|_| serde::de::Error::custom("expected 64 bytes for signature"))
    }
}

/// Block-level context a transaction executes under.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct BlockContext {
    pub chain_id: ChainId,
    pub height: u64,
    pub time: Timestamp,
    pub gas_limit: Gas,
    pub proposer: Address,
}
