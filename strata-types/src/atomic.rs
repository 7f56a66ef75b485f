use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::error::TypesError;
use crate::primitives::{Address, ChainId};

/// Extension carried by the atomic wrapper.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct AtomicTxExtension {
    /// Participating chain ids, in sub-transaction order.
    pub participant_chain_ids: Vec<ChainId>,
    pub leader_chain_id: ChainId,
}

/// A bundle of signed sub-transactions submitted to the leader chain.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct AtomicTxWrapper {
    pub sender: Address,
    /// Borsh-encoded signed [`Tx`](crate::tx::Tx) values.
    pub txs: Vec<Vec<u8>>,
    pub extension: AtomicTxExtension,
}

impl AtomicTxWrapper {
    pub fn encode(&self) -> Vec<u8> {
        borsh::to_vec(self).unwrap_or_default()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TypesError> {
        AtomicTxWrapper::try_from_slice(bytes).map_err(|e| TypesError::InvalidEncoding {
            reason: e.to_string(),
        })
    }
}
