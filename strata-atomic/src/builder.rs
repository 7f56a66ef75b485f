//! Client-side construction of atomic bundles.

use std::collections::BTreeSet;

use strata_crypto::keys::Keypair;
use strata_types::atomic::{AtomicTxExtension, AtomicTxWrapper};
use strata_types::primitives::{Address, ChainId, Gas};
use strata_types::tx::{SubTxExtension, Tx, TxBody, TxMsg};

use crate::error::AtomicError;

/// The chain that finalises a bundle: the lexicographically smallest id.
///
/// Every participant computes the same leader from the same set.
pub fn leader_chain_id(chain_ids: &[ChainId]) -> Result<ChainId, AtomicError> {
    let mut seen = BTreeSet::new();
    for id in chain_ids {
        if id.is_empty() {
            return Err(AtomicError::invalid("chain id must not be empty"));
        }
        if !seen.insert(id.as_str()) {
            return Err(AtomicError::invalid(format!("duplicate chain id {id}")));
        }
    }
    seen.first()
        .map(|id| id.to_string())
        .ok_or_else(|| AtomicError::invalid("bundle has no participant chains"))
}

struct PendingSubTx<'a> {
    chain_id: ChainId,
    keypair: &'a Keypair,
    sequence: u64,
    gas_limit: Gas,
    msgs: Vec<TxMsg>,
}

/// Collects one signed sub-transaction per chain into a wrapper.
#[derive(Default)]
pub struct AtomicTxBuilder<'a> {
    pending: Vec<PendingSubTx<'a>>,
}

impl<'a> AtomicTxBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sub_tx(
        &mut self,
        chain_id: impl Into<ChainId>,
        keypair: &'a Keypair,
        sequence: u64,
        gas_limit: Gas,
        msgs: Vec<TxMsg>,
    ) -> &mut Self {
        self.pending.push(PendingSubTx {
            chain_id: chain_id.into(),
            keypair,
            sequence,
            gas_limit,
            msgs,
        });
        self
    }

    /// Sign every sub-transaction and wrap them, in the order added.
    pub fn build(&self, sender: Address) -> Result<AtomicTxWrapper, AtomicError> {
        let chain_ids: Vec<ChainId> = self.pending.iter().map(|p| p.chain_id.clone()).collect();
        let leader = leader_chain_id(&chain_ids)?;
        let total = u32::try_from(self.pending.len())
            .map_err(|_| AtomicError::invalid("too many sub-transactions"))?;

        let txs = self
            .pending
            .iter()
            .zip(0u32..)
            .map(|(p, index)| {
                let body = TxBody {
                    chain_id: p.chain_id.clone(),
                    signer: p.keypair.public_key(),
                    sequence: p.sequence,
                    gas_limit: p.gas_limit,
                    msgs: p.msgs.clone(),
                    extension: Some(SubTxExtension {
                        chain_id: p.chain_id.clone(),
                        index,
                        total,
                    }),
                };
                let signature = p.keypair.sign(&body.signing_bytes());
                Tx { body, signature }.encode()
            })
            .collect();

        Ok(AtomicTxWrapper {
            sender,
            txs,
            extension: AtomicTxExtension {
                participant_chain_ids: chain_ids,
                leader_chain_id: leader,
            },
        })
    }
}
