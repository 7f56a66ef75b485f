//! Two-phase commit of an atomic bundle across its participant chains.
//!
//! The leader validates the wrapper, verifies every signature, then asks
//! every chain to prepare concurrently. Only when all of them prepared does it
//! commit them; a single refusal aborts every chain, so no chain keeps the
//! effects of a bundle another chain rejected.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use strata_crypto::hash::blake3_hash_domain;
use strata_crypto::keys::verify;
use strata_types::atomic::AtomicTxWrapper;
use strata_types::primitives::{ChainId, Hash};
use strata_types::tx::{Tx, TxResult};
use tracing::{debug, error, info, warn};

use crate::builder::leader_chain_id;
use crate::error::AtomicError;
use crate::participant::{owned_chain_id, Participant};

const BUNDLE_ID_CONTEXT: &str = "strata atomic bundle v1";

/// Deterministic id of a bundle, shared by every participant.
pub fn bundle_id(wrapper: &AtomicTxWrapper) -> Hash {
    blake3_hash_domain(BUNDLE_ID_CONTEXT, &wrapper.encode())
}

/// Per-chain results of a committed bundle, in sub-transaction order.
#[derive(Debug, Clone)]
pub struct AtomicOutcome {
    pub bundle_id: Hash,
    pub results: Vec<(ChainId, TxResult)>,
}

pub struct AtomicCoordinator {
    local_chain_id: ChainId,
    participants: BTreeMap<ChainId, Arc<dyn Participant>>,
}

impl AtomicCoordinator {
    pub fn new(
        local_chain_id: impl Into<ChainId>,
        participants: impl IntoIterator<Item = Arc<dyn Participant>>,
    ) -> Self {
        Self {
            local_chain_id: local_chain_id.into(),
            participants: participants
                .into_iter()
                .map(|p| (owned_chain_id(p.as_ref()), p))
                .collect(),
        }
    }

    pub fn local_chain_id(&self) -> &str {
        &self.local_chain_id
    }

    /// Decode and check the wrapper's structure against its extension.
    fn validate(&self, wrapper: &AtomicTxWrapper) -> Result<Vec<Tx>, AtomicError> {
        if wrapper.txs.is_empty() {
            return Err(AtomicError::invalid("bundle has no sub-transactions"));
        }
        let ext = &wrapper.extension;
        let leader = leader_chain_id(&ext.participant_chain_ids)?;
        if leader != ext.leader_chain_id {
            return Err(AtomicError::invalid(format!(
                "declared leader {} is not the leader {leader} of the participant set",
                ext.leader_chain_id
            )));
        }
        if leader != self.local_chain_id {
            return Err(AtomicError::invalid(format!(
                "bundle led by {leader} was submitted to {}",
                self.local_chain_id
            )));
        }
        if wrapper.txs.len() != ext.participant_chain_ids.len() {
            return Err(AtomicError::invalid(format!(
                "{} sub-transactions for {} participant chains",
                wrapper.txs.len(),
                ext.participant_chain_ids.len()
            )));
        }

        let total = wrapper.txs.len();
        let mut txs = Vec::with_capacity(total);
        for (index, (raw, chain_id)) in wrapper
            .txs
            .iter()
            .zip(&ext.participant_chain_ids)
            .enumerate()
        {
            let tx = Tx::decode(raw)?;
            if tx.body.chain_id != *chain_id {
                return Err(AtomicError::invalid(format!(
                    "sub-transaction {index} targets {} but the bundle lists {chain_id}",
                    tx.body.chain_id
                )));
            }
            match &tx.body.extension {
                Some(sub)
                    if sub.chain_id == *chain_id
                        && sub.index as usize == index
                        && sub.total as usize == total => {}
                _ => {
                    return Err(AtomicError::invalid(format!(
                        "sub-transaction {index} for {chain_id} carries a mismatched extension"
                    )))
                }
            }
            if !self.participants.contains_key(chain_id) {
                return Err(AtomicError::UnknownChain {
                    chain_id: chain_id.clone(),
                });
            }
            txs.push(tx);
        }
        Ok(txs)
    }

    fn participant(&self, chain_id: &str) -> Result<&Arc<dyn Participant>, AtomicError> {
        self.participants
            .get(chain_id)
            .ok_or_else(|| AtomicError::UnknownChain {
                chain_id: chain_id.to_string(),
            })
    }

    /// Apply the bundle on every participant chain, or on none.
    pub async fn execute(&self, wrapper: &AtomicTxWrapper) -> Result<AtomicOutcome, AtomicError> {
        let txs = self.validate(wrapper)?;
        let id = bundle_id(wrapper);

        // Nothing is prepared until every signature and admission check passes.
        for tx in &txs {
            let chain_id = &tx.body.chain_id;
            if verify(&tx.body.signing_bytes(), &tx.signature, &tx.body.signer).is_err() {
                warn!(bundle = %hex::encode(id), chain_id = %chain_id, "bad sub-transaction signature");
                return Err(AtomicError::InvalidSignature {
                    chain_id: chain_id.clone(),
                });
            }
            self.participant(chain_id)?
                .verify(tx)
                .await
                .map_err(|e| e.rejected_by(chain_id))?;
        }

        debug!(bundle = %hex::encode(id), chains = txs.len(), "preparing bundle");
        let prepares = txs.into_iter().map(|tx| {
            let chain_id = tx.body.chain_id.clone();
            let participant = self.participant(&chain_id).cloned();
            async move {
                let result = match participant {
                    Ok(p) => p.prepare(id, tx).await.map_err(|e| e.rejected_by(&chain_id)),
                    Err(e) => Err(e),
                };
                (chain_id, result)
            }
        });
        let prepared = join_all(prepares).await;

        if let Some(err) = prepared.iter().find_map(|(_, r)| r.as_ref().err()).cloned() {
            warn!(
                bundle = %hex::encode(id),
                chain_id = err.chain_id().unwrap_or_default(),
                error = %err,
                "bundle rejected, aborting every participant"
            );
            self.abort_all(id, prepared.iter().map(|(c, _)| c.as_str()))
                .await;
            return Err(err);
        }

        let chain_ids: Vec<&str> = prepared.iter().map(|(c, _)| c.as_str()).collect();
        let commits = chain_ids.iter().map(|chain_id| async move {
            let result = match self.participant(chain_id) {
                Ok(p) => p.commit(id).await,
                Err(e) => Err(e),
            };
            (*chain_id, result)
        });
        let mut failure = None;
        for (chain_id, result) in join_all(commits).await {
            if let Err(err) = result {
                error!(bundle = %hex::encode(id), chain_id, error = %err, "prepared bundle failed to commit");
                failure.get_or_insert(AtomicError::CommitFailed {
                    chain_id: chain_id.to_string(),
                    reason: err.to_string(),
                });
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }

        info!(bundle = %hex::encode(id), chains = prepared.len(), "bundle committed");
        let results = prepared
            .into_iter()
            .filter_map(|(chain_id, r)| r.ok().map(|res| (chain_id, res)))
            .collect();
        Ok(AtomicOutcome {
            bundle_id: id,
            results,
        })
    }

    async fn abort_all<'c>(&self, id: Hash, chain_ids: impl Iterator<Item = &'c str>) {
        let aborts = chain_ids.map(|chain_id| async move {
            if let Ok(p) = self.participant(chain_id) {
                if let Err(err) = p.abort(id).await {
                    error!(bundle = %hex::encode(id), chain_id, error = %err, "abort failed");
                }
            }
        });
        join_all(aborts).await;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use strata_crypto::keys::Keypair;
    use tokio::sync::Mutex;

    use super::*;
    use crate::builder::AtomicTxBuilder;

    /// Participant whose "state" is a list of committed sequences.
    struct MockChain {
        chain_id: ChainId,
        reject_prepare: bool,
        state: Mutex<MockState>,
    }

    #[derive(Default)]
    struct MockState {
        prepared: BTreeMap<Hash, u64>,
        committed: Vec<u64>,
        aborts: usize,
    }

    impl MockChain {
        fn new(chain_id: &str, reject_prepare: bool) -> Arc<Self> {
            Arc::new(Self {
                chain_id: chain_id.to_string(),
                reject_prepare,
                state: Mutex::new(MockState::default()),
            })
        }
    }

    #[async_trait::async_trait]
    impl Participant for MockChain {
        fn chain_id(&self) -> &str {
            &self.chain_id
        }

        async fn verify(&self, tx: &Tx) -> Result<(), AtomicError> {
            if tx.body.chain_id != self.chain_id {
                return Err(AtomicError::invalid("wrong chain"));
            }
            Ok(())
        }

        async fn prepare(&self, bundle_id: Hash, tx: Tx) -> Result<TxResult, AtomicError> {
            if self.reject_prepare {
                return Err(AtomicError::invalid("contract failed"));
            }
            self.state
                .lock()
                .await
                .prepared
                .insert(bundle_id, tx.body.sequence);
            Ok(TxResult::default())
        }

        async fn commit(&self, bundle_id: Hash) -> Result<(), AtomicError> {
            let mut state = self.state.lock().await;
            let seq = state
                .prepared
                .remove(&bundle_id)
                .ok_or_else(|| AtomicError::invalid("nothing prepared"))?;
            state.committed.push(seq);
            Ok(())
        }

        async fn abort(&self, bundle_id: Hash) -> Result<(), AtomicError> {
            let mut state = self.state.lock().await;
            state.prepared.remove(&bundle_id);
            state.aborts += 1;
            Ok(())
        }
    }

    fn coordinator(chains: &[Arc<MockChain>]) -> AtomicCoordinator {
        AtomicCoordinator::new(
            "alpha",
            chains.iter().map(|c| c.clone() as Arc<dyn Participant>),
        )
    }

    fn wrapper(keys: &Keypair, chains: &[&str]) -> AtomicTxWrapper {
        let mut builder = AtomicTxBuilder::new();
        for (i, chain) in chains.iter().enumerate() {
            builder.add_sub_tx(*chain, keys, i as u64, 1_000_000, Vec::new());
        }
        builder.build(keys.address()).unwrap()
    }

    #[tokio::test]
    async fn test_all_chains_commit() {
        let chains = [
            MockChain::new("alpha", false),
            MockChain::new("beta", false),
            MockChain::new("gamma", false),
        ];
        let keys = Keypair::from_seed(&[5u8; 32]);
        let bundle = wrapper(&keys, &["beta", "alpha", "gamma"]);
        let outcome = coordinator(&chains).execute(&bundle).await.unwrap();

        assert_eq!(outcome.bundle_id, bundle_id(&bundle));
        let order: Vec<&str> = outcome.results.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(order, vec!["beta", "alpha", "gamma"]);
        for chain in &chains {
            let state = chain.state.lock().await;
            assert_eq!(state.committed.len(), 1);
            assert!(state.prepared.is_empty());
        }
    }

    #[tokio::test]
    async fn test_one_rejection_aborts_everyone() {
        let chains = [
            MockChain::new("alpha", false),
            MockChain::new("beta", true),
            MockChain::new("gamma", false),
        ];
        let keys = Keypair::from_seed(&[5u8; 32]);
        let err = coordinator(&chains)
            .execute(&wrapper(&keys, &["alpha", "beta", "gamma"]))
            .await
            .unwrap_err();
        assert!(matches!(&err, AtomicError::Rejected { chain_id, .. } if chain_id == "beta"));
        for chain in &chains {
            let state = chain.state.lock().await;
            assert!(state.committed.is_empty());
            assert!(state.prepared.is_empty());
            assert_eq!(state.aborts, 1);
        }
    }

    #[tokio::test]
    async fn test_bad_signature_prepares_nothing() {
        let chains = [MockChain::new("alpha", false), MockChain::new("beta", false)];
        let keys = Keypair::from_seed(&[5u8; 32]);
        let mut bundle = wrapper(&keys, &["alpha", "beta"]);
        let mut tx = Tx::decode(&bundle.txs[1]).unwrap();
        tx.signature[0] ^= 0xff;
        bundle.txs[1] = tx.encode();

        let err = coordinator(&chains).execute(&bundle).await.unwrap_err();
        assert_eq!(
            err,
            AtomicError::InvalidSignature {
                chain_id: "beta".to_string()
            }
        );
        for chain in &chains {
            let state = chain.state.lock().await;
            assert!(state.prepared.is_empty());
            assert_eq!(state.aborts, 0);
        }
    }

    #[tokio::test]
    async fn test_structural_checks() {
        let chains = [MockChain::new("alpha", false), MockChain::new("beta", false)];
        let keys = Keypair::from_seed(&[5u8; 32]);
        let coord = coordinator(&chains);

        let mut empty = wrapper(&keys, &["alpha"]);
        empty.txs.clear();
        assert!(matches!(
            coord.execute(&empty).await,
            Err(AtomicError::InvalidArgument { .. })
        ));

        let mut wrong_leader = wrapper(&keys, &["alpha", "beta"]);
        wrong_leader.extension.leader_chain_id = "beta".to_string();
        assert!(matches!(
            coord.execute(&wrong_leader).await,
            Err(AtomicError::InvalidArgument { .. })
        ));

        // Led by "aardvark", which is not this chain.
        let elsewhere = wrapper(&keys, &["alpha", "aardvark"]);
        assert!(matches!(
            coord.execute(&elsewhere).await,
            Err(AtomicError::InvalidArgument { .. })
        ));

        let unknown = wrapper(&keys, &["alpha", "delta"]);
        assert!(matches!(
            coord.execute(&unknown).await,
            Err(AtomicError::UnknownChain { chain_id }) if chain_id == "delta"
        ));
    }
}
