//! Every chain this node hosts, and the entry points that route to them.

use std::collections::BTreeMap;
use std::sync::Arc;

use strata_atomic::{AtomicCoordinator, AtomicOutcome, Participant};
use strata_types::atomic::AtomicTxWrapper;
use strata_types::primitives::ChainId;
use strata_types::tx::{Tx, TxResult};
use tokio::sync::Mutex;
use tracing::info;

use crate::chain::Chain;
use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::participant::LocalParticipant;

pub struct MultiChainApp {
    chains: BTreeMap<ChainId, Arc<Mutex<Chain>>>,
}

impl MultiChainApp {
    pub fn new(chains: impl IntoIterator<Item = Chain>) -> Self {
        Self {
            chains: chains
                .into_iter()
                .map(|c| (c.chain_id().to_string(), Arc::new(Mutex::new(c))))
                .collect(),
        }
    }

    pub fn from_config(config: &NodeConfig) -> Result<Self, NodeError> {
        config.validate()?;
        let chains = config
            .chains
            .iter()
            .map(|c| Chain::open(c, config.engine.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        info!(chains = chains.len(), "node ready");
        Ok(Self::new(chains))
    }

    pub fn chain_ids(&self) -> impl Iterator<Item = &str> {
        self.chains.keys().map(String::as_str)
    }

    pub fn chain(&self, chain_id: &str) -> Result<Arc<Mutex<Chain>>, NodeError> {
        self.chains
            .get(chain_id)
            .cloned()
            .ok_or_else(|| NodeError::UnknownChain {
                chain_id: chain_id.to_string(),
            })
    }

    /// Deliver a signed transaction to the chain it names.
    pub async fn submit_tx(&self, bytes: &[u8]) -> Result<TxResult, NodeError> {
        let tx = Tx::decode(bytes)?;
        let chain = self.chain(&tx.body.chain_id)?;
        let mut chain = chain.lock().await;
        chain.deliver_tx(&tx)
    }

    /// Run an atomic bundle with its leader chain as coordinator.
    pub async fn submit_atomic(&self, bytes: &[u8]) -> Result<AtomicOutcome, NodeError> {
        let wrapper = AtomicTxWrapper::decode(bytes)?;
        let leader = wrapper.extension.leader_chain_id.clone();
        self.chain(&leader)?;
        let participants = wrapper
            .extension
            .participant_chain_ids
            .iter()
            .filter_map(|id| {
                self.chains.get(id).map(|chain| {
                    Arc::new(LocalParticipant::new(id.clone(), chain.clone()))
                        as Arc<dyn Participant>
                })
            });
        let coordinator = AtomicCoordinator::new(leader, participants);
        Ok(coordinator.execute(&wrapper).await?)
    }

    /// End the current block on every chain.
    pub async fn end_block(&self) -> Result<(), NodeError> {
        for chain in self.chains.values() {
            chain.lock().await.end_block()?;
        }
        Ok(())
    }
}
