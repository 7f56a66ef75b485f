use std::sync::Arc;

use async_trait::async_trait;
use strata_atomic::{AtomicError, Participant};
use strata_types::primitives::{ChainId, Hash};
use strata_types::tx::{Tx, TxResult};
use tokio::sync::Mutex;

use crate::chain::Chain;
use crate::error::NodeError;

/// A chain hosted in this process, driven by the coordinator.
pub struct LocalParticipant {
    chain_id: ChainId,
    chain: Arc<Mutex<Chain>>,
}

impl LocalParticipant {
    pub fn new(chain_id: impl Into<ChainId>, chain: Arc<Mutex<Chain>>) -> Self {
        Self {
            chain_id: chain_id.into(),
            chain,
        }
    }

    fn rejected(&self, err: NodeError) -> AtomicError {
        AtomicError::Rejected {
            chain_id: self.chain_id.clone(),
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl Participant for LocalParticipant {
    fn chain_id(&self) -> &str {
        &self.chain_id
    }

    async fn verify(&self, tx: &Tx) -> Result<(), AtomicError> {
        self.chain
            .lock()
            .await
            .verify_sub_tx(tx)
            .map_err(|e| self.rejected(e))
    }

    async fn prepare(&self, bundle_id: Hash, tx: Tx) -> Result<TxResult, AtomicError> {
        self.chain
            .lock()
            .await
            .prepare(bundle_id, &tx)
            .map_err(|e| self.rejected(e))
    }

    async fn commit(&self, bundle_id: Hash) -> Result<(), AtomicError> {
        self.chain
            .lock()
            .await
            .commit_prepared(bundle_id)
            .map(|_| ())
            .map_err(|e| AtomicError::CommitFailed {
                chain_id: self.chain_id.clone(),
                reason: e.to_string(),
            })
    }

    async fn abort(&self, bundle_id: Hash) -> Result<(), AtomicError> {
        self.chain.lock().await.abort_prepared(bundle_id);
        Ok(())
    }
}
