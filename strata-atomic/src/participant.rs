use async_trait::async_trait;
use strata_types::primitives::{ChainId, Hash};
use strata_types::tx::{Tx, TxResult};

use crate::error::AtomicError;

/// One chain taking part in an atomic bundle.
///
/// `prepare` applies the sub-transaction provisionally and holds it until the
/// coordinator calls `commit` or `abort` with the same bundle id. A chain
/// holds at most one prepared bundle at a time.
#[async_trait]
pub trait Participant: Send + Sync {
    fn chain_id(&self) -> &str;

    /// Chain-local admission checks (chain id, account sequence) that must
    /// pass before any chain is asked to prepare.
    async fn verify(&self, tx: &Tx) -> Result<(), AtomicError>;

    async fn prepare(&self, bundle_id: Hash, tx: Tx) -> Result<TxResult, AtomicError>;

    async fn commit(&self, bundle_id: Hash) -> Result<(), AtomicError>;

    /// Drop the prepared bundle. A no-op when nothing is prepared under
    /// `bundle_id`.
    async fn abort(&self, bundle_id: Hash) -> Result<(), AtomicError>;
}

/// Chain id reported by a participant, owned.
pub(crate) fn owned_chain_id(p: &dyn Participant) -> ChainId {
    p.chain_id().to_string()
}
