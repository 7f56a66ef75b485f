use strata_atomic::AtomicError;
use strata_core::CoreError;
use strata_storage::error::StorageError;
use strata_types::error::TypesError;
use strata_types::primitives::{ChainId, Gas};
use thiserror::Error;

/// Errors that can occur in the node.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    /// The transaction failed admission: bad signature, chain id or sequence.
    #[error("invalid transaction: {reason}")]
    InvalidTx { reason: String },

    #[error("unknown chain: {chain_id}")]
    UnknownChain { chain_id: ChainId },

    /// The chain holds a prepared bundle and accepts nothing else until it
    /// is committed or aborted.
    #[error("chain {chain_id} has a prepared bundle pending")]
    BundlePending { chain_id: ChainId },

    #[error("no prepared bundle {bundle} on chain {chain_id}")]
    NotPrepared { chain_id: ChainId, bundle: String },

    /// The messages of an admitted transaction failed and were rolled back.
    /// The sequence stays consumed and `gas_used` is what was burned.
    #[error("transaction failed after {gas_used} gas: {error}")]
    TxFailed { error: CoreError, gas_used: Gas },

    #[error("engine error: {0}")]
    Core(#[from] CoreError),

    #[error("atomic bundle error: {0}")]
    Atomic(#[from] AtomicError),

    #[error("storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

impl NodeError {
    pub fn invalid_tx(reason: impl Into<String>) -> Self {
        NodeError::InvalidTx {
            reason: reason.into(),
        }
    }
}

impl From<TypesError> for NodeError {
    fn from(err: TypesError) -> Self {
        NodeError::InvalidTx {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = NodeError::ConfigError {
            reason: "missing field".to_string(),
        };
        assert!(err.to_string().contains("missing field"));
    }

    #[test]
    fn test_core_error_from() {
        let err: NodeError = CoreError::not_found("code 3").into();
        assert!(matches!(err, NodeError::Core(CoreError::NotFound { .. })));
        assert!(err.to_string().contains("code 3"));
    }

    #[test]
    fn test_tx_failed_display_carries_gas() {
        let err = NodeError::TxFailed {
            error: CoreError::invalid("bad msg"),
            gas_used: 1234,
        };
        let shown = err.to_string();
        assert!(shown.contains("1234"));
        assert!(shown.contains("bad msg"));
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let node_err: NodeError = io_err.into();
        assert!(matches!(node_err, NodeError::IoError(_)));
    }
}
