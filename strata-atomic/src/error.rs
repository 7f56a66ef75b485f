use strata_types::error::TypesError;
use strata_types::primitives::ChainId;
use thiserror::Error;

/// Errors that can occur while building or coordinating an atomic bundle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AtomicError {
    /// The bundle is malformed.
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// A sub-transaction targets a chain with no registered participant.
    #[error("unknown chain: {chain_id}")]
    UnknownChain { chain_id: ChainId },

    /// A sub-transaction is not signed by its declared signer.
    #[error("invalid signature on sub-transaction for chain {chain_id}")]
    InvalidSignature { chain_id: ChainId },

    /// A participant refused its sub-transaction.
    #[error("chain {chain_id} rejected the bundle: {reason}")]
    Rejected { chain_id: ChainId, reason: String },

    /// A participant failed to apply a prepared sub-transaction.
    #[error("chain {chain_id} failed to commit: {reason}")]
    CommitFailed { chain_id: ChainId, reason: String },

    /// Sub-transaction bytes could not be decoded.
    #[error("encoding error: {reason}")]
    Encoding { reason: String },
}

impl AtomicError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        AtomicError::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Attribute a participant failure to `chain_id`.
    pub fn rejected_by(self, chain_id: &str) -> Self {
        match self {
            err @ (AtomicError::Rejected { .. } | AtomicError::InvalidSignature { .. }) => err,
            other => AtomicError::Rejected {
                chain_id: chain_id.to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// The chain a failure is attributed to, if any.
    pub fn chain_id(&self) -> Option<&str> {
        match self {
            AtomicError::UnknownChain { chain_id }
            | AtomicError::InvalidSignature { chain_id }
            | AtomicError::Rejected { chain_id, .. }
            | AtomicError::CommitFailed { chain_id, .. } => Some(chain_id),
            _ => None,
        }
    }
}

impl From<TypesError> for AtomicError {
    fn from(err: TypesError) -> Self {
        AtomicError::Encoding {
            reason: err.to_string(),
        }
    }
}
