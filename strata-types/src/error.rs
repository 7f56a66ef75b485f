use thiserror::Error;

/// Errors raised while parsing or validating shared types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypesError {
    #[error("invalid address: {reason}")]
    InvalidAddress { reason: String },

    #[error("unknown storage class: {name}")]
    UnknownStorageClass { name: String },

    #[error("invalid encoding: {reason}")]
    InvalidEncoding { reason: String },
}
