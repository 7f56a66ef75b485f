use strata_storage::error::StorageError;
use strata_types::error::TypesError;
use strata_vm::error::VmError;
use thiserror::Error;

/// Errors surfaced by the contract engine.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("duplicate key: {key}")]
    DuplicateKey { key: String },

    #[error("unauthorized: {reason}")]
    Unauthorized { reason: String },

    #[error("out of gas: wanted {wanted}, consumed {consumed}")]
    OutOfGas { wanted: u64, consumed: u64 },

    #[error("no runtime supports labels {labels:?}")]
    UnsupportedRuntime { labels: Vec<String> },

    #[error("execution panicked: {reason}")]
    ExecutionPanic { reason: String },

    #[error("size limit exceeded: {size} > {max}")]
    SizeLimitExceeded { size: usize, max: usize },

    #[error("contract failed after {gas_used} gas: {reason}")]
    ContractFailed {
        reason: String,
        data: Vec<u8>,
        gas_used: u64,
    },

    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl CoreError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        CoreError::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        CoreError::NotFound { what: what.into() }
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        CoreError::Unauthorized {
            reason: reason.into(),
        }
    }

    /// Gas burned by the failed operation, zero when it failed before metering.
    pub fn gas_used(&self) -> u64 {
        match self {
            CoreError::OutOfGas { consumed, .. } => *consumed,
            CoreError::ContractFailed { gas_used, .. } => *gas_used,
            _ => 0,
        }
    }
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::DuplicateKey { key } => CoreError::DuplicateKey { key },
            other => CoreError::Storage(other),
        }
    }
}

impl From<TypesError> for CoreError {
    fn from(err: TypesError) -> Self {
        CoreError::InvalidArgument {
            reason: err.to_string(),
        }
    }
}

impl From<VmError> for CoreError {
    fn from(err: VmError) -> Self {
        match err {
            VmError::OutOfGas { wanted, consumed } => CoreError::OutOfGas { wanted, consumed },
            VmError::UnsupportedRuntime { labels } => CoreError::UnsupportedRuntime { labels },
            VmError::ExecutionPanic { reason } => CoreError::ExecutionPanic { reason },
            VmError::Unauthorized { reason } => CoreError::Unauthorized { reason },
            VmError::InvalidArgument { reason } => CoreError::InvalidArgument { reason },
            VmError::InvalidBytecode { reason } => CoreError::InvalidArgument {
                reason: format!("invalid bytecode: {reason}"),
            },
            VmError::NotFound { what } => CoreError::NotFound { what },
            VmError::DuplicateKey { key } => CoreError::DuplicateKey { key },
            VmError::ContractFailed {
                reason,
                data,
                gas_used,
            } => CoreError::ContractFailed {
                reason,
                data,
                gas_used,
            },
            VmError::CallDepthExceeded { depth, max } => CoreError::InvalidArgument {
                reason: format!("call depth exceeded: {depth} > {max}"),
            },
            VmError::HostError { reason } => CoreError::ExecutionPanic { reason },
            VmError::Storage(e) => CoreError::from(e),
        }
    }
}

/// Errors cross back into a running backend through the host bridge.
impl From<CoreError> for VmError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidArgument { reason } => VmError::InvalidArgument { reason },
            CoreError::NotFound { what } => VmError::NotFound { what },
            CoreError::DuplicateKey { key } => VmError::DuplicateKey { key },
            CoreError::Unauthorized { reason } => VmError::Unauthorized { reason },
            CoreError::OutOfGas { wanted, consumed } => VmError::OutOfGas { wanted, consumed },
            CoreError::UnsupportedRuntime { labels } => VmError::UnsupportedRuntime { labels },
            CoreError::ExecutionPanic { reason } => VmError::ExecutionPanic { reason },
            CoreError::SizeLimitExceeded { size, max } => VmError::InvalidArgument {
                reason: format!("size limit exceeded: {size} > {max}"),
            },
            CoreError::ContractFailed {
                reason,
                data,
                gas_used,
            } => VmError::ContractFailed {
                reason,
                data,
                gas_used,
            },
            CoreError::Storage(e) => VmError::Storage(e),
        }
    }
}
