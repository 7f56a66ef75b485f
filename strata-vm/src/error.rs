use strata_storage::error::StorageError;
use thiserror::Error;

/// Errors raised while dispatching to or running inside a contract backend.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("out of gas: wanted {wanted}, consumed {consumed}")]
    OutOfGas { wanted: u64, consumed: u64 },

    #[error("no runtime supports labels {labels:?}")]
    UnsupportedRuntime { labels: Vec<String> },

    #[error("execution panicked: {reason}")]
    ExecutionPanic { reason: String },

    #[error("unauthorized: {reason}")]
    Unauthorized { reason: String },

    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("duplicate key: {key}")]
    DuplicateKey { key: String },

    #[error("invalid bytecode: {reason}")]
    InvalidBytecode { reason: String },

    #[error("contract failed after {gas_used} gas: {reason}")]
    ContractFailed {
        reason: String,
        data: Vec<u8>,
        gas_used: u64,
    },

    #[error("call depth exceeded: {depth} > {max}")]
    CallDepthExceeded { depth: u32, max: u32 },

    #[error("host error: {reason}")]
    HostError { reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl VmError {
    pub fn failed(reason: impl Into<String>) -> Self {
        VmError::ContractFailed {
            reason: reason.into(),
            data: Vec::new(),
            gas_used: 0,
        }
    }

    pub fn host(reason: impl Into<String>) -> Self {
        VmError::HostError {
            reason: reason.into(),
        }
    }

    /// Whether a failure inside a nested call must abort the calling
    /// contract too, rather than being reported back to it as a status.
    pub fn aborts_caller(&self) -> bool {
        matches!(
            self,
            VmError::OutOfGas { .. }
                | VmError::ExecutionPanic { .. }
                | VmError::Unauthorized { .. }
                | VmError::CallDepthExceeded { .. }
                | VmError::HostError { .. }
                | VmError::Storage(_)
        )
    }

    /// Gas the failed call burned before it stopped.
    pub fn gas_used(&self) -> u64 {
        match self {
            VmError::OutOfGas { consumed, .. } => *consumed,
            VmError::ContractFailed { gas_used, .. } => *gas_used,
            _ => 0,
        }
    }

    /// Stamp a contract failure with the gas its runtime metered.
    pub fn charged(self, used: u64) -> Self {
        match self {
            VmError::ContractFailed {
                reason,
                data,
                gas_used,
            } => VmError::ContractFailed {
                reason,
                data,
                gas_used: gas_used.max(used),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charged_stamps_only_contract_failures() {
        let err = VmError::failed("boom").charged(700);
        assert_eq!(err.gas_used(), 700);
        assert_eq!(err.charged(20).gas_used(), 700);

        let bad = VmError::InvalidArgument {
            reason: "x".to_string(),
        }
        .charged(700);
        assert_eq!(bad.gas_used(), 0);

        let oog = VmError::OutOfGas {
            wanted: 10,
            consumed: 10,
        };
        assert_eq!(oog.charged(3).gas_used(), 10);
    }

    #[test]
    fn test_host_errors_abort_the_caller() {
        assert!(VmError::host("bridge gone").aborts_caller());
        assert!(!VmError::failed("reverted").aborts_caller());
    }
}
