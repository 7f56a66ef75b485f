//! Panic boundary around backend and native-module code.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::warn;

use crate::error::VmError;

/// Run `f`, converting a panic into `ExecutionPanic`. Gas exhaustion never
/// unwinds: meters return `OutOfGas` through the `Result`.
pub fn run_guarded<T>(
    context: &str,
    f: impl FnOnce() -> Result<T, VmError>,
) -> Result<T, VmError> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let err = panic_to_error(context, payload);
            warn!(context, error = %err, "recovered panic");
            Err(err)
        }
    }
}

fn panic_to_error(context: &str, payload: Box<dyn Any + Send>) -> VmError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    VmError::ExecutionPanic {
        reason: format!("{context}: {message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_passes_through() {
        assert_eq!(run_guarded("ok", || Ok(7)).unwrap(), 7);
    }

    #[test]
    fn test_panic_becomes_execution_panic() {
        let err = run_guarded::<()>("bank", || panic!("boom")).unwrap_err();
        match err {
            VmError::ExecutionPanic { reason } => {
                assert!(reason.contains("bank"));
                assert!(reason.contains("boom"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_metered_out_of_gas_passes_through() {
        let err = run_guarded::<()>("bank", || {
            let mut meter = crate::gas::GasMeter::new(10);
            meter.charge(25)?;
            Ok(())
        })
        .unwrap_err();
        assert!(matches!(err, VmError::OutOfGas { wanted: 10, .. }));
    }
}
