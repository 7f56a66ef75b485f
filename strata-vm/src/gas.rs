use crate::error::VmError;

// ─── Gas Cost Constants ─────────────────────────────────────────────────────

/// Cost of a storage read.
pub const GAS_STATE_READ: u64 = 100;

/// Cost of a storage write or delete.
pub const GAS_STATE_WRITE: u64 = 200;

/// Cost per byte read from storage.
pub const GAS_BYTE_READ: u64 = 1;

/// Cost per byte written to storage.
pub const GAS_BYTE_WRITE: u64 = 2;

/// Cost of a log line.
pub const GAS_LOG: u64 = 50;

/// Cost of emitting an event.
pub const GAS_EMIT_EVENT: u64 = 75;

/// Fixed cost of a cross-contract call, on top of the callee's gas.
pub const GAS_CALL: u64 = 700;

/// Fixed cost of a native message or query through the bridge.
pub const GAS_NATIVE: u64 = 500;

/// Cost per byte copied between host and guest.
pub const GAS_BYTE_COPY: u64 = 1;

/// Cost of an FSM transition.
pub const GAS_FSM_TRANSITION: u64 = 100;

/// Cost of an FSM action.
pub const GAS_FSM_ACTION: u64 = 50;

/// Default gas limit when none is specified.
pub const DEFAULT_GAS_LIMIT: u64 = 10_000_000;

/// Maximum memory a Wasm instance may grow to: 16 MB.
pub const MAX_WASM_MEMORY_BYTES: usize = 16 * 1024 * 1024;

/// Maximum nesting of cross-contract calls.
pub const MAX_CALL_DEPTH: u32 = 16;

/// Maximum contract storage key size.
pub const MAX_KEY_SIZE: usize = 1024;

/// Maximum contract storage value size.
pub const MAX_VALUE_SIZE: usize = 65_536;

/// Maximum events per call.
pub const MAX_EVENTS: usize = 1_000;

// ─── Gas Meter ──────────────────────────────────────────────────────────────

/// Tracks gas consumption of one call.
#[derive(Debug, Clone)]
pub struct GasMeter {
    pub limit: u64,
    pub used: u64,
}

impl GasMeter {
    pub fn new(limit: u64) -> Self {
        Self { limit, used: 0 }
    }

    /// Charge `amount`. On exhaustion the meter is left at its limit and the
    /// error reports the limit as wanted and the attempted total as consumed.
    pub fn charge(&mut self, amount: u64) -> Result<(), VmError> {
        let new_used = self.used.saturating_add(amount);
        if new_used > self.limit {
            self.used = self.limit;
            return Err(VmError::OutOfGas {
                wanted: self.limit,
                consumed: new_used,
            });
        }
        self.used = new_used;
        Ok(())
    }

    /// Charge `base + per_unit * units`.
    pub fn charge_linear(&mut self, base: u64, per_unit: u64, units: usize) -> Result<(), VmError> {
        self.charge(base.saturating_add(per_unit.saturating_mul(units as u64)))
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }

    pub fn used(&self) -> u64 {
        self.used
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gas_meter_charge() {
        let mut meter = GasMeter::new(1000);
        assert!(meter.charge(100).is_ok());
        assert_eq!(meter.used(), 100);
        assert_eq!(meter.remaining(), 900);
    }

    #[test]
    fn test_gas_meter_exact_limit() {
        let mut meter = GasMeter::new(100);
        assert!(meter.charge(100).is_ok());
        assert_eq!(meter.remaining(), 0);
        assert!(meter.charge(1).is_err());
    }

    #[test]
    fn test_out_of_gas_reports_wanted_and_consumed() {
        let mut meter = GasMeter::new(100);
        meter.charge(60).unwrap();
        match meter.charge_linear(10, 10, 4) {
            Err(VmError::OutOfGas { wanted, consumed }) => {
                assert_eq!(wanted, 100);
                assert_eq!(consumed, 110);
            }
            other => panic!("expected OutOfGas, got {other:?}"),
        }
        assert_eq!(meter.remaining(), 0);
    }
}
