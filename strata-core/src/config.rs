use serde::{Deserialize, Serialize};
use strata_types::constants::{MAX_CODE_SIZE, MAX_INTERPRETED_CODE_SIZE};
use strata_types::contract::StorageClass;
use strata_vm::gas::{DEFAULT_GAS_LIMIT, MAX_CALL_DEPTH};

use crate::error::CoreError;

/// Limits and prices applied by the contract engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Largest compiled bytecode accepted by `store_code`.
    #[serde(default = "default_max_code_size")]
    pub max_code_size: usize,
    /// Largest script source accepted for interpreted code.
    #[serde(default = "default_max_interpreted_code_size")]
    pub max_interpreted_code_size: usize,
    #[serde(default = "default_gas_limit")]
    pub default_gas_limit: u64,
    /// Ceiling on the gas a query may use, whatever the caller asks for.
    #[serde(default = "default_query_gas_limit")]
    pub query_gas_limit: u64,
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: u32,
    /// Fixed gas charged for loading a contract before it runs.
    #[serde(default = "default_instance_cost")]
    pub instance_cost: u64,
    /// Gas charged per byte of stored bytecode.
    #[serde(default = "default_per_byte_cost")]
    pub per_byte_cost: u64,
    /// Class assigned to new contracts that do not ask for one.
    #[serde(default = "default_storage_class")]
    pub default_storage_class: StorageClass,
}

fn default_max_code_size() -> usize {
    MAX_CODE_SIZE
}

fn default_max_interpreted_code_size() -> usize {
    MAX_INTERPRETED_CODE_SIZE
}

fn default_gas_limit() -> u64 {
    DEFAULT_GAS_LIMIT
}

fn default_query_gas_limit() -> u64 {
    3_000_000
}

fn default_max_call_depth() -> u32 {
    MAX_CALL_DEPTH
}

fn default_instance_cost() -> u64 {
    1_000
}

fn default_per_byte_cost() -> u64 {
    1
}

fn default_storage_class() -> StorageClass {
    StorageClass::CoreConsensus
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_code_size: default_max_code_size(),
            max_interpreted_code_size: default_max_interpreted_code_size(),
            default_gas_limit: default_gas_limit(),
            query_gas_limit: default_query_gas_limit(),
            max_call_depth: default_max_call_depth(),
            instance_cost: default_instance_cost(),
            per_byte_cost: default_per_byte_cost(),
            default_storage_class: default_storage_class(),
        }
    }
}

impl EngineConfig {
    /// Size limit for code with the given dependency labels.
    pub fn code_size_limit(&self, interpreted: bool) -> usize {
        if interpreted {
            self.max_interpreted_code_size
        } else {
            self.max_code_size
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_code_size == 0 || self.max_interpreted_code_size == 0 {
            return Err(CoreError::invalid("code size limits must be positive"));
        }
        if self.query_gas_limit == 0 || self.default_gas_limit == 0 {
            return Err(CoreError::invalid("gas limits must be positive"));
        }
        if self.query_gas_limit > self.default_gas_limit {
            return Err(CoreError::invalid(format!(
                "query gas limit {} exceeds the execute default {}",
                self.query_gas_limit, self.default_gas_limit
            )));
        }
        if self.max_call_depth == 0 {
            return Err(CoreError::invalid("max_call_depth must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert!(config.query_gas_limit < config.default_gas_limit);
        assert_eq!(config.code_size_limit(true), MAX_INTERPRETED_CODE_SIZE);
        assert_eq!(config.code_size_limit(false), MAX_CODE_SIZE);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"query_gas_limit": 5000}"#).unwrap();
        assert_eq!(config.query_gas_limit, 5000);
        assert_eq!(config.max_call_depth, MAX_CALL_DEPTH);
        assert_eq!(config.default_storage_class, StorageClass::CoreConsensus);
    }

    #[test]
    fn test_query_ceiling_above_execute_default_rejected() {
        let config = EngineConfig {
            query_gas_limit: DEFAULT_GAS_LIMIT + 1,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CoreError::InvalidArgument { .. })
        ));
    }
}
