use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use strata_core::EngineConfig;
use strata_types::primitives::ChainId;

use crate::error::NodeError;

pub const CONFIG_FILE_NAME: &str = "strata.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Chains hosted by this node. Atomic bundles may span any of them.
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: ChainId,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    /// Directory holding one database file per chain. Unused by the memory
    /// backend.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_backend() -> StorageBackend {
    StorageBackend::Memory
}

fn default_data_dir() -> String {
    dirs::home_dir()
        .map(|h| h.join(".strata").join("data").to_string_lossy().into_owned())
        .unwrap_or_else(|| "./strata-data".to_string())
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            chains: vec![ChainConfig {
                chain_id: "strata-1".to_string(),
                storage: StorageConfig::default(),
            }],
            engine: EngineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, NodeError> {
        let contents = std::fs::read_to_string(path).map_err(|e| NodeError::ConfigError {
            reason: format!("failed to read config file '{}': {}", path, e),
        })?;
        let config: NodeConfig = toml::from_str(&contents).map_err(|e| NodeError::ConfigError {
            reason: format!("failed to parse config file '{}': {}", path, e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write a default configuration file into `dir`.
    pub fn init(dir: &str) -> Result<(), NodeError> {
        let dir_path = Path::new(dir);
        if !dir_path.exists() {
            std::fs::create_dir_all(dir_path)?;
        }

        let config = NodeConfig::default();
        let toml_str = toml::to_string_pretty(&config).map_err(|e| NodeError::ConfigError {
            reason: format!("failed to serialize default config: {}", e),
        })?;
        std::fs::write(dir_path.join(CONFIG_FILE_NAME), toml_str)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), NodeError> {
        if self.chains.is_empty() {
            return Err(NodeError::ConfigError {
                reason: "at least one chain must be configured".to_string(),
            });
        }
        let mut seen = BTreeSet::new();
        for chain in &self.chains {
            if chain.chain_id.is_empty() {
                return Err(NodeError::ConfigError {
                    reason: "chain id must not be empty".to_string(),
                });
            }
            if !seen.insert(chain.chain_id.as_str()) {
                return Err(NodeError::ConfigError {
                    reason: format!("chain '{}' is configured twice", chain.chain_id),
                });
            }
        }
        self.engine.validate().map_err(|e| NodeError::ConfigError {
            reason: format!("engine: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.chains.len(), 1);
        assert_eq!(config.chains[0].storage.backend, StorageBackend::Memory);
        assert_eq!(config.logging.level, "info");
        config.validate().unwrap();
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = NodeConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let deserialized: NodeConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(deserialized.chains[0].chain_id, config.chains[0].chain_id);
        assert_eq!(
            deserialized.engine.query_gas_limit,
            config.engine.query_gas_limit
        );
    }

    #[test]
    fn test_minimal_file_uses_defaults() {
        let config: NodeConfig = toml::from_str(
            r#"
            [[chains]]
            chain_id = "alpha"

            [[chains]]
            chain_id = "beta"
            storage = { backend = "sqlite", data_dir = "/tmp/strata" }

            [engine]
            query_gas_limit = 1000
            "#,
        )
        .unwrap();
        assert_eq!(config.chains[1].storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.engine.query_gas_limit, 1000);
        assert_eq!(config.engine.instance_cost, EngineConfig::default().instance_cost);
        config.validate().unwrap();
    }

    #[test]
    fn test_duplicate_chain_rejected() {
        let mut config = NodeConfig::default();
        config.chains.push(config.chains[0].clone());
        assert!(matches!(config.validate(), Err(NodeError::ConfigError { .. })));
    }

    #[test]
    fn test_init_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_str().unwrap();
        NodeConfig::init(dir).unwrap();

        let path = tmp.path().join(CONFIG_FILE_NAME);
        let config = NodeConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.chains[0].chain_id, "strata-1");
    }

    #[test]
    fn test_load_nonexistent_file() {
        assert!(NodeConfig::load("/nonexistent/path/strata.toml").is_err());
    }
}
