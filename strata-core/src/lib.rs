//! Chain-level contract engine for Strata.
//!
//! Provides code storage and pinning, contract address derivation, the role
//! registry with governed reassignment, the bank and auth native modules, the
//! host bridge contracts call out through, the [`ContractManager`]
//! orchestrator, and a paginated [`QueryService`].

pub mod address;
pub mod bridge;
pub mod config;
pub mod error;
pub mod manager;
pub mod native;
pub mod query;
pub mod roles;

pub use config::EngineConfig;
pub use error::CoreError;
pub use manager::{
    transact, ContractManager, ExecuteRequest, InstantiateRequest, Instantiated, QueryRequest,
    StoredCode,
};
pub use query::QueryService;
pub use roles::RoleRegistry;
