//! Storage layer for the Strata contract engine.
//!
//! Provides a [`KvStore`](traits::KvStore) trait with memory and SQLite
//! backends, a write-buffering [`CacheStore`](cache::CacheStore), the
//! five-class [`StoreSet`](store_set::StoreSet) with nested branches, the
//! per-contract storage multiplexer, and typed stores for code, contracts,
//! and roles.

pub mod cache;
pub mod code_store;
pub mod contract_store;
pub mod error;
pub mod memory;
pub mod multiplexer;
pub mod prefix;
pub mod role_store;
pub mod sqlite;
pub mod store_set;
pub mod traits;

pub(crate) fn encode<T: borsh::BorshSerialize>(value: &T) -> Result<Vec<u8>, error::StorageError> {
    borsh::to_vec(value).map_err(|e| error::StorageError::SerializationError {
        reason: e.to_string(),
    })
}

pub(crate) fn decode<T: borsh::BorshDeserialize>(bytes: &[u8]) -> Result<T, error::StorageError> {
    T::try_from_slice(bytes).map_err(|e| error::StorageError::DeserializationError {
        reason: e.to_string(),
    })
}
