//! Hashing and signature primitives.
//!
//! SHA-256 content checksums for bytecode, Keccak-256 for contract address
//! derivation, BLAKE3 for account addresses and bundle ids, Ed25519 for
//! transaction signatures.

pub mod address;
pub mod error;
pub mod hash;
pub mod keys;
