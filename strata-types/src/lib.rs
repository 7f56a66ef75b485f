//! Shared type definitions for the Strata contract engine.
//!
//! Addresses, checksums, code and contract records, storage classes, the
//! execution environment passed to backends, transactions and atomic bundles.

pub mod atomic;
pub mod constants;
pub mod contract;
pub mod env;
pub mod error;
pub mod primitives;
pub mod tx;
