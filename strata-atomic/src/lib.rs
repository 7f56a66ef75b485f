//! Atomic multi-chain transactions for Strata.
//!
//! A client signs one sub-transaction per chain and wraps them with
//! [`AtomicTxBuilder`]; the leader chain's [`AtomicCoordinator`] runs a
//! two-phase commit over every [`Participant`] so the bundle takes effect on
//! all chains or on none.

pub mod builder;
pub mod coordinator;
pub mod error;
pub mod participant;

pub use builder::{leader_chain_id, AtomicTxBuilder};
pub use coordinator::{bundle_id, AtomicCoordinator, AtomicOutcome};
pub use error::AtomicError;
pub use participant::Participant;
