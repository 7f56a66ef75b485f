//! Node host for Strata chains.
//!
//! Loads a TOML [`NodeConfig`](config::NodeConfig), opens each configured
//! [`Chain`](chain::Chain) with its own state and engine, delivers signed
//! transactions, and coordinates atomic bundles across the hosted chains.

pub mod app;
pub mod chain;
pub mod config;
pub mod error;
pub mod logging;
pub mod participant;
