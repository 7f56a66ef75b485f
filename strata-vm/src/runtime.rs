use std::cmp::Reverse;
use std::sync::Arc;

use strata_storage::prefix::PrefixStore;
use strata_types::env::{ContractResponse, EntryPoint, Env, MessageInfo};
use strata_types::primitives::Checksum;
use tracing::debug;

use crate::bridge::HostBridge;
use crate::error::VmError;

/// Everything a backend needs to run one entry point of one contract.
#[derive(Clone)]
pub struct Invocation {
    pub env: Env,
    pub info: MessageInfo,
    /// The contract's own key/value view in its storage class.
    pub store: PrefixStore,
    pub bridge: Arc<dyn HostBridge>,
    /// Dependency labels of the contract's code.
    pub deps: Vec<String>,
    /// Whether the code's compiled artifact should be kept warm.
    pub pinned: bool,
    /// Nesting depth of this call (0 for a transaction-level call).
    pub depth: u32,
}

/// A contract execution backend.
///
/// Every backend receives the same [`Invocation`] shape and returns the same
/// [`ContractResponse`], so contracts on different backends can call each
/// other through the bridge.
pub trait Runtime: Send + Sync {
    fn name(&self) -> &'static str;

    fn invoke(&self, entry: EntryPoint, inv: Invocation) -> Result<ContractResponse, VmError>;

    /// Reject code the backend can never run. Called when code is stored.
    fn validate(&self, _bytecode: &[u8]) -> Result<(), VmError> {
        Ok(())
    }

    /// Prepare and retain the compiled artifact for `checksum`.
    fn pin(&self, _checksum: &Checksum, _bytecode: &[u8]) -> Result<(), VmError> {
        Ok(())
    }

    /// Drop any retained artifact for `checksum`.
    fn unpin(&self, _checksum: &Checksum) {}

    fn instantiate(&self, inv: Invocation) -> Result<ContractResponse, VmError> {
        self.invoke(EntryPoint::Instantiate, inv)
    }

    fn execute(&self, inv: Invocation) -> Result<ContractResponse, VmError> {
        self.invoke(EntryPoint::Execute, inv)
    }

    fn query(&self, inv: Invocation) -> Result<ContractResponse, VmError> {
        self.invoke(EntryPoint::Query, inv)
    }
}

/// Maps dependency-label patterns to backends.
///
/// A label matches a pattern when it equals the pattern or starts with it.
/// Among all matches across all labels the longest pattern wins; ties go to
/// the lexicographically smaller pattern, then the smaller label. The result
/// depends only on the set of labels and registered patterns, never on their
/// order.
#[derive(Default)]
pub struct RuntimeRegistry {
    entries: Vec<(String, Arc<dyn Runtime>)>,
}

/// Labels that point at another contract (`0x<address>` or
/// `0x<address>:<role>`) take no part in backend selection.
fn is_contract_reference(label: &str) -> bool {
    label.starts_with("0x")
}

fn rank<'a>(pattern: &'a str, label: &'a str) -> (usize, Reverse<&'a str>, Reverse<&'a str>) {
    (pattern.len(), Reverse(pattern), Reverse(label))
}

/// The most specific label under `prefix`: the longest wins, ties go to the
/// lexicographically smaller label.
pub fn most_specific_label<'a>(labels: &'a [String], prefix: &str) -> Option<&'a str> {
    labels
        .iter()
        .map(String::as_str)
        .filter(|l| !is_contract_reference(l) && l.starts_with(prefix))
        .max_by_key(|l| (l.len(), Reverse(*l)))
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `runtime` for labels matching `pattern`. Re-registering a
    /// pattern replaces the earlier backend.
    pub fn register(&mut self, pattern: impl Into<String>, runtime: Arc<dyn Runtime>) {
        let pattern = pattern.into();
        self.entries.retain(|(p, _)| *p != pattern);
        self.entries.push((pattern, runtime));
    }

    /// Choose the backend for a dependency list.
    pub fn select(&self, labels: &[String]) -> Result<(String, Arc<dyn Runtime>), VmError> {
        let mut best: Option<(&str, &str, &Arc<dyn Runtime>)> = None;
        for label in labels.iter().filter(|l| !is_contract_reference(l)) {
            for (pattern, runtime) in &self.entries {
                if !label.starts_with(pattern.as_str()) {
                    continue;
                }
                let better = match best {
                    None => true,
                    Some((best_pattern, best_label, _)) => {
                        rank(pattern, label) > rank(best_pattern, best_label)
                    }
                };
                if better {
                    best = Some((pattern.as_str(), label.as_str(), runtime));
                }
            }
        }
        match best {
            Some((pattern, label, runtime)) => {
                debug!(pattern, label, runtime = runtime.name(), "selected runtime");
                Ok((pattern.to_string(), runtime.clone()))
            }
            None => Err(VmError::UnsupportedRuntime {
                labels: labels.to_vec(),
            }),
        }
    }
}
