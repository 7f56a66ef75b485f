//! The host bridge handed to every running contract.

use strata_storage::store_set::StoreSet;
use strata_types::env::{ContractResponse, EntryPoint};
use strata_types::primitives::{format_address, Address, BlockContext, Gas};
use strata_types::tx::AnyMsg;
use strata_vm::bridge::{HostBridge, InterpreterCode, NativeOutcome, SubCall};
use strata_vm::error::VmError;
use tracing::debug;

use crate::manager::{Call, ContractManager};
use crate::native::bank::BankKeeper;
use crate::roles::RoleRegistry;

/// Bridge bound to the state view of one executing contract.
///
/// Every nested call runs in its own branch of that view, so a failed callee
/// leaves the caller's pending writes untouched.
pub struct CallBridge {
    manager: ContractManager,
    view: StoreSet,
    block: BlockContext,
}

impl CallBridge {
    pub fn new(manager: ContractManager, view: StoreSet, block: BlockContext) -> Self {
        Self {
            manager,
            view,
            block,
        }
    }

    fn nested_call(&self, view: &StoreSet, call: &SubCall) -> Result<ContractResponse, VmError> {
        let target = RoleRegistry::new(view).get_address_or_role(&call.target)?;
        let entry = if call.read_only {
            EntryPoint::Query
        } else {
            self.manager
                .can_call_system_contract(view, &call.caller, &target)?;
            if call.funds > 0 {
                BankKeeper::new(view).send(&call.caller, &target, call.funds)?;
            }
            EntryPoint::Execute
        };
        Ok(self.manager.dispatch(
            view,
            &self.block,
            Call {
                entry,
                address: target,
                sender: call.caller,
                origin: call.origin,
                funds: call.funds,
                msg: call.msg.clone(),
                gas_limit: call.gas_limit,
                depth: call.depth + 1,
            },
        )?)
    }
}

impl HostBridge for CallBridge {
    fn call_contract(&self, call: SubCall) -> Result<ContractResponse, VmError> {
        let max = self.manager.config().max_call_depth;
        if call.depth + 1 > max {
            return Err(VmError::CallDepthExceeded {
                depth: call.depth + 1,
                max,
            });
        }
        debug!(
            caller = %format_address(&call.caller),
            target = %call.target,
            depth = call.depth + 1,
            read_only = call.read_only,
            "nested call"
        );
        let branch = self.view.branch();
        match self.nested_call(branch.view(), &call) {
            Ok(resp) => {
                if call.read_only {
                    branch.discard();
                } else {
                    branch.commit()?;
                }
                Ok(resp)
            }
            Err(err) => {
                branch.discard();
                Err(err)
            }
        }
    }

    fn execute_native(
        &self,
        caller: &Address,
        msg: &AnyMsg,
        gas_limit: Gas,
    ) -> Result<NativeOutcome, VmError> {
        Ok(self
            .manager
            .execute_native(&self.view, &self.block, caller, msg, gas_limit)?)
    }

    fn query_native(&self, path: &str, payload: &[u8]) -> Result<Vec<u8>, VmError> {
        Ok(self.manager.query_native(&self.view, path, payload)?)
    }

    fn resolve_interpreter(&self, label: &str) -> Result<InterpreterCode, VmError> {
        Ok(self.manager.resolve_interpreter(&self.view, label)?)
    }
}
