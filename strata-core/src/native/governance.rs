//! Governance messages over the role registry.

use serde::{Deserialize, Serialize};
use strata_types::primitives::{format_address, parse_address, Address};
use strata_types::tx::AnyMsg;

use super::{MsgHandler, NativeContext};
use crate::error::CoreError;
use crate::roles::RoleRegistry;

pub const MSG_REGISTER_ROLE: &str = "/roles.MsgRegisterRole";
pub const MSG_DEREGISTER_ROLE: &str = "/roles.MsgDeregisterRole";

const GAS_ROLE_UPDATE: u64 = 5_000;

/// Reassign `role` to `contract` under `label`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgRegisterRole {
    pub authority: String,
    pub role: String,
    pub label: String,
    pub contract: String,
}

impl MsgRegisterRole {
    pub fn new(authority: &Address, role: &str, label: &str, contract: &Address) -> Self {
        Self {
            authority: format_address(authority),
            role: role.to_string(),
            label: label.to_string(),
            contract: format_address(contract),
        }
    }

    pub fn to_any(&self) -> Result<AnyMsg, CoreError> {
        let value = serde_json::to_vec(self).map_err(|e| CoreError::invalid(e.to_string()))?;
        Ok(AnyMsg::new(MSG_REGISTER_ROLE, value))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgDeregisterRole {
    pub authority: String,
    pub label: String,
}

impl MsgDeregisterRole {
    pub fn new(authority: &Address, label: &str) -> Self {
        Self {
            authority: format_address(authority),
            label: label.to_string(),
        }
    }

    pub fn to_any(&self) -> Result<AnyMsg, CoreError> {
        let value = serde_json::to_vec(self).map_err(|e| CoreError::invalid(e.to_string()))?;
        Ok(AnyMsg::new(MSG_DEREGISTER_ROLE, value))
    }
}

fn decode<T: for<'de> Deserialize<'de>>(msg: &AnyMsg) -> Result<T, CoreError> {
    serde_json::from_slice(&msg.value)
        .map_err(|e| CoreError::invalid(format!("{}: {e}", msg.type_url)))
}

pub struct RegisterRoleHandler;

impl MsgHandler for RegisterRoleHandler {
    fn signer(&self, msg: &AnyMsg) -> Result<Address, CoreError> {
        Ok(parse_address(&decode::<MsgRegisterRole>(msg)?.authority)?)
    }

    fn handle(&self, ctx: &mut NativeContext<'_>, msg: &AnyMsg) -> Result<Vec<u8>, CoreError> {
        let req: MsgRegisterRole = decode(msg)?;
        ctx.gas.charge(GAS_ROLE_UPDATE)?;
        let authority = parse_address(&req.authority)?;
        let contract = parse_address(&req.contract)?;
        let events = RoleRegistry::new(ctx.view).register_role_handler(
            &authority,
            &req.role,
            &req.label,
            &contract,
        )?;
        ctx.events.extend(events);
        Ok(Vec::new())
    }
}

pub struct DeregisterRoleHandler;

impl MsgHandler for DeregisterRoleHandler {
    fn signer(&self, msg: &AnyMsg) -> Result<Address, CoreError> {
        Ok(parse_address(&decode::<MsgDeregisterRole>(msg)?.authority)?)
    }

    fn handle(&self, ctx: &mut NativeContext<'_>, msg: &AnyMsg) -> Result<Vec<u8>, CoreError> {
        let req: MsgDeregisterRole = decode(msg)?;
        ctx.gas.charge(GAS_ROLE_UPDATE)?;
        let registry = RoleRegistry::new(ctx.view);
        registry.require_governance(&parse_address(&req.authority)?)?;
        ctx.events.push(registry.deregister_role(&req.label)?);
        Ok(Vec::new())
    }
}
