//! Native token balances.

use serde::{Deserialize, Serialize};
use strata_storage::store_set::StoreSet;
use strata_storage::traits::{prefixed_key, KvStore, SharedStore};
use strata_types::contract::StorageClass;
use strata_types::env::Event;
use strata_types::primitives::{format_address, parse_address, Address, Amount};
use strata_types::tx::AnyMsg;
use tracing::debug;

use super::{MsgHandler, NativeContext, QueryHandler};
use crate::error::CoreError;

pub const MSG_SEND: &str = "/bank.MsgSend";
pub const QUERY_BALANCE: &str = "/bank/balance";
pub const TRANSFER_EVENT: &str = "transfer";

/// Gas charged for one transfer.
pub const GAS_SEND: u64 = 1_000;

const BALANCE_PREFIX: &[u8] = b"bank:balance:";

pub struct BankKeeper {
    store: SharedStore,
}

impl BankKeeper {
    pub fn new(view: &StoreSet) -> Self {
        Self {
            store: view.store(StorageClass::CoreConsensus).clone(),
        }
    }

    pub fn balance(&self, address: &Address) -> Result<Amount, CoreError> {
        match self.store.get(&prefixed_key(BALANCE_PREFIX, address))? {
            Some(bytes) => {
                let raw: [u8; 16] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| CoreError::invalid("corrupt balance record"))?;
                Ok(Amount::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }

    fn set_balance(&self, address: &Address, amount: Amount) -> Result<(), CoreError> {
        let key = prefixed_key(BALANCE_PREFIX, address);
        if amount == 0 {
            self.store.delete(&key)?;
        } else {
            self.store.put(&key, &amount.to_be_bytes())?;
        }
        Ok(())
    }

    /// Credit new tokens, as during chain setup.
    pub fn mint(&self, address: &Address, amount: Amount) -> Result<(), CoreError> {
        let balance = self
            .balance(address)?
            .checked_add(amount)
            .ok_or_else(|| CoreError::invalid("balance overflow"))?;
        self.set_balance(address, balance)
    }

    pub fn send(&self, from: &Address, to: &Address, amount: Amount) -> Result<Event, CoreError> {
        let from_balance = self.balance(from)?;
        if from_balance < amount {
            return Err(CoreError::invalid(format!(
                "insufficient funds: {} has {from_balance}, needs {amount}",
                format_address(from)
            )));
        }
        if from != to {
            self.set_balance(from, from_balance - amount)?;
            self.mint(to, amount)?;
        }
        debug!(from = %format_address(from), to = %format_address(to), amount, "transfer");
        Ok(Event::new(TRANSFER_EVENT)
            .attr("sender", format_address(from))
            .attr("recipient", format_address(to))
            .attr("amount", amount.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgSend {
    pub from: String,
    pub to: String,
    pub amount: Amount,
}

impl MsgSend {
    pub fn new(from: &Address, to: &Address, amount: Amount) -> Self {
        Self {
            from: format_address(from),
            to: format_address(to),
            amount,
        }
    }

    pub fn to_any(&self) -> Result<AnyMsg, CoreError> {
        let value = serde_json::to_vec(self).map_err(|e| CoreError::invalid(e.to_string()))?;
        Ok(AnyMsg::new(MSG_SEND, value))
    }

    fn decode(msg: &AnyMsg) -> Result<Self, CoreError> {
        serde_json::from_slice(&msg.value)
            .map_err(|e| CoreError::invalid(format!("{MSG_SEND}: {e}")))
    }
}

pub struct SendHandler;

impl MsgHandler for SendHandler {
    fn signer(&self, msg: &AnyMsg) -> Result<Address, CoreError> {
        Ok(parse_address(&MsgSend::decode(msg)?.from)?)
    }

    fn handle(&self, ctx: &mut NativeContext<'_>, msg: &AnyMsg) -> Result<Vec<u8>, CoreError> {
        let send = MsgSend::decode(msg)?;
        ctx.gas.charge(GAS_SEND)?;
        let from = parse_address(&send.from)?;
        let to = parse_address(&send.to)?;
        let event = BankKeeper::new(ctx.view).send(&from, &to, send.amount)?;
        ctx.events.push(event);
        Ok(Vec::new())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceRequest {
    pub address: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub address: String,
    pub amount: Amount,
}

pub struct BalanceQuery;

impl QueryHandler for BalanceQuery {
    fn query(&self, view: &StoreSet, payload: &[u8]) -> Result<Vec<u8>, CoreError> {
        let req: BalanceRequest = serde_json::from_slice(payload)
            .map_err(|e| CoreError::invalid(format!("{QUERY_BALANCE}: {e}")))?;
        let address = parse_address(&req.address)?;
        let resp = BalanceResponse {
            address: format_address(&address),
            amount: BankKeeper::new(view).balance(&address)?,
        };
        serde_json::to_vec(&resp).map_err(|e| CoreError::invalid(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_moves_balance() {
        let set = StoreSet::in_memory();
        let bank = BankKeeper::new(&set);
        bank.mint(&[1u8; 20], 100).unwrap();
        let event = bank.send(&[1u8; 20], &[2u8; 20], 40).unwrap();
        assert_eq!(event.get("amount"), Some("40"));
        assert_eq!(bank.balance(&[1u8; 20]).unwrap(), 60);
        assert_eq!(bank.balance(&[2u8; 20]).unwrap(), 40);
    }

    #[test]
    fn test_insufficient_funds_changes_nothing() {
        let set = StoreSet::in_memory();
        let bank = BankKeeper::new(&set);
        bank.mint(&[1u8; 20], 10).unwrap();
        assert!(bank.send(&[1u8; 20], &[2u8; 20], 11).is_err());
        assert_eq!(bank.balance(&[1u8; 20]).unwrap(), 10);
        assert_eq!(bank.balance(&[2u8; 20]).unwrap(), 0);
    }

    #[test]
    fn test_signer_is_sender_field() {
        let msg = MsgSend::new(&[4u8; 20], &[5u8; 20], 1).to_any().unwrap();
        assert_eq!(SendHandler.signer(&msg).unwrap(), [4u8; 20]);
    }

    #[test]
    fn test_balance_query() {
        let set = StoreSet::in_memory();
        BankKeeper::new(&set).mint(&[6u8; 20], 77).unwrap();
        let payload = format!(r#"{{"address":"{}"}}"#, format_address(&[6u8; 20]));
        let out = BalanceQuery.query(&set, payload.as_bytes()).unwrap();
        let resp: BalanceResponse = serde_json::from_slice(&out).unwrap();
        assert_eq!(resp.amount, 77);
    }
}
