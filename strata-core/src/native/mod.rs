//! Native chain modules and the routers contracts reach them through.
//!
//! A message handler declares the address that must sign its message; the
//! bridge refuses to run it unless that address is the caller. Handlers run
//! behind the same panic boundary as contract backends, and the events they
//! emit are attributed to the calling contract before they join its event
//! stream.

pub mod auth;
pub mod bank;
pub mod governance;

use std::collections::BTreeMap;
use std::sync::Arc;

use strata_storage::store_set::StoreSet;
use strata_types::constants::events::ATTR_CONTRACT;
use strata_types::env::Event;
use strata_types::primitives::{format_address, Address, BlockContext, Gas};
use strata_types::tx::AnyMsg;
use strata_vm::bridge::NativeOutcome;
use strata_vm::gas::{GasMeter, GAS_NATIVE};
use strata_vm::guard::run_guarded;
use tracing::debug;

use crate::error::CoreError;

/// State a native message handler runs against.
pub struct NativeContext<'a> {
    pub view: &'a StoreSet,
    pub block: &'a BlockContext,
    pub gas: GasMeter,
    pub events: Vec<Event>,
}

pub trait MsgHandler: Send + Sync {
    /// Address that must have authorised the message.
    fn signer(&self, msg: &AnyMsg) -> Result<Address, CoreError>;

    fn handle(&self, ctx: &mut NativeContext<'_>, msg: &AnyMsg) -> Result<Vec<u8>, CoreError>;
}

pub trait QueryHandler: Send + Sync {
    fn query(&self, view: &StoreSet, payload: &[u8]) -> Result<Vec<u8>, CoreError>;
}

/// Message handlers keyed by type URL.
#[derive(Default, Clone)]
pub struct MsgRouter {
    handlers: BTreeMap<String, Arc<dyn MsgHandler>>,
}

impl MsgRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, type_url: impl Into<String>, handler: Arc<dyn MsgHandler>) {
        self.handlers.insert(type_url.into(), handler);
    }

    pub fn handler(&self, type_url: &str) -> Result<&Arc<dyn MsgHandler>, CoreError> {
        self.handlers
            .get(type_url)
            .ok_or_else(|| CoreError::not_found(format!("native handler {type_url}")))
    }
}

/// Query handlers keyed by path.
#[derive(Default, Clone)]
pub struct QueryRouter {
    routes: BTreeMap<String, Arc<dyn QueryHandler>>,
}

impl QueryRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, path: impl Into<String>, handler: Arc<dyn QueryHandler>) {
        self.routes.insert(path.into(), handler);
    }

    pub fn route(&self, path: &str) -> Result<&Arc<dyn QueryHandler>, CoreError> {
        self.routes
            .get(path)
            .ok_or_else(|| CoreError::not_found(format!("native query {path}")))
    }
}

/// Tag every event that does not already name a contract with `address`.
pub fn attribute_events(events: &mut [Event], address: &Address) {
    let hex = format_address(address);
    for event in events.iter_mut() {
        if event.get(ATTR_CONTRACT).is_none() {
            event.attributes.push((ATTR_CONTRACT.to_string(), hex.clone()));
        }
    }
}

/// The bank, auth and governance modules with their routes.
#[derive(Clone)]
pub struct NativeModules {
    msgs: MsgRouter,
    queries: QueryRouter,
}

impl Default for NativeModules {
    fn default() -> Self {
        let mut msgs = MsgRouter::new();
        msgs.register(bank::MSG_SEND, Arc::new(bank::SendHandler));
        msgs.register(
            governance::MSG_REGISTER_ROLE,
            Arc::new(governance::RegisterRoleHandler),
        );
        msgs.register(
            governance::MSG_DEREGISTER_ROLE,
            Arc::new(governance::DeregisterRoleHandler),
        );
        let mut queries = QueryRouter::new();
        queries.register(bank::QUERY_BALANCE, Arc::new(bank::BalanceQuery));
        queries.register(auth::QUERY_ACCOUNT, Arc::new(auth::AccountQuery));
        Self { msgs, queries }
    }
}

impl NativeModules {
    pub fn new(msgs: MsgRouter, queries: QueryRouter) -> Self {
        Self { msgs, queries }
    }

    pub fn msgs_mut(&mut self) -> &mut MsgRouter {
        &mut self.msgs
    }

    pub fn queries_mut(&mut self) -> &mut QueryRouter {
        &mut self.queries
    }

    /// Run a native message on behalf of `caller`.
    ///
    /// Writes go straight into `view`; callers that need rollback pass a
    /// branch.
    pub fn execute(
        &self,
        view: &StoreSet,
        block: &BlockContext,
        caller: &Address,
        msg: &AnyMsg,
        gas_limit: Gas,
    ) -> Result<NativeOutcome, CoreError> {
        let handler = self.msgs.handler(&msg.type_url)?.clone();
        let signer = handler.signer(msg)?;
        if signer != *caller {
            return Err(CoreError::unauthorized(format!(
                "{} is signed by {}, not the caller {}",
                msg.type_url,
                format_address(&signer),
                format_address(caller)
            )));
        }

        let mut ctx = NativeContext {
            view,
            block,
            gas: GasMeter::new(gas_limit),
            events: Vec::new(),
        };
        ctx.gas.charge(GAS_NATIVE)?;
        let data = run_guarded(&msg.type_url, || {
            handler.handle(&mut ctx, msg).map_err(Into::into)
        })
        .map_err(|e| e.charged(ctx.gas.used()))?;

        let mut events = std::mem::take(&mut ctx.events);
        attribute_events(&mut events, caller);
        debug!(
            type_url = %msg.type_url,
            caller = %format_address(caller),
            events = events.len(),
            "native message executed"
        );
        Ok(NativeOutcome {
            data,
            events,
            gas_used: ctx.gas.used(),
        })
    }

    pub fn query(&self, view: &StoreSet, path: &str, payload: &[u8]) -> Result<Vec<u8>, CoreError> {
        let handler = self.queries.route(path)?.clone();
        Ok(run_guarded(path, || {
            handler.query(view, payload).map_err(Into::into)
        })?)
    }
}

#[cfg(test)]
mod tests {
    use super::bank::{BankKeeper, MsgSend};
    use super::*;

    fn block() -> BlockContext {
        BlockContext {
            chain_id: "alpha".to_string(),
            height: 1,
            time: 0,
            gas_limit: 0,
            proposer: [0u8; 20],
        }
    }

    struct Panicking;

    impl MsgHandler for Panicking {
        fn signer(&self, _: &AnyMsg) -> Result<Address, CoreError> {
            Ok([1u8; 20])
        }

        fn handle(&self, _: &mut NativeContext<'_>, _: &AnyMsg) -> Result<Vec<u8>, CoreError> {
            panic!("handler bug")
        }
    }

    #[test]
    fn test_signer_must_be_caller() {
        let set = StoreSet::in_memory();
        BankKeeper::new(&set).mint(&[1u8; 20], 10).unwrap();
        let msg = MsgSend::new(&[1u8; 20], &[2u8; 20], 5).to_any().unwrap();
        let err = NativeModules::default()
            .execute(&set, &block(), &[9u8; 20], &msg, 100_000)
            .unwrap_err();
        assert!(matches!(err, CoreError::Unauthorized { .. }));
        assert_eq!(BankKeeper::new(&set).balance(&[1u8; 20]).unwrap(), 10);
    }

    #[test]
    fn test_events_attributed_to_caller() {
        let set = StoreSet::in_memory();
        BankKeeper::new(&set).mint(&[1u8; 20], 10).unwrap();
        let msg = MsgSend::new(&[1u8; 20], &[2u8; 20], 5).to_any().unwrap();
        let outcome = NativeModules::default()
            .execute(&set, &block(), &[1u8; 20], &msg, 100_000)
            .unwrap();
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(
            outcome.events[0].get(ATTR_CONTRACT),
            Some(format_address(&[1u8; 20]).as_str())
        );
        assert!(outcome.gas_used >= GAS_NATIVE);
    }

    #[test]
    fn test_handler_panic_is_recovered() {
        let mut modules = NativeModules::default();
        modules.msgs_mut().register("/test.Panic", Arc::new(Panicking));
        let set = StoreSet::in_memory();
        let err = modules
            .execute(&set, &block(), &[1u8; 20], &AnyMsg::new("/test.Panic", vec![]), 100_000)
            .unwrap_err();
        assert!(matches!(err, CoreError::ExecutionPanic { reason } if reason.contains("handler bug")));
    }

    #[test]
    fn test_gas_below_native_cost() {
        let set = StoreSet::in_memory();
        let msg = MsgSend::new(&[1u8; 20], &[2u8; 20], 0).to_any().unwrap();
        let err = NativeModules::default()
            .execute(&set, &block(), &[1u8; 20], &msg, 10)
            .unwrap_err();
        assert!(matches!(err, CoreError::OutOfGas { wanted: 10, .. }));
    }

    #[test]
    fn test_unknown_routes() {
        let set = StoreSet::in_memory();
        let modules = NativeModules::default();
        assert!(matches!(
            modules.query(&set, "/nope", b"{}"),
            Err(CoreError::NotFound { .. })
        ));
        assert!(matches!(
            modules.execute(&set, &block(), &[1u8; 20], &AnyMsg::new("/nope", vec![]), 1),
            Err(CoreError::NotFound { .. })
        ));
    }
}
