//! Finite-state-machine contracts described in JSON.
//!
//! The contract's code is the machine definition:
//!
//! ```json
//! {
//!   "initial": "open",
//!   "context": { "count": 0 },
//!   "states": {
//!     "open": { "on": { "bump": { "target": "open", "actions": [
//!       { "type": "increment", "key": "count" }
//!     ] } } },
//!     "closed": { "final": true }
//!   }
//! }
//! ```
//!
//! Execute messages are `{"event": <name>, "params": {...}}`. Queries are
//! `{"state": {}}`, `{"context": {"key": <name>}}` and
//! `{"can": {"event": <name>}}`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strata_storage::traits::KvStore;
use strata_types::env::{ContractResponse, EntryPoint, Event};
use strata_types::primitives::format_address;

use crate::bridge::SubCall;
use crate::error::VmError;
use crate::gas::{
    GasMeter, GAS_CALL, GAS_FSM_ACTION, GAS_FSM_TRANSITION, GAS_STATE_READ, GAS_STATE_WRITE,
};
use crate::guard::run_guarded;
use crate::runtime::{Invocation, Runtime};

const STATE_KEY: &[u8] = b"fsm:state";
const CONTEXT_PREFIX: &[u8] = b"fsm:ctx:";

/// Event emitted on every transition.
pub const TRANSITION_EVENT: &str = "fsm_transition";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MachineDef {
    pub initial: String,
    pub states: BTreeMap<String, StateDef>,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StateDef {
    #[serde(default)]
    pub on: BTreeMap<String, Transition>,
    #[serde(default, rename = "final")]
    pub is_final: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Transition {
    pub target: String,
    #[serde(default)]
    pub guard: Option<Guard>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Guard {
    /// Context value (or `$param.x` template) equals `value`.
    Equals { key: String, value: Value },
    SenderIs { address: String },
    All { guards: Vec<Guard> },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Assign {
        key: String,
        value: Value,
    },
    Increment {
        key: String,
        #[serde(default = "one")]
        by: i64,
    },
    Emit {
        event: String,
        #[serde(default)]
        attributes: BTreeMap<String, Value>,
    },
    Call {
        contract: String,
        msg: Value,
    },
}

fn one() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
struct ExecuteMsg {
    event: String,
    #[serde(default)]
    params: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum QueryMsg {
    State {},
    Context { key: String },
    Can { event: String },
}

#[derive(Debug, Default, Deserialize)]
struct InstantiateMsg {
    #[serde(default)]
    context: BTreeMap<String, Value>,
}

impl MachineDef {
    pub fn parse(source: &[u8]) -> Result<Self, VmError> {
        let def: MachineDef =
            serde_json::from_slice(source).map_err(|e| VmError::InvalidBytecode {
                reason: format!("fsm definition: {e}"),
            })?;
        def.check()?;
        Ok(def)
    }

    /// Every referenced state must exist.
    fn check(&self) -> Result<(), VmError> {
        let missing = |name: &str| VmError::InvalidBytecode {
            reason: format!("fsm definition references unknown state '{name}'"),
        };
        if !self.states.contains_key(&self.initial) {
            return Err(missing(&self.initial));
        }
        for state in self.states.values() {
            for transition in state.on.values() {
                if !self.states.contains_key(&transition.target) {
                    return Err(missing(&transition.target));
                }
            }
        }
        Ok(())
    }
}

fn bad_message(e: serde_json::Error) -> VmError {
    VmError::InvalidArgument {
        reason: format!("fsm message: {e}"),
    }
}

fn context_key(key: &str) -> Vec<u8> {
    let mut full = CONTEXT_PREFIX.to_vec();
    full.extend_from_slice(key.as_bytes());
    full
}

struct Session<'a> {
    inv: &'a Invocation,
    gas: GasMeter,
    events: Vec<Event>,
    params: BTreeMap<String, Value>,
}

impl<'a> Session<'a> {
    fn new(inv: &'a Invocation, params: BTreeMap<String, Value>) -> Self {
        Self {
            inv,
            gas: GasMeter::new(inv.info.gas_limit),
            events: Vec::new(),
            params,
        }
    }

    fn current_state(&mut self) -> Result<String, VmError> {
        self.gas.charge(GAS_STATE_READ)?;
        match self.inv.store.get(STATE_KEY)? {
            Some(bytes) => String::from_utf8(bytes)
                .map_err(|e| VmError::failed(format!("corrupt fsm state: {e}"))),
            None => Err(VmError::NotFound {
                what: "fsm state (contract not instantiated)".to_string(),
            }),
        }
    }

    fn set_state(&mut self, state: &str) -> Result<(), VmError> {
        self.gas.charge(GAS_STATE_WRITE)?;
        self.inv.store.put(STATE_KEY, state.as_bytes())?;
        Ok(())
    }

    fn get(&mut self, key: &str) -> Result<Value, VmError> {
        self.gas.charge(GAS_STATE_READ)?;
        match self.inv.store.get(&context_key(key))? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| VmError::failed(format!("corrupt fsm context '{key}': {e}"))),
            None => Ok(Value::Null),
        }
    }

    fn set(&mut self, key: &str, value: &Value) -> Result<(), VmError> {
        self.gas.charge(GAS_STATE_WRITE)?;
        let bytes = serde_json::to_vec(value)
            .map_err(|e| VmError::failed(format!("fsm context '{key}': {e}")))?;
        self.inv.store.put(&context_key(key), &bytes)?;
        Ok(())
    }

    /// Substitute `$sender`, `$state` and `$param.<name>` templates.
    fn resolve(&self, value: &Value, state: &str) -> Value {
        match value {
            Value::String(s) if s == "$sender" => Value::String(format_address(&self.inv.info.sender)),
            Value::String(s) if s == "$state" => Value::String(state.to_string()),
            Value::String(s) => match s.strip_prefix("$param.") {
                Some(name) => self.params.get(name).cloned().unwrap_or(Value::Null),
                None => value.clone(),
            },
            Value::Array(items) => Value::Array(items.iter().map(|v| self.resolve(v, state)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve(v, state)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn guard_passes(&mut self, guard: &Guard, state: &str) -> Result<bool, VmError> {
        self.gas.charge(GAS_FSM_ACTION)?;
        match guard {
            Guard::Equals { key, value } => {
                let expected = self.resolve(value, state);
                let actual = match key.strip_prefix("$param.") {
                    Some(name) => self.params.get(name).cloned().unwrap_or(Value::Null),
                    None => self.get(key)?,
                };
                Ok(actual == expected)
            }
            Guard::SenderIs { address } => {
                Ok(address.eq_ignore_ascii_case(&format_address(&self.inv.info.sender)))
            }
            Guard::All { guards } => {
                for g in guards {
                    if !self.guard_passes(g, state)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }

    fn apply(&mut self, action: &Action, state: &str) -> Result<(), VmError> {
        self.gas.charge(GAS_FSM_ACTION)?;
        match action {
            Action::Assign { key, value } => {
                let value = self.resolve(value, state);
                self.set(key, &value)
            }
            Action::Increment { key, by } => {
                let current = match self.get(key)? {
                    Value::Null => 0,
                    Value::Number(n) => n.as_i64().ok_or_else(|| {
                        VmError::failed(format!("fsm context '{key}' is not an integer"))
                    })?,
                    _ => return Err(VmError::failed(format!("fsm context '{key}' is not a number"))),
                };
                let next = current
                    .checked_add(*by)
                    .ok_or_else(|| VmError::failed(format!("fsm context '{key}' overflow")))?;
                self.set(key, &json!(next))
            }
            Action::Emit { event, attributes } => {
                let mut ev = Event::new(event.clone());
                for (k, v) in attributes {
                    let resolved = match self.resolve(v, state) {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    ev = ev.attr(k.clone(), resolved);
                }
                self.events.push(ev);
                Ok(())
            }
            Action::Call { contract, msg } => {
                self.gas.charge(GAS_CALL)?;
                let msg = serde_json::to_vec(&self.resolve(msg, state))
                    .map_err(|e| VmError::failed(format!("fsm call message: {e}")))?;
                let call = SubCall {
                    caller: self.inv.env.contract.address,
                    origin: self.inv.info.origin,
                    target: contract.clone(),
                    msg,
                    funds: 0,
                    gas_limit: self.gas.remaining(),
                    read_only: false,
                    depth: self.inv.depth,
                };
                let response = match self.inv.bridge.call_contract(call) {
                    Ok(response) => response,
                    Err(err) => {
                        self.gas.charge(err.gas_used())?;
                        return Err(err);
                    }
                };
                self.gas.charge(response.gas_used)?;
                self.events.extend(response.events);
                Ok(())
            }
        }
    }

    /// Close the session, stamping a failure with the gas metered so far.
    fn finish(self, outcome: Result<Vec<u8>, VmError>) -> Result<ContractResponse, VmError> {
        match outcome {
            Ok(data) => Ok(self.respond(data)),
            Err(err) => Err(err.charged(self.gas.used())),
        }
    }

    fn respond(self, data: Vec<u8>) -> ContractResponse {
        ContractResponse {
            data,
            events: self.events,
            gas_used: self.gas.used(),
        }
    }
}

/// Runtime for `interpreter_fsm_*` code.
#[derive(Default)]
pub struct FsmRuntime;

impl FsmRuntime {
    pub fn new() -> Self {
        Self
    }

    fn instantiate_machine(&self, def: &MachineDef, inv: &Invocation) -> Result<ContractResponse, VmError> {
        let msg: InstantiateMsg = if inv.info.data.is_empty() {
            InstantiateMsg::default()
        } else {
            serde_json::from_slice(&inv.info.data).map_err(bad_message)?
        };
        let mut session = Session::new(inv, BTreeMap::new());
        let seeded = Self::seed(def, msg, &mut session);
        session.finish(seeded.map(|()| Vec::new()))
    }

    fn seed(def: &MachineDef, msg: InstantiateMsg, session: &mut Session<'_>) -> Result<(), VmError> {
        session.set_state(&def.initial)?;
        let mut context = def.context.clone();
        context.extend(msg.context);
        for (key, value) in &context {
            session.set(key, value)?;
        }
        Ok(())
    }

    fn fire(&self, def: &MachineDef, inv: &Invocation) -> Result<ContractResponse, VmError> {
        let msg: ExecuteMsg = serde_json::from_slice(&inv.info.data).map_err(bad_message)?;
        let event = msg.event;
        let mut session = Session::new(inv, msg.params);
        let fired = Self::transition(def, &event, &mut session);
        session.finish(fired)
    }

    fn transition(def: &MachineDef, event: &str, session: &mut Session<'_>) -> Result<Vec<u8>, VmError> {
        session.gas.charge(GAS_FSM_TRANSITION)?;
        let from = session.current_state()?;
        let state = def
            .states
            .get(&from)
            .ok_or_else(|| VmError::failed(format!("fsm is in unknown state '{from}'")))?;
        if state.is_final {
            return Err(VmError::failed(format!("fsm state '{from}' is final")));
        }
        let transition = state.on.get(event).ok_or_else(|| {
            VmError::failed(format!("no transition for '{event}' from '{from}'"))
        })?;
        if let Some(guard) = &transition.guard {
            if !session.guard_passes(guard, &from)? {
                return Err(VmError::failed(format!("guard rejected '{event}' from '{from}'")));
            }
        }
        for action in &transition.actions {
            session.apply(action, &from)?;
        }
        session.set_state(&transition.target)?;
        session.events.push(
            Event::new(TRANSITION_EVENT)
                .attr("event", event)
                .attr("from", from)
                .attr("to", transition.target.clone()),
        );
        Ok(json!({ "state": transition.target }).to_string().into_bytes())
    }

    fn answer(&self, def: &MachineDef, inv: &Invocation) -> Result<ContractResponse, VmError> {
        let msg: QueryMsg = serde_json::from_slice(&inv.info.data).map_err(bad_message)?;
        let mut session = Session::new(inv, BTreeMap::new());
        let answer = match msg {
            QueryMsg::State {} => json!({ "state": session.current_state()? }),
            QueryMsg::Context { key } => json!({ "key": key.clone(), "value": session.get(&key)? }),
            QueryMsg::Can { event } => {
                let current = session.current_state()?;
                let allowed = match def.states.get(&current).and_then(|s| {
                    if s.is_final {
                        None
                    } else {
                        s.on.get(&event)
                    }
                }) {
                    Some(transition) => match &transition.guard {
                        Some(guard) => session.guard_passes(guard, &current)?,
                        None => true,
                    },
                    None => false,
                };
                json!({ "can": allowed })
            }
        };
        Ok(session.respond(answer.to_string().into_bytes()))
    }
}

impl Runtime for FsmRuntime {
    fn name(&self) -> &'static str {
        "fsm"
    }

    fn invoke(&self, entry: EntryPoint, inv: Invocation) -> Result<ContractResponse, VmError> {
        run_guarded(self.name(), || {
            let def = MachineDef::parse(&inv.env.contract.bytecode)?;
            match entry {
                EntryPoint::Instantiate => self.instantiate_machine(&def, &inv),
                EntryPoint::Execute => self.fire(&def, &inv),
                EntryPoint::Query => self.answer(&def, &inv),
            }
        })
    }

    fn validate(&self, bytecode: &[u8]) -> Result<(), VmError> {
        MachineDef::parse(bytecode).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use strata_storage::memory::MemoryStore;
    use strata_storage::traits::SharedStore;

    use super::*;
    use crate::bridge::DetachedBridge;
    use crate::gas::DEFAULT_GAS_LIMIT;
    use crate::wasm::tests::invocation;

    fn door() -> Vec<u8> {
        json!({
            "initial": "closed",
            "context": { "opens": 0 },
            "states": {
                "closed": { "on": {
                    "open": {
                        "target": "open",
                        "guard": { "type": "equals", "key": "$param.code", "value": "1234" },
                        "actions": [
                            { "type": "increment", "key": "opens" },
                            { "type": "assign", "key": "last", "value": "$sender" },
                            { "type": "emit", "event": "door", "attributes": { "by": "$sender" } }
                        ]
                    },
                    "lock": { "target": "locked" }
                } },
                "open": { "on": { "close": { "target": "closed" } } },
                "locked": { "final": true }
            }
        })
        .to_string()
        .into_bytes()
    }

    fn call(entry: EntryPoint, base: &SharedStore, msg: Value) -> Result<ContractResponse, VmError> {
        let inv = invocation(
            base.clone(),
            door(),
            msg.to_string().as_bytes(),
            DEFAULT_GAS_LIMIT,
            Arc::new(DetachedBridge),
        );
        FsmRuntime::new().invoke(entry, inv)
    }

    fn instantiated() -> SharedStore {
        let base: SharedStore = Arc::new(MemoryStore::new());
        call(EntryPoint::Instantiate, &base, json!({})).unwrap();
        base
    }

    fn state_of(base: &SharedStore) -> String {
        let resp = call(EntryPoint::Query, base, json!({ "state": {} })).unwrap();
        let v: Value = serde_json::from_slice(&resp.data).unwrap();
        v["state"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_transition_runs_actions() {
        let base = instantiated();
        assert_eq!(state_of(&base), "closed");

        let resp = call(
            EntryPoint::Execute,
            &base,
            json!({ "event": "open", "params": { "code": "1234" } }),
        )
        .unwrap();
        assert_eq!(state_of(&base), "open");
        assert!(resp.events.iter().any(|e| e.ty == "door"));
        assert!(resp.events.iter().any(|e| e.ty == TRANSITION_EVENT && e.get("to") == Some("open")));

        let ctx = call(EntryPoint::Query, &base, json!({ "context": { "key": "opens" } })).unwrap();
        let v: Value = serde_json::from_slice(&ctx.data).unwrap();
        assert_eq!(v["value"], json!(1));
    }

    #[test]
    fn test_guard_rejects_and_leaves_state() {
        let base = instantiated();
        let err = call(
            EntryPoint::Execute,
            &base,
            json!({ "event": "open", "params": { "code": "0000" } }),
        )
        .unwrap_err();
        assert!(matches!(err, VmError::ContractFailed { .. }));
        assert!(err.gas_used() >= GAS_FSM_TRANSITION);
        assert_eq!(state_of(&base), "closed");

        let can = call(EntryPoint::Query, &base, json!({ "can": { "event": "lock" } })).unwrap();
        assert_eq!(serde_json::from_slice::<Value>(&can.data).unwrap()["can"], json!(true));
    }

    #[test]
    fn test_final_state_accepts_nothing() {
        let base = instantiated();
        call(EntryPoint::Execute, &base, json!({ "event": "lock" })).unwrap();
        assert_eq!(state_of(&base), "locked");
        assert!(call(EntryPoint::Execute, &base, json!({ "event": "open" })).is_err());
    }

    #[test]
    fn test_unknown_target_rejected_at_validation() {
        let bad = json!({
            "initial": "a",
            "states": { "a": { "on": { "go": { "target": "nowhere" } } } }
        });
        let err = FsmRuntime::new()
            .validate(bad.to_string().as_bytes())
            .unwrap_err();
        assert!(matches!(err, VmError::InvalidBytecode { .. }));
        assert!(FsmRuntime::new().validate(&door()).is_ok());
    }

    #[test]
    fn test_query_cannot_write() {
        let base = instantiated();
        let before = base.prefix_scan(b"").unwrap();
        call(EntryPoint::Query, &base, json!({ "can": { "event": "open" } })).unwrap();
        assert_eq!(base.prefix_scan(b"").unwrap(), before);
    }
}
