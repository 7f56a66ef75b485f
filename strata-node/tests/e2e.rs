//! End-to-end flows through signed transactions: code upload, instantiation,
//! execution and queries on one chain, script contracts run by an
//! interpreter contract, governed role reassignment, and atomic bundles
//! across three chains.

use strata_atomic::{AtomicError, AtomicTxBuilder};
use strata_core::native::auth::AuthKeeper;
use strata_core::native::bank::{BankKeeper, MsgSend};
use strata_core::native::governance::MsgRegisterRole;
use strata_core::query::PageRequest;
use strata_core::{ContractManager, CoreError, EngineConfig, RoleRegistry};
use strata_crypto::keys::Keypair;
use strata_storage::store_set::StoreSet;
use strata_storage::traits::KvStore;
use strata_types::constants::roles::{GOVERNANCE, INTERPRETER_PYTHON};
use strata_types::constants::INTERPRETER_PYTHON as PYTHON_LABEL;
use strata_types::contract::{CodeMetadata, StorageClass};
use strata_types::primitives::{format_address, Address, CodeId};
use strata_types::tx::{AddressMode, Tx, TxBody, TxMsg};
use strata_node::app::MultiChainApp;
use strata_node::chain::Chain;
use strata_node::error::NodeError;

/// Instantiate stores the init message under "init"; execute takes
/// `[klen][key][value]`; query takes a key.
const KV_WAT: &str = r#"
    (module
        (import "strata" "storage_set" (func $set (param i32 i32 i32 i32)))
        (import "strata" "storage_get" (func $get (param i32 i32 i32 i32) (result i32)))
        (import "strata" "finish" (func $finish (param i32 i32)))
        (memory (export "memory") 1)
        (data (i32.const 0) "init")
        (func (export "instantiate") (param $ptr i32) (param $len i32) (result i32)
            (call $set (i32.const 0) (i32.const 4) (local.get $ptr) (local.get $len))
            i32.const 0
        )
        (func (export "execute") (param $ptr i32) (param $len i32) (result i32)
            (local $klen i32)
            (local.set $klen (i32.load8_u (local.get $ptr)))
            (call $set
                (i32.add (local.get $ptr) (i32.const 1))
                (local.get $klen)
                (i32.add (i32.add (local.get $ptr) (i32.const 1)) (local.get $klen))
                (i32.sub (i32.sub (local.get $len) (i32.const 1)) (local.get $klen)))
            i32.const 0
        )
        (func (export "query") (param $ptr i32) (param $len i32) (result i32)
            (local $n i32)
            (local.set $n (call $get (local.get $ptr) (local.get $len) (i32.const 8192) (i32.const 8192)))
            (if (i32.lt_s (local.get $n) (i32.const 0))
                (then (return (i32.const 3))))
            (call $finish (i32.const 8192) (local.get $n))
            i32.const 0
        )
    )
"#;

/// A toy interpreter: executing a script stores the script's source under
/// "source" in the script contract's own state.
const INTERPRETER_WAT: &str = r#"
    (module
        (import "strata" "storage_set" (func $set (param i32 i32 i32 i32)))
        (import "strata" "storage_get" (func $get (param i32 i32 i32 i32) (result i32)))
        (import "strata" "code_read" (func $code_read (param i32) (result i32)))
        (import "strata" "finish" (func $finish (param i32 i32)))
        (memory (export "memory") 1)
        (data (i32.const 0) "source")
        (func (export "execute") (param i32 i32) (result i32)
            (local $n i32)
            (local.set $n (call $code_read (i32.const 4096)))
            (call $set (i32.const 0) (i32.const 6) (i32.const 4096) (local.get $n))
            i32.const 0
        )
        (func (export "query") (param $ptr i32) (param $len i32) (result i32)
            (local $n i32)
            (local.set $n (call $get (local.get $ptr) (local.get $len) (i32.const 8192) (i32.const 8192)))
            (if (i32.lt_s (local.get $n) (i32.const 0))
                (then (return (i32.const 3))))
            (call $finish (i32.const 8192) (local.get $n))
            i32.const 0
        )
    )
"#;

/// Execute writes "k", loops a while, then exits with code 1.
const FAILING_WAT: &str = r#"
    (module
        (import "strata" "storage_set" (func $set (param i32 i32 i32 i32)))
        (memory (export "memory") 1)
        (data (i32.const 0) "k")
        (func (export "execute") (param i32 i32) (result i32)
            (local $i i32)
            (call $set (i32.const 0) (i32.const 1) (i32.const 0) (i32.const 1))
            (local.set $i (i32.const 5000))
            (loop $burn
                (local.set $i (i32.sub (local.get $i) (i32.const 1)))
                (br_if $burn (i32.gt_s (local.get $i) (i32.const 0))))
            i32.const 1
        )
    )
"#;

const GAS: u64 = 5_000_000;

fn new_chain(chain_id: &str) -> Chain {
    let manager = ContractManager::with_defaults(EngineConfig::default()).unwrap();
    Chain::new(chain_id, StoreSet::in_memory(), manager)
}

fn signed(keys: &Keypair, chain_id: &str, sequence: u64, gas_limit: u64, msgs: Vec<TxMsg>) -> Tx {
    let body = TxBody {
        chain_id: chain_id.to_string(),
        signer: keys.public_key(),
        sequence,
        gas_limit,
        msgs,
        extension: None,
    };
    let signature = keys.sign(&body.signing_bytes());
    Tx { body, signature }
}

/// Drives one account's transactions against one chain.
struct Client<'a> {
    keys: &'a Keypair,
    sequence: u64,
}

impl<'a> Client<'a> {
    fn new(keys: &'a Keypair) -> Self {
        Self { keys, sequence: 0 }
    }

    fn send(
        &mut self,
        chain: &mut Chain,
        gas_limit: u64,
        msgs: Vec<TxMsg>,
    ) -> Result<strata_types::tx::TxResult, NodeError> {
        let tx = signed(self.keys, chain.chain_id(), self.sequence, gas_limit, msgs);
        self.sequence += 1;
        chain.deliver_tx_bytes(&tx.encode())
    }

    fn store_code(&mut self, chain: &mut Chain, bytecode: Vec<u8>, deps: &[&str]) -> CodeId {
        let result = self
            .send(
                chain,
                GAS,
                vec![TxMsg::StoreCode {
                    bytecode,
                    deps: deps.iter().map(|d| d.to_string()).collect(),
                    metadata: CodeMetadata::default(),
                }],
            )
            .unwrap();
        let data: [u8; 8] = result.msg_results[0].data.as_slice().try_into().unwrap();
        CodeId::from_be_bytes(data)
    }

    fn instantiate(
        &mut self,
        chain: &mut Chain,
        code_id: CodeId,
        storage_class: Option<StorageClass>,
    ) -> Address {
        let label = format!("contract-{}", self.sequence);
        let result = self
            .send(
                chain,
                GAS,
                vec![TxMsg::Instantiate {
                    code_id,
                    label,
                    init_msg: b"hello".to_vec(),
                    funds: 0,
                    address_mode: AddressMode::Classic,
                    storage_class,
                }],
            )
            .unwrap();
        result.created[0]
    }

    fn execute(
        &mut self,
        chain: &mut Chain,
        contract: &str,
        msg: Vec<u8>,
        gas_limit: u64,
    ) -> Result<strata_types::tx::TxResult, NodeError> {
        self.send(
            chain,
            gas_limit,
            vec![TxMsg::Execute {
                contract: contract.to_string(),
                msg,
                funds: 0,
            }],
        )
    }
}

fn set_msg(key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut msg = vec![key.len() as u8];
    msg.extend_from_slice(key);
    msg.extend_from_slice(value);
    msg
}

fn wasm(wat_src: &str) -> Vec<u8> {
    wat::parse_str(wat_src).unwrap()
}

#[test]
fn test_wasm_contract_set_then_get() {
    let mut chain = new_chain("alpha");
    let keys = Keypair::from_seed(&[1u8; 32]);
    let mut alice = Client::new(&keys);

    let code_id = alice.store_code(&mut chain, wasm(KV_WAT), &["wasm_env_1"]);
    let contract = alice.instantiate(&mut chain, code_id, None);
    alice
        .execute(&mut chain, &format_address(&contract), set_msg(b"color", b"blue"), GAS)
        .unwrap();

    let queries = chain.queries();
    let raw = queries.raw_state(&contract, b"color").unwrap();
    let smart = queries
        .smart_state(chain.block(), keys.address(), &format_address(&contract), b"color".to_vec(), GAS)
        .unwrap();
    assert_eq!(raw, Some(b"blue".to_vec()));
    assert_eq!(raw, Some(smart.data));
    assert_eq!(queries.raw_state(&contract, b"init").unwrap(), Some(b"hello".to_vec()));

    let info = queries.contract_info(&contract).unwrap();
    assert_eq!(info.info.code_id, code_id);
    assert_eq!(info.info.creator, keys.address());
    let page = queries.all_state(&contract, &PageRequest::default()).unwrap();
    assert_eq!(page.items.len(), 2);
}

#[test]
fn test_script_runs_through_interpreter_role() {
    let mut chain = new_chain("alpha");
    let keys = Keypair::from_seed(&[1u8; 32]);
    let mut alice = Client::new(&keys);

    let interpreter_code = alice.store_code(&mut chain, wasm(INTERPRETER_WAT), &["wasm_env_1"]);
    let interpreter = alice.instantiate(&mut chain, interpreter_code, None);
    chain
        .init_state(|view, _, _| {
            RoleRegistry::new(view).register_role(INTERPRETER_PYTHON, PYTHON_LABEL, &interpreter)
        })
        .unwrap();

    let script = b"print('hello from a script')".to_vec();
    let script_code = alice.store_code(&mut chain, script.clone(), &[PYTHON_LABEL]);
    let script_contract = alice.instantiate(&mut chain, script_code, None);
    alice
        .execute(&mut chain, &format_address(&script_contract), Vec::new(), GAS)
        .unwrap();

    let queries = chain.queries();
    // The interpreter ran against the script contract's storage, not its own.
    assert_eq!(queries.raw_state(&script_contract, b"source").unwrap(), Some(script));
    assert_eq!(queries.raw_state(&interpreter, b"source").unwrap(), None);
}

#[test]
fn test_script_without_interpreter_is_unsupported() {
    let mut chain = new_chain("alpha");
    let keys = Keypair::from_seed(&[1u8; 32]);
    let mut alice = Client::new(&keys);

    let code_id = alice.store_code(&mut chain, b"x = 1".to_vec(), &[PYTHON_LABEL]);
    let result = alice.send(
        &mut chain,
        GAS,
        vec![TxMsg::Instantiate {
            code_id,
            label: "script".to_string(),
            init_msg: Vec::new(),
            funds: 0,
            address_mode: AddressMode::Classic,
            storage_class: None,
        }],
    );
    assert!(matches!(
        result,
        Err(NodeError::TxFailed {
            error: CoreError::UnsupportedRuntime { .. },
            ..
        })
    ));
}

#[test]
fn test_gas_below_loading_cost_changes_nothing() {
    let mut chain = new_chain("alpha");
    let keys = Keypair::from_seed(&[1u8; 32]);
    let mut alice = Client::new(&keys);

    let code_id = alice.store_code(&mut chain, wasm(KV_WAT), &["wasm_env_1"]);
    let contract = alice.instantiate(&mut chain, code_id, None);
    let target = format_address(&contract);
    alice
        .execute(&mut chain, &target, set_msg(b"k", b"old"), GAS)
        .unwrap();

    let cost = EngineConfig::default().instance_cost;
    let err = alice
        .execute(&mut chain, &target, set_msg(b"k", b"new"), cost - 1)
        .unwrap_err();
    assert!(matches!(
        err,
        NodeError::TxFailed {
            error: CoreError::OutOfGas { .. },
            ..
        }
    ));
    assert_eq!(chain.queries().raw_state(&contract, b"k").unwrap(), Some(b"old".to_vec()));
    // The failed transaction still used its sequence.
    assert_eq!(
        AuthKeeper::new(chain.state()).sequence(&keys.address()).unwrap(),
        alice.sequence
    );
}

#[test]
fn test_failed_execute_reports_gas_burned() {
    let mut chain = new_chain("alpha");
    let keys = Keypair::from_seed(&[1u8; 32]);
    let mut alice = Client::new(&keys);

    let code_id = alice.store_code(&mut chain, wasm(FAILING_WAT), &["wasm_env_1"]);
    let contract = alice.instantiate(&mut chain, code_id, None);
    let err = alice
        .execute(&mut chain, &format_address(&contract), Vec::new(), GAS)
        .unwrap_err();
    match err {
        NodeError::TxFailed {
            error: CoreError::ContractFailed { .. },
            gas_used,
        } => {
            assert!(gas_used > EngineConfig::default().instance_cost);
            assert!(gas_used <= GAS);
        }
        other => panic!("expected TxFailed, got {other:?}"),
    }
    assert_eq!(chain.queries().raw_state(&contract, b"k").unwrap(), None);
    assert_eq!(
        AuthKeeper::new(chain.state()).sequence(&keys.address()).unwrap(),
        alice.sequence
    );
}

#[test]
fn test_governed_role_swap_migrates_state() {
    let mut chain = new_chain("alpha");
    let keys = Keypair::from_seed(&[1u8; 32]);
    let gov_keys = Keypair::from_seed(&[2u8; 32]);
    let mut alice = Client::new(&keys);
    let mut gov = Client::new(&gov_keys);

    let code_id = alice.store_code(&mut chain, wasm(KV_WAT), &["wasm_env_1"]);
    let old = alice.instantiate(&mut chain, code_id, None);
    let new = alice.instantiate(&mut chain, code_id, Some(StorageClass::Memory));
    alice
        .execute(&mut chain, &format_address(&new), set_msg(b"total", b"42"), GAS)
        .unwrap();

    chain
        .init_state(|view, _, _| {
            let roles = RoleRegistry::new(view);
            roles.register_role(GOVERNANCE, "gov", &gov_keys.address())?;
            roles.register_role("ledger", "ledger_v1", &old)?;
            Ok(())
        })
        .unwrap();

    // Only governance may reassign.
    let forged = MsgRegisterRole::new(&keys.address(), "ledger", "ledger_v2", &new);
    assert!(alice
        .send(&mut chain, GAS, vec![TxMsg::Native(forged.to_any().unwrap())])
        .is_err());

    let msg = MsgRegisterRole::new(&gov_keys.address(), "ledger", "ledger_v2", &new);
    gov.send(&mut chain, GAS, vec![TxMsg::Native(msg.to_any().unwrap())])
        .unwrap();

    let state = chain.state();
    assert_eq!(
        state
            .contract_store(&new, StorageClass::CoreConsensus)
            .get(b"total")
            .unwrap(),
        Some(b"42".to_vec())
    );
    assert!(state.contract_state(&new, StorageClass::Memory).unwrap().is_empty());
    let queries = chain.queries();
    assert_eq!(queries.role_history("ledger").unwrap(), vec![old, new]);
    let smart = queries
        .smart_state(chain.block(), keys.address(), "ledger", b"total".to_vec(), GAS)
        .unwrap();
    assert_eq!(smart.data, b"42".to_vec());
    // The outgoing label still resolves for rollback.
    let previous = queries
        .smart_state(chain.block(), keys.address(), "ledger_v1", b"init".to_vec(), GAS)
        .unwrap();
    assert_eq!(previous.data, b"hello".to_vec());
}

#[test]
fn test_transient_state_is_cleared_each_block() {
    let mut chain = new_chain("alpha");
    let keys = Keypair::from_seed(&[1u8; 32]);
    let mut alice = Client::new(&keys);

    let code_id = alice.store_code(&mut chain, wasm(KV_WAT), &["wasm_env_1"]);
    let scratch = alice.instantiate(&mut chain, code_id, Some(StorageClass::Transient));
    let cache = alice.instantiate(&mut chain, code_id, Some(StorageClass::Memory));
    for contract in [&scratch, &cache] {
        alice
            .execute(&mut chain, &format_address(contract), set_msg(b"k", b"v"), GAS)
            .unwrap();
    }

    chain.end_block().unwrap();
    assert_eq!(chain.queries().raw_state(&scratch, b"k").unwrap(), None);
    assert_eq!(chain.queries().raw_state(&cache, b"k").unwrap(), Some(b"v".to_vec()));
}

// ─── Atomic bundles ─────────────────────────────────────────────────────────

const CHAINS: [&str; 3] = ["alpha", "beta", "gamma"];
const BOB: Address = [0xb0; 20];

async fn funded_app(alice: &Address) -> MultiChainApp {
    let app = MultiChainApp::new(CHAINS.iter().map(|id| new_chain(id)));
    for id in CHAINS {
        let chain = app.chain(id).unwrap();
        let chain = chain.lock().await;
        chain
            .init_state(|view, _, _| BankKeeper::new(view).mint(alice, 100))
            .unwrap();
    }
    app
}

fn bundle(keys: &Keypair, amounts: [u128; 3]) -> Vec<u8> {
    let mut builder = AtomicTxBuilder::new();
    for (chain_id, amount) in CHAINS.iter().zip(amounts) {
        let send = MsgSend::new(&keys.address(), &BOB, amount).to_any().unwrap();
        builder.add_sub_tx(*chain_id, keys, 0, GAS, vec![TxMsg::Native(send)]);
    }
    builder.build(keys.address()).unwrap().encode()
}

async fn balances(app: &MultiChainApp, address: &Address) -> Vec<u128> {
    let mut out = Vec::new();
    for id in CHAINS {
        let chain = app.chain(id).unwrap();
        let chain = chain.lock().await;
        out.push(BankKeeper::new(chain.state()).balance(address).unwrap());
    }
    out
}

async fn sequences(app: &MultiChainApp, address: &Address) -> Vec<u64> {
    let mut out = Vec::new();
    for id in CHAINS {
        let chain = app.chain(id).unwrap();
        let chain = chain.lock().await;
        out.push(AuthKeeper::new(chain.state()).sequence(address).unwrap());
    }
    out
}

#[tokio::test]
async fn test_bundle_applies_on_every_chain() {
    let keys = Keypair::from_seed(&[1u8; 32]);
    let app = funded_app(&keys.address()).await;

    let outcome = app.submit_atomic(&bundle(&keys, [10, 20, 30])).await.unwrap();
    assert_eq!(outcome.results.len(), 3);
    assert_eq!(balances(&app, &BOB).await, vec![10, 20, 30]);
    assert_eq!(sequences(&app, &keys.address()).await, vec![1, 1, 1]);
}

#[tokio::test]
async fn test_failing_sub_tx_leaves_every_chain_unchanged() {
    let keys = Keypair::from_seed(&[1u8; 32]);
    let app = funded_app(&keys.address()).await;

    // The second chain cannot cover its transfer.
    let err = app
        .submit_atomic(&bundle(&keys, [10, 500, 30]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        NodeError::Atomic(AtomicError::Rejected { ref chain_id, .. }) if chain_id == "beta"
    ));
    assert_eq!(balances(&app, &keys.address()).await, vec![100, 100, 100]);
    assert_eq!(balances(&app, &BOB).await, vec![0, 0, 0]);
    assert_eq!(sequences(&app, &keys.address()).await, vec![0, 0, 0]);

    // Nothing stays prepared, so ordinary traffic and the next bundle proceed.
    for id in CHAINS {
        assert!(!app.chain(id).unwrap().lock().await.has_prepared_bundle());
    }
    app.submit_atomic(&bundle(&keys, [1, 1, 1])).await.unwrap();
    app.end_block().await.unwrap();
}

#[tokio::test]
async fn test_bad_signature_rejects_whole_bundle() {
    let keys = Keypair::from_seed(&[1u8; 32]);
    let app = funded_app(&keys.address()).await;

    let mut wrapper =
        strata_types::atomic::AtomicTxWrapper::decode(&bundle(&keys, [10, 20, 30])).unwrap();
    let mut tx = Tx::decode(&wrapper.txs[2]).unwrap();
    tx.signature[5] ^= 0x01;
    wrapper.txs[2] = tx.encode();

    let err = app.submit_atomic(&wrapper.encode()).await.unwrap_err();
    assert!(matches!(
        err,
        NodeError::Atomic(AtomicError::InvalidSignature { ref chain_id }) if chain_id == "gamma"
    ));
    assert_eq!(balances(&app, &BOB).await, vec![0, 0, 0]);
    assert_eq!(sequences(&app, &keys.address()).await, vec![0, 0, 0]);
}

#[tokio::test]
async fn test_plain_tx_routes_by_chain_id() {
    let keys = Keypair::from_seed(&[1u8; 32]);
    let app = funded_app(&keys.address()).await;

    let send = MsgSend::new(&keys.address(), &BOB, 5).to_any().unwrap();
    let tx = signed(&keys, "gamma", 0, GAS, vec![TxMsg::Native(send)]);
    app.submit_tx(&tx.encode()).await.unwrap();
    assert_eq!(balances(&app, &BOB).await, vec![0, 0, 5]);

    let stray = signed(&keys, "delta", 0, GAS, Vec::new());
    assert!(matches!(
        app.submit_tx(&stray.encode()).await,
        Err(NodeError::UnknownChain { .. })
    ));
}
