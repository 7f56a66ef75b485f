//! Chain-wide constants shared across crates.

/// Maximum size of compiled bytecode accepted by `StoreCode`.
pub const MAX_CODE_SIZE: usize = 1500 * 1024;

/// Maximum size of interpreted source code accepted by `StoreCode`.
pub const MAX_INTERPRETED_CODE_SIZE: usize = 0xf000;

/// Label prefix selecting the Wasm module backend.
pub const WASM_ENV_LABEL: &str = "wasm_env_";

/// Label prefix selecting the compact Wasm backend.
pub const WASM_COMPACT_LABEL: &str = "wasm_compact_";

/// Generic interpreter label prefix.
pub const INTERPRETER_LABEL: &str = "interpreter_";

/// Label prefix selecting the EVM-compatible interpreter.
pub const INTERPRETER_EVM_LABEL: &str = "interpreter_evm_";

/// Label prefix selecting the state-machine interpreter.
pub const INTERPRETER_FSM_LABEL: &str = "interpreter_fsm_";

/// Python interpreter label.
pub const INTERPRETER_PYTHON: &str = "interpreter_python_utf8_1";

/// JavaScript interpreter label.
pub const INTERPRETER_JAVASCRIPT: &str = "interpreter_javascript_utf8_1";

/// Labels that only system addresses may carry.
pub const PROTECTED_LABEL_PREFIXES: &[&str] = &["sys_env_", "consensus_"];

/// Well-known role names.
pub mod roles {
    pub const BANK: &str = "bank";
    pub const AUTH: &str = "auth";
    pub const ROLES: &str = "roles";
    pub const GOVERNANCE: &str = "gov";
    pub const INTERPRETER_PYTHON: &str = "interpreter_python";
    pub const INTERPRETER_JAVASCRIPT: &str = "interpreter_javascript";
}

/// Event type names.
pub mod events {
    pub const STORE_CODE: &str = "store_code";
    pub const PIN_CODE: &str = "pin_code";
    pub const UNPIN_CODE: &str = "unpin_code";
    pub const INSTANTIATE: &str = "instantiate";
    pub const EXECUTE: &str = "execute";
    pub const REGISTER_ROLE: &str = "register_role";
    pub const DEREGISTER_ROLE: &str = "deregister_role";
    pub const MIGRATE_STORAGE: &str = "migrate_storage";
    pub const NATIVE: &str = "native";

    pub const ATTR_CODE_ID: &str = "code_id";
    pub const ATTR_CHECKSUM: &str = "code_checksum";
    pub const ATTR_CONTRACT: &str = "contract_address";
    pub const ATTR_CREATOR: &str = "creator";
    pub const ATTR_ROLE: &str = "role";
    pub const ATTR_LABEL: &str = "label";
    pub const ATTR_FROM_CLASS: &str = "from";
    pub const ATTR_TO_CLASS: &str = "to";
}
