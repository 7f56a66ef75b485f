//! Role names bound to system contracts, and their governed reassignment.

use strata_storage::contract_store::ContractRegistryStore;
use strata_storage::role_store::RoleStore;
use strata_storage::store_set::StoreSet;
use strata_storage::traits::SharedStore;
use strata_types::constants::events::{
    ATTR_CONTRACT, ATTR_FROM_CLASS, ATTR_LABEL, ATTR_ROLE, ATTR_TO_CLASS, DEREGISTER_ROLE,
    MIGRATE_STORAGE, REGISTER_ROLE,
};
use strata_types::constants::roles::GOVERNANCE;
use strata_types::contract::{Role, StorageClass};
use strata_types::env::Event;
use strata_types::primitives::{format_address, parse_address, Address};
use tracing::{debug, info};

use crate::error::CoreError;

/// Role indexes and contract records of one state view.
pub struct RoleRegistry<'a> {
    view: &'a StoreSet,
    roles: RoleStore<SharedStore>,
    contracts: ContractRegistryStore<SharedStore>,
}

impl<'a> RoleRegistry<'a> {
    pub fn new(view: &'a StoreSet) -> Self {
        let core = view.store(StorageClass::CoreConsensus).clone();
        Self {
            view,
            roles: RoleStore::new(core.clone()),
            contracts: ContractRegistryStore::new(core),
        }
    }

    pub fn role_address(&self, role: &str) -> Result<Option<Address>, CoreError> {
        Ok(self.roles.role_address(role)?)
    }

    pub fn role_by_label(&self, label: &str) -> Result<Option<Role>, CoreError> {
        Ok(self.roles.role_by_label(label)?)
    }

    pub fn label_by_address(&self, address: &Address) -> Result<Option<String>, CoreError> {
        Ok(self.roles.label_by_address(address)?)
    }

    /// Every address the role has pointed at, oldest first.
    pub fn history(&self, role: &str) -> Result<Vec<Address>, CoreError> {
        Ok(self.roles.history(role)?)
    }

    pub fn list_roles(&self) -> Result<Vec<(String, Address)>, CoreError> {
        Ok(self.roles.list_roles()?)
    }

    /// Resolve a role name, then a role label, then a literal hex address.
    pub fn get_address_or_role(&self, identifier: &str) -> Result<Address, CoreError> {
        if let Some(address) = self.roles.role_address(identifier)? {
            return Ok(address);
        }
        if let Some(role) = self.roles.role_by_label(identifier)? {
            return Ok(role.contract_address);
        }
        parse_address(identifier).map_err(|_| {
            CoreError::invalid(format!(
                "'{identifier}' is not a role, a role label or an address"
            ))
        })
    }

    /// A label may only be re-registered with the same role and contract.
    fn check_label(&self, role: &str, label: &str, address: &Address) -> Result<(), CoreError> {
        if label.is_empty() {
            return Err(CoreError::invalid("role label must not be empty"));
        }
        match self.roles.role_by_label(label)? {
            Some(existing) if existing.role != role || existing.contract_address != *address => {
                Err(CoreError::DuplicateKey {
                    key: format!("role label {label}"),
                })
            }
            _ => Ok(()),
        }
    }

    fn bind(&self, role: &str, label: &str, address: &Address) -> Result<Event, CoreError> {
        let record = Role {
            role: role.to_string(),
            label: label.to_string(),
            contract_address: *address,
        };
        self.roles.set_role_address(role, address)?;
        self.roles.save_label(&record)?;
        self.roles.set_address_label(address, label)?;
        self.roles.push_history(role, address)?;
        Ok(Event::new(REGISTER_ROLE)
            .attr(ATTR_ROLE, role)
            .attr(ATTR_LABEL, label)
            .attr(ATTR_CONTRACT, format_address(address)))
    }

    /// Bind `role` to `address` under `label`, setting all three indexes.
    ///
    /// The role's previous binding stays in its history and its label stays
    /// resolvable.
    pub fn register_role(
        &self,
        role: &str,
        label: &str,
        address: &Address,
    ) -> Result<Event, CoreError> {
        if role.is_empty() {
            return Err(CoreError::invalid("role name must not be empty"));
        }
        self.check_label(role, label, address)?;
        let event = self.bind(role, label, address)?;
        info!(role, label, contract = %format_address(address), "registered role");
        Ok(event)
    }

    /// Remove a label. The role loses its binding if the label was current.
    pub fn deregister_role(&self, label: &str) -> Result<Event, CoreError> {
        let record = self
            .roles
            .role_by_label(label)?
            .ok_or_else(|| CoreError::not_found(format!("role label {label}")))?;
        self.roles.remove_label(label)?;
        if self.roles.role_address(&record.role)? == Some(record.contract_address) {
            self.roles.remove_role_address(&record.role)?;
        }
        if self.roles.label_by_address(&record.contract_address)?.as_deref() == Some(label) {
            self.roles.remove_address_label(&record.contract_address)?;
        }
        info!(role = %record.role, label, "deregistered role");
        Ok(Event::new(DEREGISTER_ROLE)
            .attr(ATTR_ROLE, record.role)
            .attr(ATTR_LABEL, label)
            .attr(ATTR_CONTRACT, format_address(&record.contract_address)))
    }

    /// Fail unless `authority` is the contract bound to the governance role.
    pub fn require_governance(&self, authority: &Address) -> Result<(), CoreError> {
        match self.roles.role_address(GOVERNANCE)? {
            Some(gov) if gov == *authority => Ok(()),
            _ => Err(CoreError::unauthorized(format!(
                "{} is not the governance authority",
                format_address(authority)
            ))),
        }
    }

    /// Governance-driven reassignment of `role` to `new_address`.
    ///
    /// `authority` must be the contract bound to the governance role. When
    /// the role's current contract keeps its state in a different class, the
    /// new contract's state is migrated into that class first and the new
    /// contract adopts it. Every precondition is checked before the first
    /// write.
    pub fn register_role_handler(
        &self,
        authority: &Address,
        role: &str,
        label: &str,
        new_address: &Address,
    ) -> Result<Vec<Event>, CoreError> {
        self.require_governance(authority)?;
        if role.is_empty() {
            return Err(CoreError::invalid("role name must not be empty"));
        }
        let mut new_info = self.contracts.load_info(new_address)?.ok_or_else(|| {
            CoreError::not_found(format!("contract {}", format_address(new_address)))
        })?;
        self.check_label(role, label, new_address)?;

        let previous_class = match self.roles.role_address(role)? {
            Some(previous) if previous != *new_address => self
                .contracts
                .load_info(&previous)?
                .map(|info| info.storage_class),
            _ => None,
        };

        let mut events = Vec::new();
        if let Some(target) = previous_class.filter(|c| *c != new_info.storage_class) {
            let source = new_info.storage_class;
            let moved = self
                .view
                .migrate_contract_storage(new_address, source, target)?;
            new_info.storage_class = target;
            self.contracts.save_info(new_address, &new_info)?;
            debug!(role, %source, %target, moved, "migrated storage for role reassignment");
            events.push(
                Event::new(MIGRATE_STORAGE)
                    .attr(ATTR_CONTRACT, format_address(new_address))
                    .attr(ATTR_FROM_CLASS, source.as_str())
                    .attr(ATTR_TO_CLASS, target.as_str()),
            );
        }

        events.push(self.bind(role, label, new_address)?);
        info!(role, label, contract = %format_address(new_address), "role reassigned by governance");
        Ok(events)
    }
}
