//! Variable registry: the fast name ↔ id index over the variable store.
//!
//! The store stays authoritative for buffer contents. The registry installs a
//! [`ScopeListener`] on the store at construction so that every create,
//! delete, rename and clear performed on the store (by anyone) is mirrored
//! into the index.
//!
//! Ids are dense, issued in registration order and never reused. An id whose
//! variable was deleted from the store keeps its slot, vacated, and lookups
//! through it report `NotFound`. Ids that were never issued are a
//! `PreconditionViolation`.

use crate::config::DuplicatePolicy;
use crate::error::{ExecError, Result};
use crate::ids::VarId;
use crate::var_desc::VarDesc;
use opgraph_scope::{ScopeId, ScopeListener, Variable, VariableStore};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Per-variable compile-time state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableMetaInfo {
    /// Static use count computed by the program builder
    pub ref_count: usize,
    pub desc: Option<VarDesc>,
}

impl VariableMetaInfo {
    /// Whether the dispatcher may free this variable's buffer
    pub fn is_collectable(&self) -> bool {
        matches!(&self.desc, Some(desc) if !desc.persistable)
    }
}

#[derive(Debug)]
struct Slot {
    name: String,
    /// `None` once the store deleted the variable
    var: Option<Variable>,
    meta: VariableMetaInfo,
}

#[derive(Debug, Default)]
struct RegistryIndex {
    name_to_id: HashMap<String, VarId>,
    slots: Vec<Slot>,
}

impl RegistryIndex {
    fn insert(&mut self, name: &str, var: Variable) -> VarId {
        let id = VarId::new(self.slots.len());
        self.slots.push(Slot {
            name: name.to_string(),
            var: Some(var),
            meta: VariableMetaInfo::default(),
        });
        self.name_to_id.insert(name.to_string(), id);
        id
    }

    fn live_id(&self, name: &str) -> Option<VarId> {
        self.name_to_id.get(name).copied()
    }

    fn slot(&self, id: VarId) -> Result<&Slot> {
        self.slots.get(id.index()).ok_or_else(|| {
            ExecError::precondition(format!(
                "variable id {} was never issued (registry has {} ids)",
                id,
                self.slots.len()
            ))
        })
    }

    fn slot_mut(&mut self, id: VarId) -> Result<&mut Slot> {
        let issued = self.slots.len();
        self.slots.get_mut(id.index()).ok_or_else(|| {
            ExecError::precondition(format!(
                "variable id {} was never issued (registry has {} ids)",
                id, issued
            ))
        })
    }

    fn live_slot(&self, id: VarId) -> Result<&Slot> {
        let slot = self.slot(id)?;
        if slot.var.is_none() {
            return Err(ExecError::not_found(format!(
                "variable {} ('{}') was deleted",
                id, slot.name
            )));
        }
        Ok(slot)
    }
}

/// Listener installed on the store; holds the index weakly so a dropped
/// registry never keeps its index alive through the store
struct RegistryListener {
    index: Weak<RwLock<RegistryIndex>>,
}

impl ScopeListener for RegistryListener {
    fn on_create_variable(&self, name: &str, var: &Variable) {
        let Some(index) = self.index.upgrade() else {
            return;
        };
        let mut index = index.write();
        if index.live_id(name).is_none() {
            let id = index.insert(name, var.clone());
            trace!(name, var = %id, "registry: variable created");
        }
    }

    fn on_delete_variable(&self, name: &str) {
        let Some(index) = self.index.upgrade() else {
            return;
        };
        let mut index = index.write();
        if let Some(id) = index.name_to_id.remove(name) {
            if let Some(slot) = index.slots.get_mut(id.index()) {
                slot.var = None;
            }
            trace!(name, var = %id, "registry: variable deleted");
        }
    }

    fn on_rename_variable(&self, old_name: &str, new_name: &str) {
        let Some(index) = self.index.upgrade() else {
            return;
        };
        let mut index = index.write();
        if let Some(id) = index.name_to_id.remove(old_name) {
            index.name_to_id.insert(new_name.to_string(), id);
            if let Some(slot) = index.slots.get_mut(id.index()) {
                slot.name = new_name.to_string();
            }
            trace!(old_name, new_name, var = %id, "registry: variable renamed");
        }
    }

    fn on_create_scope(&self, scope: ScopeId) {
        trace!(scope, "registry: kid scope created");
    }

    fn on_delete_scope(&self, scope: ScopeId) {
        trace!(scope, "registry: kid scope deleted");
    }

    fn on_clear(&self) {
        let Some(index) = self.index.upgrade() else {
            return;
        };
        let mut index = index.write();
        index.name_to_id.clear();
        for slot in &mut index.slots {
            slot.var = None;
        }
        debug!("registry: store cleared, all variables detached");
    }
}

pub struct VariableRegistry {
    store: Arc<dyn VariableStore>,
    index: Arc<RwLock<RegistryIndex>>,
    listener: Arc<dyn ScopeListener>,
    policy: DuplicatePolicy,
}

impl VariableRegistry {
    /// Create a registry over `store` and start mirroring its mutations
    pub fn new(store: Arc<dyn VariableStore>, policy: DuplicatePolicy) -> Self {
        let index = Arc::new(RwLock::new(RegistryIndex::default()));
        let listener: Arc<dyn ScopeListener> = Arc::new(RegistryListener {
            index: Arc::downgrade(&index),
        });
        store.add_listener(Arc::clone(&listener));
        Self {
            store,
            index,
            listener,
            policy,
        }
    }

    pub fn store(&self) -> &Arc<dyn VariableStore> {
        &self.store
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Register `name`, creating it in the store if needed.
    ///
    /// An already registered name follows the duplicate policy; under
    /// `Reuse` a given descriptor replaces the stored one.
    pub fn register(&self, name: &str, desc: Option<VarDesc>) -> Result<VarId> {
        if let Some(id) = self.check_duplicate(name)? {
            if let Some(desc) = desc {
                self.index.write().slot_mut(id)?.meta.desc = Some(desc);
            }
            return Ok(id);
        }

        // Lock must not be held here: the store calls back into the listener
        let var = self.store.create_var(name);

        let mut index = self.index.write();
        let id = match index.live_id(name) {
            Some(id) => id,
            // Variable pre-existed in the store, so no create notification
            None => index.insert(name, var),
        };
        index.slot_mut(id)?.meta.desc = desc;
        debug!(name, var = %id, "variable registered");
        Ok(id)
    }

    /// Register an externally owned handle (feed/fetch holders). Such
    /// variables carry no descriptor and are never freed by the dispatcher.
    pub fn register_existing(&self, name: &str, var: Variable) -> Result<VarId> {
        if let Some(id) = self.check_duplicate(name)? {
            let index = self.index.read();
            let slot = index.live_slot(id)?;
            return match &slot.var {
                Some(bound) if bound.ptr_eq(&var) => Ok(id),
                _ => Err(ExecError::precondition(format!(
                    "'{}' is already registered with a different handle",
                    name
                ))),
            };
        }

        self.store.attach_var(name, var.clone())?;

        let mut index = self.index.write();
        let id = match index.live_id(name) {
            Some(id) => id,
            None => index.insert(name, var),
        };
        debug!(name, var = %id, "external variable registered");
        Ok(id)
    }

    fn check_duplicate(&self, name: &str) -> Result<Option<VarId>> {
        let existing = self.index.read().live_id(name);
        match (existing, self.policy) {
            (Some(id), DuplicatePolicy::Reject) => Err(ExecError::precondition(format!(
                "variable '{}' is already registered as {}",
                name, id
            ))),
            (existing, _) => Ok(existing),
        }
    }

    pub fn id_of(&self, name: &str) -> Result<VarId> {
        self.index
            .read()
            .live_id(name)
            .ok_or_else(|| ExecError::not_found(format!("variable '{}'", name)))
    }

    pub fn name_of(&self, id: VarId) -> Result<String> {
        Ok(self.index.read().live_slot(id)?.name.clone())
    }

    pub fn exists_name(&self, name: &str) -> bool {
        self.index.read().live_id(name).is_some()
    }

    pub fn exists_id(&self, id: VarId) -> bool {
        self.index
            .read()
            .slots
            .get(id.index())
            .is_some_and(|slot| slot.var.is_some())
    }

    /// Handle of a registered variable
    pub fn get(&self, id: VarId) -> Result<Variable> {
        let index = self.index.read();
        let slot = index.live_slot(id)?;
        slot.var
            .clone()
            .ok_or_else(|| ExecError::not_found(format!("variable {}", id)))
    }

    pub fn get_by_name(&self, name: &str) -> Result<Variable> {
        let id = self.id_of(name)?;
        self.get(id)
    }

    pub fn meta(&self, id: VarId) -> Result<VariableMetaInfo> {
        Ok(self.index.read().live_slot(id)?.meta.clone())
    }

    pub fn desc(&self, id: VarId) -> Result<Option<VarDesc>> {
        Ok(self.index.read().live_slot(id)?.meta.desc.clone())
    }

    pub fn set_desc(&self, id: VarId, desc: Option<VarDesc>) -> Result<()> {
        let mut index = self.index.write();
        index.live_slot(id)?;
        index.slot_mut(id)?.meta.desc = desc;
        Ok(())
    }

    pub fn is_collectable(&self, id: VarId) -> Result<bool> {
        Ok(self.index.read().live_slot(id)?.meta.is_collectable())
    }

    pub fn ref_count(&self, id: VarId) -> Result<usize> {
        Ok(self.index.read().live_slot(id)?.meta.ref_count)
    }

    pub fn set_ref_count(&self, id: VarId, count: usize) -> Result<()> {
        let mut index = self.index.write();
        index.live_slot(id)?;
        index.slot_mut(id)?.meta.ref_count = count;
        Ok(())
    }

    pub fn increase_ref_count(&self, id: VarId) -> Result<usize> {
        let mut index = self.index.write();
        index.live_slot(id)?;
        let meta = &mut index.slot_mut(id)?.meta;
        meta.ref_count += 1;
        Ok(meta.ref_count)
    }

    /// Zero every static count before a fresh compile
    pub fn reset_ref_counts(&self) {
        for slot in &mut self.index.write().slots {
            slot.meta.ref_count = 0;
        }
    }

    /// Static counts indexed by id (vacated slots report 0)
    pub fn static_ref_counts(&self) -> Vec<usize> {
        self.index
            .read()
            .slots
            .iter()
            .map(|slot| if slot.var.is_some() { slot.meta.ref_count } else { 0 })
            .collect()
    }

    /// Delete a variable from the store; the index follows via the listener
    pub fn erase(&self, name: &str) -> Result<()> {
        if !self.exists_name(name) {
            return Err(ExecError::not_found(format!("variable '{}'", name)));
        }
        if !self.store.erase_var(name) {
            return Err(ExecError::not_found(format!(
                "variable '{}' is not local to the store",
                name
            )));
        }
        Ok(())
    }

    /// Rename through the store; the id is kept
    pub fn rename(&self, old_name: &str, new_name: &str) -> Result<()> {
        if !self.exists_name(old_name) {
            return Err(ExecError::not_found(format!("variable '{}'", old_name)));
        }
        self.store.rename_var(old_name, new_name)?;
        Ok(())
    }

    /// Number of live variables
    pub fn len(&self) -> usize {
        self.index.read().name_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of ids ever issued
    pub fn issued(&self) -> usize {
        self.index.read().slots.len()
    }

    /// Live `(id, name)` pairs in id order
    pub fn entries(&self) -> Vec<(VarId, String)> {
        self.index
            .read()
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.var.is_some())
            .map(|(i, slot)| (VarId::new(i), slot.name.clone()))
            .collect()
    }
}

impl Drop for VariableRegistry {
    fn drop(&mut self) {
        self.store.remove_listener(&self.listener);
    }
}

impl std::fmt::Debug for VariableRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableRegistry")
            .field("live", &self.len())
            .field("issued", &self.issued())
            .field("policy", &self.policy)
            .finish()
    }
}
