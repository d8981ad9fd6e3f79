//! Hierarchical variable store.
//!
//! `Scope` is the authoritative holder of variable buffers. Lookups walk the
//! parent chain; mutations only ever touch the local table and are mirrored
//! to listeners.

use crate::error::{Result, ScopeError};
use crate::listener::{ScopeId, ScopeListener};
use crate::variable::Variable;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// Store interface consumed by the registry.
///
/// The registry depends on this trait only; the store talks back exclusively
/// through [`ScopeListener`] callbacks.
pub trait VariableStore: Send + Sync {
    /// Get or create a local variable
    fn create_var(&self, name: &str) -> Variable;

    /// Insert an externally owned handle under `name`
    fn attach_var(&self, name: &str, var: Variable) -> Result<()>;

    fn find_var(&self, name: &str) -> Option<Variable>;

    /// Remove a local variable; returns whether it existed
    fn erase_var(&self, name: &str) -> bool;

    fn rename_var(&self, old_name: &str, new_name: &str) -> Result<()>;

    fn add_listener(&self, listener: Arc<dyn ScopeListener>);

    fn remove_listener(&self, listener: &Arc<dyn ScopeListener>) -> bool;
}

pub struct Scope {
    id: ScopeId,
    parent: Option<Weak<Scope>>,
    vars: RwLock<HashMap<String, Variable>>,
    kids: Mutex<Vec<Arc<Scope>>>,
    listeners: RwLock<Vec<Arc<dyn ScopeListener>>>,
}

impl Scope {
    /// Create a root scope
    pub fn new() -> Arc<Self> {
        Arc::new(Self::with_parent(None))
    }

    fn with_parent(parent: Option<Weak<Scope>>) -> Self {
        Self {
            id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
            parent,
            vars: RwLock::new(HashMap::new()),
            kids: Mutex::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    pub fn parent(&self) -> Option<Arc<Scope>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Get or create a variable in this scope
    pub fn var(&self, name: &str) -> Variable {
        let created = {
            let mut vars = self.vars.write();
            if let Some(existing) = vars.get(name) {
                return existing.clone();
            }
            let var = Variable::new();
            vars.insert(name.to_string(), var.clone());
            var
        };
        trace!(scope = self.id, name, "variable created");
        self.notify(|l| l.on_create_variable(name, &created));
        created
    }

    /// Insert an existing handle. Re-inserting the same handle is a no-op.
    pub fn insert_var(&self, name: &str, var: Variable) -> Result<()> {
        {
            let mut vars = self.vars.write();
            if let Some(existing) = vars.get(name) {
                if existing.ptr_eq(&var) {
                    return Ok(());
                }
                return Err(ScopeError::variable_exists(name));
            }
            vars.insert(name.to_string(), var.clone());
        }
        trace!(scope = self.id, name, "external variable attached");
        self.notify(|l| l.on_create_variable(name, &var));
        Ok(())
    }

    /// Find a variable in this scope or any ancestor
    pub fn find_var(&self, name: &str) -> Option<Variable> {
        if let Some(var) = self.find_local_var(name) {
            return Some(var);
        }
        self.parent().and_then(|p| p.find_var(name))
    }

    pub fn find_local_var(&self, name: &str) -> Option<Variable> {
        self.vars.read().get(name).cloned()
    }

    pub fn has_var(&self, name: &str) -> bool {
        self.find_var(name).is_some()
    }

    pub fn has_local_var(&self, name: &str) -> bool {
        self.vars.read().contains_key(name)
    }

    /// Erase local variables; returns how many were removed
    pub fn erase_vars(&self, names: &[&str]) -> usize {
        let removed: Vec<&str> = {
            let mut vars = self.vars.write();
            names
                .iter()
                .copied()
                .filter(|name| vars.remove(*name).is_some())
                .collect()
        };
        for name in &removed {
            self.notify(|l| l.on_delete_variable(name));
        }
        removed.len()
    }

    pub fn rename(&self, old_name: &str, new_name: &str) -> Result<()> {
        if old_name == new_name {
            return Ok(());
        }
        {
            let mut vars = self.vars.write();
            if vars.contains_key(new_name) {
                return Err(ScopeError::variable_exists(new_name));
            }
            let var = vars
                .remove(old_name)
                .ok_or_else(|| ScopeError::variable_not_found(old_name))?;
            vars.insert(new_name.to_string(), var);
        }
        debug!(scope = self.id, old_name, new_name, "variable renamed");
        self.notify(|l| l.on_rename_variable(old_name, new_name));
        Ok(())
    }

    /// Sorted names of local variables
    pub fn local_var_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.vars.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.vars.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.read().is_empty()
    }

    /// Create a kid scope whose lookups fall back to `self`
    pub fn new_scope(self: &Arc<Self>) -> Arc<Scope> {
        let kid = Arc::new(Scope::with_parent(Some(Arc::downgrade(self))));
        self.kids.lock().push(Arc::clone(&kid));
        let kid_id = kid.id;
        debug!(scope = self.id, kid = kid_id, "kid scope created");
        self.notify(|l| l.on_create_scope(kid_id));
        kid
    }

    pub fn kid_count(&self) -> usize {
        self.kids.lock().len()
    }

    pub fn drop_kids(&self) {
        let kids: Vec<Arc<Scope>> = std::mem::take(&mut *self.kids.lock());
        for kid in kids {
            let kid_id = kid.id;
            self.notify(|l| l.on_delete_scope(kid_id));
        }
    }

    /// Drop every kid scope and local variable
    pub fn clear(&self) {
        self.drop_kids();
        let dropped = {
            let mut vars = self.vars.write();
            let n = vars.len();
            vars.clear();
            n
        };
        debug!(scope = self.id, dropped, "scope cleared");
        self.notify(|l| l.on_clear());
    }

    pub fn add_listener(&self, listener: Arc<dyn ScopeListener>) {
        self.listeners.write().push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ScopeListener>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn notify(&self, f: impl Fn(&dyn ScopeListener)) {
        // Snapshot so callbacks run without holding the listener lock
        let listeners: Vec<Arc<dyn ScopeListener>> = self.listeners.read().clone();
        for listener in &listeners {
            f(listener.as_ref());
        }
    }
}

impl VariableStore for Scope {
    fn create_var(&self, name: &str) -> Variable {
        self.var(name)
    }

    fn attach_var(&self, name: &str, var: Variable) -> Result<()> {
        self.insert_var(name, var)
    }

    fn find_var(&self, name: &str) -> Option<Variable> {
        Scope::find_var(self, name)
    }

    fn erase_var(&self, name: &str) -> bool {
        self.erase_vars(&[name]) == 1
    }

    fn rename_var(&self, old_name: &str, new_name: &str) -> Result<()> {
        self.rename(old_name, new_name)
    }

    fn add_listener(&self, listener: Arc<dyn ScopeListener>) {
        Scope::add_listener(self, listener)
    }

    fn remove_listener(&self, listener: &Arc<dyn ScopeListener>) -> bool {
        Scope::remove_listener(self, listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{RecordingListener, ScopeEvent};
    use crate::tensor::Tensor;
    use pretty_assertions::assert_eq;

    fn recording(scope: &Scope) -> Arc<RecordingListener> {
        let listener = Arc::new(RecordingListener::new());
        scope.add_listener(listener.clone());
        listener
    }

    #[test]
    fn test_var_is_get_or_create() {
        let scope = Scope::new();
        let listener = recording(&scope);

        let a = scope.var("x");
        let b = scope.var("x");
        assert!(a.ptr_eq(&b));
        assert_eq!(listener.events(), vec![ScopeEvent::CreateVariable("x".into())]);
    }

    #[test]
    fn test_insert_var_conflict() {
        let scope = Scope::new();
        let feed = Variable::with_value(Tensor::scalar(1.0));
        scope.insert_var("feed", feed.clone()).unwrap();
        scope.insert_var("feed", feed).unwrap();

        let err = scope.insert_var("feed", Variable::new()).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::VariableExists);
    }

    #[test]
    fn test_kid_lookup_falls_back_to_parent() {
        let root = Scope::new();
        root.var("w").set(Tensor::scalar(2.0));
        let kid = root.new_scope();

        assert!(kid.find_var("w").is_some());
        assert!(!kid.has_local_var("w"));
        kid.var("tmp");
        assert!(root.find_var("tmp").is_none());
    }

    #[test]
    fn test_mutations_notify_in_order() {
        let scope = Scope::new();
        let listener = recording(&scope);

        scope.var("a");
        scope.rename("a", "b").unwrap();
        assert_eq!(scope.erase_vars(&["b", "missing"]), 1);
        let kid = scope.new_scope();
        let kid_id = kid.id();
        scope.clear();

        assert_eq!(
            listener.events(),
            vec![
                ScopeEvent::CreateVariable("a".into()),
                ScopeEvent::RenameVariable("a".into(), "b".into()),
                ScopeEvent::DeleteVariable("b".into()),
                ScopeEvent::CreateScope(kid_id),
                ScopeEvent::DeleteScope(kid_id),
                ScopeEvent::Clear,
            ]
        );
        assert!(scope.is_empty());
        assert_eq!(scope.kid_count(), 0);
    }

    #[test]
    fn test_rename_errors() {
        let scope = Scope::new();
        scope.var("a");
        scope.var("b");
        assert!(scope.rename("a", "b").is_err());
        assert!(scope.rename("zzz", "c").is_err());
        assert_eq!(scope.local_var_names(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_remove_listener() {
        let scope = Scope::new();
        let listener: Arc<dyn ScopeListener> = Arc::new(RecordingListener::new());
        scope.add_listener(listener.clone());
        assert_eq!(scope.listener_count(), 1);
        assert!(scope.remove_listener(&listener));
        assert!(!scope.remove_listener(&listener));
    }
}
