//! Mutation listener surface.
//!
//! A store notifies every registered listener after each mutation has been
//! applied and all store locks have been released, so a listener may call
//! back into the store's read API without deadlocking.

use crate::variable::Variable;

/// Identifier of a scope within one process
pub type ScopeId = u64;

pub trait ScopeListener: Send + Sync {
    /// A variable was created under `name`; `var` is the new handle
    fn on_create_variable(&self, name: &str, var: &Variable);

    fn on_delete_variable(&self, name: &str);

    fn on_rename_variable(&self, old_name: &str, new_name: &str);

    fn on_create_scope(&self, scope: ScopeId);

    fn on_delete_scope(&self, scope: ScopeId);

    /// Every variable and kid scope of the store was dropped at once
    fn on_clear(&self);
}

/// Listener event, as recorded by [`RecordingListener`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeEvent {
    CreateVariable(String),
    DeleteVariable(String),
    RenameVariable(String, String),
    CreateScope(ScopeId),
    DeleteScope(ScopeId),
    Clear,
}

/// Listener that keeps an ordered log of notifications
#[derive(Default)]
pub struct RecordingListener {
    events: parking_lot::Mutex<Vec<ScopeEvent>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ScopeEvent> {
        self.events.lock().clone()
    }

    pub fn take(&self) -> Vec<ScopeEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    fn push(&self, event: ScopeEvent) {
        self.events.lock().push(event);
    }
}

impl ScopeListener for RecordingListener {
    fn on_create_variable(&self, name: &str, _var: &Variable) {
        self.push(ScopeEvent::CreateVariable(name.to_string()));
    }

    fn on_delete_variable(&self, name: &str) {
        self.push(ScopeEvent::DeleteVariable(name.to_string()));
    }

    fn on_rename_variable(&self, old_name: &str, new_name: &str) {
        self.push(ScopeEvent::RenameVariable(
            old_name.to_string(),
            new_name.to_string(),
        ));
    }

    fn on_create_scope(&self, scope: ScopeId) {
        self.push(ScopeEvent::CreateScope(scope));
    }

    fn on_delete_scope(&self, scope: ScopeId) {
        self.push(ScopeEvent::DeleteScope(scope));
    }

    fn on_clear(&self) {
        self.push(ScopeEvent::Clear);
    }
}
