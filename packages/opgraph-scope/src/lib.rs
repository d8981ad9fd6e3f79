//! opgraph-scope - Variable storage environment
//!
//! The authoritative name → value store used by the opgraph executor.
//!
//! ## Core Principles
//!
//! 1. **Store owns buffers**: a `Variable` is a shared handle onto one slot;
//!    the store decides which names exist.
//! 2. **Listeners mirror mutations**: every create/delete/rename, kid scope
//!    creation/deletion and clear is reported to registered `ScopeListener`s
//!    after the mutation is applied.
//! 3. **Hierarchy**: kid scopes resolve unknown names through their parent.
//!
//! ## Usage
//!
//! ```rust
//! use opgraph_scope::{Scope, Tensor};
//!
//! let scope = Scope::new();
//! scope.var("x").set(Tensor::scalar(1.0));
//! assert_eq!(scope.find_var("x").and_then(|v| v.get()), Some(Tensor::scalar(1.0)));
//! ```

pub mod error;
pub mod listener;
pub mod scope;
pub mod tensor;
pub mod variable;

pub use error::{ErrorKind, Result, ScopeError};
pub use listener::{RecordingListener, ScopeEvent, ScopeId, ScopeListener};
pub use scope::{Scope, VariableStore};
pub use tensor::Tensor;
pub use variable::Variable;
