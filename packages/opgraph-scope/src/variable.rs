//! Shared variable handle.
//!
//! A `Variable` is a cheap-to-clone handle onto one buffer slot. Cloning the
//! handle never copies the buffer; all clones observe the same contents.

use crate::tensor::Tensor;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct Variable {
    slot: Arc<RwLock<Option<Tensor>>>,
}

impl Variable {
    /// Create an empty (unallocated) variable
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(value: Tensor) -> Self {
        Self {
            slot: Arc::new(RwLock::new(Some(value))),
        }
    }

    /// Replace the buffer contents
    pub fn set(&self, value: Tensor) {
        *self.slot.write() = Some(value);
    }

    /// Copy out the current value
    pub fn get(&self) -> Option<Tensor> {
        self.slot.read().clone()
    }

    /// Borrow the current value for the duration of `f`
    pub fn read<R>(&self, f: impl FnOnce(Option<&Tensor>) -> R) -> R {
        let guard = self.slot.read();
        f(guard.as_ref())
    }

    /// Mutate the slot in place for the duration of `f`
    pub fn write<R>(&self, f: impl FnOnce(&mut Option<Tensor>) -> R) -> R {
        let mut guard = self.slot.write();
        f(&mut guard)
    }

    pub fn is_initialized(&self) -> bool {
        self.slot.read().is_some()
    }

    /// Release the backing buffer. Returns the number of bytes released.
    pub fn clear(&self) -> usize {
        self.slot.write().take().map_or(0, |t| t.nbytes())
    }

    /// True when both handles point at the same slot
    pub fn ptr_eq(&self, other: &Variable) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.slot.read();
        match guard.as_ref() {
            Some(t) => write!(f, "Variable(shape={:?})", t.shape()),
            None => write!(f, "Variable(<empty>)"),
        }
    }
}
