//! Reference-count driven buffer reclamation.
//!
//! [`RefCountTable`] is the only state mutated per instruction during a run.
//! Each invocation builds a fresh table from the program's static counts.
//! The thread that moves a count from one to zero is the single party that
//! frees the buffer, so freeing needs no further coordination.

use crate::error::{ExecError, Result};
use crate::ids::{InstrId, VarId};
use opgraph_scope::Variable;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;

#[derive(Debug)]
pub struct RefCountTable {
    counts: Vec<AtomicUsize>,
}

impl RefCountTable {
    pub fn from_static(counts: &[usize]) -> Self {
        Self {
            counts: counts.iter().map(|&c| AtomicUsize::new(c)).collect(),
        }
    }

    pub fn get(&self, var: VarId) -> Option<usize> {
        self.counts.get(var.index()).map(|c| c.load(Ordering::Acquire))
    }

    /// Decrement `var`; returns true for the caller that reached zero.
    ///
    /// Decrementing a count that is already zero is a precondition
    /// violation and leaves the count at zero.
    pub fn decrement(&self, var: VarId) -> Result<bool> {
        let counter = self.counts.get(var.index()).ok_or_else(|| {
            ExecError::precondition(format!("no reference count for {}", var))
        })?;
        let previous = counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1))
            .map_err(|_| {
                ExecError::precondition(format!("reference count of {} is already zero", var))
            })?;
        Ok(previous == 1)
    }

    pub fn snapshot(&self) -> Vec<usize> {
        self.counts
            .iter()
            .map(|c| c.load(Ordering::Acquire))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Buffers released during one invocation, in release order
#[derive(Debug, Default)]
pub struct FreeLog {
    order: Mutex<Vec<VarId>>,
    bytes: AtomicUsize,
}

impl FreeLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, var: VarId, bytes: usize) {
        self.order.lock().push(var);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn freed(&self) -> Vec<VarId> {
        self.order.lock().clone()
    }

    pub fn bytes(&self) -> usize {
        self.bytes.load(Ordering::Relaxed)
    }
}

/// Static reclamation plan of a compiled program
#[derive(Debug)]
pub struct GarbageCollector {
    enabled: bool,
    collectable: Vec<bool>,
    handles: Vec<Option<Variable>>,
}

impl GarbageCollector {
    /// `collectable[i]` / `handles[i]` describe the variable with id `i`
    pub fn new(enabled: bool, collectable: Vec<bool>, handles: Vec<Option<Variable>>) -> Self {
        Self {
            enabled,
            collectable,
            handles,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_collectable(&self, var: VarId) -> bool {
        self.enabled && self.collectable.get(var.index()).copied().unwrap_or(false)
    }

    /// Run the gc check of `instr` after its work unit completed
    pub fn check(
        &self,
        instr: InstrId,
        vars: &[VarId],
        counts: &RefCountTable,
        log: &FreeLog,
    ) -> Result<()> {
        for &var in vars {
            if !counts.decrement(var)? || !self.is_collectable(var) {
                continue;
            }
            if let Some(handle) = self.handles.get(var.index()).and_then(Option::as_ref) {
                let bytes = handle.clear();
                log.push(var, bytes);
                trace!(%instr, %var, bytes, "buffer freed");
            }
        }
        Ok(())
    }
}
