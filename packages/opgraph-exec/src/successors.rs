//! Dispatch classes of an instruction's dependents.

use crate::ids::InstrId;
use serde::Serialize;
use std::fmt;

/// How a successor is released once its predecessor finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessorClass {
    /// Same queue (or a host-completed predecessor): queue order suffices
    Direct,
    /// Different queue: wait on the producer's recorded event first
    EventWait,
    /// Host waiter of an asynchronous producer: drain the producer's queue
    SyncRun,
}

impl SuccessorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuccessorClass::Direct => "direct",
            SuccessorClass::EventWait => "event_wait",
            SuccessorClass::SyncRun => "sync_run",
        }
    }
}

impl fmt::Display for SuccessorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Three append-only successor lists, frozen after compilation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SuccessorSet {
    direct: Vec<InstrId>,
    event_wait: Vec<InstrId>,
    sync_run: Vec<InstrId>,
}

impl SuccessorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, class: SuccessorClass, id: InstrId) {
        match class {
            SuccessorClass::Direct => self.direct.push(id),
            SuccessorClass::EventWait => self.event_wait.push(id),
            SuccessorClass::SyncRun => self.sync_run.push(id),
        }
    }

    pub fn direct(&self) -> &[InstrId] {
        &self.direct
    }

    pub fn event_wait(&self) -> &[InstrId] {
        &self.event_wait
    }

    pub fn sync_run(&self) -> &[InstrId] {
        &self.sync_run
    }

    pub fn class_of(&self, id: InstrId) -> Option<SuccessorClass> {
        if self.direct.contains(&id) {
            Some(SuccessorClass::Direct)
        } else if self.event_wait.contains(&id) {
            Some(SuccessorClass::EventWait)
        } else if self.sync_run.contains(&id) {
            Some(SuccessorClass::SyncRun)
        } else {
            None
        }
    }

    /// All successors, direct first
    pub fn iter(&self) -> impl Iterator<Item = InstrId> + '_ {
        self.direct
            .iter()
            .chain(&self.event_wait)
            .chain(&self.sync_run)
            .copied()
    }

    pub fn len(&self) -> usize {
        self.direct.len() + self.event_wait.len() + self.sync_run.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
