//! Instructions and their static work-unit descriptors.
//!
//! An [`Instruction`] is one scheduled unit of a compiled program. It refers
//! to its device context and to its [`OpFuncNode`] by arena index; both are
//! owned by the compiled program. All per-instruction metadata (successors,
//! event bindings, gc-check list) is filled in once by the program builder
//! and read-only afterwards.

use crate::device::{DeviceType, Place};
use crate::error::{ExecError, Result};
use crate::event::DeviceEventBinding;
use crate::ids::{DeviceId, InstrId, NodeId, VarId};
use crate::kernel::{Attributes, Kernel, KernelContext, KernelResult, VarGroups};
use crate::kernels::MEMCPY_D2H;
use crate::successors::{SuccessorClass, SuccessorSet};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Argument name → variable ids
pub type VarIdGroups = BTreeMap<String, Vec<VarId>>;

/// Where an instruction's work completes relative to the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpFuncType {
    /// Finished on the host before the dispatcher moves on
    QueueSync,
    /// Enqueued on a device queue; completes later
    QueueAsync,
}

impl OpFuncType {
    /// Host contexts and device-to-host copies complete synchronously
    pub fn classify(place: Place, op_type: &str) -> Self {
        if place.device_type() == DeviceType::Cpu || op_type == MEMCPY_D2H {
            OpFuncType::QueueSync
        } else {
            OpFuncType::QueueAsync
        }
    }
}

impl fmt::Display for OpFuncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpFuncType::QueueSync => write!(f, "queue_sync"),
            OpFuncType::QueueAsync => write!(f, "queue_async"),
        }
    }
}

/// Static work unit: kernel, attributes and resolved variable handles
pub struct OpFuncNode {
    op_type: String,
    attrs: Attributes,
    kernel: Arc<dyn Kernel>,
    place: Place,
    func_type: OpFuncType,
    inputs: VarGroups,
    outputs: VarGroups,
}

impl OpFuncNode {
    pub fn new(
        op_type: impl Into<String>,
        attrs: Attributes,
        kernel: Arc<dyn Kernel>,
        place: Place,
        inputs: VarGroups,
        outputs: VarGroups,
    ) -> Self {
        let op_type = op_type.into();
        let func_type = OpFuncType::classify(place, &op_type);
        Self {
            op_type,
            attrs,
            kernel,
            place,
            func_type,
            inputs,
            outputs,
        }
    }

    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    pub fn attrs(&self) -> &Attributes {
        &self.attrs
    }

    pub fn place(&self) -> Place {
        self.place
    }

    pub fn func_type(&self) -> OpFuncType {
        self.func_type
    }

    /// Invoke the kernel on the cached variable handles
    pub fn run(&self) -> KernelResult<()> {
        let ctx = KernelContext::new(
            &self.op_type,
            self.place,
            &self.attrs,
            &self.inputs,
            &self.outputs,
        );
        self.kernel.compute(&ctx)
    }
}

impl fmt::Debug for OpFuncNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpFuncNode")
            .field("op_type", &self.op_type)
            .field("place", &self.place)
            .field("func_type", &self.func_type)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Instruction {
    id: InstrId,
    node: NodeId,
    device: DeviceId,
    func_type: OpFuncType,
    inputs: VarIdGroups,
    outputs: VarIdGroups,
    gc_check_vars: Vec<VarId>,
    successors: SuccessorSet,
    events_to_wait: Vec<DeviceEventBinding>,
    events_to_record: Vec<DeviceEventBinding>,
}

impl Instruction {
    /// Build an instruction with empty successor/event/gc metadata.
    ///
    /// `id` comes from the caller's numbering; a negative id is rejected.
    pub fn new(
        id: i64,
        node: NodeId,
        device: DeviceId,
        func_type: OpFuncType,
        inputs: VarIdGroups,
        outputs: VarIdGroups,
    ) -> Result<Self> {
        let index = usize::try_from(id)
            .map_err(|_| ExecError::precondition(format!("instruction id {} is negative", id)))?;
        Ok(Self {
            id: InstrId::new(index),
            node,
            device,
            func_type,
            inputs,
            outputs,
            gc_check_vars: Vec::new(),
            successors: SuccessorSet::new(),
            events_to_wait: Vec::new(),
            events_to_record: Vec::new(),
        })
    }

    pub fn id(&self) -> InstrId {
        self.id
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn func_type(&self) -> OpFuncType {
        self.func_type
    }

    pub fn is_async(&self) -> bool {
        self.func_type == OpFuncType::QueueAsync
    }

    pub fn inputs(&self) -> &VarIdGroups {
        &self.inputs
    }

    pub fn outputs(&self) -> &VarIdGroups {
        &self.outputs
    }

    /// Distinct input ids
    pub fn input_set(&self) -> BTreeSet<VarId> {
        self.inputs.values().flatten().copied().collect()
    }

    /// Distinct output ids
    pub fn output_set(&self) -> BTreeSet<VarId> {
        self.outputs.values().flatten().copied().collect()
    }

    pub fn gc_check_vars(&self) -> &[VarId] {
        &self.gc_check_vars
    }

    pub fn successors(&self) -> &SuccessorSet {
        &self.successors
    }

    pub fn events_to_wait(&self) -> &[DeviceEventBinding] {
        &self.events_to_wait
    }

    pub fn events_to_record(&self) -> &[DeviceEventBinding] {
        &self.events_to_record
    }

    pub(crate) fn add_gc_check_var(&mut self, var: VarId) {
        if !self.gc_check_vars.contains(&var) {
            self.gc_check_vars.push(var);
        }
    }

    pub(crate) fn add_successor(&mut self, class: SuccessorClass, next: InstrId) {
        self.successors.push(class, next);
    }

    pub(crate) fn add_event_to_wait(&mut self, binding: DeviceEventBinding) {
        self.events_to_wait.push(binding);
    }

    pub(crate) fn add_event_to_record(&mut self, binding: DeviceEventBinding) {
        self.events_to_record.push(binding);
    }
}
