//! Program descriptors and compilation into an instruction graph.
//!
//! A [`ProgramDesc`] is the compile-time input: variable descriptors plus an
//! ordered list of operation descriptors. [`ProgramBuilder`] turns it into a
//! [`CompiledProgram`] once; the compiled artifact is reused by every
//! invocation.
//!
//! ```yaml
//! version: 1
//! vars:
//!   - name: x
//!     shape: [2]
//!   - name: y
//!     shape: [2]
//! ops:
//!   - type: relu
//!     inputs: { X: [x] }
//!     outputs: { Out: [y] }
//!     place: accelerator:0
//! ```

use crate::analysis::{self, DependencyGraph};
use crate::config::executor_config::{take_version, to_versioned_yaml};
use crate::config::{ConfigResult, ExecutorConfig};
use crate::device::{DeviceContextPool, Place};
use crate::error::{ExecError, Result};
use crate::event::DeviceEvent;
use crate::gc::GarbageCollector;
use crate::ids::{InstrId, NodeId, VarId};
use crate::instruction::{Instruction, OpFuncNode, VarIdGroups};
use crate::kernel::{AttrValue, Attributes, KernelRegistry, VarGroups};
use crate::registry::VariableRegistry;
use crate::successors::SuccessorClass;
use crate::var_desc::VarDesc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// One operation of a program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpDesc {
    #[serde(rename = "type")]
    pub op_type: String,

    #[serde(default)]
    pub inputs: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub outputs: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub attrs: Attributes,

    #[serde(default)]
    pub place: Place,

    /// Which of the place's queues to run on
    #[serde(default)]
    pub queue: usize,
}

impl OpDesc {
    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            op_type: op_type.into(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            attrs: Attributes::new(),
            place: Place::cpu(),
            queue: 0,
        }
    }

    pub fn input(mut self, arg: &str, names: &[&str]) -> Self {
        self.inputs
            .insert(arg.to_string(), names.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn output(mut self, arg: &str, names: &[&str]) -> Self {
        self.outputs
            .insert(arg.to_string(), names.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn attr(mut self, name: &str, value: AttrValue) -> Self {
        self.attrs.insert(name.to_string(), value);
        self
    }

    pub fn on(mut self, place: Place) -> Self {
        self.place = place;
        self
    }

    pub fn queue(mut self, queue: usize) -> Self {
        self.queue = queue;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProgramDesc {
    #[serde(default)]
    pub vars: Vec<VarDesc>,

    #[serde(default)]
    pub ops: Vec<OpDesc>,
}

impl ProgramDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn var(mut self, desc: VarDesc) -> Self {
        self.vars.push(desc);
        self
    }

    pub fn op(mut self, op: OpDesc) -> Self {
        self.ops.push(op);
        self
    }

    pub fn from_yaml(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        let mut value: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        take_version(&mut value)?;
        Ok(serde_yaml::from_value(value)?)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        to_versioned_yaml(self)
    }
}

/// Immutable instruction graph plus the state shared by its invocations
#[derive(Debug)]
pub struct CompiledProgram {
    instructions: Vec<Instruction>,
    nodes: Vec<OpFuncNode>,
    graph: DependencyGraph,
    dependency_counts: Vec<usize>,
    static_ref_counts: Vec<usize>,
    gc: GarbageCollector,
    events: Vec<Arc<DeviceEvent>>,
    feeds: BTreeMap<String, VarId>,
    fetches: BTreeMap<String, VarId>,
    generation: AtomicU64,
}

impl CompiledProgram {
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn instruction(&self, id: InstrId) -> Result<&Instruction> {
        self.instructions.get(id.index()).ok_or_else(|| {
            ExecError::precondition(format!(
                "instruction id {} out of range ({} instructions)",
                id,
                self.instructions.len()
            ))
        })
    }

    pub fn node(&self, id: NodeId) -> Result<&OpFuncNode> {
        self.nodes
            .get(id.index())
            .ok_or_else(|| ExecError::precondition(format!("op node #{} out of range", id.index())))
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn dependency_counts(&self) -> &[usize] {
        &self.dependency_counts
    }

    /// Static reference counts indexed by variable id
    pub fn static_ref_counts(&self) -> &[usize] {
        &self.static_ref_counts
    }

    pub fn gc(&self) -> &GarbageCollector {
        &self.gc
    }

    pub fn events(&self) -> &[Arc<DeviceEvent>] {
        &self.events
    }

    pub fn feeds(&self) -> &BTreeMap<String, VarId> {
        &self.feeds
    }

    pub fn fetches(&self) -> &BTreeMap<String, VarId> {
        &self.fetches
    }

    /// Number of successors of each class across the program
    pub fn class_counts(&self) -> BTreeMap<SuccessorClass, usize> {
        let mut counts = BTreeMap::new();
        for instr in &self.instructions {
            let s = instr.successors();
            for (class, n) in [
                (SuccessorClass::Direct, s.direct().len()),
                (SuccessorClass::EventWait, s.event_wait().len()),
                (SuccessorClass::SyncRun, s.sync_run().len()),
            ] {
                *counts.entry(class).or_insert(0) += n;
            }
        }
        counts
    }

    /// Start a new invocation generation and re-arm every event
    pub(crate) fn next_generation(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        for event in &self.events {
            event.reset(generation);
        }
        generation
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

/// Compiles program descriptors against one registry and device pool
pub struct ProgramBuilder<'a> {
    registry: &'a VariableRegistry,
    devices: &'a DeviceContextPool,
    kernels: &'a KernelRegistry,
    config: &'a ExecutorConfig,
}

impl<'a> ProgramBuilder<'a> {
    pub fn new(
        registry: &'a VariableRegistry,
        devices: &'a DeviceContextPool,
        kernels: &'a KernelRegistry,
        config: &'a ExecutorConfig,
    ) -> Self {
        Self {
            registry,
            devices,
            kernels,
            config,
        }
    }

    pub fn build(&self, desc: &ProgramDesc, feeds: &[&str], fetches: &[&str]) -> Result<CompiledProgram> {
        for var in &desc.vars {
            self.registry.register(&var.name, Some(var.clone()))?;
        }

        let mut feed_ids = BTreeMap::new();
        for &name in feeds {
            let id = match self.registry.id_of(name) {
                Ok(id) => id,
                Err(_) => self.registry.register(name, None)?,
            };
            feed_ids.insert(name.to_string(), id);
        }
        let mut fetch_ids = BTreeMap::new();
        for &name in fetches {
            let id = self.registry.id_of(name).map_err(|_| {
                ExecError::precondition(format!("fetch target '{}' is not declared", name))
            })?;
            fetch_ids.insert(name.to_string(), id);
        }

        let mut nodes = Vec::with_capacity(desc.ops.len());
        let mut instructions = Vec::with_capacity(desc.ops.len());
        for (i, op) in desc.ops.iter().enumerate() {
            let (node, instr) = self.lower_op(i, op)?;
            nodes.push(node);
            instructions.push(instr);
        }

        let mut graph = DependencyGraph::build(&instructions);
        let shrunk = if self.config.shrink_dependencies {
            graph.shrink()
        } else {
            0
        };
        let streams = analysis::stream_analyzer::analyze(&mut instructions, &graph, self.devices)?;
        let use_counts = analysis::lifetime::analyze(&mut instructions);

        // Counts belong to this program; variables it never touches stay at zero
        let mut static_ref_counts = vec![0; self.registry.issued()];
        for (&var, &count) in &use_counts {
            static_ref_counts[var.index()] = count;
        }
        // The registry mirrors the most recently compiled program
        self.registry.reset_ref_counts();
        for (&var, &count) in &use_counts {
            self.registry.set_ref_count(var, count)?;
        }

        let gc = self.build_gc(&feed_ids, &fetch_ids)?;
        let dependency_counts = graph.dependency_counts();

        let program = CompiledProgram {
            instructions,
            nodes,
            graph,
            dependency_counts,
            static_ref_counts,
            gc,
            events: streams.events,
            feeds: feed_ids,
            fetches: fetch_ids,
            generation: AtomicU64::new(0),
        };

        let classes = program.class_counts();
        info!(
            instructions = program.len(),
            edges = program.graph.edge_count(),
            shrunk,
            direct = classes.get(&SuccessorClass::Direct).copied().unwrap_or(0),
            event_wait = classes.get(&SuccessorClass::EventWait).copied().unwrap_or(0),
            sync_run = classes.get(&SuccessorClass::SyncRun).copied().unwrap_or(0),
            events = program.events.len(),
            "program compiled"
        );
        Ok(program)
    }

    fn lower_op(&self, index: usize, op: &OpDesc) -> Result<(OpFuncNode, Instruction)> {
        let kernel = self.kernels.get(&op.op_type).ok_or_else(|| {
            ExecError::precondition(format!("op #{}: no kernel for '{}'", index, op.op_type))
        })?;
        let device = self.devices.resolve(op.place, op.queue)?;

        let (input_ids, input_vars) = self.resolve_groups(index, &op.inputs)?;
        let (output_ids, output_vars) = self.resolve_groups(index, &op.outputs)?;

        let node = OpFuncNode::new(
            op.op_type.clone(),
            op.attrs.clone(),
            kernel,
            op.place,
            input_vars,
            output_vars,
        );
        let instr = Instruction::new(
            index as i64,
            NodeId::new(index),
            device,
            node.func_type(),
            input_ids,
            output_ids,
        )?;
        debug!(instr = %instr.id(), op = %op.op_type, %device, func_type = %node.func_type(), "op lowered");
        Ok((node, instr))
    }

    fn resolve_groups(
        &self,
        index: usize,
        groups: &BTreeMap<String, Vec<String>>,
    ) -> Result<(VarIdGroups, VarGroups)> {
        let mut ids = VarIdGroups::new();
        let mut vars = VarGroups::new();
        for (arg, names) in groups {
            let mut arg_ids = Vec::with_capacity(names.len());
            let mut arg_vars = Vec::with_capacity(names.len());
            for name in names {
                let id = self.registry.id_of(name).map_err(|_| {
                    ExecError::precondition(format!(
                        "op #{} argument '{}' uses undeclared variable '{}'",
                        index, arg, name
                    ))
                })?;
                arg_vars.push(self.registry.get(id)?);
                arg_ids.push(id);
            }
            ids.insert(arg.clone(), arg_ids);
            vars.insert(arg.clone(), arg_vars);
        }
        Ok((ids, vars))
    }

    /// Feeds and fetches are owned by the caller and never reclaimed
    fn build_gc(
        &self,
        feeds: &BTreeMap<String, VarId>,
        fetches: &BTreeMap<String, VarId>,
    ) -> Result<GarbageCollector> {
        let keep: BTreeSet<VarId> = feeds
            .values()
            .chain(fetches.values())
            .copied()
            .chain(
                self.config
                    .gc
                    .never_free
                    .iter()
                    .filter_map(|name| self.registry.id_of(name).ok()),
            )
            .collect();

        let issued = self.registry.issued();
        let mut collectable = Vec::with_capacity(issued);
        let mut handles = Vec::with_capacity(issued);
        for i in 0..issued {
            let id = VarId::new(i);
            let live = self.registry.exists_id(id);
            collectable.push(live && !keep.contains(&id) && self.registry.is_collectable(id)?);
            handles.push(if live { Some(self.registry.get(id)?) } else { None });
        }
        Ok(GarbageCollector::new(self.config.gc.enabled, collectable, handles))
    }
}
