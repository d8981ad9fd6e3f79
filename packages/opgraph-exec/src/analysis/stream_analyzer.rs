//! Successor classification and event binding.
//!
//! For every dependency edge the analyzer decides how the consumer is
//! released (see [`SuccessorClass`]) and, for edges crossing contexts, binds
//! one [`DeviceEvent`] per `(producer, variable)` pair. The producer records
//! it; every consumer of that pair waits on the same handle.

use super::dependency::DependencyGraph;
use crate::device::{DeviceContextPool, DeviceType};
use crate::error::Result;
use crate::event::{DeviceEvent, DeviceEventBinding};
use crate::ids::{InstrId, VarId};
use crate::instruction::{Instruction, OpFuncType};
use crate::successors::SuccessorClass;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::trace;

/// Release class of the edge `cur -> next`
pub fn classify(cur: &Instruction, next: &Instruction) -> SuccessorClass {
    if cur.device() == next.device() || cur.func_type() == OpFuncType::QueueSync {
        SuccessorClass::Direct
    } else if next.func_type() == OpFuncType::QueueSync {
        SuccessorClass::SyncRun
    } else {
        SuccessorClass::EventWait
    }
}

/// Variables whose state must be visible across the edge `cur -> next`
pub fn event_vars(cur: &Instruction, next: &Instruction) -> BTreeSet<VarId> {
    let cur_in = cur.input_set();
    let cur_out = cur.output_set();
    let next_in = next.input_set();
    let next_out = next.output_set();

    let mut vars: BTreeSet<VarId> = cur_out.intersection(&next_in).copied().collect();
    vars.extend(cur_in.intersection(&next_out).copied());
    vars.extend(cur_out.intersection(&next_out).copied());
    vars
}

#[derive(Debug, Default)]
pub struct StreamAnalysis {
    /// Every event created, in creation order
    pub events: Vec<Arc<DeviceEvent>>,
}

/// Populate successor sets and event bindings of `instructions`
pub fn analyze(
    instructions: &mut [Instruction],
    graph: &DependencyGraph,
    devices: &DeviceContextPool,
) -> Result<StreamAnalysis> {
    let mut analysis = StreamAnalysis::default();
    let mut by_pair: HashMap<(InstrId, VarId), Arc<DeviceEvent>> = HashMap::new();

    for cur_idx in 0..instructions.len() {
        let cur_id = InstrId::new(cur_idx);
        for next_id in graph.successors(cur_id).collect::<Vec<_>>() {
            let (class, vars, waiter_type) = {
                let cur = &instructions[cur_idx];
                let next = &instructions[next_id.index()];
                let class = classify(cur, next);
                let waiter_type = match next.func_type() {
                    OpFuncType::QueueSync => DeviceType::Cpu,
                    OpFuncType::QueueAsync => devices.context(next.device())?.device_type(),
                };
                (class, event_vars(cur, next), waiter_type)
            };

            instructions[cur_idx].add_successor(class, next_id);
            trace!(from = %cur_id, to = %next_id, %class, "edge classified");
            if class == SuccessorClass::Direct {
                continue;
            }

            for var in vars {
                let event = match by_pair.get(&(cur_id, var)) {
                    Some(event) => Arc::clone(event),
                    None => {
                        let event = Arc::new(DeviceEvent::new(cur_id, var));
                        by_pair.insert((cur_id, var), Arc::clone(&event));
                        analysis.events.push(Arc::clone(&event));
                        let producer_type = devices.context(instructions[cur_idx].device())?.device_type();
                        instructions[cur_idx].add_event_to_record(DeviceEventBinding::new(
                            var,
                            Arc::clone(&event),
                            producer_type,
                        ));
                        event
                    }
                };
                instructions[next_id.index()]
                    .add_event_to_wait(DeviceEventBinding::new(var, event, waiter_type));
            }
        }
    }

    Ok(analysis)
}
