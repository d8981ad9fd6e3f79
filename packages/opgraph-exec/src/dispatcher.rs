//! Dependency-driven dispatch of a compiled program.
//!
//! Host workers each drain a local FIFO of ready instructions. Dispatching
//! an instruction submits one task to its context: wait input events, run
//! the kernel, run the gc check, record output events. QueueAsync work lands
//! on the device queue; QueueSync work completes before the worker moves on.
//!
//! Successors are released when their unresolved-predecessor count drops to
//! zero. An asynchronous producer keeps its direct and event-wait successors
//! on the local FIFO and hands sync-run successors to another host worker
//! that first drains the producer's queue. A synchronous producer keeps one
//! ready successor and spawns the rest.
//!
//! Events are recorded even when the invocation aborted, so nothing that was
//! already submitted can block forever.

use crate::device::DeviceContextPool;
use crate::error::{ExecError, Result};
use crate::event::WaitOutcome;
use crate::gc::{FreeLog, RefCountTable};
use crate::ids::{DeviceId, InstrId, VarId};
use crate::instruction::{Instruction, OpFuncType};
use crate::program::CompiledProgram;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Outcome of one successful invocation
#[derive(Debug, Clone)]
pub struct InvocationReport {
    pub invocation_id: Uuid,
    pub generation: u64,
    pub instructions_run: usize,
    /// Variables whose buffers were released, in release order
    pub freed: Vec<VarId>,
    pub freed_bytes: usize,
    /// Reference counts after the run, indexed by variable id
    pub final_ref_counts: Vec<usize>,
    pub elapsed: Duration,
}

/// Mutable state of one invocation
struct RunState {
    generation: u64,
    wait_timeout: Option<Duration>,
    deps: Vec<AtomicUsize>,
    ref_counts: RefCountTable,
    free_log: FreeLog,
    run_count: AtomicUsize,
    aborted: AtomicBool,
    first_error: Mutex<Option<ExecError>>,
}

impl RunState {
    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Keep the first error; later ones are consequences of it
    fn abort(&self, err: ExecError) {
        let mut slot = self.first_error.lock();
        if slot.is_none() {
            warn!(error = %err, "invocation aborted");
            *slot = Some(err);
        } else {
            debug!(error = %err, "additional failure after abort");
        }
        self.aborted.store(true, Ordering::Release);
    }

    fn take_error(&self) -> Option<ExecError> {
        self.first_error.lock().take()
    }

    /// Resolve one predecessor of `next`; true when it became ready
    fn release(&self, next: InstrId) -> bool {
        match self.deps.get(next.index()) {
            Some(counter) => counter.fetch_sub(1, Ordering::AcqRel) == 1,
            None => {
                self.abort(ExecError::precondition(format!(
                    "successor {} out of range",
                    next
                )));
                false
            }
        }
    }
}

pub struct Dispatcher<'a> {
    program: Arc<CompiledProgram>,
    devices: &'a DeviceContextPool,
    pool: &'a rayon::ThreadPool,
    state: Arc<RunState>,
}

impl<'a> Dispatcher<'a> {
    /// Prepare one invocation: re-arm events and copy the static counts
    pub fn new(
        program: Arc<CompiledProgram>,
        devices: &'a DeviceContextPool,
        pool: &'a rayon::ThreadPool,
        wait_timeout: Option<Duration>,
    ) -> Self {
        let generation = program.next_generation();
        let state = RunState {
            generation,
            wait_timeout,
            deps: program
                .dependency_counts()
                .iter()
                .map(|&c| AtomicUsize::new(c))
                .collect(),
            ref_counts: RefCountTable::from_static(program.static_ref_counts()),
            free_log: FreeLog::new(),
            run_count: AtomicUsize::new(0),
            aborted: AtomicBool::new(false),
            first_error: Mutex::new(None),
        };
        Self {
            program,
            devices,
            pool,
            state: Arc::new(state),
        }
    }

    pub fn generation(&self) -> u64 {
        self.state.generation
    }

    /// Run every instruction to completion or abort on the first failure
    pub fn run(self) -> Result<InvocationReport> {
        let start = Instant::now();
        let invocation_id = Uuid::new_v4();
        let total = self.program.len();
        let roots: Vec<InstrId> = self
            .program
            .dependency_counts()
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(i, _)| InstrId::new(i))
            .collect();
        debug!(%invocation_id, generation = self.state.generation, roots = roots.len(), total, "dispatch started");

        let this = &self;
        self.pool.scope(|s| {
            for root in roots {
                s.spawn(move |s| this.run_local(s, root));
            }
        });

        let drained = self.devices.synchronize_all();
        if let Some(err) = self.state.take_error() {
            error!(%invocation_id, error = %err, "invocation failed");
            return Err(err);
        }
        drained?;

        let instructions_run = self.state.run_count.load(Ordering::Acquire);
        if instructions_run != total {
            return Err(ExecError::precondition(format!(
                "only {} of {} instructions ran; the dependency graph is not fully reachable",
                instructions_run, total
            )));
        }

        let report = InvocationReport {
            invocation_id,
            generation: self.state.generation,
            instructions_run,
            freed: self.state.free_log.freed(),
            freed_bytes: self.state.free_log.bytes(),
            final_ref_counts: self.state.ref_counts.snapshot(),
            elapsed: start.elapsed(),
        };
        info!(
            %invocation_id,
            generation = report.generation,
            instructions = report.instructions_run,
            freed = report.freed.len(),
            freed_bytes = report.freed_bytes,
            elapsed_us = report.elapsed.as_micros() as u64,
            "invocation finished"
        );
        Ok(report)
    }

    fn run_local<'s>(&'s self, scope: &rayon::Scope<'s>, start: InstrId) {
        let mut ready = VecDeque::from([start]);
        while let Some(id) = ready.pop_front() {
            if self.state.is_aborted() {
                return;
            }
            let instr = match self.program.instruction(id) {
                Ok(instr) => instr,
                Err(e) => return self.state.abort(e),
            };
            if let Err(e) = self.dispatch(instr) {
                return self.state.abort(e);
            }
            self.release_successors(scope, instr, &mut ready);
        }
    }

    fn dispatch(&self, instr: &Instruction) -> Result<()> {
        let ctx = self.devices.context(instr.device())?;
        let program = Arc::clone(&self.program);
        let state = Arc::clone(&self.state);
        let id = instr.id();
        let work = move || execute(&program, &state, id);

        match instr.func_type() {
            OpFuncType::QueueAsync => {
                debug!(instr = %id, device = %ctx.id(), "enqueued");
                ctx.submit(work)
            }
            OpFuncType::QueueSync if ctx.is_async() => {
                debug!(instr = %id, device = %ctx.id(), "enqueued, waiting for completion");
                ctx.submit(work)?;
                ctx.synchronize()
            }
            OpFuncType::QueueSync => {
                debug!(instr = %id, "running on host");
                ctx.submit(work)
            }
        }
    }

    fn release_successors<'s>(
        &'s self,
        scope: &rayon::Scope<'s>,
        instr: &Instruction,
        ready: &mut VecDeque<InstrId>,
    ) {
        let successors = instr.successors();
        let mut local_slots = if instr.is_async() { usize::MAX } else { 1 };

        for &next in successors.direct().iter().chain(successors.event_wait()) {
            if !self.state.release(next) {
                continue;
            }
            if local_slots > 0 {
                local_slots -= 1;
                ready.push_back(next);
            } else {
                scope.spawn(move |s| self.run_local(s, next));
            }
        }

        let producer = instr.device();
        for &next in successors.sync_run() {
            if self.state.release(next) {
                scope.spawn(move |s| self.run_after_drain(s, producer, next));
            }
        }
    }

    /// Block until `producer`'s queue drained, then continue with `next`
    fn run_after_drain<'s>(&'s self, scope: &rayon::Scope<'s>, producer: DeviceId, next: InstrId) {
        if self.state.is_aborted() {
            return;
        }
        let drained = self
            .devices
            .context(producer)
            .and_then(|ctx| ctx.synchronize());
        if let Err(e) = drained {
            return self.state.abort(e);
        }
        trace!(%producer, instr = %next, "producer queue drained");
        self.run_local(scope, next);
    }
}

/// Body of one instruction as it runs on its context
fn execute(program: &CompiledProgram, state: &RunState, id: InstrId) {
    let instr = match program.instruction(id) {
        Ok(instr) => instr,
        Err(e) => return state.abort(e),
    };

    // Abort before recording so woken waiters observe the failure
    match run_instruction(program, state, instr) {
        Ok(true) => {
            state.run_count.fetch_add(1, Ordering::AcqRel);
        }
        Ok(false) => trace!(instr = %id, "skipped after abort"),
        Err(e) => state.abort(e),
    }

    for binding in instr.events_to_record() {
        if let Err(e) = binding.event().record(id, state.generation) {
            state.abort(e);
        }
    }
}

/// Wait, compute, collect. Returns false when skipped because of an abort.
fn run_instruction(program: &CompiledProgram, state: &RunState, instr: &Instruction) -> Result<bool> {
    let id = instr.id();
    let node = program.node(instr.node())?;
    if state.is_aborted() {
        return Ok(false);
    }

    for binding in instr.events_to_wait() {
        match binding.event().wait(state.generation, state.wait_timeout)? {
            WaitOutcome::Signaled => {}
            WaitOutcome::TimedOut => {
                return Err(ExecError::runtime(
                    id,
                    node.op_type(),
                    format!(
                        "timed out waiting for {} from {}",
                        binding.var(),
                        binding.event().producer()
                    ),
                ))
            }
        }
    }
    if state.is_aborted() {
        return Ok(false);
    }

    match catch_unwind(AssertUnwindSafe(|| node.run())) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(ExecError::runtime(id, node.op_type(), e)),
        Err(payload) => {
            return Err(ExecError::runtime(
                id,
                node.op_type(),
                format!("kernel panicked: {}", panic_message(payload.as_ref())),
            ))
        }
    }
    trace!(instr = %id, op = node.op_type(), "work unit completed");

    program
        .gc()
        .check(id, instr.gc_check_vars(), &state.ref_counts, &state.free_log)?;
    Ok(true)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(deps: &[usize]) -> RunState {
        RunState {
            generation: 1,
            wait_timeout: None,
            deps: deps.iter().map(|&c| AtomicUsize::new(c)).collect(),
            ref_counts: RefCountTable::from_static(&[]),
            free_log: FreeLog::new(),
            run_count: AtomicUsize::new(0),
            aborted: AtomicBool::new(false),
            first_error: Mutex::new(None),
        }
    }

    #[test]
    fn test_release_on_last_predecessor() {
        let st = state(&[2]);
        assert!(!st.release(InstrId::new(0)));
        assert!(st.release(InstrId::new(0)));
        assert!(!st.is_aborted());

        assert!(!st.release(InstrId::new(7)));
        assert!(st.is_aborted());
    }

    #[test]
    fn test_abort_keeps_first_error() {
        let st = state(&[]);
        st.abort(ExecError::runtime(InstrId::new(1), "relu", "first"));
        st.abort(ExecError::precondition("second"));
        assert!(st.is_aborted());
        let err = st.take_error().unwrap();
        assert_eq!(err.instruction(), Some(InstrId::new(1)));
        assert!(st.take_error().is_none());
    }

    #[test]
    fn test_panic_message() {
        let payload = catch_unwind(|| panic!("kernel exploded")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "kernel exploded");
        let payload = catch_unwind(|| std::panic::panic_any(42_u8)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}
