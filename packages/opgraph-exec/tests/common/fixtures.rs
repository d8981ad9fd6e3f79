//! Interpreter fixtures and the `traced` test kernel

use opgraph_exec::{
    AttrValue, DeviceSpec, ExecutorConfig, Interpreter, KernelError, KernelRegistry, Place,
};
use opgraph_scope::Tensor;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const TRACED: &str = "traced";

/// Logical start/finish stamps of every traced kernel, keyed by tag
#[derive(Debug, Default)]
pub struct Timeline {
    clock: AtomicU64,
    spans: Mutex<BTreeMap<i64, (u64, u64)>>,
}

impl Timeline {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst)
    }

    pub fn span(&self, tag: i64) -> Option<(u64, u64)> {
        self.spans.lock().get(&tag).copied()
    }

    /// `a` finished before `b` started
    pub fn finished_before(&self, a: i64, b: i64) -> bool {
        match (self.span(a), self.span(b)) {
            (Some((_, a_end)), Some((b_start, _))) => a_end < b_start,
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.spans.lock().len()
    }

    pub fn clear(&self) {
        self.spans.lock().clear();
    }
}

/// Register `traced`: stamps start/finish under attr `tag`, optionally
/// sleeps `sleep_us`, writes `1 + sum(initialized X)` into every `Out`
pub fn register_traced(kernels: &KernelRegistry, timeline: Arc<Timeline>) {
    kernels.register_fn(TRACED, move |ctx| {
        let tag = match ctx.attr("tag") {
            Some(AttrValue::Int(tag)) => *tag,
            _ => return Err(KernelError::Other("traced op without tag".to_string())),
        };
        let start = timeline.tick();
        if let Some(us) = ctx.attr("sleep_us").and_then(AttrValue::as_f64) {
            std::thread::sleep(Duration::from_micros(us as u64));
        }
        let sum: f32 = ctx
            .input_vars("X")
            .iter()
            .filter_map(|v| v.get())
            .map(|t| t.data().iter().sum::<f32>())
            .sum();
        for var in ctx.output_vars("Out") {
            var.set(Tensor::scalar(sum + 1.0));
        }
        let end = timeline.tick();
        timeline.spans.lock().insert(tag, (start, end));
        Ok(())
    });
}

/// cpu, accelerator:0 with two queues, accelerator:1 with one
pub fn test_config() -> ExecutorConfig {
    ExecutorConfig::default()
        .host_threads(4)
        .devices(vec![
            DeviceSpec {
                place: Place::cpu(),
                queues: 1,
            },
            DeviceSpec {
                place: Place::accelerator(0),
                queues: 2,
            },
            DeviceSpec {
                place: Place::accelerator(1),
                queues: 1,
            },
        ])
        .event_wait_timeout_ms(Some(10_000))
}

pub fn interpreter() -> (Interpreter, Arc<Timeline>) {
    interpreter_with(test_config())
}

pub fn interpreter_with(config: ExecutorConfig) -> (Interpreter, Arc<Timeline>) {
    let interp = Interpreter::new(config).expect("valid test config");
    let timeline = Timeline::new();
    register_traced(interp.kernels(), Arc::clone(&timeline));
    (interp, timeline)
}
