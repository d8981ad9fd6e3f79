//! Dispatch benchmarks
//!
//! - compile: lowering, hazard analysis and successor classification
//! - chain: one long dependency chain on a single queue (all direct)
//! - fan_out: one producer feeding many consumers spread over queues
//! - gc: the same chain with reclamation on and off

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use opgraph_exec::{AttrValue, DeviceSpec, ExecutorConfig, Interpreter, OpDesc, Place, ProgramDesc, VarDesc};
use opgraph_scope::Tensor;

fn bench_config() -> ExecutorConfig {
    ExecutorConfig::default().devices(vec![
        DeviceSpec {
            place: Place::cpu(),
            queues: 1,
        },
        DeviceSpec {
            place: Place::accelerator(0),
            queues: 4,
        },
    ])
}

/// `x -> t0 -> t1 -> ... -> out`, all on accelerator:0 queue 0
fn chain(len: usize) -> ProgramDesc {
    let mut desc = ProgramDesc::new().var(VarDesc::new("out"));
    let mut prev = "x".to_string();
    for i in 0..len {
        let next = if i + 1 == len {
            "out".to_string()
        } else {
            format!("t{}", i)
        };
        if i + 1 != len {
            desc = desc.var(VarDesc::new(next.clone()));
        }
        desc = desc.op(OpDesc::new("scale")
            .input("X", &[prev.as_str()])
            .output("Out", &[next.as_str()])
            .attr("scale", AttrValue::Float(1.01))
            .on(Place::accelerator(0)));
        prev = next;
    }
    desc
}

/// One producer, `width` relu consumers round-robin over four queues,
/// then a host-side `sum`
fn fan_out(width: usize) -> ProgramDesc {
    let mut desc = ProgramDesc::new()
        .var(VarDesc::new("src"))
        .var(VarDesc::new("total"))
        .op(OpDesc::new("scale")
            .input("X", &["x"])
            .output("Out", &["src"])
            .on(Place::accelerator(0)));
    let branches: Vec<String> = (0..width).map(|i| format!("b{}", i)).collect();
    for (i, name) in branches.iter().enumerate() {
        desc = desc.var(VarDesc::new(name.clone())).op(OpDesc::new("relu")
            .input("X", &["src"])
            .output("Out", &[name.as_str()])
            .on(Place::accelerator(0))
            .queue(i % 4));
    }
    let names: Vec<&str> = branches.iter().map(String::as_str).collect();
    desc.op(OpDesc::new("sum").input("X", &names).output("Out", &["total"]))
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");

    for len in [16, 128, 512] {
        let desc = chain(len);
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::new("chain", len), &desc, |b, desc| {
            let interp = Interpreter::new(bench_config()).unwrap();
            b.iter(|| black_box(interp.compile(desc, &["x"], &["out"]).unwrap()));
        });
    }

    group.finish();
}

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");
    let input = Tensor::filled(vec![256], 1.0);

    for len in [16, 128] {
        let interp = Interpreter::new(bench_config()).unwrap();
        let program = interp.compile(&chain(len), &["x"], &["out"]).unwrap();
        group.throughput(Throughput::Elements(len as u64));
        group.bench_function(BenchmarkId::from_parameter(len), |b| {
            b.iter(|| black_box(interp.run(&program, &[("x", input.clone())]).unwrap()));
        });
    }

    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    let input = Tensor::filled(vec![256], -0.5);

    for width in [4, 32, 128] {
        let interp = Interpreter::new(bench_config()).unwrap();
        let program = interp.compile(&fan_out(width), &["x"], &["total"]).unwrap();
        group.throughput(Throughput::Elements(width as u64 + 2));
        group.bench_function(BenchmarkId::from_parameter(width), |b| {
            b.iter(|| black_box(interp.run(&program, &[("x", input.clone())]).unwrap()));
        });
    }

    group.finish();
}

fn bench_gc(c: &mut Criterion) {
    let mut group = c.benchmark_group("gc");
    let input = Tensor::filled(vec![4096], 1.0);

    for enabled in [true, false] {
        let interp = Interpreter::new(bench_config().gc_enabled(enabled)).unwrap();
        let program = interp.compile(&chain(64), &["x"], &["out"]).unwrap();
        let label = if enabled { "enabled" } else { "disabled" };
        group.bench_function(label, |b| {
            b.iter(|| black_box(interp.run(&program, &[("x", input.clone())]).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_compile, bench_chain, bench_fan_out, bench_gc);
criterion_main!(benches);
