//! Property-based ordering tests
//!
//! For random programs placed across host and accelerator queues:
//! - every hazard pair (read-after-write, write-after-read,
//!   write-after-write) finishes in program order
//! - every instruction runs exactly once
//! - static reference counts are fully consumed

mod common;

use common::*;
use opgraph_exec::{Place, ProgramDesc};
use proptest::prelude::*;
use std::collections::BTreeSet;

const VARS: [&str; 5] = ["v0", "v1", "v2", "v3", "v4"];

const PLACEMENTS: [(Place, usize); 4] = [
    (Place::cpu(), 0),
    (Place::accelerator(0), 0),
    (Place::accelerator(0), 1),
    (Place::accelerator(1), 0),
];

#[derive(Debug, Clone)]
struct RandomOp {
    placement: usize,
    reads: BTreeSet<usize>,
    write: usize,
    sleep_us: i64,
}

fn arb_op() -> impl Strategy<Value = RandomOp> {
    (
        0..PLACEMENTS.len(),
        proptest::collection::btree_set(0..VARS.len(), 0..3),
        0..VARS.len(),
        0i64..400,
    )
        .prop_map(|(placement, reads, write, sleep_us)| RandomOp {
            placement,
            reads,
            write,
            sleep_us,
        })
}

fn to_program(ops: &[RandomOp]) -> ProgramDesc {
    ops.iter()
        .enumerate()
        .fold(program_with_vars(&VARS), |desc, (i, op)| {
            let reads: Vec<&str> = op.reads.iter().map(|&v| VARS[v]).collect();
            let (place, queue) = PLACEMENTS[op.placement];
            desc.op(traced(i as i64, &reads, &[VARS[op.write]])
                .at(place, queue)
                .sleep_us(op.sleep_us))
        })
}

fn conflicts(a: &RandomOp, b: &RandomOp) -> bool {
    a.write == b.write || b.reads.contains(&a.write) || a.reads.contains(&b.write)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_hazards_finish_in_program_order(
        ops in proptest::collection::vec(arb_op(), 1..10),
    ) {
        let (interp, timeline) = interpreter();
        let program = interp.compile(&to_program(&ops), &[], &[]).unwrap();

        let out = interp.run(&program, &[]).unwrap();

        prop_assert_eq!(out.report.instructions_run, ops.len());
        prop_assert_eq!(timeline.len(), ops.len());
        for (i, a) in ops.iter().enumerate() {
            for (j, b) in ops.iter().enumerate().skip(i + 1) {
                if conflicts(a, b) {
                    prop_assert!(
                        timeline.finished_before(i as i64, j as i64),
                        "op {} must finish before op {} starts", i, j
                    );
                }
            }
        }
        prop_assert!(out.report.final_ref_counts.iter().all(|&c| c == 0));
    }

    #[test]
    fn prop_graph_edges_respect_program_order(
        ops in proptest::collection::vec(arb_op(), 1..12),
        shrink in any::<bool>(),
    ) {
        let config = test_config().shrink_dependencies(shrink);
        let (interp, timeline) = interpreter_with(config);
        let program = interp.compile(&to_program(&ops), &[], &[]).unwrap();

        for (from, to) in program.graph().edges() {
            prop_assert!(from < to);
            prop_assert!(conflicts(&ops[from.index()], &ops[to.index()]));
        }

        // each edge's consumer is in exactly one successor list of its producer
        for (from, to) in program.graph().edges() {
            let succ = program.instructions()[from.index()].successors();
            prop_assert!(succ.class_of(to).is_some());
        }
        let listed: usize = program.instructions().iter().map(|i| i.successors().len()).sum();
        prop_assert_eq!(listed, program.graph().edge_count());

        interp.run(&program, &[]).unwrap();
        for (from, to) in program.graph().edges() {
            prop_assert!(timeline.finished_before(from.index() as i64, to.index() as i64));
        }
    }
}
