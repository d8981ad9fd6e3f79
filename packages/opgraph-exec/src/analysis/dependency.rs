//! Hazard-based dependency edges between instructions.
//!
//! Edges are derived in program order: a later instruction depends on an
//! earlier one when it reads what the earlier one wrote (RAW), writes what
//! it read (WAR) or writes what it wrote (WAW). Edges therefore always point
//! forward and the graph is acyclic by construction.

use crate::ids::{InstrId, VarId};
use crate::instruction::Instruction;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    downstream: Vec<BTreeSet<usize>>,
}

#[derive(Default)]
struct VarAccess {
    last_writer: Option<usize>,
    readers_since_write: Vec<usize>,
}

impl DependencyGraph {
    /// Build edges for `instructions` in program order
    pub fn build(instructions: &[Instruction]) -> Self {
        let n = instructions.len();
        let mut downstream = vec![BTreeSet::new(); n];
        let mut access: HashMap<VarId, VarAccess> = HashMap::new();

        for (i, instr) in instructions.iter().enumerate() {
            let reads = instr.input_set();
            let writes = instr.output_set();

            for var in &reads {
                if let Some(w) = access.get(var).and_then(|a| a.last_writer) {
                    if w != i {
                        downstream[w].insert(i);
                    }
                }
            }
            for var in &writes {
                if let Some(a) = access.get(var) {
                    for &r in &a.readers_since_write {
                        if r != i {
                            downstream[r].insert(i);
                        }
                    }
                    if let Some(w) = a.last_writer {
                        if w != i {
                            downstream[w].insert(i);
                        }
                    }
                }
            }

            for var in &reads {
                access.entry(*var).or_default().readers_since_write.push(i);
            }
            for var in &writes {
                let a = access.entry(*var).or_default();
                a.last_writer = Some(i);
                a.readers_since_write.clear();
            }
        }

        Self { downstream }
    }

    /// Remove every edge `a -> c` that is implied by a longer path `a -> b ~> c`
    pub fn shrink(&mut self) -> usize {
        let n = self.downstream.len();
        let words = n.div_ceil(64);
        let mut reach = vec![vec![0u64; words]; n];

        // Edges point forward, so reverse program order is a topological order
        for a in (0..n).rev() {
            let mut bits = vec![0u64; words];
            for &b in &self.downstream[a] {
                bits[b / 64] |= 1 << (b % 64);
                for (dst, src) in bits.iter_mut().zip(&reach[b]) {
                    *dst |= *src;
                }
            }
            reach[a] = bits;
        }

        let mut removed = 0;
        for a in 0..n {
            let succs: Vec<usize> = self.downstream[a].iter().copied().collect();
            let redundant: Vec<usize> = succs
                .iter()
                .copied()
                .filter(|&c| {
                    succs
                        .iter()
                        .any(|&b| b != c && reach[b][c / 64] & (1 << (c % 64)) != 0)
                })
                .collect();
            for c in redundant {
                self.downstream[a].remove(&c);
                removed += 1;
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.downstream.len()
    }

    pub fn is_empty(&self) -> bool {
        self.downstream.is_empty()
    }

    pub fn successors(&self, id: InstrId) -> impl Iterator<Item = InstrId> + '_ {
        self.downstream
            .get(id.index())
            .into_iter()
            .flatten()
            .map(|&i| InstrId::new(i))
    }

    pub fn has_edge(&self, from: InstrId, to: InstrId) -> bool {
        self.downstream
            .get(from.index())
            .is_some_and(|s| s.contains(&to.index()))
    }

    /// Number of predecessors of every instruction
    pub fn dependency_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.downstream.len()];
        for succs in &self.downstream {
            for &s in succs {
                counts[s] += 1;
            }
        }
        counts
    }

    pub fn edges(&self) -> impl Iterator<Item = (InstrId, InstrId)> + '_ {
        self.downstream.iter().enumerate().flat_map(|(a, succs)| {
            succs
                .iter()
                .map(move |&b| (InstrId::new(a), InstrId::new(b)))
        })
    }

    pub fn edge_count(&self) -> usize {
        self.downstream.iter().map(BTreeSet::len).sum()
    }
}
