//! Static variable use counts and gc-check lists.
//!
//! A variable's users are the distinct instructions that read it plus every
//! writer that comes after its last reader (every writer when nothing reads
//! it). Each user carries the variable in its gc-check list, and the number
//! of users is the variable's static reference count: once that many
//! instructions completed, nothing will touch the buffer again.

use crate::ids::VarId;
use crate::instruction::Instruction;
use std::collections::BTreeMap;

/// Fill gc-check lists and return the static count of every variable used
pub fn analyze(instructions: &mut [Instruction]) -> BTreeMap<VarId, usize> {
    let mut readers: BTreeMap<VarId, Vec<usize>> = BTreeMap::new();
    let mut writers: BTreeMap<VarId, Vec<usize>> = BTreeMap::new();

    for (i, instr) in instructions.iter().enumerate() {
        for var in instr.input_set() {
            readers.entry(var).or_default().push(i);
        }
        for var in instr.output_set() {
            writers.entry(var).or_default().push(i);
        }
    }

    let mut vars: Vec<VarId> = readers.keys().chain(writers.keys()).copied().collect();
    vars.sort();
    vars.dedup();

    let mut counts = BTreeMap::new();
    for var in vars {
        let reads = readers.get(&var).map(Vec::as_slice).unwrap_or(&[]);
        let writes = writers.get(&var).map(Vec::as_slice).unwrap_or(&[]);

        let mut users: Vec<usize> = reads.to_vec();
        match reads.iter().max() {
            Some(&last_read) => users.extend(writes.iter().filter(|&&w| w > last_read)),
            None => users.extend_from_slice(writes),
        }
        users.sort_unstable();
        users.dedup();

        for &u in &users {
            instructions[u].add_gc_check_var(var);
        }
        counts.insert(var, users.len());
    }
    counts
}
