//! Program builders

use super::fixtures::TRACED;
use opgraph_exec::{AttrValue, OpDesc, Place, ProgramDesc, VarDesc};

/// `traced` op reading `inputs` and writing `outputs`
pub fn traced(tag: i64, inputs: &[&str], outputs: &[&str]) -> OpDesc {
    let mut op = OpDesc::new(TRACED).attr("tag", AttrValue::Int(tag));
    if !inputs.is_empty() {
        op = op.input("X", inputs);
    }
    if !outputs.is_empty() {
        op = op.output("Out", outputs);
    }
    op
}

pub trait OpDescExt {
    fn at(self, place: Place, queue: usize) -> OpDesc;
    fn sleep_us(self, us: i64) -> OpDesc;
}

impl OpDescExt for OpDesc {
    fn at(self, place: Place, queue: usize) -> OpDesc {
        self.on(place).queue(queue)
    }

    fn sleep_us(self, us: i64) -> OpDesc {
        self.attr("sleep_us", AttrValue::Int(us))
    }
}

/// Program declaring every name in `vars` as a plain temporary
pub fn program_with_vars(vars: &[&str]) -> ProgramDesc {
    vars.iter()
        .fold(ProgramDesc::new(), |desc, name| desc.var(VarDesc::new(*name)))
}
