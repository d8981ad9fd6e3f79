//! Builtin kernels.
//!
//! | op type           | inputs      | outputs | attributes                 |
//! |-------------------|-------------|---------|----------------------------|
//! | `fill_constant`   |             | `Out`   | `shape`, `value`           |
//! | `assign`          | `X`         | `Out`   |                            |
//! | `scale`           | `X`         | `Out`   | `scale` (1.0), `bias` (0.0)|
//! | `elementwise_add` | `X`, `Y`    | `Out`   |                            |
//! | `sum`             | `X` (1..n)  | `Out`   |                            |
//! | `relu`            | `X`         | `Out`   |                            |
//! | `memcpy_h2d`      | `X`         | `Out`   |                            |
//! | `memcpy_d2h`      | `X`         | `Out`   |                            |

use crate::kernel::{Kernel, KernelContext, KernelError, KernelRegistry, KernelResult};
use opgraph_scope::Tensor;
use std::sync::Arc;

pub const FILL_CONSTANT: &str = "fill_constant";
pub const ASSIGN: &str = "assign";
pub const SCALE: &str = "scale";
pub const ELEMENTWISE_ADD: &str = "elementwise_add";
pub const SUM: &str = "sum";
pub const RELU: &str = "relu";
pub const MEMCPY_H2D: &str = "memcpy_h2d";
pub const MEMCPY_D2H: &str = "memcpy_d2h";

pub fn register_builtins(registry: &KernelRegistry) {
    registry.register(FILL_CONSTANT, Arc::new(FillConstant));
    registry.register(ASSIGN, Arc::new(Identity));
    registry.register(SCALE, Arc::new(Scale));
    registry.register(ELEMENTWISE_ADD, Arc::new(ElementwiseAdd));
    registry.register(SUM, Arc::new(Sum));
    registry.register(RELU, Arc::new(Relu));
    registry.register(MEMCPY_H2D, Arc::new(Identity));
    registry.register(MEMCPY_D2H, Arc::new(Identity));
}

struct FillConstant;

impl Kernel for FillConstant {
    fn compute(&self, ctx: &KernelContext<'_>) -> KernelResult<()> {
        let shape = ctx.attr_shape("shape")?;
        let value = ctx.attr_f32_or("value", 0.0)?;
        ctx.set_output("Out", Tensor::filled(shape, value))
    }
}

/// `assign` and both memcpy directions: devices share host memory here
struct Identity;

impl Kernel for Identity {
    fn compute(&self, ctx: &KernelContext<'_>) -> KernelResult<()> {
        let x = ctx.input("X")?;
        ctx.set_output("Out", x)
    }
}

struct Scale;

impl Kernel for Scale {
    fn compute(&self, ctx: &KernelContext<'_>) -> KernelResult<()> {
        let scale = ctx.attr_f32_or("scale", 1.0)?;
        let bias = ctx.attr_f32_or("bias", 0.0)?;
        let x = ctx.input("X")?;
        ctx.set_output("Out", x.map(|v| v * scale + bias))
    }
}

struct ElementwiseAdd;

impl Kernel for ElementwiseAdd {
    fn compute(&self, ctx: &KernelContext<'_>) -> KernelResult<()> {
        let x = ctx.input("X")?;
        let y = ctx.input("Y")?;
        let out = x
            .zip_with(&y, |a, b| a + b)
            .map_err(|e| KernelError::ShapeMismatch(e.message.clone()))?;
        ctx.set_output("Out", out)
    }
}

struct Sum;

impl Kernel for Sum {
    fn compute(&self, ctx: &KernelContext<'_>) -> KernelResult<()> {
        let mut values = ctx.inputs("X")?.into_iter();
        let first = values
            .next()
            .ok_or_else(|| KernelError::MissingInput("X".to_string()))?;
        let total = values.try_fold(first, |acc, t| {
            acc.zip_with(&t, |a, b| a + b)
                .map_err(|e| KernelError::ShapeMismatch(e.message.clone()))
        })?;
        ctx.set_output("Out", total)
    }
}

struct Relu;

impl Kernel for Relu {
    fn compute(&self, ctx: &KernelContext<'_>) -> KernelResult<()> {
        let x = ctx.input("X")?;
        ctx.set_output("Out", x.map(|v| v.max(0.0)))
    }
}
