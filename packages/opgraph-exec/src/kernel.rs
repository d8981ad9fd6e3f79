//! Kernel interface and registry.
//!
//! Kernels are the opaque work units instructions invoke. They only see a
//! [`KernelContext`]: the bound input/output variables of one instruction
//! plus its attributes.

use crate::device::Place;
use dashmap::DashMap;
use opgraph_scope::{ScopeError, Tensor, Variable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Attribute value attached to an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Str(String),
}

impl AttrValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Int(v) => Some(*v as f64),
            AttrValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            AttrValue::Ints(v) => Some(v),
            _ => None,
        }
    }
}

pub type Attributes = BTreeMap<String, AttrValue>;

/// Variables bound to each argument name
pub type VarGroups = BTreeMap<String, Vec<Variable>>;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("missing input argument '{0}'")]
    MissingInput(String),

    #[error("missing output argument '{0}'")]
    MissingOutput(String),

    #[error("input '{0}' is not initialized")]
    Uninitialized(String),

    #[error("attribute '{name}': {reason}")]
    BadAttribute { name: String, reason: String },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error(transparent)]
    Store(#[from] ScopeError),

    #[error("{0}")]
    Other(String),
}

pub type KernelResult<T> = std::result::Result<T, KernelError>;

/// What a kernel can see while running
pub struct KernelContext<'a> {
    op_type: &'a str,
    place: Place,
    attrs: &'a Attributes,
    inputs: &'a VarGroups,
    outputs: &'a VarGroups,
}

impl<'a> KernelContext<'a> {
    pub fn new(
        op_type: &'a str,
        place: Place,
        attrs: &'a Attributes,
        inputs: &'a VarGroups,
        outputs: &'a VarGroups,
    ) -> Self {
        Self {
            op_type,
            place,
            attrs,
            inputs,
            outputs,
        }
    }

    pub fn op_type(&self) -> &str {
        self.op_type
    }

    pub fn place(&self) -> Place {
        self.place
    }

    pub fn input_vars(&self, arg: &str) -> &[Variable] {
        self.inputs.get(arg).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn output_vars(&self, arg: &str) -> &[Variable] {
        self.outputs.get(arg).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Value of the first variable bound to `arg`
    pub fn input(&self, arg: &str) -> KernelResult<Tensor> {
        let var = self
            .input_vars(arg)
            .first()
            .ok_or_else(|| KernelError::MissingInput(arg.to_string()))?;
        var.get()
            .ok_or_else(|| KernelError::Uninitialized(arg.to_string()))
    }

    /// Values of every variable bound to `arg`
    pub fn inputs(&self, arg: &str) -> KernelResult<Vec<Tensor>> {
        let vars = self.input_vars(arg);
        if vars.is_empty() {
            return Err(KernelError::MissingInput(arg.to_string()));
        }
        vars.iter()
            .map(|v| v.get().ok_or_else(|| KernelError::Uninitialized(arg.to_string())))
            .collect()
    }

    /// Store `value` into the first variable bound to `arg`
    pub fn set_output(&self, arg: &str, value: Tensor) -> KernelResult<()> {
        let var = self
            .output_vars(arg)
            .first()
            .ok_or_else(|| KernelError::MissingOutput(arg.to_string()))?;
        var.set(value);
        Ok(())
    }

    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.get(name)
    }

    pub fn attr_f32_or(&self, name: &str, default: f32) -> KernelResult<f32> {
        match self.attrs.get(name) {
            None => Ok(default),
            Some(value) => value.as_f64().map(|v| v as f32).ok_or_else(|| {
                KernelError::BadAttribute {
                    name: name.to_string(),
                    reason: "expected a number".to_string(),
                }
            }),
        }
    }

    pub fn attr_shape(&self, name: &str) -> KernelResult<Vec<usize>> {
        let ints = self
            .attrs
            .get(name)
            .and_then(AttrValue::as_ints)
            .ok_or_else(|| KernelError::BadAttribute {
                name: name.to_string(),
                reason: "expected a list of integers".to_string(),
            })?;
        ints.iter()
            .map(|&d| {
                usize::try_from(d).map_err(|_| KernelError::BadAttribute {
                    name: name.to_string(),
                    reason: format!("negative dimension {}", d),
                })
            })
            .collect()
    }
}

pub trait Kernel: Send + Sync {
    fn compute(&self, ctx: &KernelContext<'_>) -> KernelResult<()>;
}

/// Adapter turning a closure into a [`Kernel`]
pub struct FnKernel<F>(pub F);

impl<F> Kernel for FnKernel<F>
where
    F: Fn(&KernelContext<'_>) -> KernelResult<()> + Send + Sync,
{
    fn compute(&self, ctx: &KernelContext<'_>) -> KernelResult<()> {
        (self.0)(ctx)
    }
}

/// Op type → kernel lookup, safe to extend while other threads read it
#[derive(Default)]
pub struct KernelRegistry {
    kernels: DashMap<String, Arc<dyn Kernel>>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the builtin kernel set
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        crate::kernels::register_builtins(&registry);
        registry
    }

    /// Add or replace the kernel for `op_type`
    pub fn register(&self, op_type: impl Into<String>, kernel: Arc<dyn Kernel>) {
        self.kernels.insert(op_type.into(), kernel);
    }

    pub fn register_fn<F>(&self, op_type: impl Into<String>, f: F)
    where
        F: Fn(&KernelContext<'_>) -> KernelResult<()> + Send + Sync + 'static,
    {
        self.register(op_type, Arc::new(FnKernel(f)));
    }

    pub fn get(&self, op_type: &str) -> Option<Arc<dyn Kernel>> {
        self.kernels.get(op_type).map(|k| Arc::clone(k.value()))
    }

    pub fn contains(&self, op_type: &str) -> bool {
        self.kernels.contains_key(op_type)
    }

    pub fn op_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.kernels.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

impl std::fmt::Debug for KernelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelRegistry")
            .field("op_types", &self.op_types())
            .finish()
    }
}
