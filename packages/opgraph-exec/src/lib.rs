//! opgraph-exec - Dependency-driven instruction dispatcher
//!
//! Runs a precompiled dataflow program across host and accelerator
//! contexts. Cross-queue ordering comes from the successor classification
//! and device events; intermediate buffers are freed as soon as their static
//! reference count drops to zero.
//!
//! ## Pipeline
//!
//! 1. **Registry**: `VariableRegistry` indexes the store's variables by id
//!    and mirrors store mutations through a listener.
//! 2. **Compile**: `ProgramBuilder` lowers `ProgramDesc` ops into
//!    `Instruction`s, derives hazard edges, classifies successors
//!    (direct / event-wait / sync-run), binds events and computes static
//!    use counts.
//! 3. **Dispatch**: `Dispatcher` releases instructions as their predecessors
//!    finish, runs kernels on their contexts and frees buffers at zero.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use opgraph_exec::{ExecutorConfig, Interpreter, OpDesc, Place, ProgramDesc, VarDesc};
//! use opgraph_scope::Tensor;
//!
//! let interp = Interpreter::new(ExecutorConfig::default())?;
//! let desc = ProgramDesc::new()
//!     .var(VarDesc::new("y"))
//!     .op(OpDesc::new("relu").input("X", &["x"]).output("Out", &["y"]).on(Place::accelerator(0)));
//! let program = interp.compile(&desc, &["x"], &["y"])?;
//! let out = interp.run(&program, &[("x", Tensor::from_slice(&[-1.0, 2.0]))])?;
//! assert_eq!(out.fetch("y")?.data(), &[0.0, 2.0]);
//! ```

pub mod analysis;
pub mod config;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod gc;
pub mod ids;
pub mod instruction;
pub mod interpreter;
pub mod kernel;
pub mod kernels;
pub mod logging;
pub mod program;
pub mod queue;
pub mod registry;
pub mod successors;
pub mod var_desc;

pub use config::{ConfigError, DeviceSpec, DuplicatePolicy, ExecutorConfig, LogFormat, LoggingConfig};
pub use device::{DeviceContext, DeviceContextPool, DeviceType, Place};
pub use dispatcher::{Dispatcher, InvocationReport};
pub use error::{ErrorCategory, ExecError, Result};
pub use event::{DeviceEvent, DeviceEventBinding, WaitOutcome};
pub use gc::{GarbageCollector, RefCountTable};
pub use ids::{DeviceId, InstrId, NodeId, VarId};
pub use instruction::{Instruction, OpFuncNode, OpFuncType};
pub use interpreter::{Interpreter, RunOutput};
pub use kernel::{AttrValue, Attributes, Kernel, KernelContext, KernelError, KernelRegistry, KernelResult};
pub use logging::init_tracing;
pub use program::{CompiledProgram, OpDesc, ProgramBuilder, ProgramDesc};
pub use queue::ExecutionQueue;
pub use registry::{VariableMetaInfo, VariableRegistry};
pub use successors::{SuccessorClass, SuccessorSet};
pub use var_desc::{VarDesc, VarKind};
