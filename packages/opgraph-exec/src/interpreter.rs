//! Top-level executor facade.
//!
//! The [`Interpreter`] owns the variable store, registry, device contexts,
//! kernels and host thread pool. Programs are compiled once and can then be
//! run any number of times with fresh feeds.

use crate::config::{ExecutorConfig, Validatable};
use crate::device::DeviceContextPool;
use crate::dispatcher::{Dispatcher, InvocationReport};
use crate::error::{ExecError, Result};
use crate::ids::VarId;
use crate::kernel::KernelRegistry;
use crate::program::{CompiledProgram, ProgramBuilder, ProgramDesc};
use crate::registry::VariableRegistry;
use opgraph_scope::{Scope, Tensor, Variable};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Fetch values plus the dispatcher's report of one run
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub fetches: BTreeMap<String, Tensor>,
    pub report: InvocationReport,
}

impl RunOutput {
    pub fn fetch(&self, name: &str) -> Result<&Tensor> {
        self.fetches
            .get(name)
            .ok_or_else(|| ExecError::not_found(format!("fetch '{}'", name)))
    }
}

pub struct Interpreter {
    config: ExecutorConfig,
    scope: Arc<Scope>,
    registry: VariableRegistry,
    devices: DeviceContextPool,
    kernels: KernelRegistry,
    pool: rayon::ThreadPool,
    run_lock: Mutex<()>,
}

impl Interpreter {
    pub fn new(config: ExecutorConfig) -> Result<Self> {
        Self::with_scope(config, Scope::new())
    }

    /// Build an interpreter over an existing store
    pub fn with_scope(config: ExecutorConfig, scope: Arc<Scope>) -> Result<Self> {
        config.validate()?;
        let devices = DeviceContextPool::from_specs(&config.devices)?;
        let threads = config.effective_host_threads();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("opgraph-host-{}", i))
            .build()
            .map_err(|e| ExecError::precondition(format!("failed to build host pool: {}", e)))?;
        let registry = VariableRegistry::new(scope.clone(), config.registration);

        info!(
            host_threads = threads,
            contexts = devices.len(),
            policy = ?config.registration,
            "interpreter ready"
        );
        Ok(Self {
            config,
            scope,
            registry,
            devices,
            kernels: KernelRegistry::with_builtins(),
            pool,
            run_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn scope(&self) -> &Arc<Scope> {
        &self.scope
    }

    pub fn registry(&self) -> &VariableRegistry {
        &self.registry
    }

    pub fn devices(&self) -> &DeviceContextPool {
        &self.devices
    }

    pub fn kernels(&self) -> &KernelRegistry {
        &self.kernels
    }

    /// Bind an externally owned handle under `name`
    pub fn share_var(&self, name: &str, var: Variable) -> Result<VarId> {
        self.registry.register_existing(name, var)
    }

    pub fn compile(
        &self,
        desc: &ProgramDesc,
        feeds: &[&str],
        fetches: &[&str],
    ) -> Result<Arc<CompiledProgram>> {
        let program =
            ProgramBuilder::new(&self.registry, &self.devices, &self.kernels, &self.config)
                .build(desc, feeds, fetches)?;
        Ok(Arc::new(program))
    }

    /// Bind feeds, dispatch the whole program and read the fetches.
    ///
    /// Invocations of one interpreter are serialized.
    pub fn run(&self, program: &Arc<CompiledProgram>, feeds: &[(&str, Tensor)]) -> Result<RunOutput> {
        let _guard = self.run_lock.lock();

        for (name, value) in feeds {
            let id = program.feeds().get(*name).copied().ok_or_else(|| {
                ExecError::precondition(format!("'{}' is not a feed of this program", name))
            })?;
            self.registry.get(id)?.set(value.clone());
        }

        let timeout = self.config.event_wait_timeout_ms.map(Duration::from_millis);
        let report = Dispatcher::new(Arc::clone(program), &self.devices, &self.pool, timeout).run()?;

        let mut fetches = BTreeMap::new();
        for (name, &id) in program.fetches() {
            let value = self.registry.get(id)?.get().ok_or_else(|| {
                ExecError::not_found(format!("fetch target '{}' holds no value", name))
            })?;
            fetches.insert(name.clone(), value);
        }
        Ok(RunOutput { fetches, report })
    }
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("registry", &self.registry)
            .field("devices", &self.devices.len())
            .field("host_threads", &self.pool.current_num_threads())
            .finish()
    }
}
