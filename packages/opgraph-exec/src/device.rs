//! Places, device contexts and the context arena.
//!
//! A CPU context executes work inline on the calling host thread. An
//! accelerator context owns one [`ExecutionQueue`]; a place may have several
//! contexts (several queues on one device).

use crate::config::{ConfigError, DeviceSpec};
use crate::error::{ExecError, Result};
use crate::ids::DeviceId;
use crate::queue::ExecutionQueue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Cpu,
    Accelerator,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Cpu => "cpu",
            DeviceType::Accelerator => "accelerator",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Device placement: `cpu` or `accelerator:<ordinal>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Place {
    device_type: DeviceType,
    ordinal: u16,
}

impl Place {
    pub const fn cpu() -> Self {
        Self {
            device_type: DeviceType::Cpu,
            ordinal: 0,
        }
    }

    pub const fn accelerator(ordinal: u16) -> Self {
        Self {
            device_type: DeviceType::Accelerator,
            ordinal,
        }
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn ordinal(&self) -> u16 {
        self.ordinal
    }

    pub fn is_cpu(&self) -> bool {
        self.device_type == DeviceType::Cpu
    }
}

impl Default for Place {
    fn default() -> Self {
        Self::cpu()
    }
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.device_type {
            DeviceType::Cpu => write!(f, "cpu"),
            DeviceType::Accelerator => write!(f, "accelerator:{}", self.ordinal),
        }
    }
}

impl FromStr for Place {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        let (kind, ordinal) = match lowered.split_once(':') {
            Some((kind, ordinal)) => {
                let ordinal = ordinal
                    .parse::<u16>()
                    .map_err(|_| ConfigError::InvalidPlace(s.to_string()))?;
                (kind.to_string(), ordinal)
            }
            None => (lowered.clone(), 0),
        };
        match kind.as_str() {
            "cpu" if ordinal == 0 => Ok(Place::cpu()),
            "accelerator" | "gpu" => Ok(Place::accelerator(ordinal)),
            _ => Err(ConfigError::InvalidPlace(s.to_string())),
        }
    }
}

impl TryFrom<String> for Place {
    type Error = ConfigError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Place> for String {
    fn from(place: Place) -> Self {
        place.to_string()
    }
}

/// One execution context: a place plus (for accelerators) its queue
#[derive(Debug)]
pub struct DeviceContext {
    id: DeviceId,
    place: Place,
    queue: Option<ExecutionQueue>,
}

impl DeviceContext {
    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn place(&self) -> Place {
        self.place
    }

    pub fn device_type(&self) -> DeviceType {
        self.place.device_type
    }

    pub fn queue(&self) -> Option<&ExecutionQueue> {
        self.queue.as_ref()
    }

    /// Whether submitted work completes after `submit` returns
    pub fn is_async(&self) -> bool {
        self.queue.is_some()
    }

    /// Run `task` on this context. Host contexts run it before returning.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) -> Result<()> {
        match &self.queue {
            Some(queue) => queue.submit(task),
            None => {
                task();
                Ok(())
            }
        }
    }

    /// Wait until all previously submitted work on this context finished
    pub fn synchronize(&self) -> Result<()> {
        match &self.queue {
            Some(queue) => queue.synchronize(),
            None => Ok(()),
        }
    }
}

/// Arena of device contexts indexed by [`DeviceId`]
#[derive(Debug, Default)]
pub struct DeviceContextPool {
    contexts: Vec<DeviceContext>,
    by_place: HashMap<Place, Vec<DeviceId>>,
}

impl DeviceContextPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build contexts from config. A CPU context is always present.
    pub fn from_specs(specs: &[DeviceSpec]) -> Result<Self> {
        let mut pool = Self::new();
        for spec in specs {
            for _ in 0..spec.queues {
                pool.add_context(spec.place)?;
            }
        }
        if pool.contexts_for(Place::cpu()).is_empty() {
            pool.add_context(Place::cpu())?;
        }
        Ok(pool)
    }

    pub fn add_context(&mut self, place: Place) -> Result<DeviceId> {
        let id = DeviceId::new(self.contexts.len());
        let slot = self.by_place.entry(place).or_default();
        let queue = match place.device_type() {
            DeviceType::Cpu => None,
            DeviceType::Accelerator => Some(ExecutionQueue::spawn(format!(
                "{}/q{}",
                place,
                slot.len()
            ))?),
        };
        slot.push(id);
        self.contexts.push(DeviceContext { id, place, queue });
        debug!(%place, device = %id, "device context added");
        Ok(id)
    }

    pub fn context(&self, id: DeviceId) -> Result<&DeviceContext> {
        self.contexts.get(id.index()).ok_or_else(|| {
            ExecError::precondition(format!(
                "device id {} out of range (pool has {} contexts)",
                id,
                self.contexts.len()
            ))
        })
    }

    pub fn contexts_for(&self, place: Place) -> &[DeviceId] {
        self.by_place.get(&place).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Pick the `queue`-th context of `place`
    pub fn resolve(&self, place: Place, queue: usize) -> Result<DeviceId> {
        self.contexts_for(place).get(queue).copied().ok_or_else(|| {
            ExecError::precondition(format!(
                "no context #{} for place {} ({} configured)",
                queue,
                place,
                self.contexts_for(place).len()
            ))
        })
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceContext> {
        self.contexts.iter()
    }

    pub fn synchronize_all(&self) -> Result<()> {
        for ctx in &self.contexts {
            ctx.synchronize()?;
        }
        Ok(())
    }
}
