//! Executor configuration
//!
//! A single versioned YAML document (`version: 1`) controls registration
//! policy, host threading, device layout, buffer reclamation and logging.
//!
//! # Examples
//!
//! ```rust,ignore
//! use opgraph_exec::config::ExecutorConfig;
//!
//! let config = ExecutorConfig::default().host_threads(4);
//! let config = ExecutorConfig::from_yaml("executor.yaml")?;
//! ```

pub mod error;
pub mod executor_config;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use executor_config::{
    DeviceSpec, DuplicatePolicy, ExecutorConfig, GcConfig, LogFormat, LoggingConfig,
    SUPPORTED_VERSIONS,
};
pub use validation::{Validatable, ValidatableCollection};
