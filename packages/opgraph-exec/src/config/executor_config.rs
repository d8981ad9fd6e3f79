//! Executor configuration
//!
//! Loaded from a versioned YAML document:
//!
//! ```yaml
//! version: 1
//! registration: reuse
//! host_threads: 4
//! devices:
//!   - place: cpu
//!     queues: 1
//!   - place: accelerator:0
//!     queues: 2
//! gc:
//!   enabled: true
//!   never_free: [logits]
//! shrink_dependencies: true
//! event_wait_timeout_ms: 30000
//! logging:
//!   filter: info
//!   format: compact
//! ```

use super::error::{ConfigError, ConfigResult};
use super::validation::{Validatable, ValidatableCollection};
use crate::device::Place;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const SUPPORTED_VERSIONS: &[u32] = &[1];

/// Remove and check the top-level `version` key of a YAML document
pub(crate) fn take_version(value: &mut serde_yaml::Value) -> ConfigResult<u32> {
    let mapping = value
        .as_mapping_mut()
        .ok_or_else(|| ConfigError::Validation("document must be a YAML mapping".to_string()))?;

    let raw = mapping
        .remove("version")
        .ok_or(ConfigError::MissingVersion)?
        .as_u64()
        .ok_or_else(|| ConfigError::Validation("'version' must be an integer".to_string()))?;
    u32::try_from(raw)
        .ok()
        .filter(|version| SUPPORTED_VERSIONS.contains(version))
        .ok_or_else(|| ConfigError::UnsupportedVersion {
            found: raw,
            supported: SUPPORTED_VERSIONS.to_vec(),
        })
}

/// Serialize `body` with a leading `version` key
pub(crate) fn to_versioned_yaml<T: Serialize>(body: &T) -> ConfigResult<String> {
    let body = serde_yaml::to_value(body)?;
    let mut doc = serde_yaml::Mapping::new();
    doc.insert("version".into(), SUPPORTED_VERSIONS[0].into());
    if let serde_yaml::Value::Mapping(fields) = body {
        for (k, v) in fields {
            doc.insert(k, v);
        }
    }
    Ok(serde_yaml::to_string(&doc)?)
}

/// What `register` does when the name is already in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Fail with a precondition violation
    Reject,
    /// Hand back the existing id
    Reuse,
}

impl Default for DuplicatePolicy {
    fn default() -> Self {
        Self::Reuse
    }
}

/// Contexts to create for one place
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceSpec {
    pub place: Place,

    /// Number of independent queues (1..=64)
    #[serde(default = "default_queues")]
    pub queues: usize,
}

fn default_queues() -> usize {
    1
}

impl Validatable for DeviceSpec {
    fn validate(&self) -> ConfigResult<()> {
        if self.queues == 0 || self.queues > 64 {
            return Err(ConfigError::range_with_hint(
                format!("devices[{}].queues", self.place),
                self.queues,
                1,
                64,
                "Each place needs at least one queue",
            ));
        }
        if self.place.is_cpu() && self.queues != 1 {
            return Err(ConfigError::Validation(
                "cpu work runs on the host; configure exactly one cpu queue".to_string(),
            ));
        }
        Ok(())
    }

    fn config_name(&self) -> &'static str {
        "DeviceSpec"
    }
}

/// Buffer reclamation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GcConfig {
    /// Free buffers whose reference count reaches zero
    pub enabled: bool,

    /// Variable names that are never freed (in addition to fetch targets)
    pub never_free: Vec<String>,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            never_free: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `opgraph_exec=debug`
    pub filter: String,
    pub format: LogFormat,
    pub include_thread_names: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Compact,
            include_thread_names: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorConfig {
    pub registration: DuplicatePolicy,

    /// Host dispatch threads (0=auto, 1..=1024)
    pub host_threads: usize,

    pub devices: Vec<DeviceSpec>,

    pub gc: GcConfig,

    /// Drop dependency edges implied by other edges before classification
    pub shrink_dependencies: bool,

    /// Upper bound on a single event wait (None = wait forever)
    pub event_wait_timeout_ms: Option<u64>,

    pub logging: LoggingConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            registration: DuplicatePolicy::default(),
            host_threads: 0,
            devices: vec![
                DeviceSpec {
                    place: Place::cpu(),
                    queues: 1,
                },
                DeviceSpec {
                    place: Place::accelerator(0),
                    queues: 1,
                },
            ],
            gc: GcConfig::default(),
            shrink_dependencies: true,
            event_wait_timeout_ms: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl ExecutorConfig {
    /// Resolved host thread count (75% of cores when set to auto)
    pub fn effective_host_threads(&self) -> usize {
        if self.host_threads == 0 {
            (num_cpus::get() * 3 / 4).max(1)
        } else {
            self.host_threads
        }
    }

    pub fn registration(mut self, policy: DuplicatePolicy) -> Self {
        self.registration = policy;
        self
    }

    pub fn host_threads(mut self, n: usize) -> Self {
        self.host_threads = n;
        self
    }

    pub fn devices(mut self, devices: Vec<DeviceSpec>) -> Self {
        self.devices = devices;
        self
    }

    pub fn gc_enabled(mut self, enabled: bool) -> Self {
        self.gc.enabled = enabled;
        self
    }

    pub fn never_free(mut self, names: Vec<String>) -> Self {
        self.gc.never_free = names;
        self
    }

    pub fn shrink_dependencies(mut self, v: bool) -> Self {
        self.shrink_dependencies = v;
        self
    }

    pub fn event_wait_timeout_ms(mut self, v: Option<u64>) -> Self {
        self.event_wait_timeout_ms = v;
        self
    }

    pub fn from_yaml(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse a versioned YAML document and validate it
    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        let mut value: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        take_version(&mut value)?;
        let config: ExecutorConfig = serde_yaml::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        to_versioned_yaml(self)
    }
}

impl Validatable for ExecutorConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.host_threads > 1024 {
            return Err(ConfigError::range_with_hint(
                "host_threads",
                self.host_threads,
                0,
                1024,
                "Number of host threads must be reasonable (0=auto)",
            ));
        }

        self.devices.validate_all()?;
        for (i, spec) in self.devices.iter().enumerate() {
            if self.devices[..i].iter().any(|s| s.place == spec.place) {
                return Err(ConfigError::Validation(format!(
                    "{}: place {} listed more than once",
                    self.config_name(),
                    spec.place
                )));
            }
        }

        if self.event_wait_timeout_ms == Some(0) {
            return Err(ConfigError::range_with_hint(
                "event_wait_timeout_ms",
                0,
                1,
                u64::MAX,
                "Omit the field to wait without a bound",
            ));
        }

        if self.logging.filter.trim().is_empty() {
            return Err(ConfigError::Validation(
                "logging.filter must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    fn config_name(&self) -> &'static str {
        "ExecutorConfig"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_is_valid() {
        let config = ExecutorConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.effective_host_threads() >= 1);
        assert_eq!(config.registration, DuplicatePolicy::Reuse);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = ExecutorConfig::default()
            .registration(DuplicatePolicy::Reject)
            .host_threads(3)
            .event_wait_timeout_ms(Some(500));

        let yaml = config.to_yaml().unwrap();
        assert!(yaml.starts_with("version: 1"));
        assert!(yaml.contains("registration: reject"));
        assert!(yaml.contains("accelerator:0"));

        let parsed = ExecutorConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_yaml_loading_partial() {
        let yaml_content = r#"
version: 1
host_threads: 2
devices:
  - place: accelerator:0
    queues: 3
gc:
  never_free: [loss]
"#;
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = ExecutorConfig::from_yaml(temp_file.path()).unwrap();
        assert_eq!(config.host_threads, 2);
        assert_eq!(config.devices.len(), 1);
        assert_eq!(config.devices[0].queues, 3);
        assert!(config.gc.enabled);
        assert_eq!(config.gc.never_free, vec!["loss".to_string()]);
        assert!(config.shrink_dependencies);
    }

    #[test]
    fn test_yaml_missing_version() {
        let result = ExecutorConfig::from_yaml_str("host_threads: 2\n");
        assert!(matches!(result, Err(ConfigError::MissingVersion)));
    }

    #[test]
    fn test_yaml_unsupported_version() {
        let result = ExecutorConfig::from_yaml_str("version: 2\n");
        assert!(matches!(
            result,
            Err(ConfigError::UnsupportedVersion { found: 2, .. })
        ));
    }

    #[test]
    fn test_yaml_oversized_version_is_not_truncated() {
        // 2^32 + 1 would wrap to 1 if narrowed
        let result = ExecutorConfig::from_yaml_str("version: 4294967297\n");
        assert!(matches!(
            result,
            Err(ConfigError::UnsupportedVersion {
                found: 4_294_967_297,
                ..
            })
        ));
    }

    #[test]
    fn test_yaml_unknown_field() {
        let result = ExecutorConfig::from_yaml_str("version: 1\nhost_thread: 2\n");
        assert!(matches!(result, Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_yaml_bad_place() {
        let yaml = "version: 1\ndevices:\n  - place: tpu:0\n";
        assert!(ExecutorConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_validation_ranges() {
        let config = ExecutorConfig::default().host_threads(5000);
        assert!(matches!(config.validate(), Err(ConfigError::Range { .. })));

        let config = ExecutorConfig::default().devices(vec![DeviceSpec {
            place: Place::accelerator(0),
            queues: 0,
        }]);
        assert!(config.validate().is_err());

        let config = ExecutorConfig::default().devices(vec![
            DeviceSpec {
                place: Place::accelerator(1),
                queues: 1,
            },
            DeviceSpec {
                place: Place::accelerator(1),
                queues: 2,
            },
        ]);
        assert!(config.validate().is_err());

        let config = ExecutorConfig::default().event_wait_timeout_ms(Some(0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_message_names_config() {
        let config = ExecutorConfig::default().devices(vec![
            DeviceSpec {
                place: Place::accelerator(0),
                queues: 1,
            },
            DeviceSpec {
                place: Place::cpu(),
                queues: 2,
            },
        ]);
        let msg = config.validate().unwrap_err().to_string();
        assert!(msg.contains("DeviceSpec[1]"), "{}", msg);

        let config = ExecutorConfig::default().devices(vec![
            DeviceSpec {
                place: Place::accelerator(2),
                queues: 1,
            },
            DeviceSpec {
                place: Place::accelerator(2),
                queues: 1,
            },
        ]);
        let msg = config.validate().unwrap_err().to_string();
        assert!(msg.contains("ExecutorConfig: place accelerator:2"), "{}", msg);
    }
}
