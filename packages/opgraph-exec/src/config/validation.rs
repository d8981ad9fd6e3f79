//! Configuration validation

use super::error::{ConfigError, ConfigResult};

/// Trait for validatable configuration objects
pub trait Validatable {
    /// Returns `Ok(())` if valid, `Err(ConfigError)` with details if invalid.
    fn validate(&self) -> ConfigResult<()>;

    /// Prefix for free-form validation messages
    fn config_name(&self) -> &'static str {
        "Config"
    }
}

/// Extension trait for validating collections of configs
pub trait ValidatableCollection {
    fn validate_all(&self) -> ConfigResult<()>;
}

impl<T: Validatable> ValidatableCollection for Vec<T> {
    fn validate_all(&self) -> ConfigResult<()> {
        for (i, config) in self.iter().enumerate() {
            config.validate().map_err(|e| match e {
                ConfigError::Validation(msg) => {
                    ConfigError::Validation(format!("{}[{}]: {}", config.config_name(), i, msg))
                }
                other => other,
            })?;
        }
        Ok(())
    }
}
