//! Configuration file loader.

use super::error::{ConfigError, ConfigResult};
use super::types::NetHubConfig;
use super::validation::{BasicValidator, PortConflictValidator, Validator};
use std::path::Path;

/// Reads `nethub.toml` and runs the registered validators over it.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    validators: Vec<Box<dyn Validator>>,
}

impl ConfigLoader {
    /// Create a new configuration loader without validators.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader running the built-in validators.
    #[must_use]
    pub fn with_default_validators() -> Self {
        Self::new()
            .with_validator(BasicValidator::new())
            .with_validator(PortConflictValidator::new())
    }

    /// Register an extra validator.
    #[must_use]
    pub fn with_validator<V: Validator + 'static>(mut self, validator: V) -> Self {
        self.validators.push(Box::new(validator));
        self
    }

    /// Read and validate the file at `path`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NotFound`] for a missing file, otherwise see
    /// [`Self::load_str`].
    pub fn load<P: AsRef<Path>>(&self, path: P) -> ConfigResult<NetHubConfig> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        self.load_str(&content)
    }

    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or validation fails.
    pub fn load_str(&self, content: &str) -> ConfigResult<NetHubConfig> {
        let config: NetHubConfig = toml::from_str(content)?;
        self.validate(&config)?;
        Ok(config)
    }

    /// Run every registered validator, collecting all failures.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] listing every failed check.
    pub fn validate(&self, config: &NetHubConfig) -> ConfigResult<()> {
        let errors: Vec<String> = self
            .validators
            .iter()
            .flat_map(|v| {
                v.validate(config)
                    .errors()
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationError(errors.join("; ")))
        }
    }

    /// Like [`Self::load`], falling back to [`NetHubConfig::default`] when
    /// no file exists at `path`.
    ///
    /// # Errors
    ///
    /// Fails only for a file that exists but is unreadable or invalid.
    pub fn load_or_default<P: AsRef<Path>>(&self, path: P) -> ConfigResult<NetHubConfig> {
        let path = path.as_ref();
        if path.exists() {
            self.load(path)
        } else {
            Ok(NetHubConfig::default())
        }
    }

    /// Write `config` to `path` as TOML.
    ///
    /// # Errors
    ///
    /// [`ConfigError::SerializeError`] or [`ConfigError::WriteError`].
    pub fn save<P: AsRef<Path>>(&self, config: &NetHubConfig, path: P) -> ConfigResult<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(config)?;
        std::fs::write(path, content).map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(())
    }
}
