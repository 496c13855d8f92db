//! Configuration validation system.

use std::collections::{HashMap, HashSet};

use super::types::NetHubConfig;

/// A single validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// Error message.
    pub message: String,
}

impl ValidationError {
    /// Create a new error.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    errors: Vec<ValidationError>,
}

impl ValidationResult {
    /// Create a new empty (valid) result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an error to the result.
    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    /// Check if the validation passed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Get all validation errors.
    #[must_use]
    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }
}

/// Trait for configuration validators.
pub trait Validator: std::fmt::Debug + Send + Sync {
    /// Validate a configuration and return any errors.
    fn validate(&self, config: &NetHubConfig) -> ValidationResult;
}

/// Structural checks on listeners, timeouts and limits.
#[derive(Debug, Default)]
pub struct BasicValidator;

impl BasicValidator {
    /// Create a new basic validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Validator for BasicValidator {
    fn validate(&self, config: &NetHubConfig) -> ValidationResult {
        let mut result = ValidationResult::new();

        if config.server.name.is_empty() {
            result.add_error(ValidationError::new("server.name", "Server name cannot be empty"));
        }

        if config.listeners.is_empty() {
            result.add_error(ValidationError::new(
                "listeners",
                "At least one listener is required",
            ));
        }

        let mut seen_names = HashSet::new();
        for listener in &config.listeners {
            if listener.name.is_empty() {
                result.add_error(ValidationError::new(
                    "listeners[].name",
                    "Listener name cannot be empty",
                ));
            } else if !seen_names.insert(listener.name.as_str()) {
                result.add_error(ValidationError::new(
                    format!("listeners.{}", listener.name),
                    format!("Duplicate listener name: {}", listener.name),
                ));
            }
        }

        let connection = &config.connection;
        for (field, value) in [
            ("connection.idle_timeout", connection.idle_timeout),
            ("connection.write_timeout", connection.write_timeout),
            ("connection.handshake_timeout", connection.handshake_timeout),
        ] {
            if value.is_zero() {
                result.add_error(ValidationError::new(field, "Timeout must be greater than 0"));
            }
        }

        if connection.max_frame_length == 0 {
            result.add_error(ValidationError::new(
                "connection.max_frame_length",
                "Maximum frame length must be greater than 0",
            ));
        }

        if config.uses_tls() {
            match &config.tls {
                None => result.add_error(ValidationError::new(
                    "tls",
                    "A [tls] section is required when a listener uses TLS",
                )),
                Some(tls) if tls.cert_dir.as_os_str().is_empty() => {
                    result.add_error(ValidationError::new(
                        "tls.cert_dir",
                        "Certificate directory cannot be empty",
                    ));
                }
                Some(tls) if tls.hostnames.is_empty() => {
                    result.add_error(ValidationError::new(
                        "tls.hostnames",
                        "At least one hostname is required",
                    ));
                }
                Some(_) => {}
            }
        }

        if config.metrics.enabled && !config.metrics.path.starts_with('/') {
            result.add_error(ValidationError::new(
                "metrics.path",
                "Metrics path must start with '/'",
            ));
        }

        if config.metrics.system && config.metrics.system_interval.is_zero() {
            result.add_error(ValidationError::new(
                "metrics.system_interval",
                "Sampling interval must be greater than 0",
            ));
        }

        result
    }
}

/// Validator that checks for port conflicts.
#[derive(Debug, Default)]
pub struct PortConflictValidator;

impl PortConflictValidator {
    /// Create a new port conflict validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Validator for PortConflictValidator {
    fn validate(&self, config: &NetHubConfig) -> ValidationResult {
        let mut result = ValidationResult::new();
        let mut used_ports: HashMap<u16, String> = HashMap::new();

        if config.metrics.enabled && config.metrics.port != 0 {
            used_ports.insert(config.metrics.port, "metrics.port".to_string());
        }

        for listener in &config.listeners {
            // Port 0 asks the OS for a free port and never conflicts
            if listener.port == 0 {
                continue;
            }

            let field = format!("listeners.{}.port", listener.name);
            if let Some(existing) = used_ports.get(&listener.port) {
                result.add_error(ValidationError::new(
                    field,
                    format!("Port {} conflicts with {}", listener.port, existing),
                ));
            } else {
                used_ports.insert(listener.port, field);
            }
        }

        result
    }
}
