//! # Configuration System
//!
//! TOML-based configuration for NetHub: parsing, defaults and validation.
//!
//! ## Example Configuration
//!
//! ```toml
//! [server]
//! name = "NetHub"
//! drain_timeout = "10s"
//!
//! [[listeners]]
//! name = "tcp"
//! port = 9500
//!
//! [[listeners]]
//! name = "tls"
//! port = 9502
//! transport = "tls"
//!
//! [tls]
//! cert_dir = "certs"
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

mod error;
mod loader;
mod types;
mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use types::{LogFormat, LogLevel, LoggingConfig, NetHubConfig, ServerSection};
pub use validation::{
    BasicValidator, PortConflictValidator, ValidationError, ValidationResult, Validator,
};
