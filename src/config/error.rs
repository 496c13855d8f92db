//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading, validating or saving `nethub.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("cannot read '{path}': {source}")]
    ReadError {
        /// File that was read.
        path: PathBuf,
        /// IO failure.
        #[source]
        source: std::io::Error,
    },

    /// The file could not be written.
    #[error("cannot write '{path}': {source}")]
    WriteError {
        /// File that was written.
        path: PathBuf,
        /// IO failure.
        #[source]
        source: std::io::Error,
    },

    /// Malformed TOML or a field of the wrong type.
    #[error("invalid TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// One or more validators rejected the configuration.
    #[error("invalid configuration: {0}")]
    ValidationError(String),

    /// No file at the given path.
    #[error("no configuration file at {0}")]
    NotFound(PathBuf),

    /// The configuration could not be rendered as TOML.
    #[error("cannot render configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
