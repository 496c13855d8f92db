//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::modules::metrics::MetricsConfig;
use crate::modules::server::{ConnectionSettings, ListenerConfig, TransportKind};
use crate::modules::tls::TlsConfig;

/// Root configuration structure for NetHub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetHubConfig {
    /// Server identity and shutdown behavior.
    pub server: ServerSection,

    /// Per-connection limits shared by every listener.
    pub connection: ConnectionSettings,

    /// Certificate bootstrap. Required when any listener uses TLS.
    pub tls: Option<TlsConfig>,

    /// Metrics registry and endpoint.
    pub metrics: MetricsConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Listeners to start.
    pub listeners: Vec<ListenerConfig>,
}

impl Default for NetHubConfig {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            connection: ConnectionSettings::default(),
            tls: None,
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
            listeners: vec![ListenerConfig::new("tcp", 9500)],
        }
    }
}

impl NetHubConfig {
    /// Whether any listener needs a TLS context.
    #[must_use]
    pub fn uses_tls(&self) -> bool {
        self.listeners
            .iter()
            .any(|l| l.transport == TransportKind::Tls)
    }
}

/// Server section configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Name announced to clients.
    pub name: String,

    /// How long shutdown waits for open connections before aborting them.
    #[serde(with = "humantime_serde")]
    pub drain_timeout: Duration,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            name: "NetHub".to_string(),
            drain_timeout: Duration::from_secs(10),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: LogLevel,

    /// Log format (json, pretty, compact).
    pub format: LogFormat,
}

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level (most verbose).
    Trace,
    /// Debug level.
    Debug,
    /// Info level (default).
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level (least verbose).
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (machine-readable).
    Json,
    /// Pretty format with colors (default).
    #[default]
    Pretty,
    /// Compact single-line format.
    Compact,
}
