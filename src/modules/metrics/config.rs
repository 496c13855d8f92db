//! Metrics configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::registry::DEFAULT_MAX_SERIES_PER_METRIC;

/// Configuration for the metrics registry and its HTTP endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Serve the JSON endpoint.
    pub enabled: bool,

    /// IP address to bind to.
    pub address: IpAddr,

    /// Port to listen on.
    pub port: u16,

    /// Snapshot endpoint path.
    pub path: String,

    /// Indent the JSON document.
    pub pretty: bool,

    /// Maximum number of label sets per metric.
    pub max_series_per_metric: usize,

    /// Sample host CPU and memory gauges.
    pub system: bool,

    /// Interval between host samples.
    #[serde(with = "humantime_serde")]
    pub system_interval: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 9090,
            path: "/metrics".to_string(),
            pretty: false,
            max_series_per_metric: DEFAULT_MAX_SERIES_PER_METRIC,
            system: true,
            system_interval: Duration::from_secs(15),
        }
    }
}

impl MetricsConfig {
    /// Get the socket address.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert_eq!(config.port, 9090);
        assert_eq!(config.path, "/metrics");
        assert_eq!(config.max_series_per_metric, 10_000);
        assert!(config.system);
        assert_eq!(config.system_interval, Duration::from_secs(15));
        assert_eq!(config.socket_addr().to_string(), "127.0.0.1:9090");
    }

    #[test]
    fn test_deserialize_config() {
        let toml_str = r#"
            port = 8080
            path = "/stats"
            max_series_per_metric = 50
            system_interval = "1m"
        "#;

        let config: MetricsConfig = toml::from_str(toml_str).unwrap();
        assert!(config.enabled);
        assert_eq!(config.port, 8080);
        assert_eq!(config.path, "/stats");
        assert_eq!(config.max_series_per_metric, 50);
        assert_eq!(config.system_interval, Duration::from_secs(60));
    }
}
