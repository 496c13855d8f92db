//! Metrics error types.

use thiserror::Error;

use super::registry::MetricKind;

/// Errors that can occur in the metrics module.
///
/// Every variant returned by a registry operation means the registry was
/// left exactly as it was before the call.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// A metric with the same name but a different kind is already registered.
    #[error("metric '{name}' already registered as {existing}, cannot re-register as {requested}")]
    MetricConflict {
        /// Metric name.
        name: String,
        /// Kind already registered.
        existing: MetricKind,
        /// Kind requested by the caller.
        requested: MetricKind,
    },

    /// Metric not registered.
    #[error("metric not found: {0}")]
    MetricNotFound(String),

    /// Operation does not match the metric kind.
    #[error("metric '{name}' is a {actual}, not a {expected}")]
    KindMismatch {
        /// Metric name.
        name: String,
        /// Kind the operation needs.
        expected: MetricKind,
        /// Kind the metric was registered with.
        actual: MetricKind,
    },

    /// Counter delta was negative or not finite.
    #[error("invalid delta {delta} for counter '{name}': must be finite and >= 0")]
    InvalidDelta {
        /// Metric name.
        name: String,
        /// Rejected delta.
        delta: f64,
    },

    /// Gauge or histogram value was not finite.
    #[error("invalid value {value} for metric '{name}': must be finite")]
    InvalidValue {
        /// Metric name.
        name: String,
        /// Rejected value.
        value: f64,
    },

    /// Invalid metric name.
    #[error("invalid metric name: {0}")]
    InvalidMetricName(String),

    /// Invalid label name.
    #[error("invalid label name: {0}")]
    InvalidLabelName(String),

    /// Creating another series would exceed the per-metric cap.
    #[error("metric '{name}' reached its series limit of {limit}")]
    CardinalityExceeded {
        /// Metric name.
        name: String,
        /// Configured cap.
        limit: usize,
    },

    /// Exporter failed to bind its address.
    #[error("failed to bind metrics endpoint {address}: {source}")]
    BindError {
        /// Requested address.
        address: std::net::SocketAddr,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Exporter already running.
    #[error("metrics exporter is already running")]
    AlreadyRunning,

    /// Exporter not running.
    #[error("metrics exporter is not running")]
    NotRunning,

    /// Snapshot could not be serialized.
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result type for metrics operations.
pub type MetricsResult<T> = Result<T, MetricsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MetricsError::MetricNotFound("test_metric".to_string());
        assert!(err.to_string().contains("test_metric"));

        let err = MetricsError::InvalidDelta {
            name: "requests_total".to_string(),
            delta: -1.0,
        };
        assert!(err.to_string().contains("requests_total"));
        assert!(err.to_string().contains("-1"));

        let err = MetricsError::MetricConflict {
            name: "x".to_string(),
            existing: MetricKind::Counter,
            requested: MetricKind::Gauge,
        };
        assert!(err.to_string().contains("counter"));
        assert!(err.to_string().contains("gauge"));
    }
}
