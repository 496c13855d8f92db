//! Standard server metric set.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::config::TransportKind;
use crate::modules::metrics::{Labels, MetricDefinition, MetricsRegistry, MetricsResult};

/// Gauge of live connections per transport.
pub const ACTIVE_CONNECTIONS: &str = "active_connections";
/// Counter of accepted connections per transport.
pub const CONNECTIONS_TOTAL: &str = "connections_total";
/// Counter of complete frames read.
pub const MESSAGES_RECEIVED_TOTAL: &str = "messages_received_total";
/// Counter of frames written.
pub const MESSAGES_SENT_TOTAL: &str = "messages_sent_total";
/// Counter of payload bytes read.
pub const BYTES_RECEIVED_TOTAL: &str = "bytes_received_total";
/// Counter of payload bytes written.
pub const BYTES_SENT_TOTAL: &str = "bytes_sent_total";
/// Counter of per-connection errors by transport and kind.
pub const ERRORS_TOTAL: &str = "errors_total";
/// Histogram of connection lifetimes.
pub const CONNECTION_DURATION_SECONDS: &str = "connection_duration_seconds";

const DURATION_BUCKETS: &[f64] = &[0.01, 0.1, 1.0, 10.0, 60.0, 300.0, 1800.0];

/// Handle recording server events into a [`MetricsRegistry`].
///
/// Recording never fails the data path: a rejected observation is logged at
/// debug level and dropped.
#[derive(Debug, Clone)]
pub struct ServerMetrics {
    registry: Arc<MetricsRegistry>,
}

impl ServerMetrics {
    /// Register the standard metric set and zero the active gauges.
    pub fn register(registry: Arc<MetricsRegistry>) -> MetricsResult<Self> {
        let definitions = [
            MetricDefinition::gauge(ACTIVE_CONNECTIONS, "Currently open connections"),
            MetricDefinition::counter(CONNECTIONS_TOTAL, "Accepted connections"),
            MetricDefinition::counter(MESSAGES_RECEIVED_TOTAL, "Frames received from clients"),
            MetricDefinition::counter(MESSAGES_SENT_TOTAL, "Frames sent to clients"),
            MetricDefinition::counter(BYTES_RECEIVED_TOTAL, "Payload bytes received"),
            MetricDefinition::counter(BYTES_SENT_TOTAL, "Payload bytes sent"),
            MetricDefinition::counter(ERRORS_TOTAL, "Connection errors by kind"),
            MetricDefinition::histogram(CONNECTION_DURATION_SECONDS, "Connection lifetime in seconds")
                .with_buckets(DURATION_BUCKETS),
        ];
        for definition in definitions {
            registry.register(definition)?;
        }

        for transport in TransportKind::ALL {
            registry.set(ACTIVE_CONNECTIONS, &transport_labels(transport), 0.0)?;
        }

        Ok(Self { registry })
    }

    /// The underlying registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    /// Record the live connection count of a transport.
    pub fn set_active(&self, transport: TransportKind, count: usize) {
        self.record(
            ACTIVE_CONNECTIONS,
            self.registry
                .set(ACTIVE_CONNECTIONS, &transport_labels(transport), count as f64),
        );
    }

    /// Record an accepted connection.
    pub fn connection_opened(&self, transport: TransportKind) {
        self.count(CONNECTIONS_TOTAL, transport, 1.0);
    }

    /// Record a closed connection and its lifetime.
    pub fn connection_closed(&self, transport: TransportKind, lifetime: Duration) {
        self.record(
            CONNECTION_DURATION_SECONDS,
            self.registry.observe(
                CONNECTION_DURATION_SECONDS,
                &transport_labels(transport),
                lifetime.as_secs_f64(),
            ),
        );
    }

    /// Record a complete frame read from a client.
    pub fn message_received(&self, transport: TransportKind, bytes: usize) {
        self.count(MESSAGES_RECEIVED_TOTAL, transport, 1.0);
        self.count(BYTES_RECEIVED_TOTAL, transport, bytes as f64);
    }

    /// Record a frame written to a client.
    pub fn message_sent(&self, transport: TransportKind, bytes: usize) {
        self.count(MESSAGES_SENT_TOTAL, transport, 1.0);
        self.count(BYTES_SENT_TOTAL, transport, bytes as f64);
    }

    /// Record a connection error.
    pub fn error(&self, transport: TransportKind, kind: &str) {
        let labels = transport_labels(transport).with("kind", kind);
        self.record(ERRORS_TOTAL, self.registry.increment(ERRORS_TOTAL, &labels, 1.0));
    }

    fn count(&self, name: &str, transport: TransportKind, delta: f64) {
        self.record(
            name,
            self.registry.increment(name, &transport_labels(transport), delta),
        );
    }

    fn record(&self, name: &str, result: MetricsResult<()>) {
        if let Err(e) = result {
            debug!(metric = name, error = %e, "Dropped metric observation");
        }
    }
}

/// `{transport="..."}` label set.
#[must_use]
pub fn transport_labels(transport: TransportKind) -> Labels {
    Labels::from([("transport", transport.as_str())])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_initializes_gauges() {
        let registry = Arc::new(MetricsRegistry::new());
        ServerMetrics::register(Arc::clone(&registry)).unwrap();

        let snapshot = registry.snapshot();
        for transport in TransportKind::ALL {
            assert_eq!(
                snapshot.value(ACTIVE_CONNECTIONS, &transport_labels(transport)),
                Some(0.0)
            );
        }
        assert_eq!(registry.metric_count(), 8);
    }

    #[test]
    fn test_register_twice_is_harmless() {
        let registry = Arc::new(MetricsRegistry::new());
        ServerMetrics::register(Arc::clone(&registry)).unwrap();
        ServerMetrics::register(Arc::clone(&registry)).unwrap();
        assert_eq!(registry.metric_count(), 8);
    }

    #[test]
    fn test_message_and_error_counters() {
        let registry = Arc::new(MetricsRegistry::new());
        let metrics = ServerMetrics::register(Arc::clone(&registry)).unwrap();

        metrics.message_received(TransportKind::Plain, 4);
        metrics.message_received(TransportKind::Plain, 6);
        metrics.message_sent(TransportKind::Tls, 20);
        metrics.error(TransportKind::Tls, "idle_timeout");

        let snapshot = registry.snapshot();
        let plain = transport_labels(TransportKind::Plain);
        let tls = transport_labels(TransportKind::Tls);
        assert_eq!(snapshot.value(MESSAGES_RECEIVED_TOTAL, &plain), Some(2.0));
        assert_eq!(snapshot.value(BYTES_RECEIVED_TOTAL, &plain), Some(10.0));
        assert_eq!(snapshot.value(BYTES_SENT_TOTAL, &tls), Some(20.0));
        assert_eq!(
            snapshot.value(ERRORS_TOTAL, &tls.clone().with("kind", "idle_timeout")),
            Some(1.0)
        );
    }

    #[test]
    fn test_connection_duration() {
        let registry = Arc::new(MetricsRegistry::new());
        let metrics = ServerMetrics::register(Arc::clone(&registry)).unwrap();

        metrics.connection_closed(TransportKind::Plain, Duration::from_millis(500));

        let snapshot = registry.snapshot();
        let summary = snapshot
            .histogram(
                CONNECTION_DURATION_SECONDS,
                &transport_labels(TransportKind::Plain),
            )
            .unwrap();
        assert_eq!(summary.count, 1);
        assert_eq!(summary.max, 0.5);
    }
}
