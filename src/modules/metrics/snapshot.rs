//! Point-in-time copies of registry state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::labels::Labels;
use super::registry::MetricKind;

/// Summary statistics of a histogram series.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSummary {
    /// Number of observations.
    pub count: u64,
    /// Sum of observations.
    pub sum: f64,
    /// Smallest observation, 0 when empty.
    pub min: f64,
    /// Largest observation, 0 when empty.
    pub max: f64,
    /// Cumulative `(upper_bound, count)` pairs when buckets are configured.
    pub buckets: Option<Vec<(f64, u64)>>,
}

impl HistogramSummary {
    /// Mean of the observations, 0 when empty.
    #[must_use]
    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Value of one series at snapshot time.
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesValue {
    /// Counter total.
    Counter(f64),
    /// Gauge value.
    Gauge(f64),
    /// Histogram statistics.
    Histogram(HistogramSummary),
}

impl SeriesValue {
    /// Scalar value of a counter or gauge.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Counter(v) | Self::Gauge(v) => Some(*v),
            Self::Histogram(_) => None,
        }
    }
}

/// Every series of one metric.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSnapshot {
    /// Help text.
    pub help: String,
    /// Metric kind.
    pub kind: MetricKind,
    /// Series values keyed by label set.
    pub series: BTreeMap<Labels, SeriesValue>,
}

/// Immutable copy of every metric in a registry.
#[derive(Debug, Clone)]
pub struct Snapshot {
    taken_at: DateTime<Utc>,
    metrics: BTreeMap<String, MetricSnapshot>,
}

impl Snapshot {
    pub(crate) fn new(metrics: BTreeMap<String, MetricSnapshot>) -> Self {
        Self {
            taken_at: Utc::now(),
            metrics,
        }
    }

    /// When the snapshot was taken.
    #[must_use]
    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    /// Look up a metric.
    #[must_use]
    pub fn metric(&self, name: &str) -> Option<&MetricSnapshot> {
        self.metrics.get(name)
    }

    /// Iterate over metrics in name order.
    pub fn metrics(&self) -> impl Iterator<Item = (&str, &MetricSnapshot)> {
        self.metrics.iter().map(|(name, m)| (name.as_str(), m))
    }

    /// Look up a single series.
    #[must_use]
    pub fn get(&self, name: &str, labels: &Labels) -> Option<&SeriesValue> {
        self.metrics.get(name)?.series.get(labels)
    }

    /// Scalar value of a counter or gauge series.
    #[must_use]
    pub fn value(&self, name: &str, labels: &Labels) -> Option<f64> {
        self.get(name, labels)?.as_f64()
    }

    /// Summary of a histogram series.
    #[must_use]
    pub fn histogram(&self, name: &str, labels: &Labels) -> Option<&HistogramSummary> {
        match self.get(name, labels)? {
            SeriesValue::Histogram(summary) => Some(summary),
            _ => None,
        }
    }

    /// Sum of a counter or gauge over all its series.
    #[must_use]
    pub fn sum(&self, name: &str) -> f64 {
        self.metrics.get(name).map_or(0.0, |metric| {
            metric.series.values().filter_map(SeriesValue::as_f64).sum()
        })
    }

    /// Number of metrics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Returns `true` if no metrics are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Snapshot {
        let mut series = BTreeMap::new();
        series.insert(Labels::from([("transport", "plain")]), SeriesValue::Counter(3.0));
        series.insert(Labels::from([("transport", "tls")]), SeriesValue::Counter(4.0));

        let mut metrics = BTreeMap::new();
        metrics.insert(
            "messages_total".to_string(),
            MetricSnapshot {
                help: "Messages".to_string(),
                kind: MetricKind::Counter,
                series,
            },
        );
        Snapshot::new(metrics)
    }

    #[test]
    fn test_lookup_and_sum() {
        let snapshot = snapshot();
        assert_eq!(
            snapshot.value("messages_total", &Labels::from([("transport", "tls")])),
            Some(4.0)
        );
        assert_eq!(snapshot.value("messages_total", &Labels::new()), None);
        assert_eq!(snapshot.sum("messages_total"), 7.0);
        assert_eq!(snapshot.sum("missing"), 0.0);
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_histogram_avg() {
        let summary = HistogramSummary {
            count: 4,
            sum: 10.0,
            min: 1.0,
            max: 4.0,
            buckets: None,
        };
        assert_eq!(summary.avg(), 2.5);

        let empty = HistogramSummary {
            count: 0,
            sum: 0.0,
            min: 0.0,
            max: 0.0,
            buckets: None,
        };
        assert_eq!(empty.avg(), 0.0);
    }
}
