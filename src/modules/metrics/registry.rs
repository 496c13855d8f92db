//! Metrics registry with labelled counters, gauges and histograms.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::{MetricsError, MetricsResult};
use super::labels::Labels;
use super::snapshot::{HistogramSummary, MetricSnapshot, SeriesValue, Snapshot};

/// Default cap on the number of label sets per metric.
pub const DEFAULT_MAX_SERIES_PER_METRIC: usize = 10_000;

/// Kind of metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Monotonically increasing counter.
    Counter,
    /// Value that can go up or down.
    Gauge,
    /// Distribution of observed values.
    Histogram,
}

impl MetricKind {
    /// Lowercase name used in exports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Histogram => "histogram",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Definition of a metric. Immutable once registered.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDefinition {
    /// Metric name.
    pub name: String,
    /// Help text describing the metric.
    pub help: String,
    /// Metric kind.
    pub kind: MetricKind,
    /// Upper bounds of histogram buckets, if any.
    pub buckets: Option<Vec<f64>>,
}

impl MetricDefinition {
    /// Create a counter definition.
    #[must_use]
    pub fn counter(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self::new(name, help, MetricKind::Counter)
    }

    /// Create a gauge definition.
    #[must_use]
    pub fn gauge(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self::new(name, help, MetricKind::Gauge)
    }

    /// Create a histogram definition without buckets.
    #[must_use]
    pub fn histogram(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self::new(name, help, MetricKind::Histogram)
    }

    fn new(name: impl Into<String>, help: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            kind,
            buckets: None,
        }
    }

    /// Set histogram bucket upper bounds.
    ///
    /// Bounds are sorted and deduplicated; non-finite bounds are dropped.
    #[must_use]
    pub fn with_buckets(mut self, bounds: &[f64]) -> Self {
        let mut bounds: Vec<f64> = bounds.iter().copied().filter(|b| b.is_finite()).collect();
        bounds.sort_by(f64::total_cmp);
        bounds.dedup();
        self.buckets = Some(bounds);
        self
    }
}

/// Accumulated histogram state for one series.
#[derive(Debug)]
struct HistogramCell {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    /// Cumulative counts, one per bucket bound.
    buckets: Option<Vec<u64>>,
}

impl HistogramCell {
    fn new(bounds: Option<&[f64]>) -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            buckets: bounds.map(|b| vec![0; b.len()]),
        }
    }

    fn observe(&mut self, value: f64, bounds: Option<&[f64]>) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);

        if let (Some(counts), Some(bounds)) = (self.buckets.as_mut(), bounds) {
            for (count, bound) in counts.iter_mut().zip(bounds) {
                if value <= *bound {
                    *count += 1;
                }
            }
        }
    }

    fn summary(&self, bounds: Option<&[f64]>) -> HistogramSummary {
        let empty = self.count == 0;
        HistogramSummary {
            count: self.count,
            sum: self.sum,
            min: if empty { 0.0 } else { self.min },
            max: if empty { 0.0 } else { self.max },
            buckets: match (&self.buckets, bounds) {
                (Some(counts), Some(bounds)) => {
                    Some(bounds.iter().copied().zip(counts.iter().copied()).collect())
                }
                _ => None,
            },
        }
    }
}

/// Value cell of a single series.
#[derive(Debug)]
enum Cell {
    Counter(Counter<f64, AtomicU64>),
    Gauge(Gauge<f64, AtomicU64>),
    Histogram(Mutex<HistogramCell>),
}

impl Cell {
    fn new(definition: &MetricDefinition) -> Self {
        match definition.kind {
            MetricKind::Counter => Self::Counter(Counter::default()),
            MetricKind::Gauge => Self::Gauge(Gauge::default()),
            MetricKind::Histogram => {
                Self::Histogram(Mutex::new(HistogramCell::new(definition.buckets.as_deref())))
            }
        }
    }

    fn read(&self, bounds: Option<&[f64]>) -> SeriesValue {
        match self {
            Self::Counter(counter) => SeriesValue::Counter(counter.get()),
            Self::Gauge(gauge) => SeriesValue::Gauge(gauge.get()),
            Self::Histogram(cell) => SeriesValue::Histogram(cell.lock().summary(bounds)),
        }
    }
}

/// All series of one metric.
#[derive(Debug)]
struct Family {
    definition: MetricDefinition,
    series: RwLock<HashMap<Labels, Arc<Cell>>>,
}

impl Family {
    fn new(definition: MetricDefinition) -> Self {
        Self {
            definition,
            series: RwLock::new(HashMap::new()),
        }
    }

    /// Get the cell for `labels`, creating it if the cap allows.
    fn cell(&self, labels: &Labels, max_series: usize) -> MetricsResult<Arc<Cell>> {
        if let Some(cell) = self.series.read().get(labels) {
            return Ok(Arc::clone(cell));
        }

        labels.validate()?;

        let mut series = self.series.write();
        if let Some(cell) = series.get(labels) {
            return Ok(Arc::clone(cell));
        }

        if series.len() >= max_series {
            warn!(
                metric = %self.definition.name,
                labels = %labels,
                limit = max_series,
                "Metric series limit reached, dropping observation"
            );
            return Err(MetricsError::CardinalityExceeded {
                name: self.definition.name.clone(),
                limit: max_series,
            });
        }

        let cell = Arc::new(Cell::new(&self.definition));
        series.insert(labels.clone(), Arc::clone(&cell));
        Ok(cell)
    }
}

/// Process-scoped store of named metrics.
///
/// Values live in per-series cells: counters and gauges are atomics, and
/// histograms sit behind their own mutex. The series maps are only
/// write-locked when a new label set appears, so updates to existing series
/// never contend on a shared lock.
#[derive(Debug)]
pub struct MetricsRegistry {
    families: RwLock<HashMap<String, Arc<Family>>>,
    max_series_per_metric: usize,
}

impl MetricsRegistry {
    /// Create a registry with the default series cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_series(DEFAULT_MAX_SERIES_PER_METRIC)
    }

    /// Create a registry with a custom per-metric series cap.
    #[must_use]
    pub fn with_max_series(max_series_per_metric: usize) -> Self {
        Self {
            families: RwLock::new(HashMap::new()),
            max_series_per_metric,
        }
    }

    /// Per-metric series cap.
    #[must_use]
    pub fn max_series_per_metric(&self) -> usize {
        self.max_series_per_metric
    }

    /// Register a metric.
    ///
    /// Registering the same name and kind again is a no-op; the first
    /// definition is kept.
    pub fn register(&self, definition: MetricDefinition) -> MetricsResult<()> {
        validate_metric_name(&definition.name)?;

        let mut families = self.families.write();
        if let Some(existing) = families.get(&definition.name) {
            if existing.definition.kind != definition.kind {
                return Err(MetricsError::MetricConflict {
                    name: definition.name,
                    existing: existing.definition.kind,
                    requested: definition.kind,
                });
            }
            return Ok(());
        }

        debug!(metric = %definition.name, kind = %definition.kind, "Registered metric");
        families.insert(definition.name.clone(), Arc::new(Family::new(definition)));
        Ok(())
    }

    /// Add `delta` to a counter series.
    pub fn increment(&self, name: &str, labels: &Labels, delta: f64) -> MetricsResult<()> {
        let family = self.family(name, MetricKind::Counter)?;
        if !delta.is_finite() || delta < 0.0 {
            return Err(MetricsError::InvalidDelta {
                name: name.to_string(),
                delta,
            });
        }

        if let Cell::Counter(counter) = &*family.cell(labels, self.max_series_per_metric)? {
            counter.inc_by(delta);
        }
        Ok(())
    }

    /// Overwrite a gauge series.
    pub fn set(&self, name: &str, labels: &Labels, value: f64) -> MetricsResult<()> {
        let family = self.family(name, MetricKind::Gauge)?;
        check_finite(name, value)?;

        if let Cell::Gauge(gauge) = &*family.cell(labels, self.max_series_per_metric)? {
            gauge.set(value);
        }
        Ok(())
    }

    /// Adjust a gauge series by a signed delta.
    pub fn add(&self, name: &str, labels: &Labels, delta: f64) -> MetricsResult<()> {
        let family = self.family(name, MetricKind::Gauge)?;
        check_finite(name, delta)?;

        if let Cell::Gauge(gauge) = &*family.cell(labels, self.max_series_per_metric)? {
            if delta >= 0.0 {
                gauge.inc_by(delta);
            } else {
                gauge.dec_by(-delta);
            }
        }
        Ok(())
    }

    /// Record a value in a histogram series.
    pub fn observe(&self, name: &str, labels: &Labels, value: f64) -> MetricsResult<()> {
        let family = self.family(name, MetricKind::Histogram)?;
        check_finite(name, value)?;

        if let Cell::Histogram(cell) = &*family.cell(labels, self.max_series_per_metric)? {
            cell.lock()
                .observe(value, family.definition.buckets.as_deref());
        }
        Ok(())
    }

    /// Take a point-in-time copy of every series.
    ///
    /// Locks are held only while collecting cell references; values are read
    /// afterwards, so a snapshot never blocks writers for longer than a map
    /// clone.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let families: Vec<Arc<Family>> = self.families.read().values().cloned().collect();

        let collected: Vec<(Arc<Family>, Vec<(Labels, Arc<Cell>)>)> = families
            .into_iter()
            .map(|family| {
                let series = family
                    .series
                    .read()
                    .iter()
                    .map(|(labels, cell)| (labels.clone(), Arc::clone(cell)))
                    .collect();
                (family, series)
            })
            .collect();

        let metrics = collected
            .into_iter()
            .map(|(family, series)| {
                let bounds = family.definition.buckets.as_deref();
                let values = series
                    .into_iter()
                    .map(|(labels, cell)| (labels, cell.read(bounds)))
                    .collect();
                (
                    family.definition.name.clone(),
                    MetricSnapshot {
                        help: family.definition.help.clone(),
                        kind: family.definition.kind,
                        series: values,
                    },
                )
            })
            .collect();

        Snapshot::new(metrics)
    }

    /// Get the definition of a registered metric.
    #[must_use]
    pub fn definition(&self, name: &str) -> Option<MetricDefinition> {
        self.families
            .read()
            .get(name)
            .map(|family| family.definition.clone())
    }

    /// Number of registered metrics.
    #[must_use]
    pub fn metric_count(&self) -> usize {
        self.families.read().len()
    }

    /// Number of series of a metric, or 0 if it is not registered.
    #[must_use]
    pub fn series_count(&self, name: &str) -> usize {
        let family = self.families.read().get(name).cloned();
        family.map_or(0, |family| family.series.read().len())
    }

    fn family(&self, name: &str, expected: MetricKind) -> MetricsResult<Arc<Family>> {
        let family = self
            .families
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| MetricsError::MetricNotFound(name.to_string()))?;

        if family.definition.kind != expected {
            return Err(MetricsError::KindMismatch {
                name: name.to_string(),
                expected,
                actual: family.definition.kind,
            });
        }
        Ok(family)
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn check_finite(name: &str, value: f64) -> MetricsResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(MetricsError::InvalidValue {
            name: name.to_string(),
            value,
        })
    }
}

/// Validate a metric name follows Prometheus naming conventions.
fn validate_metric_name(name: &str) -> MetricsResult<()> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(MetricsError::InvalidMetricName(
            "Metric name cannot be empty".to_string(),
        ));
    };

    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(MetricsError::InvalidMetricName(format!(
            "Metric name must start with a letter or underscore: {name}"
        )));
    }

    if let Some(ch) = chars.find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        return Err(MetricsError::InvalidMetricName(format!(
            "Metric name contains invalid character '{ch}': {name}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn login() -> Labels {
        Labels::from([("endpoint", "login")])
    }

    #[test]
    fn test_register_idempotent() {
        let registry = MetricsRegistry::new();
        registry
            .register(MetricDefinition::counter("requests_total", "Requests"))
            .unwrap();
        registry
            .register(MetricDefinition::counter("requests_total", "Other help"))
            .unwrap();

        assert_eq!(registry.metric_count(), 1);
        assert_eq!(registry.definition("requests_total").unwrap().help, "Requests");
    }

    #[test]
    fn test_register_conflict() {
        let registry = MetricsRegistry::new();
        registry
            .register(MetricDefinition::counter("requests_total", "Requests"))
            .unwrap();

        let err = registry
            .register(MetricDefinition::gauge("requests_total", "Requests"))
            .unwrap_err();
        assert!(matches!(
            err,
            MetricsError::MetricConflict {
                existing: MetricKind::Counter,
                requested: MetricKind::Gauge,
                ..
            }
        ));
    }

    #[test]
    fn test_validate_metric_name() {
        assert!(validate_metric_name("requests_total").is_ok());
        assert!(validate_metric_name("_private").is_ok());
        assert!(validate_metric_name("http2_connections").is_ok());

        assert!(validate_metric_name("").is_err());
        assert!(validate_metric_name("123abc").is_err());
        assert!(validate_metric_name("name-with-dash").is_err());
    }

    #[test]
    fn test_counter_increment() {
        let registry = MetricsRegistry::new();
        registry
            .register(MetricDefinition::counter("requests_total", "Requests"))
            .unwrap();

        registry.increment("requests_total", &login(), 1.0).unwrap();
        registry.increment("requests_total", &login(), 2.5).unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.value("requests_total", &login()), Some(3.5));
    }

    #[test]
    fn test_counter_rejects_bad_delta() {
        let registry = MetricsRegistry::new();
        registry
            .register(MetricDefinition::counter("requests_total", "Requests"))
            .unwrap();

        for delta in [-1.0, f64::NAN, f64::INFINITY] {
            let err = registry.increment("requests_total", &login(), delta).unwrap_err();
            assert!(matches!(err, MetricsError::InvalidDelta { .. }));
        }

        // Rejected calls never create a series.
        assert_eq!(registry.series_count("requests_total"), 0);
    }

    #[test]
    fn test_unknown_metric_and_kind_mismatch() {
        let registry = MetricsRegistry::new();
        registry
            .register(MetricDefinition::gauge("temperature", "Temperature"))
            .unwrap();

        assert!(matches!(
            registry.increment("missing", &Labels::new(), 1.0),
            Err(MetricsError::MetricNotFound(_))
        ));
        assert!(matches!(
            registry.increment("temperature", &Labels::new(), 1.0),
            Err(MetricsError::KindMismatch {
                expected: MetricKind::Counter,
                actual: MetricKind::Gauge,
                ..
            })
        ));
        assert!(matches!(
            registry.observe("temperature", &Labels::new(), 1.0),
            Err(MetricsError::KindMismatch { .. })
        ));
    }

    #[test]
    fn test_gauge_set_and_add() {
        let registry = MetricsRegistry::new();
        registry
            .register(MetricDefinition::gauge("queue_depth", "Queue depth"))
            .unwrap();
        let labels = Labels::new();

        registry.set("queue_depth", &labels, 10.0).unwrap();
        registry.add("queue_depth", &labels, -3.0).unwrap();
        registry.add("queue_depth", &labels, 1.5).unwrap();

        assert_eq!(registry.snapshot().value("queue_depth", &labels), Some(8.5));
        assert!(matches!(
            registry.set("queue_depth", &labels, f64::NAN),
            Err(MetricsError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_histogram_observe() {
        let registry = MetricsRegistry::new();
        registry
            .register(
                MetricDefinition::histogram("latency_seconds", "Latency")
                    .with_buckets(&[1.0, 0.1, 10.0, 1.0]),
            )
            .unwrap();
        let labels = Labels::new();

        for value in [0.05, 0.5, 2.0, 20.0] {
            registry.observe("latency_seconds", &labels, value).unwrap();
        }

        let snapshot = registry.snapshot();
        let summary = snapshot.histogram("latency_seconds", &labels).unwrap();
        assert_eq!(summary.count, 4);
        assert!((summary.sum - 22.55).abs() < 1e-9);
        assert_eq!(summary.min, 0.05);
        assert_eq!(summary.max, 20.0);
        assert_eq!(
            summary.buckets.as_deref(),
            Some(&[(0.1, 1), (1.0, 2), (10.0, 3)][..])
        );
    }

    #[test]
    fn test_invalid_label_name_rejected() {
        let registry = MetricsRegistry::new();
        registry
            .register(MetricDefinition::counter("requests_total", "Requests"))
            .unwrap();

        let err = registry
            .increment("requests_total", &Labels::from([("bad-name", "x")]), 1.0)
            .unwrap_err();
        assert!(matches!(err, MetricsError::InvalidLabelName(_)));
        assert_eq!(registry.series_count("requests_total"), 0);
    }

    #[test]
    fn test_cardinality_cap() {
        let registry = MetricsRegistry::with_max_series(2);
        registry
            .register(MetricDefinition::counter("requests_total", "Requests"))
            .unwrap();

        for user in ["a", "b"] {
            registry
                .increment("requests_total", &Labels::from([("user", user)]), 1.0)
                .unwrap();
        }

        let err = registry
            .increment("requests_total", &Labels::from([("user", "c")]), 1.0)
            .unwrap_err();
        assert!(matches!(err, MetricsError::CardinalityExceeded { limit: 2, .. }));
        assert_eq!(registry.series_count("requests_total"), 2);

        // Existing series keep working at the cap.
        registry
            .increment("requests_total", &Labels::from([("user", "a")]), 1.0)
            .unwrap();
        assert_eq!(
            registry
                .snapshot()
                .value("requests_total", &Labels::from([("user", "a")])),
            Some(2.0)
        );
    }

    #[test]
    fn test_concurrent_increments() {
        let registry = Arc::new(MetricsRegistry::new());
        registry
            .register(MetricDefinition::counter("hits_total", "Hits"))
            .unwrap();

        let threads = 8;
        let per_thread = 1_000;
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..per_thread {
                        registry.increment("hits_total", &Labels::new(), 1.0).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(
            registry.snapshot().value("hits_total", &Labels::new()),
            Some(f64::from(threads * per_thread))
        );
    }

    #[test]
    fn test_snapshot_isolated_from_later_writes() {
        let registry = MetricsRegistry::new();
        registry
            .register(MetricDefinition::counter("hits_total", "Hits"))
            .unwrap();
        registry.increment("hits_total", &Labels::new(), 1.0).unwrap();

        let before = registry.snapshot();
        registry.increment("hits_total", &Labels::new(), 1.0).unwrap();

        assert_eq!(before.value("hits_total", &Labels::new()), Some(1.0));
        assert_eq!(
            registry.snapshot().value("hits_total", &Labels::new()),
            Some(2.0)
        );
    }

    #[test]
    fn test_snapshots_monotonic_under_concurrent_writers() {
        let registry = Arc::new(MetricsRegistry::new());
        registry
            .register(MetricDefinition::counter("hits_total", "Hits"))
            .unwrap();
        registry
            .register(MetricDefinition::gauge("in_flight", "In flight"))
            .unwrap();

        let writers: Vec<_> = (0..4)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for n in 0..500 {
                        registry.increment("hits_total", &Labels::new(), 1.0).unwrap();
                        registry
                            .set("in_flight", &Labels::new(), f64::from(i * 500 + n))
                            .unwrap();
                    }
                })
            })
            .collect();

        let mut last = 0.0;
        for _ in 0..200 {
            let snapshot = registry.snapshot();
            let hits = snapshot.value("hits_total", &Labels::new()).unwrap_or(0.0);
            assert!(hits >= last);
            last = hits;
            if let Some(gauge) = snapshot.value("in_flight", &Labels::new()) {
                assert!(gauge >= 0.0);
            }
        }

        for writer in writers {
            writer.join().unwrap();
        }
        assert_eq!(
            registry.snapshot().value("hits_total", &Labels::new()),
            Some(2000.0)
        );
    }
}
