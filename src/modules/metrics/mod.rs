//! Metrics Module
//!
//! Thread-safe registry of labelled counters, gauges and histograms, with
//! point-in-time snapshots rendered as JSON and served over HTTP, plus host
//! CPU and memory gauges.

mod config;
mod error;
mod exporter;
mod json;
mod labels;
mod registry;
mod snapshot;
mod system;

pub use config::MetricsConfig;
pub use error::{MetricsError, MetricsResult};
pub use exporter::MetricsExporter;
pub use json::SnapshotExporter;
pub use labels::{Labels, NO_LABELS};
pub use registry::{MetricDefinition, MetricKind, MetricsRegistry, DEFAULT_MAX_SERIES_PER_METRIC};
pub use snapshot::{HistogramSummary, MetricSnapshot, SeriesValue, Snapshot};
pub use system::{SystemSampler, SYSTEM_CPU_PERCENT, SYSTEM_MEMORY_BYTES};
