//! JSON rendering of snapshots.
//!
//! Output shape:
//!
//! ```text
//! { "<metric>": { "description": "...", "type": "counter",
//!                 "values": { "<canonical labels>": 15 } } }
//! ```
//!
//! Histogram series render as `{count, sum, avg, min, max}` objects, plus a
//! `buckets` object when bounds are configured.

use serde_json::{json, Map, Number, Value};

use super::error::MetricsResult;
use super::snapshot::{HistogramSummary, SeriesValue, Snapshot};

/// Renders snapshots as JSON documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotExporter {
    pretty: bool,
}

impl SnapshotExporter {
    /// Create an exporter producing compact JSON.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce indented JSON from [`Self::to_string`].
    #[must_use]
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    /// Render a snapshot as a JSON value.
    #[must_use]
    pub fn render(&self, snapshot: &Snapshot) -> Value {
        let mut root = Map::new();

        for (name, metric) in snapshot.metrics() {
            let values: Map<String, Value> = metric
                .series
                .iter()
                .map(|(labels, value)| (labels.canonical(), series_value(value)))
                .collect();

            root.insert(
                name.to_string(),
                json!({
                    "description": metric.help,
                    "type": metric.kind.as_str(),
                    "values": values,
                }),
            );
        }

        Value::Object(root)
    }

    /// Render a snapshot as a JSON string.
    pub fn to_string(&self, snapshot: &Snapshot) -> MetricsResult<String> {
        let value = self.render(snapshot);
        let body = if self.pretty {
            serde_json::to_string_pretty(&value)?
        } else {
            serde_json::to_string(&value)?
        };
        Ok(body)
    }
}

fn series_value(value: &SeriesValue) -> Value {
    match value {
        SeriesValue::Counter(v) | SeriesValue::Gauge(v) => number(*v),
        SeriesValue::Histogram(summary) => histogram(summary),
    }
}

fn histogram(summary: &HistogramSummary) -> Value {
    let mut object = Map::new();
    object.insert("count".to_string(), Value::from(summary.count));
    object.insert("sum".to_string(), number(summary.sum));
    object.insert("avg".to_string(), number(summary.avg()));
    object.insert("min".to_string(), number(summary.min));
    object.insert("max".to_string(), number(summary.max));

    if let Some(buckets) = &summary.buckets {
        let buckets: Map<String, Value> = buckets
            .iter()
            .map(|(bound, count)| (bound.to_string(), Value::from(*count)))
            .collect();
        object.insert("buckets".to_string(), Value::Object(buckets));
    }

    Value::Object(object)
}

/// Integral values render without a fractional part, so a counter bumped
/// 15 times reads `15` rather than `15.0`.
fn number(v: f64) -> Value {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;

    if v.fract() == 0.0 && v.abs() <= MAX_EXACT {
        return Value::from(v as i64);
    }
    Number::from_f64(v).map_or(Value::Null, Value::Number)
}
