//! Label sets and their canonical string form.

use std::collections::BTreeMap;
use std::fmt;
use std::io;

use serde::Serialize;
use serde_json::ser::Formatter;

use super::error::{MetricsError, MetricsResult};

/// Canonical key used for series without labels.
pub const NO_LABELS: &str = "no_labels";

/// An unordered set of label key/value pairs.
///
/// Backed by a sorted map, so two label sets built from the same pairs in a
/// different order compare and hash equal, and a key can appear only once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    /// Create an empty label set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a label set from key/value pairs. Later duplicates win.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Add or replace a label.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Get a label value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Number of labels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no labels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over labels in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Canonical string form, or [`NO_LABELS`] for the empty set.
    ///
    /// A JSON object with sorted keys, `", "` and `": "` separators and
    /// non-ASCII characters escaped, e.g. `{"endpoint": "login"}`.
    #[must_use]
    pub fn canonical(&self) -> String {
        if self.0.is_empty() {
            return NO_LABELS.to_string();
        }
        let mut out = Vec::with_capacity(16 * self.0.len());
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, CanonicalFormatter);
        // A map of strings always serializes to UTF-8.
        if self.0.serialize(&mut serializer).is_err() {
            return NO_LABELS.to_string();
        }
        String::from_utf8(out).unwrap_or_else(|_| NO_LABELS.to_string())
    }

    /// Check every label name against the naming rules.
    pub(crate) fn validate(&self) -> MetricsResult<()> {
        for key in self.0.keys() {
            validate_label_name(key)?;
        }
        Ok(())
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Labels {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for Labels {
    fn from(pairs: [(K, V); N]) -> Self {
        Self::from_pairs(pairs)
    }
}

/// JSON layout of canonical label strings.
struct CanonicalFormatter;

impl Formatter for CanonicalFormatter {
    fn begin_object_key<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        fragment: &str,
    ) -> io::Result<()> {
        if fragment.is_ascii() {
            return writer.write_all(fragment.as_bytes());
        }
        let mut units = [0u16; 2];
        for ch in fragment.chars() {
            if ch.is_ascii() {
                writer.write_all(&[ch as u8])?;
            } else {
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{unit:04x}")?;
                }
            }
        }
        Ok(())
    }
}

/// Label names follow the same rules as metric names, and may not use the
/// reserved `__` prefix.
fn validate_label_name(name: &str) -> MetricsResult<()> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(MetricsError::InvalidLabelName(
            "label name cannot be empty".to_string(),
        ));
    };

    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(MetricsError::InvalidLabelName(format!(
            "label name must start with a letter or underscore: {name}"
        )));
    }

    if name.starts_with("__") {
        return Err(MetricsError::InvalidLabelName(format!(
            "label names starting with '__' are reserved: {name}"
        )));
    }

    if let Some(ch) = chars.find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        return Err(MetricsError::InvalidLabelName(format!(
            "label name contains invalid character '{ch}': {name}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_independent_equality() {
        let a = Labels::from_pairs([("method", "GET"), ("endpoint", "login")]);
        let b = Labels::from_pairs([("endpoint", "login"), ("method", "GET")]);
        assert_eq!(a, b);
        assert_eq!(a.canonical(), b.canonical());
    }

    #[test]
    fn test_canonical_sorted_keys() {
        let labels = Labels::new().with("status", "200").with("endpoint", "login");
        assert_eq!(labels.canonical(), r#"{"endpoint": "login", "status": "200"}"#);
    }

    #[test]
    fn test_canonical_empty() {
        assert_eq!(Labels::new().canonical(), NO_LABELS);
    }

    #[test]
    fn test_duplicate_keys_collapse() {
        let labels = Labels::from_pairs([("k", "a"), ("k", "b")]);
        assert_eq!(labels.len(), 1);
        assert_eq!(labels.get("k"), Some("b"));
    }

    #[test]
    fn test_canonical_escapes_values() {
        let labels = Labels::from([("path", "a\"b")]);
        assert_eq!(labels.canonical(), r#"{"path": "a\"b"}"#);
    }

    #[test]
    fn test_canonical_escapes_non_ascii() {
        let labels = Labels::from([("city", "Bogotá"), ("mood", "\u{1F600}")]);
        assert_eq!(
            labels.canonical(),
            r#"{"city": "Bogot\u00e1", "mood": "\ud83d\ude00"}"#
        );
    }

    #[test]
    fn test_validate_label_names() {
        assert!(Labels::from([("transport", "tls")]).validate().is_ok());
        assert!(Labels::from([("_private", "x")]).validate().is_ok());
        assert!(Labels::from([("", "x")]).validate().is_err());
        assert!(Labels::from([("1abc", "x")]).validate().is_err());
        assert!(Labels::from([("with-dash", "x")]).validate().is_err());
        assert!(Labels::from([("__reserved", "x")]).validate().is_err());
    }
}
