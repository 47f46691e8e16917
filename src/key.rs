//! Metric key normalization.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Separator between metric path segments.
pub const SEPARATOR: char = '.';

/// Canonical metric key: dot-separated path with no empty segments.
/// Two raw paths that differ only by leading, trailing, or repeated separators produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct MetricKey(String);

impl MetricKey {
    /// Builds a canonical key from a raw metric path.
    pub fn new(raw: &str) -> Self {
        MetricKey(normalize(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterates the (non-empty) path segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR).filter(|s| !s.is_empty())
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Collapses empty segments out of a dotted metric path.
///
/// `"a..b.c"` and `".a.b.c."` both become `"a.b.c"`. A path made only of separators becomes `""`.
pub fn normalize(raw: &str) -> String {
    // Fast path: already canonical, avoid re-joining.
    if is_canonical(raw) {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    for segment in raw.split(SEPARATOR).filter(|s| !s.is_empty()) {
        if !out.is_empty() {
            out.push(SEPARATOR);
        }
        out.push_str(segment);
    }
    out
}

fn is_canonical(raw: &str) -> bool {
    !raw.starts_with(SEPARATOR) && !raw.ends_with(SEPARATOR) && !raw.contains("..")
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for MetricKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for MetricKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MetricKey {
    fn from(raw: &str) -> Self {
        MetricKey::new(raw)
    }
}

impl From<String> for MetricKey {
    fn from(raw: String) -> Self {
        if is_canonical(&raw) {
            MetricKey(raw)
        } else {
            MetricKey::new(&raw)
        }
    }
}

impl From<MetricKey> for String {
    fn from(key: MetricKey) -> Self {
        key.0
    }
}
