//! Per-cycle lookup of container metrics by name and container id

use super::parser::{parse_exposition, RawMetricSample};
use std::collections::HashMap;

/// Only metric families with this prefix are indexed
pub const CONTAINER_METRIC_PREFIX: &str = "container_";

/// Label that joins a sample to a runtime container
pub const CONTAINER_ID_LABEL: &str = "container_id";

/// Largest integer an f64 represents exactly (2^53 - 1)
pub const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Two-level lookup: metric name -> container id -> sample.
///
/// Built fresh from every metrics payload. When the same (name, container id)
/// pair appears more than once, the last sample wins.
#[derive(Debug, Clone, Default)]
pub struct MetricIndex {
    metrics: HashMap<String, HashMap<String, RawMetricSample>>,
    malformed_lines: usize,
}

impl MetricIndex {
    /// Parse an exposition payload and index its `container_` samples
    pub fn build(text: &str) -> Self {
        let parsed = parse_exposition(text);
        if parsed.malformed_lines > 0 {
            tracing::warn!(
                malformed_lines = parsed.malformed_lines,
                "Metrics payload contained malformed lines"
            );
        }

        let mut index = Self::from_samples(parsed.samples);
        index.malformed_lines = parsed.malformed_lines;
        index
    }

    /// Index already-parsed samples
    fn from_samples(samples: impl IntoIterator<Item = RawMetricSample>) -> Self {
        let mut metrics: HashMap<String, HashMap<String, RawMetricSample>> = HashMap::new();

        for sample in samples {
            if !sample.name.starts_with(CONTAINER_METRIC_PREFIX) {
                continue;
            }
            let Some(container_id) = sample.labels.get(CONTAINER_ID_LABEL).cloned() else {
                continue;
            };
            metrics
                .entry(sample.name.clone())
                .or_default()
                .insert(container_id, sample);
        }

        Self {
            metrics,
            malformed_lines: 0,
        }
    }

    /// Value of `name` for `container_id`.
    ///
    /// Absent names or ids resolve to `0`. Readings that are non-finite or
    /// whose magnitude exceeds [`MAX_SAFE_INTEGER`] are also reported as `0`:
    /// such values come from corrupt or wrapped counters and are dropped as a
    /// data-quality policy rather than surfaced as errors.
    pub fn value(&self, name: &str, container_id: &str) -> f64 {
        let raw = self
            .metrics
            .get(name)
            .and_then(|by_container| by_container.get(container_id))
            .map(|sample| sample.value)
            .unwrap_or(0.0);

        if raw.is_finite() && raw.abs() <= MAX_SAFE_INTEGER {
            raw
        } else {
            0.0
        }
    }

    /// Raw sample for a (name, container id) pair, without clamping
    #[cfg(test)]
    fn sample(&self, name: &str, container_id: &str) -> Option<&RawMetricSample> {
        self.metrics.get(name)?.get(container_id)
    }

    /// Number of indexed metric names
    pub fn metric_count(&self) -> usize {
        self.metrics.len()
    }

    /// Distinct container ids seen across all indexed metrics
    #[cfg(test)]
    fn container_count(&self) -> usize {
        let mut ids: Vec<&String> = self.metrics.values().flat_map(|m| m.keys()).collect();
        ids.sort();
        ids.dedup();
        ids.len()
    }

    pub fn malformed_lines(&self) -> usize {
        self.malformed_lines
    }
}
