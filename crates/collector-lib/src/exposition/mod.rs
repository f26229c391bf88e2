//! Metrics endpoint ingestion
//!
//! Turns the endpoint's text exposition payload into a [`MetricIndex`]
//! keyed by metric name and container id.

mod index;
mod parser;
mod source;

pub use index::{MetricIndex, CONTAINER_ID_LABEL, CONTAINER_METRIC_PREFIX, MAX_SAFE_INTEGER};
pub use parser::{parse_exposition, parse_sample, ParsedExposition, RawMetricSample};
pub use source::{HttpMetricsSource, MetricsSource};
