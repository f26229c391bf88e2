//! Observability infrastructure for the collector
//!
//! Provides:
//! - Prometheus metrics (cycle latency, batch size, delivered documents, failures)
//! - Structured JSON event logging with tracing

use crate::sink::{DeliveryReport, FailedOperation};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Histogram buckets for cycle and flush latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<CollectorMetricsInner> = OnceLock::new();

struct CollectorMetricsInner {
    cycle_latency_seconds: Histogram,
    flush_latency_seconds: Histogram,
    containers_observed: IntGauge,
    batch_documents: IntGauge,
    documents_delivered: IntCounter,
    documents_rejected: IntCounter,
    delivery_attempts_failed: IntCounter,
    malformed_records: IntCounter,
    iteration_failures: IntCounterVec,
}

impl CollectorMetricsInner {
    fn new() -> Self {
        Self {
            cycle_latency_seconds: register_histogram!(
                "containerd_collector_cycle_latency_seconds",
                "Time spent collecting and building documents for one poll cycle",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_latency_seconds"),

            flush_latency_seconds: register_histogram!(
                "containerd_collector_flush_latency_seconds",
                "Time spent delivering one batch to the store",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register flush_latency_seconds"),

            containers_observed: register_int_gauge!(
                "containerd_collector_containers_observed",
                "Number of containers listed by the runtime in the last cycle"
            )
            .expect("Failed to register containers_observed"),

            batch_documents: register_int_gauge!(
                "containerd_collector_batch_documents",
                "Number of documents waiting in the current batch"
            )
            .expect("Failed to register batch_documents"),

            documents_delivered: register_int_counter!(
                "containerd_collector_documents_delivered_total",
                "Total number of documents submitted to the store"
            )
            .expect("Failed to register documents_delivered"),

            documents_rejected: register_int_counter!(
                "containerd_collector_documents_rejected_total",
                "Total number of documents rejected individually by the store"
            )
            .expect("Failed to register documents_rejected"),

            delivery_attempts_failed: register_int_counter!(
                "containerd_collector_delivery_attempts_failed_total",
                "Total number of bulk requests that failed outright"
            )
            .expect("Failed to register delivery_attempts_failed"),

            malformed_records: register_int_counter!(
                "containerd_collector_malformed_records_total",
                "Total number of container records skipped as malformed"
            )
            .expect("Failed to register malformed_records"),

            iteration_failures: register_int_counter_vec!(
                "containerd_collector_iteration_failures_total",
                "Total number of failed poll cycles by failure kind",
                &["kind"]
            )
            .expect("Failed to register iteration_failures"),
        }
    }
}

/// Collector metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share it.
#[derive(Clone)]
pub struct CollectorMetrics {
    _private: (),
}

impl Default for CollectorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectorMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(CollectorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &CollectorMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_cycle_latency(&self, duration_secs: f64) {
        self.inner().cycle_latency_seconds.observe(duration_secs);
    }

    pub fn observe_flush_latency(&self, duration_secs: f64) {
        self.inner().flush_latency_seconds.observe(duration_secs);
    }

    pub fn set_containers_observed(&self, count: i64) {
        self.inner().containers_observed.set(count);
    }

    pub fn set_batch_documents(&self, count: i64) {
        self.inner().batch_documents.set(count);
    }

    /// Record the outcome of a completed bulk request
    pub fn record_delivery(&self, report: &DeliveryReport) {
        self.inner()
            .documents_delivered
            .inc_by(report.submitted as u64);
        self.inner()
            .documents_rejected
            .inc_by(report.failures.len() as u64);
    }

    pub fn inc_delivery_attempts_failed(&self) {
        self.inner().delivery_attempts_failed.inc();
    }

    pub fn inc_malformed_records(&self, count: u64) {
        self.inner().malformed_records.inc_by(count);
    }

    pub fn inc_iteration_failures(&self, kind: &str) {
        self.inner()
            .iteration_failures
            .with_label_values(&[kind])
            .inc();
    }
}

/// Structured logger for collector events
///
/// Emits consistent JSON-formatted events for flushes, delivery failures
/// and loop lifecycle.
#[derive(Clone)]
pub struct StructuredLogger {
    host: String,
}

impl StructuredLogger {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    pub fn log_startup(&self, version: &str) {
        info!(
            event = "collector_started",
            host = %self.host,
            version = %version,
            "Started monitoring containerd"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "collector_shutdown",
            host = %self.host,
            reason = %reason,
            "Collector shutting down"
        );
    }

    /// Log a completed flush; rejected documents are logged one by one
    pub fn log_flush(&self, report: &DeliveryReport) {
        if report.is_partial_failure() {
            self.log_partial_failure(&report.failures);
        }

        info!(
            event = "batch_flushed",
            host = %self.host,
            index = %report.index,
            submitted = report.submitted,
            rejected = report.failures.len(),
            "Pushed {} metrics",
            report.submitted
        );
    }

    /// Full detail for every document the store refused, for inspection or replay
    pub fn log_partial_failure(&self, failures: &[FailedOperation]) {
        for failure in failures {
            let operation = serde_json::to_string(&failure.operation).unwrap_or_default();
            let document = serde_json::to_string(&failure.document).unwrap_or_default();

            warn!(
                event = "document_rejected",
                host = %self.host,
                status = failure.status,
                error = %failure.error,
                operation = %operation,
                document = %document,
                container_id = %failure.document.container_id(),
                "Store rejected document"
            );
        }
    }

    pub fn log_delivery_attempt_failed(&self, documents: usize, reason: &str) {
        error!(
            event = "delivery_attempt_failed",
            host = %self.host,
            documents = documents,
            reason = %reason,
            "Bulk delivery failed, batch dropped"
        );
    }

    pub fn log_malformed_record(&self, container_id: &str, reason: &str) {
        warn!(
            event = "malformed_runtime_record",
            host = %self.host,
            container_id = %container_id,
            reason = %reason,
            "Skipping container with undecodable runtime record"
        );
    }

    pub fn log_iteration_failure(&self, kind: &str, error: &str, consecutive: u32) {
        warn!(
            event = "iteration_failed",
            host = %self.host,
            kind = %kind,
            error = %error,
            consecutive_failures = consecutive,
            "Poll cycle failed"
        );
    }
}
