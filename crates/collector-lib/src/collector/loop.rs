//! Poll loop with supervised retries
//!
//! A failed iteration (upstream transport error, timeout, failed bulk request)
//! ends that iteration only. The loop waits one interval plus an exponential
//! backoff and tries again; after too many consecutive failures it gives up
//! and returns the error so the process can exit and be restarted by its
//! supervisor.

use crate::document::build_document;
use crate::error::{CollectorError, Result};
use crate::exposition::{MetricIndex, MetricsSource};
use crate::health::{components, HealthRegistry};
use crate::models::{ObservabilityDocument, RuntimeSnapshot};
use crate::observability::{CollectorMetrics, StructuredLogger};
use crate::runtime::{self, ContainerRuntime};
use crate::sink::{Batch, DeliveryReport, DeliverySink, FlushPolicy};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info};

/// Configuration for the poll loop
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Sleep between iterations (default: 10 seconds)
    pub interval: Duration,
    /// Bound on each upstream read (default: 10 seconds)
    pub upstream_timeout: Duration,
    /// When the accumulated batch is flushed
    pub flush_policy: FlushPolicy,
    /// Extra wait on top of the interval after a first failed iteration
    /// (default: 1 second)
    pub initial_backoff: Duration,
    /// Ceiling for the extra wait (default: 60 seconds)
    pub max_backoff: Duration,
    /// Failed iterations in a row before the loop gives up (default: 5)
    pub max_consecutive_failures: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            upstream_timeout: Duration::from_secs(10),
            flush_policy: FlushPolicy::default(),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            max_consecutive_failures: 5,
        }
    }
}

/// Delay before retrying after the `failures`-th consecutive failure:
/// `initial * 2^(failures - 1)`, capped at `max`.
pub fn backoff_delay(failures: u32, initial: Duration, max: Duration) -> Duration {
    let exponent = failures.saturating_sub(1).min(31);
    initial
        .checked_mul(1u32 << exponent)
        .map_or(max, |delay| delay.min(max))
}

/// Single-worker poll loop; owns the batch exclusively
pub struct PollLoop {
    runtime: Arc<dyn ContainerRuntime>,
    metrics_source: Arc<dyn MetricsSource>,
    sink: DeliverySink,
    hostname: String,
    config: PollConfig,
    batch: Batch,
    health: HealthRegistry,
    metrics: CollectorMetrics,
    logger: StructuredLogger,
    consecutive_failures: u32,
}

impl PollLoop {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        metrics_source: Arc<dyn MetricsSource>,
        sink: DeliverySink,
        hostname: impl Into<String>,
        config: PollConfig,
        health: HealthRegistry,
    ) -> Self {
        let hostname = hostname.into();

        Self {
            runtime,
            metrics_source,
            sink,
            logger: StructuredLogger::new(hostname.clone()),
            hostname,
            batch: Batch::new(config.flush_policy),
            config,
            health,
            metrics: CollectorMetrics::new(),
            consecutive_failures: 0,
        }
    }

    /// Run until shutdown is signalled or the failure budget is exhausted.
    ///
    /// On either exit path whatever is left in the batch is flushed once,
    /// best effort.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        info!(
            host = %self.hostname,
            interval_secs = self.config.interval.as_secs_f64(),
            max_cycles = self.config.flush_policy.max_cycles,
            max_documents = self.config.flush_policy.max_documents,
            "Starting poll loop"
        );

        let mut delay = self.config.interval;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let outcome = self.run_iteration().await;
                    match self.supervise(outcome).await {
                        Ok(next) => delay = next,
                        Err(e) => {
                            self.drain().await;
                            return Err(e);
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down poll loop");
                    self.drain().await;
                    return Ok(());
                }
            }
        }
    }

    /// One cycle: collect, offer to the batch, flush if due
    pub async fn run_iteration(&mut self) -> Result<()> {
        let started = Instant::now();
        let documents = self.collect_cycle().await?;
        self.metrics
            .observe_cycle_latency(started.elapsed().as_secs_f64());

        let due = self.batch.offer(documents);
        self.metrics.set_batch_documents(self.batch.len() as i64);

        if due {
            self.flush().await?;
        }

        Ok(())
    }

    /// Update the failure streak from an iteration outcome and return the
    /// delay before the next iteration, or the error once the streak
    /// reaches the configured limit.
    pub async fn supervise(&mut self, outcome: Result<()>) -> Result<Duration> {
        match outcome {
            Ok(()) => {
                if self.consecutive_failures > 0 {
                    info!(
                        previous_failures = self.consecutive_failures,
                        "Poll loop recovered"
                    );
                }
                self.consecutive_failures = 0;
                self.health.set_healthy(components::POLL_LOOP).await;
                self.health.set_ready(true).await;
                Ok(self.config.interval)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                self.metrics.inc_iteration_failures(e.kind());
                self.logger.log_iteration_failure(
                    e.kind(),
                    &e.to_string(),
                    self.consecutive_failures,
                );

                if self.consecutive_failures >= self.config.max_consecutive_failures {
                    self.health
                        .set_unhealthy(
                            components::POLL_LOOP,
                            format!("gave up after {} failed cycles: {e}", self.consecutive_failures),
                        )
                        .await;
                    return Err(e);
                }

                self.health
                    .set_degraded(components::POLL_LOOP, e.to_string())
                    .await;
                Ok(self.config.interval
                    + backoff_delay(
                        self.consecutive_failures,
                        self.config.initial_backoff,
                        self.config.max_backoff,
                    ))
            }
        }
    }

    /// Deliver everything held in the batch.
    ///
    /// The batch is emptied and its cycle counter reset before the request is
    /// made, whatever the outcome.
    pub async fn flush(&mut self) -> Result<DeliveryReport> {
        let documents = self.batch.take();
        self.metrics.set_batch_documents(0);
        let submitted = documents.len();

        let started = Instant::now();
        let outcome = self.sink.deliver(documents).await;
        self.metrics
            .observe_flush_latency(started.elapsed().as_secs_f64());
        self.health.observe(components::STORE, &outcome).await;

        match &outcome {
            Ok(report) => {
                self.metrics.record_delivery(report);
                self.logger.log_flush(report);
            }
            Err(e) => {
                self.metrics.inc_delivery_attempts_failed();
                self.logger
                    .log_delivery_attempt_failed(submitted, &e.to_string());
            }
        }

        outcome
    }

    pub fn batch(&self) -> &Batch {
        &self.batch
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Read both upstreams concurrently and build this cycle's documents
    async fn collect_cycle(&self) -> Result<Vec<ObservabilityDocument>> {
        let timeout = self.config.upstream_timeout;

        let (snapshot, payload) = tokio::join!(
            bounded("runtime", timeout, runtime::snapshot(self.runtime.as_ref())),
            bounded("metrics source", timeout, self.metrics_source.fetch()),
        );
        self.health.observe(components::RUNTIME, &snapshot).await;
        self.health
            .observe(components::METRICS_SOURCE, &payload)
            .await;

        let snapshot = snapshot?;
        let index = MetricIndex::build(&payload?);
        self.metrics
            .set_containers_observed(snapshot.containers.len() as i64);

        Ok(self.build_documents(&snapshot, &index))
    }

    /// One document per container; malformed records are skipped and counted
    fn build_documents(
        &self,
        snapshot: &RuntimeSnapshot,
        index: &MetricIndex,
    ) -> Vec<ObservabilityDocument> {
        let timestamp = Utc::now();
        let mut documents = Vec::with_capacity(snapshot.containers.len());
        let mut malformed = 0u64;

        for container in &snapshot.containers {
            match build_document(container, index, &snapshot.running, &self.hostname, timestamp) {
                Ok(document) => documents.push(document),
                Err(e) => {
                    malformed += 1;
                    self.logger.log_malformed_record(&container.id, &e.to_string());
                }
            }
        }

        if malformed > 0 {
            self.metrics.inc_malformed_records(malformed);
        }

        debug!(
            containers = snapshot.containers.len(),
            running = snapshot.running.len(),
            documents = documents.len(),
            malformed,
            indexed_metrics = index.metric_count(),
            "Cycle collected"
        );

        documents
    }

    /// Final best-effort flush of the pending tail
    async fn drain(&mut self) {
        if self.batch.is_empty() {
            return;
        }

        info!(documents = self.batch.len(), "Flushing pending batch");
        // Failures are already logged and counted by flush
        let _ = self.flush().await;
    }
}

/// Bound an upstream call; expiry becomes [`CollectorError::Timeout`]
async fn bounded<T>(
    what: &'static str,
    after: Duration,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(after, call)
        .await
        .map_err(|_| CollectorError::Timeout { what, after })?
}

/// Builder for the poll loop
pub struct PollLoopBuilder {
    runtime: Option<Arc<dyn ContainerRuntime>>,
    metrics_source: Option<Arc<dyn MetricsSource>>,
    sink: Option<DeliverySink>,
    hostname: String,
    health: Option<HealthRegistry>,
    config: PollConfig,
}

impl PollLoopBuilder {
    pub fn new() -> Self {
        Self {
            runtime: None,
            metrics_source: None,
            sink: None,
            hostname: "unknown".to_string(),
            health: None,
            config: PollConfig::default(),
        }
    }

    pub fn runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn metrics_source(mut self, source: Arc<dyn MetricsSource>) -> Self {
        self.metrics_source = Some(source);
        self
    }

    pub fn sink(mut self, sink: DeliverySink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Share a health registry with the HTTP probes
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn config(mut self, config: PollConfig) -> Self {
        self.config = config;
        self
    }

    pub fn upstream_timeout(mut self, timeout: Duration) -> Self {
        self.config.upstream_timeout = timeout;
        self
    }

    pub fn build(self) -> anyhow::Result<PollLoop> {
        let runtime = self
            .runtime
            .ok_or_else(|| anyhow::anyhow!("Container runtime is required"))?;
        let metrics_source = self
            .metrics_source
            .ok_or_else(|| anyhow::anyhow!("Metrics source is required"))?;
        let sink = self
            .sink
            .ok_or_else(|| anyhow::anyhow!("Delivery sink is required"))?;

        if self.config.max_consecutive_failures == 0 {
            anyhow::bail!("max_consecutive_failures must be at least 1");
        }

        Ok(PollLoop::new(
            runtime,
            metrics_source,
            sink,
            self.hostname,
            self.config,
            self.health.unwrap_or_default(),
        ))
    }
}

impl Default for PollLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_config_default() {
        let config = PollConfig::default();
        assert_eq!(config.interval, Duration::from_secs(10));
        assert_eq!(config.initial_backoff, Duration::from_secs(1));
        assert_eq!(config.max_backoff, Duration::from_secs(60));
        assert_eq!(config.max_consecutive_failures, 5);
        assert_eq!(config.flush_policy, FlushPolicy::default());
    }

    #[test]
    fn test_backoff_doubles_up_to_ceiling() {
        let initial = Duration::from_secs(1);
        let max = Duration::from_secs(60);

        let delays: Vec<u64> = (1..=8)
            .map(|n| backoff_delay(n, initial, max).as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);

        assert_eq!(backoff_delay(u32::MAX, initial, max), max);
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let err = bounded("runtime", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, CollectorError>(())
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), "timeout");
        assert!(err.to_string().contains("runtime"));
    }

    #[test]
    fn test_builder_requires_upstreams() {
        assert!(PollLoopBuilder::new().build().is_err());
    }
}
