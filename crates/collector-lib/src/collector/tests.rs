//! End-to-end tests for the poll loop against in-memory upstreams

use super::*;
use crate::error::{CollectorError, Result};
use crate::exposition::MetricsSource;
use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::models::{ContainerRecord, CONTAINER_METADATA_EXTENSION};
use crate::runtime::ContainerRuntime;
use crate::sink::{BulkItemResult, BulkResponse, BulkTransport, DeliverySink, FlushPolicy};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

struct StaticRuntime {
    containers: Vec<ContainerRecord>,
    tasks: Vec<String>,
    /// Fail this many calls before answering
    fail_first: usize,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StaticRuntime {
    fn new(containers: Vec<ContainerRecord>, tasks: &[&str]) -> Self {
        Self {
            containers,
            tasks: tasks.iter().map(|id| id.to_string()).collect(),
            fail_first: 0,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ContainerRuntime for StaticRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerRecord>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(CollectorError::transport(
                "containerd",
                anyhow::anyhow!("connection refused"),
            ));
        }
        Ok(self.containers.clone())
    }

    async fn list_tasks(&self) -> Result<Vec<String>> {
        Ok(self.tasks.clone())
    }
}

struct StaticMetrics {
    payload: String,
    delay: Option<Duration>,
}

impl StaticMetrics {
    fn new(payload: &str) -> Self {
        Self {
            payload: payload.to_string(),
            delay: None,
        }
    }
}

#[async_trait]
impl MetricsSource for StaticMetrics {
    async fn fetch(&self) -> Result<String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.payload.clone())
    }
}

struct RecordingTransport {
    response: Option<BulkResponse>,
    bodies: Mutex<Vec<String>>,
}

impl RecordingTransport {
    fn accepting() -> Arc<Self> {
        Arc::new(Self {
            response: Some(BulkResponse::default()),
            bodies: Mutex::new(Vec::new()),
        })
    }

    fn replying(response: BulkResponse) -> Arc<Self> {
        Arc::new(Self {
            response: Some(response),
            bodies: Mutex::new(Vec::new()),
        })
    }

    fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            response: None,
            bodies: Mutex::new(Vec::new()),
        })
    }

    fn bodies(&self) -> Vec<String> {
        self.bodies.lock().unwrap().clone()
    }

    /// Documents carried by each recorded bulk body
    fn document_counts(&self) -> Vec<usize> {
        self.bodies()
            .iter()
            .map(|body| body.lines().count() / 2)
            .collect()
    }
}

#[async_trait]
impl BulkTransport for RecordingTransport {
    async fn bulk(&self, body: String) -> Result<BulkResponse> {
        self.bodies.lock().unwrap().push(body);
        self.response.clone().ok_or_else(|| {
            CollectorError::transport("store", anyhow::anyhow!("connection reset by peer"))
        })
    }
}

fn container(id: &str) -> ContainerRecord {
    let mut record = ContainerRecord {
        id: id.to_string(),
        image: "docker.io/library/redis:7".to_string(),
        spec: Some(br#"{"annotations":{"io.kubernetes.cri.container-type":"container"}}"#.to_vec()),
        ..Default::default()
    };
    record.extensions.insert(
        CONTAINER_METADATA_EXTENSION.to_string(),
        format!(r#"{{"Metadata":{{"Name":"{id}"}}}}"#).into_bytes(),
    );
    record
}

fn broken_container(id: &str) -> ContainerRecord {
    ContainerRecord {
        id: id.to_string(),
        spec: Some(b"not json".to_vec()),
        ..Default::default()
    }
}

fn build_loop(
    runtime: StaticRuntime,
    payload: &str,
    transport: Arc<RecordingTransport>,
    config: PollConfig,
) -> PollLoop {
    build_loop_with(runtime, StaticMetrics::new(payload), transport, config)
}

fn build_loop_with(
    runtime: StaticRuntime,
    metrics: StaticMetrics,
    transport: Arc<RecordingTransport>,
    config: PollConfig,
) -> PollLoop {
    PollLoopBuilder::new()
        .runtime(Arc::new(runtime))
        .metrics_source(Arc::new(metrics))
        .sink(DeliverySink::new(transport, "docker"))
        .hostname("node-1")
        .config(config)
        .build()
        .unwrap()
}

fn fast_config() -> PollConfig {
    PollConfig {
        interval: Duration::from_millis(5),
        upstream_timeout: Duration::from_millis(200),
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_one_container_flushes_on_eleventh_cycle() {
    let transport = RecordingTransport::accepting();
    let mut poll = build_loop(
        StaticRuntime::new(vec![container("c1")], &["c1"]),
        "container_pids_current{container_id=\"c1\"} 4\n",
        transport.clone(),
        fast_config(),
    );

    for _ in 0..10 {
        poll.run_iteration().await.unwrap();
    }
    assert!(transport.bodies().is_empty());
    assert_eq!(poll.batch().len(), 10);

    poll.run_iteration().await.unwrap();

    assert_eq!(transport.document_counts(), vec![11]);
    assert!(poll.batch().is_empty());
    assert_eq!(poll.batch().cycles(), 0);
}

#[tokio::test]
async fn test_partial_rejection_is_not_an_iteration_failure() {
    let mut ok = HashMap::new();
    ok.insert("index".to_string(), BulkItemResult { status: 201, error: None });
    let mut rejected = HashMap::new();
    rejected.insert(
        "index".to_string(),
        BulkItemResult {
            status: 400,
            error: Some(serde_json::json!({"type": "mapper_parsing_exception"})),
        },
    );
    let transport = RecordingTransport::replying(BulkResponse {
        errors: true,
        items: vec![ok.clone(), ok.clone(), rejected, ok.clone(), ok],
    });

    let containers = (1..=5).map(|i| container(&format!("c{i}"))).collect();
    let mut poll = build_loop(
        StaticRuntime::new(containers, &[]),
        "",
        transport.clone(),
        PollConfig {
            flush_policy: FlushPolicy {
                max_cycles: 10,
                max_documents: 4,
            },
            ..fast_config()
        },
    );

    poll.run_iteration().await.unwrap();

    assert_eq!(transport.document_counts(), vec![5]);
    assert!(poll.batch().is_empty());
}

#[tokio::test]
async fn test_malformed_record_is_isolated() {
    let transport = RecordingTransport::accepting();
    let mut poll = build_loop(
        StaticRuntime::new(
            vec![container("good-1"), broken_container("bad"), container("good-2")],
            &["good-1"],
        ),
        "",
        transport.clone(),
        fast_config(),
    );

    poll.run_iteration().await.unwrap();
    assert_eq!(poll.batch().len(), 2);

    let report = poll.flush().await.unwrap();
    assert_eq!(report.submitted, 2);

    let body = &transport.bodies()[0];
    assert!(body.contains("\"good-1\""));
    assert!(body.contains("\"good-2\""));
    assert!(!body.contains("\"bad\""));
}

#[tokio::test]
async fn test_metrics_for_unknown_containers_are_ignored() {
    let transport = RecordingTransport::accepting();
    let mut poll = build_loop(
        StaticRuntime::new(vec![container("c1")], &["c1"]),
        "container_pids_current{container_id=\"ghost\"} 9\n\
         container_memory_usage_bytes{container_id=\"c1\"} 100\n\
         container_memory_usage_limit_bytes{container_id=\"c1\"} 400\n",
        transport.clone(),
        fast_config(),
    );

    poll.run_iteration().await.unwrap();
    poll.flush().await.unwrap();

    let body = &transport.bodies()[0];
    let document: serde_json::Value =
        serde_json::from_str(body.lines().nth(1).unwrap()).unwrap();
    assert_eq!(document["tag"]["container_id"], "c1");
    assert_eq!(document["tag"]["state"], "Running");
    assert_eq!(document["mem"]["usage_pct"], 0.25);
    assert_eq!(document["proc"]["current"], 0.0);
    assert!(!body.contains("ghost"));
}

#[tokio::test]
async fn test_slow_runtime_times_out() {
    let mut runtime = StaticRuntime::new(vec![container("c1")], &[]);
    runtime.delay = Some(Duration::from_secs(5));

    let health = HealthRegistry::new();
    let mut poll = PollLoopBuilder::new()
        .runtime(Arc::new(runtime))
        .metrics_source(Arc::new(StaticMetrics::new("")))
        .sink(DeliverySink::new(RecordingTransport::accepting(), "docker"))
        .health(health.clone())
        .upstream_timeout(Duration::from_millis(20))
        .build()
        .unwrap();

    let err = poll.run_iteration().await.unwrap_err();

    assert!(matches!(err, CollectorError::Timeout { what: "runtime", .. }));
    assert!(poll.batch().is_empty());

    let report = health.health().await;
    assert_eq!(
        report.components[components::RUNTIME].status,
        ComponentStatus::Degraded
    );
    assert_eq!(
        report.components[components::METRICS_SOURCE].status,
        ComponentStatus::Healthy
    );
}

#[tokio::test]
async fn test_failed_bulk_request_drops_batch() {
    let transport = RecordingTransport::unreachable();
    let mut poll = build_loop(
        StaticRuntime::new(vec![container("c1"), container("c2")], &[]),
        "",
        transport.clone(),
        PollConfig {
            flush_policy: FlushPolicy {
                max_cycles: 0,
                max_documents: 2000,
            },
            ..fast_config()
        },
    );

    let err = poll.run_iteration().await.unwrap_err();

    assert!(matches!(
        err,
        CollectorError::DeliveryAttemptFailed { documents: 2, .. }
    ));
    assert_eq!(transport.bodies().len(), 1);
    assert!(poll.batch().is_empty());
    assert_eq!(poll.batch().cycles(), 0);
}

#[tokio::test]
async fn test_success_resets_failure_streak() {
    let mut runtime = StaticRuntime::new(vec![container("c1")], &[]);
    runtime.fail_first = 2;
    let mut poll = build_loop(runtime, "", RecordingTransport::accepting(), fast_config());

    for expected in 1..=2 {
        let outcome = poll.run_iteration().await;
        let delay = poll.supervise(outcome).await.unwrap();
        assert_eq!(poll.consecutive_failures(), expected);
        assert!(delay > Duration::from_millis(5));
        assert!(delay <= Duration::from_millis(9));
    }

    let outcome = poll.run_iteration().await;
    let delay = poll.supervise(outcome).await.unwrap();

    assert_eq!(poll.consecutive_failures(), 0);
    assert_eq!(delay, Duration::from_millis(5));
}

#[tokio::test]
async fn test_retry_never_comes_sooner_than_interval() {
    let mut runtime = StaticRuntime::new(Vec::new(), &[]);
    runtime.fail_first = usize::MAX;
    let config = PollConfig::default();
    let mut poll = build_loop(runtime, "", RecordingTransport::accepting(), config.clone());

    let mut previous = Duration::ZERO;
    for failures in 1..=4 {
        let outcome = poll.run_iteration().await;
        let delay = poll.supervise(outcome).await.unwrap();

        assert!(delay >= config.interval, "retry {failures} after {delay:?}");
        assert!(delay > previous);
        previous = delay;
    }
    assert_eq!(previous, Duration::from_secs(18));
}

#[tokio::test]
async fn test_upstreams_are_read_concurrently() {
    let mut runtime = StaticRuntime::new(vec![container("c1")], &["c1"]);
    runtime.delay = Some(Duration::from_millis(100));
    let metrics = StaticMetrics {
        delay: Some(Duration::from_millis(100)),
        ..StaticMetrics::new("container_pids_current{container_id=\"c1\"} 2\n")
    };
    let mut poll = build_loop_with(
        runtime,
        metrics,
        RecordingTransport::accepting(),
        PollConfig {
            upstream_timeout: Duration::from_secs(1),
            ..fast_config()
        },
    );

    let started = std::time::Instant::now();
    poll.run_iteration().await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(poll.batch().len(), 1);
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(180), "took {elapsed:?}");
}

#[tokio::test]
async fn test_run_gives_up_after_consecutive_failures() {
    let mut runtime = StaticRuntime::new(Vec::new(), &[]);
    runtime.fail_first = usize::MAX;

    let health = HealthRegistry::new();
    let poll = PollLoopBuilder::new()
        .runtime(Arc::new(runtime))
        .metrics_source(Arc::new(StaticMetrics::new("")))
        .sink(DeliverySink::new(RecordingTransport::accepting(), "docker"))
        .health(health.clone())
        .config(PollConfig {
            max_consecutive_failures: 3,
            ..fast_config()
        })
        .build()
        .unwrap();

    let (_tx, rx) = broadcast::channel(1);
    let result = tokio::time::timeout(Duration::from_secs(5), poll.run(rx))
        .await
        .expect("loop should give up on its own");

    assert_eq!(result.unwrap_err().kind(), "transport");
    assert_eq!(
        health.health().await.components[components::POLL_LOOP].status,
        ComponentStatus::Unhealthy
    );
}

#[tokio::test]
async fn test_shutdown_flushes_pending_tail() {
    let transport = RecordingTransport::accepting();
    let poll = build_loop(
        StaticRuntime::new(vec![container("c1")], &["c1"]),
        "",
        transport.clone(),
        PollConfig {
            flush_policy: FlushPolicy {
                max_cycles: 10_000,
                max_documents: 10_000,
            },
            ..fast_config()
        },
    );

    let (tx, rx) = broadcast::channel(1);
    let handle = tokio::spawn(poll.run(rx));

    tokio::time::sleep(Duration::from_millis(60)).await;
    tx.send(()).unwrap();
    handle.await.unwrap().unwrap();

    let counts = transport.document_counts();
    assert_eq!(counts.len(), 1);
    assert!(counts[0] >= 1);
}
