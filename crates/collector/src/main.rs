//! containerd collector - container telemetry shipper
//!
//! This binary runs as a DaemonSet on each Kubernetes node. It polls
//! containerd and the node's container metrics endpoint, joins the two into
//! one document per container and bulk-indexes the documents into
//! Elasticsearch.

use anyhow::{Context, Result};
use collector_lib::{
    health::{components, HealthRegistry},
    observability::{CollectorMetrics, StructuredLogger},
    ContainerdRuntime, DeliverySink, ElasticsearchClient, HttpMetricsSource, PollLoopBuilder,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const COLLECTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = config::CollectorConfig::load().context("Failed to load configuration")?;
    let hostname = config::read_hostname(&config.hostname_file);
    info!(
        host = %hostname,
        metrics_url = %config.metrics_url,
        interval_secs = config.metric_interval,
        "Collector configured"
    );

    let health_registry = HealthRegistry::new();
    for name in components::ALL {
        health_registry.register(name).await;
    }

    let metrics = CollectorMetrics::new();
    let logger = StructuredLogger::new(hostname.clone());

    let runtime = ContainerdRuntime::connect(&config.containerd_config())
        .context("Failed to configure containerd client")?;
    let metrics_source = HttpMetricsSource::new(&config.metrics_url, config.upstream_timeout())
        .context("Failed to configure metrics source")?;
    let store = ElasticsearchClient::new(&config.elastic_config())
        .context("Failed to configure Elasticsearch client")?;
    let sink = DeliverySink::new(Arc::new(store), config.index_prefix.clone());

    let poll_loop = PollLoopBuilder::new()
        .runtime(Arc::new(runtime))
        .metrics_source(Arc::new(metrics_source))
        .sink(sink)
        .hostname(hostname)
        .health(health_registry.clone())
        .config(config.poll_config())
        .build()?;

    // Start health and metrics server
    let app_state = Arc::new(api::AppState::new(health_registry, metrics));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let signal_logger = logger.clone();
    tokio::spawn(async move {
        let reason = shutdown_signal().await;
        signal_logger.log_shutdown(reason);
        let _ = shutdown_tx.send(());
    });

    logger.log_startup(COLLECTOR_VERSION);
    let outcome = poll_loop.run(shutdown_rx).await;
    api_handle.abort();

    if let Err(e) = &outcome {
        error!(error = %e, kind = e.kind(), "Poll loop gave up");
        logger.log_shutdown("too many consecutive failures");
    }

    outcome.context("Collector stopped after repeated failures")
}

/// Wait for SIGINT or SIGTERM and name the one received
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT received",
        _ = terminate => "SIGTERM received",
    }
}
