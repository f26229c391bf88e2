//! Telemetry collector for containerd nodes
//!
//! This crate provides the core functionality for:
//! - Parsing the container metrics exposition endpoint
//! - Snapshotting containers and tasks from containerd
//! - Building one observability document per container per cycle
//! - Batching documents and delivering them to Elasticsearch
//! - Health checks and observability

pub mod collector;
pub mod document;
pub mod error;
pub mod exposition;
pub mod health;
pub mod models;
pub mod observability;
pub mod runtime;
pub mod sink;

pub use collector::{PollConfig, PollLoop, PollLoopBuilder};
pub use document::build_document;
pub use error::{CollectorError, Result};
pub use exposition::{HttpMetricsSource, MetricIndex, MetricsSource};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{CollectorMetrics, StructuredLogger};
pub use runtime::{ContainerRuntime, ContainerdConfig, ContainerdRuntime};
pub use sink::{
    Batch, DeliveryReport, DeliverySink, ElasticConfig, ElasticsearchClient, FlushPolicy,
};
