//! Core data models for the collector

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Literal stored in every document's `measurement_name` field
pub const MEASUREMENT_NAME: &str = "containerd";

/// Extension key carrying CRI metadata for application containers
pub const CONTAINER_METADATA_EXTENSION: &str = "io.cri-containerd.container.metadata";

/// Extension key carrying CRI metadata for pod sandboxes
pub const SANDBOX_METADATA_EXTENSION: &str = "io.cri-containerd.sandbox.metadata";

/// One entry from the runtime's container listing.
///
/// `spec` and the `extensions` values are the raw payloads of the runtime's
/// `Any` messages; for CRI-managed containers they hold JSON.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerRecord {
    pub id: String,
    pub image: String,
    pub labels: HashMap<String, String>,
    pub spec: Option<Vec<u8>>,
    pub extensions: HashMap<String, Vec<u8>>,
}

/// Container ids that currently hold a task
pub type TaskIdSet = HashSet<String>;

/// Result of one runtime snapshot
#[derive(Debug, Clone, Default)]
pub struct RuntimeSnapshot {
    pub containers: Vec<ContainerRecord>,
    pub running: TaskIdSet,
}

/// Binary lifecycle state derived from task membership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LifecycleState {
    Running,
    Exited,
}

impl LifecycleState {
    pub fn from_membership(container_id: &str, running: &TaskIdSet) -> Self {
        if running.contains(container_id) {
            LifecycleState::Running
        } else {
            LifecycleState::Exited
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Running => "Running",
            LifecycleState::Exited => "Exited",
        }
    }
}

/// CPU times in nanoseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CpuStats {
    pub throttled_time: f64,
    pub usage_system: f64,
    pub usage_user: f64,
    pub usage_total: f64,
}

/// Memory counters in bytes; `usage_pct` is `usage / limit` and may be non-finite
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryStats {
    pub active_anon: f64,
    pub inactive_anon: f64,
    pub active_file: f64,
    pub inactive_file: f64,
    pub limit: f64,
    pub usage: f64,
    pub usage_pct: f64,
    pub pgfault: f64,
    pub pgmajfault: f64,
    pub unevictable: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IoStats {
    pub read: f64,
    pub read_bytes: f64,
    pub write: f64,
    pub write_bytes: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessStats {
    pub current: f64,
    pub limit: f64,
}

/// String dimensions attached to a document.
///
/// Kubernetes values are copied verbatim from the container's annotations and
/// labels; a missing key stays `None` and is left out of the serialized tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentTags {
    pub host: String,
    pub container_id: String,
    pub container_image: String,
    pub container_name: String,
    pub state: LifecycleState,
    #[serde(
        rename = "io.kubernetes.container.name",
        skip_serializing_if = "Option::is_none"
    )]
    pub kubernetes_container_name: Option<String>,
    #[serde(
        rename = "io.kubernetes.container.type",
        skip_serializing_if = "Option::is_none"
    )]
    pub kubernetes_container_type: Option<String>,
    #[serde(
        rename = "io.kubernetes.pod.name",
        skip_serializing_if = "Option::is_none"
    )]
    pub kubernetes_pod_name: Option<String>,
    #[serde(
        rename = "io.kubernetes.pod.namespace",
        skip_serializing_if = "Option::is_none"
    )]
    pub kubernetes_pod_namespace: Option<String>,
}

/// The unit shipped to the store, one per container per cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservabilityDocument {
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
    pub cpu: CpuStats,
    pub mem: MemoryStats,
    pub io: IoStats,
    #[serde(rename = "proc")]
    pub process: ProcessStats,
    pub measurement_name: &'static str,
    pub tag: DocumentTags,
}

impl ObservabilityDocument {
    pub fn container_id(&self) -> &str {
        &self.tag.container_id
    }
}
