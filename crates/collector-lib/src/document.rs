//! Joins a runtime container record with the metric index
//!
//! One document is built per container per cycle. The runtime record provides
//! identity and Kubernetes dimensions, the metric index provides the numbers.
//! The two come from independent reads, so a container may have no metrics
//! (all values resolve to zero) and metrics may exist for containers the
//! runtime no longer lists (they are simply never looked up).

use crate::error::{CollectorError, Result};
use crate::exposition::MetricIndex;
use crate::models::{
    ContainerRecord, CpuStats, DocumentTags, IoStats, LifecycleState, MemoryStats,
    ObservabilityDocument, ProcessStats, TaskIdSet, CONTAINER_METADATA_EXTENSION,
    MEASUREMENT_NAME, SANDBOX_METADATA_EXTENSION,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;

/// Metric names read for each document
pub mod metric_names {
    pub const CPU_THROTTLED: &str = "container_cpu_throttled_usec_microseconds";
    pub const CPU_SYSTEM: &str = "container_cpu_system_usec_microseconds";
    pub const CPU_USER: &str = "container_cpu_user_usec_microseconds";
    pub const CPU_USAGE: &str = "container_cpu_usage_usec_microseconds";

    pub const MEM_ACTIVE_ANON: &str = "container_memory_active_anon_bytes";
    pub const MEM_INACTIVE_ANON: &str = "container_memory_inactive_anon_bytes";
    pub const MEM_ACTIVE_FILE: &str = "container_memory_active_file_bytes";
    pub const MEM_INACTIVE_FILE: &str = "container_memory_inactive_file_bytes";
    pub const MEM_LIMIT: &str = "container_memory_usage_limit_bytes";
    pub const MEM_USAGE: &str = "container_memory_usage_bytes";
    pub const MEM_PGFAULT: &str = "container_memory_pgfault_bytes";
    pub const MEM_PGMAJFAULT: &str = "container_memory_pgmajfault_bytes";
    pub const MEM_UNEVICTABLE: &str = "container_memory_unevictable_bytes";

    pub const IO_READ: &str = "container_io_rios_total";
    pub const IO_READ_BYTES: &str = "container_io_rbytes_bytes";
    pub const IO_WRITE: &str = "container_io_wios_total";
    pub const IO_WRITE_BYTES: &str = "container_io_wbytes_bytes";

    pub const PIDS_CURRENT: &str = "container_pids_current";
    pub const PIDS_LIMIT: &str = "container_pids_limit";
}

/// Source keys for the Kubernetes tag dimensions
pub mod kubernetes_keys {
    pub const CONTAINER_NAME_ANNOTATION: &str = "io.kubernetes.cri.container-name";
    pub const CONTAINER_TYPE_ANNOTATION: &str = "io.kubernetes.cri.container-type";
    pub const POD_NAME_LABEL: &str = "io.kubernetes.pod.name";
    pub const POD_NAMESPACE_LABEL: &str = "io.kubernetes.pod.namespace";
}

/// The metrics endpoint reports CPU times in microseconds; documents carry nanoseconds
const USEC_TO_NSEC: f64 = 1000.0;

/// The part of the OCI runtime spec the collector reads
#[derive(Debug, Deserialize)]
struct OciSpec {
    #[serde(default)]
    annotations: HashMap<String, String>,
}

/// CRI metadata stored in the container/sandbox extension
#[derive(Debug, Deserialize)]
struct CriMetadata {
    #[serde(rename = "Metadata")]
    metadata: CriMetadataInner,
}

#[derive(Debug, Deserialize)]
struct CriMetadataInner {
    #[serde(rename = "Name")]
    name: String,
}

/// Build the observability document for one container.
///
/// Fails with [`CollectorError::MalformedRuntimeRecord`] when the spec or the
/// metadata extension is missing or cannot be decoded. Callers are expected
/// to skip that container and carry on with the rest of the cycle.
pub fn build_document(
    container: &ContainerRecord,
    index: &MetricIndex,
    running: &TaskIdSet,
    hostname: &str,
    timestamp: DateTime<Utc>,
) -> Result<ObservabilityDocument> {
    let annotations = decode_annotations(container)?;
    let container_name = decode_container_name(container)?;

    use kubernetes_keys::*;
    use metric_names::*;

    let id = container.id.as_str();
    let metric = |name: &str| index.value(name, id);

    let usage = metric(MEM_USAGE);
    let limit = metric(MEM_LIMIT);

    Ok(ObservabilityDocument {
        timestamp,
        cpu: CpuStats {
            throttled_time: metric(CPU_THROTTLED) * USEC_TO_NSEC,
            usage_system: metric(CPU_SYSTEM) * USEC_TO_NSEC,
            usage_user: metric(CPU_USER) * USEC_TO_NSEC,
            usage_total: metric(CPU_USAGE) * USEC_TO_NSEC,
        },
        mem: MemoryStats {
            active_anon: metric(MEM_ACTIVE_ANON),
            inactive_anon: metric(MEM_INACTIVE_ANON),
            active_file: metric(MEM_ACTIVE_FILE),
            inactive_file: metric(MEM_INACTIVE_FILE),
            limit,
            usage,
            // Unguarded: a zero limit (unlimited cgroup) yields inf or NaN, which is kept as is
            usage_pct: usage / limit,
            pgfault: metric(MEM_PGFAULT),
            pgmajfault: metric(MEM_PGMAJFAULT),
            unevictable: metric(MEM_UNEVICTABLE),
        },
        io: IoStats {
            read: metric(IO_READ),
            read_bytes: metric(IO_READ_BYTES),
            write: metric(IO_WRITE),
            write_bytes: metric(IO_WRITE_BYTES),
        },
        process: ProcessStats {
            current: metric(PIDS_CURRENT),
            limit: metric(PIDS_LIMIT),
        },
        measurement_name: MEASUREMENT_NAME,
        tag: DocumentTags {
            host: hostname.to_string(),
            container_id: container.id.clone(),
            container_image: container.image.clone(),
            container_name,
            state: LifecycleState::from_membership(id, running),
            kubernetes_container_name: annotations.get(CONTAINER_NAME_ANNOTATION).cloned(),
            kubernetes_container_type: annotations.get(CONTAINER_TYPE_ANNOTATION).cloned(),
            kubernetes_pod_name: container.labels.get(POD_NAME_LABEL).cloned(),
            kubernetes_pod_namespace: container.labels.get(POD_NAMESPACE_LABEL).cloned(),
        },
    })
}

fn decode_annotations(container: &ContainerRecord) -> Result<HashMap<String, String>> {
    let raw = container
        .spec
        .as_deref()
        .ok_or_else(|| CollectorError::malformed(&container.id, "missing spec"))?;

    let spec: OciSpec = serde_json::from_slice(raw)
        .map_err(|e| CollectorError::malformed(&container.id, format!("undecodable spec: {e}")))?;

    Ok(spec.annotations)
}

fn decode_container_name(container: &ContainerRecord) -> Result<String> {
    let raw = container
        .extensions
        .get(CONTAINER_METADATA_EXTENSION)
        .or_else(|| container.extensions.get(SANDBOX_METADATA_EXTENSION))
        .ok_or_else(|| CollectorError::malformed(&container.id, "missing metadata extension"))?;

    let metadata: CriMetadata = serde_json::from_slice(raw).map_err(|e| {
        CollectorError::malformed(&container.id, format!("undecodable metadata extension: {e}"))
    })?;

    Ok(metadata.metadata.name)
}
