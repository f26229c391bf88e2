//! Container runtime snapshots
//!
//! This module provides the runtime side of the join: the current container
//! listing and the set of container ids that hold a task. The containerd
//! implementation talks gRPC over the runtime's unix socket.

mod containerd;
pub mod proto;

pub use containerd::{ContainerdConfig, ContainerdRuntime, DEFAULT_NAMESPACE, NAMESPACE_HEADER};

use crate::error::Result;
use crate::models::{ContainerRecord, RuntimeSnapshot};
use async_trait::async_trait;

/// Read-only view of a container runtime
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List all containers in the configured namespace
    async fn list_containers(&self) -> Result<Vec<ContainerRecord>>;

    /// List the ids of containers that currently have a task
    async fn list_tasks(&self) -> Result<Vec<String>>;
}

/// Take one snapshot of the runtime.
///
/// The two listings have no ordering dependency and are issued concurrently;
/// the first failure is returned and no retry is attempted here.
pub async fn snapshot(runtime: &dyn ContainerRuntime) -> Result<RuntimeSnapshot> {
    let (containers, tasks) = tokio::try_join!(runtime.list_containers(), runtime.list_tasks())?;

    Ok(RuntimeSnapshot {
        containers,
        running: tasks.into_iter().collect(),
    })
}
