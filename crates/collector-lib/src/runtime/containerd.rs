//! containerd runtime client over a unix socket

use super::proto::{Container, ContainersClient, ListContainersRequest, ListTasksRequest, TasksClient};
use super::ContainerRuntime;
use crate::error::{CollectorError, Result};
use crate::models::ContainerRecord;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;
use tracing::{debug, info};

/// gRPC metadata key that scopes every containerd call to a namespace
pub const NAMESPACE_HEADER: &str = "containerd-namespace";

/// Namespace used by the CRI plugin for Kubernetes workloads
pub const DEFAULT_NAMESPACE: &str = "k8s.io";

/// Configuration for the containerd client
#[derive(Debug, Clone)]
pub struct ContainerdConfig {
    /// Path to the containerd socket
    pub socket_path: PathBuf,
    /// containerd namespace to list from
    pub namespace: String,
    /// Connection timeout
    pub connect_timeout: Duration,
}

impl Default for ContainerdConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/run/containerd/containerd.sock"),
            namespace: DEFAULT_NAMESPACE.to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Reads container and task listings from containerd
#[derive(Clone)]
pub struct ContainerdRuntime {
    channel: Channel,
    namespace: MetadataValue<tonic::metadata::Ascii>,
}

impl ContainerdRuntime {
    /// Connect to the containerd socket.
    ///
    /// The channel is established lazily so a runtime that is still starting
    /// up surfaces as a per-cycle transport failure rather than a startup error.
    pub fn connect(config: &ContainerdConfig) -> Result<Self> {
        let namespace = MetadataValue::try_from(config.namespace.as_str()).map_err(|e| {
            CollectorError::Config(format!("invalid containerd namespace {}: {e}", config.namespace))
        })?;

        let socket_path = config.socket_path.clone();
        // The URI is ignored by the connector, tonic only needs a well-formed one
        let channel = Endpoint::from_static("http://[::]:50051")
            .connect_timeout(config.connect_timeout)
            .connect_with_connector_lazy(service_fn(move |_: Uri| {
                let path = socket_path.clone();
                async move { tokio::net::UnixStream::connect(path).await }
            }));

        info!(
            socket = %config.socket_path.display(),
            namespace = %config.namespace,
            "Configured containerd client"
        );

        Ok(Self { channel, namespace })
    }

    fn scoped<T>(&self, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        request
            .metadata_mut()
            .insert(NAMESPACE_HEADER, self.namespace.clone());
        request
    }
}

#[async_trait]
impl ContainerRuntime for ContainerdRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerRecord>> {
        let mut client = ContainersClient::new(self.channel.clone());
        let response = client
            .list(self.scoped(ListContainersRequest::default()))
            .await?;

        let containers: Vec<ContainerRecord> = response
            .into_inner()
            .containers
            .into_iter()
            .map(ContainerRecord::from)
            .collect();

        debug!(count = containers.len(), "Listed containers");
        Ok(containers)
    }

    async fn list_tasks(&self) -> Result<Vec<String>> {
        let mut client = TasksClient::new(self.channel.clone());
        let response = client.list(self.scoped(ListTasksRequest::default())).await?;

        let ids: Vec<String> = response
            .into_inner()
            .tasks
            .into_iter()
            .map(|task| task.id)
            .collect();

        debug!(count = ids.len(), "Listed tasks");
        Ok(ids)
    }
}

impl From<Container> for ContainerRecord {
    fn from(container: Container) -> Self {
        Self {
            id: container.id,
            image: container.image,
            labels: container.labels,
            spec: container.spec.map(|any| any.value),
            extensions: container
                .extensions
                .into_iter()
                .map(|(key, any)| (key, any.value))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CONTAINER_METADATA_EXTENSION;

    #[test]
    fn test_containerd_config_default() {
        let config = ContainerdConfig::default();
        assert_eq!(config.namespace, "k8s.io");
        assert_eq!(
            config.socket_path,
            PathBuf::from("/run/containerd/containerd.sock")
        );
    }

    #[test]
    fn test_container_conversion_keeps_raw_payloads() {
        let mut container = Container {
            id: "c1".to_string(),
            image: "nginx:1.25".to_string(),
            spec: Some(prost_types::Any {
                type_url: "types.containerd.io/opencontainers/runtime-spec/1/Spec".to_string(),
                value: br#"{"annotations":{}}"#.to_vec(),
            }),
            ..Default::default()
        };
        container
            .labels
            .insert("io.kubernetes.pod.name".to_string(), "web-0".to_string());
        container.extensions.insert(
            CONTAINER_METADATA_EXTENSION.to_string(),
            prost_types::Any {
                type_url: String::new(),
                value: br#"{"Metadata":{"Name":"web"}}"#.to_vec(),
            },
        );

        let record = ContainerRecord::from(container);

        assert_eq!(record.id, "c1");
        assert_eq!(record.image, "nginx:1.25");
        assert_eq!(record.spec.as_deref(), Some(&br#"{"annotations":{}}"#[..]));
        assert_eq!(record.labels["io.kubernetes.pod.name"], "web-0");
        assert_eq!(
            record.extensions[CONTAINER_METADATA_EXTENSION],
            br#"{"Metadata":{"Name":"web"}}"#.to_vec()
        );
    }

    #[tokio::test]
    async fn test_connect_is_lazy_and_scopes_requests() {
        let runtime = ContainerdRuntime::connect(&ContainerdConfig {
            socket_path: PathBuf::from("/nonexistent/containerd.sock"),
            ..Default::default()
        })
        .unwrap();

        let request = runtime.scoped(ListTasksRequest::default());
        assert_eq!(
            request
                .metadata()
                .get(NAMESPACE_HEADER)
                .unwrap()
                .to_str()
                .unwrap(),
            "k8s.io"
        );
    }

    #[tokio::test]
    async fn test_unreachable_socket_is_transport_failure() {
        let runtime = ContainerdRuntime::connect(&ContainerdConfig {
            socket_path: PathBuf::from("/nonexistent/containerd.sock"),
            connect_timeout: Duration::from_millis(200),
            ..Default::default()
        })
        .unwrap();

        let err = runtime.list_tasks().await.unwrap_err();
        assert_eq!(err.kind(), "transport");
    }
}
