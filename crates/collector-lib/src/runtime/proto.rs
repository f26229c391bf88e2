//! containerd API messages and clients
//!
//! Hand-maintained subset of `containerd.services.containers.v1` and
//! `containerd.services.tasks.v1`: only the two List RPCs the collector calls.
//! Field tags follow the upstream `.proto` definitions.

pub mod containers {
    pub mod v1 {
        use prost::Message;
        use std::collections::HashMap;

        #[derive(Clone, PartialEq, Message)]
        pub struct Container {
            #[prost(string, tag = "1")]
            pub id: String,
            #[prost(map = "string, string", tag = "2")]
            pub labels: HashMap<String, String>,
            #[prost(string, tag = "3")]
            pub image: String,
            #[prost(message, optional, tag = "4")]
            pub runtime: Option<Runtime>,
            #[prost(message, optional, tag = "5")]
            pub spec: Option<prost_types::Any>,
            #[prost(string, tag = "6")]
            pub snapshotter: String,
            #[prost(string, tag = "7")]
            pub snapshot_key: String,
            #[prost(message, optional, tag = "8")]
            pub created_at: Option<prost_types::Timestamp>,
            #[prost(message, optional, tag = "9")]
            pub updated_at: Option<prost_types::Timestamp>,
            #[prost(map = "string, message", tag = "10")]
            pub extensions: HashMap<String, prost_types::Any>,
            #[prost(string, tag = "11")]
            pub sandbox: String,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct Runtime {
            #[prost(string, tag = "1")]
            pub name: String,
            #[prost(message, optional, tag = "2")]
            pub options: Option<prost_types::Any>,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct ListContainersRequest {
            #[prost(string, repeated, tag = "1")]
            pub filters: Vec<String>,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct ListContainersResponse {
            #[prost(message, repeated, tag = "1")]
            pub containers: Vec<Container>,
        }

        pub mod containers_client {
            use super::*;
            use tonic::codegen::*;

            #[derive(Debug, Clone)]
            pub struct ContainersClient<T> {
                inner: tonic::client::Grpc<T>,
            }

            impl ContainersClient<tonic::transport::Channel> {
                pub fn new(channel: tonic::transport::Channel) -> Self {
                    let inner = tonic::client::Grpc::new(channel);
                    Self { inner }
                }
            }

            impl<T> ContainersClient<T>
            where
                T: tonic::client::GrpcService<tonic::body::BoxBody>,
                T::Error: Into<StdError>,
                T::ResponseBody: Body<Data = Bytes> + Send + 'static,
                <T::ResponseBody as Body>::Error: Into<StdError> + Send,
            {
                pub async fn list(
                    &mut self,
                    request: impl tonic::IntoRequest<ListContainersRequest>,
                ) -> Result<tonic::Response<ListContainersResponse>, tonic::Status> {
                    self.inner.ready().await.map_err(|e| {
                        tonic::Status::new(
                            tonic::Code::Unknown,
                            format!("Service was not ready: {}", e.into()),
                        )
                    })?;
                    let codec = tonic::codec::ProstCodec::default();
                    let path = http::uri::PathAndQuery::from_static(
                        "/containerd.services.containers.v1.Containers/List",
                    );
                    self.inner.unary(request.into_request(), path, codec).await
                }
            }
        }
    }
}

pub mod tasks {
    pub mod v1 {
        use prost::Message;

        /// `containerd.v1.types.Process`
        #[derive(Clone, PartialEq, Message)]
        pub struct Process {
            #[prost(string, tag = "1")]
            pub container_id: String,
            #[prost(string, tag = "2")]
            pub id: String,
            #[prost(uint32, tag = "3")]
            pub pid: u32,
            #[prost(int32, tag = "4")]
            pub status: i32,
            #[prost(string, tag = "5")]
            pub stdin: String,
            #[prost(string, tag = "6")]
            pub stdout: String,
            #[prost(string, tag = "7")]
            pub stderr: String,
            #[prost(bool, tag = "8")]
            pub terminal: bool,
            #[prost(uint32, tag = "9")]
            pub exit_status: u32,
            #[prost(message, optional, tag = "10")]
            pub exited_at: Option<prost_types::Timestamp>,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct ListTasksRequest {
            #[prost(string, tag = "1")]
            pub filter: String,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct ListTasksResponse {
            #[prost(message, repeated, tag = "1")]
            pub tasks: Vec<Process>,
        }

        pub mod tasks_client {
            use super::*;
            use tonic::codegen::*;

            #[derive(Debug, Clone)]
            pub struct TasksClient<T> {
                inner: tonic::client::Grpc<T>,
            }

            impl TasksClient<tonic::transport::Channel> {
                pub fn new(channel: tonic::transport::Channel) -> Self {
                    let inner = tonic::client::Grpc::new(channel);
                    Self { inner }
                }
            }

            impl<T> TasksClient<T>
            where
                T: tonic::client::GrpcService<tonic::body::BoxBody>,
                T::Error: Into<StdError>,
                T::ResponseBody: Body<Data = Bytes> + Send + 'static,
                <T::ResponseBody as Body>::Error: Into<StdError> + Send,
            {
                pub async fn list(
                    &mut self,
                    request: impl tonic::IntoRequest<ListTasksRequest>,
                ) -> Result<tonic::Response<ListTasksResponse>, tonic::Status> {
                    self.inner.ready().await.map_err(|e| {
                        tonic::Status::new(
                            tonic::Code::Unknown,
                            format!("Service was not ready: {}", e.into()),
                        )
                    })?;
                    let codec = tonic::codec::ProstCodec::default();
                    let path = http::uri::PathAndQuery::from_static(
                        "/containerd.services.tasks.v1.Tasks/List",
                    );
                    self.inner.unary(request.into_request(), path, codec).await
                }
            }
        }
    }
}

pub use containers::v1::containers_client::ContainersClient;
pub use containers::v1::{Container, ListContainersRequest, ListContainersResponse};
pub use tasks::v1::tasks_client::TasksClient;
pub use tasks::v1::{ListTasksRequest, ListTasksResponse, Process};
