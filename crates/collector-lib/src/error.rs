//! Error taxonomy for the collection pipeline

use std::time::Duration;

/// Errors raised while collecting, building or delivering documents.
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    /// An upstream call (runtime, metrics endpoint) failed at the network or protocol layer.
    #[error("{what} request failed: {source}")]
    Transport {
        what: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// An upstream call did not complete within its bound.
    #[error("{what} request timed out after {after:?}")]
    Timeout { what: &'static str, after: Duration },

    /// A container record whose spec or metadata extension cannot be decoded.
    #[error("malformed runtime record for container {container_id}: {reason}")]
    MalformedRuntimeRecord {
        container_id: String,
        reason: String,
    },

    /// The bulk request was rejected outright; the batch was already cleared.
    #[error("delivery of {documents} documents failed: {reason}")]
    DeliveryAttemptFailed { documents: usize, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CollectorError {
    pub fn transport(what: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::Transport {
            what,
            source: source.into(),
        }
    }

    pub fn malformed(container_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedRuntimeRecord {
            container_id: container_id.into(),
            reason: reason.into(),
        }
    }

    /// Short machine-friendly label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "transport",
            Self::Timeout { .. } => "timeout",
            Self::MalformedRuntimeRecord { .. } => "malformed_record",
            Self::DeliveryAttemptFailed { .. } => "delivery_attempt_failed",
            Self::Config(_) => "config",
        }
    }
}

impl From<tonic::Status> for CollectorError {
    fn from(status: tonic::Status) -> Self {
        Self::transport("containerd", status)
    }
}

pub type Result<T> = std::result::Result<T, CollectorError>;
