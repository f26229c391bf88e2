//! Collector configuration

use anyhow::{Context, Result};
use collector_lib::{
    runtime::DEFAULT_NAMESPACE, sink::DEFAULT_INDEX_PREFIX, ContainerdConfig, ElasticConfig,
    FlushPolicy, PollConfig,
};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Host identifier used when the hostname file cannot be read
pub const UNKNOWN_HOST: &str = "unknown";

/// Collector configuration, read from the process environment
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    /// Metrics exposition endpoint
    pub metrics_url: String,

    /// Poll interval in seconds
    #[serde(default = "default_metric_interval")]
    pub metric_interval: u64,

    #[serde(default = "default_containerd_socket")]
    pub containerd_socket: String,

    #[serde(default = "default_containerd_namespace")]
    pub containerd_namespace: String,

    /// Elasticsearch base URL
    pub elastic_url: String,

    #[serde(default)]
    pub elastic_user: Option<String>,

    #[serde(default)]
    pub elastic_pass: Option<String>,

    /// Accept any server certificate from the store
    #[serde(default)]
    pub elastic_insecure_tls: bool,

    #[serde(default = "default_index_prefix")]
    pub index_prefix: String,

    /// File holding the node name, mounted from the host
    #[serde(default = "default_hostname_file")]
    pub hostname_file: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Bound on each upstream call in seconds
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout: u64,

    #[serde(default = "default_flush_max_cycles")]
    pub flush_max_cycles: u32,

    #[serde(default = "default_flush_max_documents")]
    pub flush_max_documents: usize,

    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

fn default_metric_interval() -> u64 {
    10
}

fn default_containerd_socket() -> String {
    "/run/containerd/containerd.sock".to_string()
}

fn default_containerd_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_index_prefix() -> String {
    DEFAULT_INDEX_PREFIX.to_string()
}

fn default_hostname_file() -> String {
    "/etc/k8s-hostname".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_upstream_timeout() -> u64 {
    10
}

fn default_flush_max_cycles() -> u32 {
    10
}

fn default_flush_max_documents() -> usize {
    2000
}

fn default_max_consecutive_failures() -> u32 {
    5
}

impl CollectorConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        Self::from_source(config::Environment::default())
    }

    /// Load configuration from an explicit variable map instead of the process
    /// environment
    #[cfg(test)]
    pub fn from_vars(vars: &[(&str, &str)]) -> Result<Self> {
        let map: std::collections::HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Self::from_source(config::Environment::default().source(Some(map)))
    }

    fn from_source(source: config::Environment) -> Result<Self> {
        let config: Self = config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()
            .context("METRICS_URL and ELASTIC_URL must be set")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.metric_interval == 0 {
            anyhow::bail!("METRIC_INTERVAL must be at least 1 second");
        }
        if self.upstream_timeout == 0 {
            anyhow::bail!("UPSTREAM_TIMEOUT must be at least 1 second");
        }
        if self.max_consecutive_failures == 0 {
            anyhow::bail!("MAX_CONSECUTIVE_FAILURES must be at least 1");
        }
        Ok(())
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout)
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(self.metric_interval),
            upstream_timeout: self.upstream_timeout(),
            flush_policy: FlushPolicy {
                max_cycles: self.flush_max_cycles,
                max_documents: self.flush_max_documents,
            },
            max_consecutive_failures: self.max_consecutive_failures,
            ..Default::default()
        }
    }

    pub fn containerd_config(&self) -> ContainerdConfig {
        ContainerdConfig {
            socket_path: self.containerd_socket.clone().into(),
            namespace: self.containerd_namespace.clone(),
            connect_timeout: self.upstream_timeout(),
        }
    }

    pub fn elastic_config(&self) -> ElasticConfig {
        ElasticConfig {
            url: self.elastic_url.clone(),
            username: non_empty(&self.elastic_user),
            password: non_empty(&self.elastic_pass),
            insecure_tls: self.elastic_insecure_tls,
            ..Default::default()
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

/// Read the host identifier once; falls back to [`UNKNOWN_HOST`]
pub fn read_hostname(path: impl AsRef<Path>) -> String {
    match std::fs::read_to_string(path.as_ref()) {
        Ok(contents) if !contents.trim().is_empty() => contents.trim().to_string(),
        Ok(_) => UNKNOWN_HOST.to_string(),
        Err(e) => {
            tracing::warn!(
                path = %path.as_ref().display(),
                error = %e,
                "Could not read hostname file"
            );
            UNKNOWN_HOST.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const REQUIRED: [(&str, &str); 2] = [
        ("METRICS_URL", "http://localhost:1338/v1/metrics"),
        ("ELASTIC_URL", "https://elastic:9200"),
    ];

    #[test]
    fn test_defaults_with_required_vars() {
        let config = CollectorConfig::from_vars(&REQUIRED).unwrap();

        assert_eq!(config.metric_interval, 10);
        assert_eq!(config.containerd_namespace, "k8s.io");
        assert_eq!(config.containerd_socket, "/run/containerd/containerd.sock");
        assert_eq!(config.index_prefix, "docker");
        assert_eq!(config.hostname_file, "/etc/k8s-hostname");
        assert_eq!(config.api_port, 8080);
        assert!(!config.elastic_insecure_tls);

        let poll = config.poll_config();
        assert_eq!(poll.flush_policy, FlushPolicy::default());
        assert_eq!(poll.max_consecutive_failures, 5);
    }

    #[test]
    fn test_missing_store_url_fails() {
        let result = CollectorConfig::from_vars(&[("METRICS_URL", "http://localhost/metrics")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_overrides_are_parsed() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("METRIC_INTERVAL", "30"),
            ("ELASTIC_USER", "elastic"),
            ("ELASTIC_PASS", "changeme"),
            ("ELASTIC_INSECURE_TLS", "true"),
            ("INDEX_PREFIX", "containerd"),
            ("FLUSH_MAX_CYCLES", "3"),
            ("FLUSH_MAX_DOCUMENTS", "50"),
        ]);

        let config = CollectorConfig::from_vars(&vars).unwrap();
        let poll = config.poll_config();
        let elastic = config.elastic_config();

        assert_eq!(poll.interval, Duration::from_secs(30));
        assert_eq!(poll.flush_policy.max_cycles, 3);
        assert_eq!(poll.flush_policy.max_documents, 50);
        assert_eq!(elastic.username.as_deref(), Some("elastic"));
        assert_eq!(elastic.password.as_deref(), Some("changeme"));
        assert!(elastic.insecure_tls);
        assert_eq!(config.index_prefix, "containerd");
    }

    #[test]
    fn test_empty_credentials_are_dropped() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("ELASTIC_USER", ""));

        let config = CollectorConfig::from_vars(&vars).unwrap();
        assert!(config.elastic_config().username.is_none());
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("METRIC_INTERVAL", "0"));

        assert!(CollectorConfig::from_vars(&vars).is_err());
    }

    #[test]
    fn test_read_hostname_trims_contents() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  worker-3  ").unwrap();

        assert_eq!(read_hostname(file.path()), "worker-3");
    }

    #[test]
    fn test_read_hostname_falls_back_to_unknown() {
        assert_eq!(read_hostname("/nonexistent/k8s-hostname"), UNKNOWN_HOST);

        let empty = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(read_hostname(empty.path()), UNKNOWN_HOST);
    }
}
