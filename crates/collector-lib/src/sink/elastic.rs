//! Elasticsearch `_bulk` transport

use super::bulk::{BulkResponse, BulkTransport};
use crate::error::{CollectorError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Configuration for the Elasticsearch client
#[derive(Debug, Clone)]
pub struct ElasticConfig {
    /// Base URL of the cluster (e.g. "https://elastic:9200")
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Skip server certificate verification
    pub insecure_tls: bool,
    /// Ask the store to refresh the index after the bulk request
    pub refresh: bool,
    /// Request timeout
    pub request_timeout: Duration,
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            username: None,
            password: None,
            insecure_tls: false,
            refresh: true,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP client for the store's bulk API
pub struct ElasticsearchClient {
    client: Client,
    bulk_url: Url,
    username: Option<String>,
    password: Option<String>,
}

impl ElasticsearchClient {
    pub fn new(config: &ElasticConfig) -> Result<Self> {
        let bulk_url = bulk_url(&config.url, config.refresh)?;

        let client = Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.insecure_tls)
            .build()
            .map_err(|e| CollectorError::transport("store", e))?;

        if config.insecure_tls {
            tracing::warn!("Store certificate verification is disabled");
        }

        Ok(Self {
            client,
            bulk_url,
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }
}

/// `<base>/_bulk`, keeping any path prefix on the base URL
fn bulk_url(base: &str, refresh: bool) -> Result<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| CollectorError::Config(format!("invalid store url {base}: {e}")))?;

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    let mut url = url
        .join("_bulk")
        .map_err(|e| CollectorError::Config(format!("invalid store url {base}: {e}")))?;

    if refresh {
        url.set_query(Some("refresh=true"));
    }
    Ok(url)
}

#[async_trait]
impl BulkTransport for ElasticsearchClient {
    async fn bulk(&self, body: String) -> Result<BulkResponse> {
        let mut request = self
            .client
            .post(self.bulk_url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body);

        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_ref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| CollectorError::transport("store", e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CollectorError::transport(
                "store",
                anyhow::anyhow!("bulk request returned {status}: {detail}"),
            ));
        }

        response
            .json::<BulkResponse>()
            .await
            .map_err(|e| CollectorError::transport("store", e))
    }
}
