//! HTTP source for the metrics exposition payload

use crate::error::{CollectorError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Anything that can produce the raw exposition text for one cycle
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn fetch(&self) -> Result<String>;
}

/// Plain `GET` against a metrics endpoint, no query parameters
pub struct HttpMetricsSource {
    client: Client,
    url: Url,
}

impl HttpMetricsSource {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| CollectorError::Config(format!("invalid metrics url {url}: {e}")))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CollectorError::transport("metrics", e))?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl MetricsSource for HttpMetricsSource {
    async fn fetch(&self) -> Result<String> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| CollectorError::transport("metrics", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollectorError::transport(
                "metrics",
                anyhow::anyhow!("endpoint returned {status}"),
            ));
        }

        response
            .text()
            .await
            .map_err(|e| CollectorError::transport("metrics", e))
    }
}
