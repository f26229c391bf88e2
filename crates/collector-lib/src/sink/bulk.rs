//! Bulk delivery with positional failure accounting

use crate::error::{CollectorError, Result};
use crate::models::ObservabilityDocument;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Default index name prefix
pub const DEFAULT_INDEX_PREFIX: &str = "docker";

/// `{"index": {"_index": "<name>"}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexDirective {
    pub index: IndexTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexTarget {
    #[serde(rename = "_index")]
    pub name: String,
}

impl IndexDirective {
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: IndexTarget { name: index.into() },
        }
    }
}

/// Store response to a bulk request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkResponse {
    #[serde(default)]
    pub errors: bool,
    /// One entry per submitted directive, keyed by the operation name
    #[serde(default)]
    pub items: Vec<HashMap<String, BulkItemResult>>,
}

/// Outcome of a single bulk operation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkItemResult {
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl BulkItemResult {
    pub fn has_error(&self) -> bool {
        match &self.error {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::String(s)) => !s.is_empty(),
            Some(serde_json::Value::Object(map)) => !map.is_empty(),
            Some(_) => true,
        }
    }
}

/// A document the store refused, with everything needed to replay it
#[derive(Debug, Clone, Serialize)]
pub struct FailedOperation {
    pub status: u16,
    pub error: serde_json::Value,
    pub operation: IndexDirective,
    pub document: ObservabilityDocument,
}

/// Result of a delivered batch
#[derive(Debug, Default)]
pub struct DeliveryReport {
    /// Index the batch was written to
    pub index: String,
    /// Number of documents submitted, whether or not the store accepted them
    pub submitted: usize,
    /// Documents rejected individually by the store
    pub failures: Vec<FailedOperation>,
}

impl DeliveryReport {
    pub fn accepted(&self) -> usize {
        self.submitted - self.failures.len()
    }

    pub fn is_partial_failure(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Transport for an NDJSON bulk body
#[async_trait]
pub trait BulkTransport: Send + Sync {
    async fn bulk(&self, body: String) -> Result<BulkResponse>;
}

/// Submits batches to the store as a single bulk operation
#[derive(Clone)]
pub struct DeliverySink {
    transport: Arc<dyn BulkTransport>,
    index_prefix: String,
}

impl DeliverySink {
    pub fn new(transport: Arc<dyn BulkTransport>, index_prefix: impl Into<String>) -> Self {
        Self {
            transport,
            index_prefix: index_prefix.into(),
        }
    }

    /// Dated index name: `<prefix>-YYYY.MM.DD`
    pub fn index_name(&self, date: NaiveDate) -> String {
        format!("{}-{}", self.index_prefix, date.format("%Y.%m.%d"))
    }

    /// Deliver documents into the index for today's (UTC) date
    pub async fn deliver(&self, documents: Vec<ObservabilityDocument>) -> Result<DeliveryReport> {
        self.deliver_at(documents, Utc::now()).await
    }

    /// Deliver documents, naming the index from `now` rather than from the
    /// documents' own timestamps.
    ///
    /// Only a transport-level failure is an error. Documents the store rejects
    /// one by one are returned in the report; the rest stay accepted.
    pub async fn deliver_at(
        &self,
        documents: Vec<ObservabilityDocument>,
        now: DateTime<Utc>,
    ) -> Result<DeliveryReport> {
        let index = self.index_name(now.date_naive());
        let submitted = documents.len();

        if documents.is_empty() {
            return Ok(DeliveryReport {
                index,
                submitted,
                failures: Vec::new(),
            });
        }

        let directive = IndexDirective::new(index.clone());
        let body = encode_bulk_body(&directive, &documents).map_err(|e| {
            CollectorError::DeliveryAttemptFailed {
                documents: submitted,
                reason: format!("failed to encode bulk body: {e}"),
            }
        })?;

        let response = self.transport.bulk(body).await.map_err(|e| {
            CollectorError::DeliveryAttemptFailed {
                documents: submitted,
                reason: e.to_string(),
            }
        })?;

        let failures = if response.errors {
            collect_failures(&directive, documents, &response)
        } else {
            Vec::new()
        };

        debug!(index = %index, submitted, failed = failures.len(), "Bulk request complete");

        Ok(DeliveryReport {
            index,
            submitted,
            failures,
        })
    }
}

/// One directive line and one document line per document, in input order
fn encode_bulk_body(
    directive: &IndexDirective,
    documents: &[ObservabilityDocument],
) -> serde_json::Result<String> {
    let directive_line = serde_json::to_string(directive)?;
    let mut body = String::new();

    for document in documents {
        body.push_str(&directive_line);
        body.push('\n');
        body.push_str(&serde_json::to_string(document)?);
        body.push('\n');
    }

    Ok(body)
}

/// Walk the per-operation results positionally; result `i` belongs to document `i`
fn collect_failures(
    directive: &IndexDirective,
    documents: Vec<ObservabilityDocument>,
    response: &BulkResponse,
) -> Vec<FailedOperation> {
    if response.items.len() != documents.len() {
        warn!(
            submitted = documents.len(),
            results = response.items.len(),
            "Bulk response item count does not match submitted documents"
        );
    }

    documents
        .into_iter()
        .zip(response.items.iter())
        .filter_map(|(document, item)| {
            let result = item.values().next()?;
            if !result.has_error() {
                return None;
            }
            Some(FailedOperation {
                status: result.status,
                error: result.error.clone().unwrap_or_default(),
                operation: directive.clone(),
                document,
            })
        })
        .collect()
}
