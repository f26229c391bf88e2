//! Batching and delivery to the search store
//!
//! This module provides:
//! - the cross-cycle batch with its dual flush thresholds
//! - the delivery sink that turns a batch into one bulk request
//! - the Elasticsearch HTTP transport behind the sink

mod batch;
mod bulk;
mod elastic;

pub use batch::{Batch, FlushPolicy, DEFAULT_MAX_CYCLES, DEFAULT_MAX_DOCUMENTS};
pub use bulk::{
    BulkItemResult, BulkResponse, BulkTransport, DeliveryReport, DeliverySink, FailedOperation,
    IndexDirective, IndexTarget, DEFAULT_INDEX_PREFIX,
};
pub use elastic::{ElasticConfig, ElasticsearchClient};
