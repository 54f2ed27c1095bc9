//! Document store backends
//!
//! `SearchBackend` abstracts the storage the adapter writes documents into
//! and searches on the read path:
//! - `ElasticsearchGateway` talks to an Elasticsearch (or AWS-hosted) cluster
//! - `MemoryBackend` keeps partitions in process for development and tests

mod elasticsearch;
mod memory;
mod partition;
mod signing;

pub use elasticsearch::{ElasticsearchConfig, ElasticsearchGateway};
pub use memory::MemoryBackend;
pub use partition::PartitionGuard;
pub use signing::{AwsCredentials, SigV4Signer};

use crate::model::Document;
use crate::query::BackendQuery;
use crate::Result;

use async_trait::async_trait;
use std::time::Duration;

/// Outcome of a partition existence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionStatus {
    /// Partition was already present; nothing was created
    Existing,
    /// Partition was absent and has been created
    Created,
}

/// Result of a bulk call that reached the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    /// Documents included in the call
    pub submitted: u64,
    /// Documents the backend rejected individually
    pub failed: u64,
}

/// Storage backend interface
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Remote name used as the metrics `remote` label
    fn name(&self) -> &str;

    /// Probe for `partition` and create it when absent. Creation failures and
    /// unacknowledged creations are `BackendUnavailable`.
    async fn ensure_partition(&self, partition: &str) -> Result<PartitionStatus>;

    /// Submit all documents in one call. Per-document rejections are counted
    /// in the outcome; a failed call is an error.
    async fn bulk_write(
        &self,
        partition: &str,
        documents: &[Document],
        timeout: Duration,
    ) -> Result<BulkOutcome>;

    /// Run `query` against partitions matching `pattern`. Zero hits is
    /// `NoDataFound`.
    async fn search(&self, pattern: &str, query: &BackendQuery) -> Result<Vec<Document>>;
}
