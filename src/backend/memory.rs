//! In-process backend
//!
//! Partitions live in a map guarded by a `parking_lot::RwLock`. Search
//! applies the same term and range semantics as the translated query.

use super::{BulkOutcome, PartitionStatus, SearchBackend};
use crate::model::Document;
use crate::query::BackendQuery;
use crate::{Error, Result};

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

const BACKEND_NAME: &str = "memory";

/// In-memory document store.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    partitions: RwLock<BTreeMap<String, Vec<Document>>>,
    probes: AtomicU64,
    creations: AtomicU64,
    unavailable: AtomicBool,
    /// Documents carrying this field are rejected individually by bulk calls
    reject_field: RwLock<Option<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-create a partition holding `documents`.
    pub fn with_partition(self, partition: impl Into<String>, documents: Vec<Document>) -> Self {
        self.partitions.write().insert(partition.into(), documents);
        self
    }

    /// Make every call fail with `BackendUnavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Reject documents that carry `field`.
    pub fn reject_documents_with(&self, field: impl Into<String>) {
        *self.reject_field.write() = Some(field.into());
    }

    /// Number of `ensure_partition` calls served.
    pub fn probe_count(&self) -> u64 {
        self.probes.load(Ordering::SeqCst)
    }

    /// Number of partitions created by `ensure_partition`.
    pub fn creation_count(&self) -> u64 {
        self.creations.load(Ordering::SeqCst)
    }

    pub fn partition_names(&self) -> Vec<String> {
        self.partitions.read().keys().cloned().collect()
    }

    pub fn documents(&self, partition: &str) -> Vec<Document> {
        self.partitions
            .read()
            .get(partition)
            .cloned()
            .unwrap_or_default()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::BackendUnavailable(
                "memory backend marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

/// Match a partition name against a pattern with an optional trailing `*`.
fn pattern_matches(pattern: &str, partition: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => partition.starts_with(prefix),
        None => partition == pattern,
    }
}

#[async_trait]
impl SearchBackend for MemoryBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    async fn ensure_partition(&self, partition: &str) -> Result<PartitionStatus> {
        self.check_available()?;
        self.probes.fetch_add(1, Ordering::SeqCst);

        let mut partitions = self.partitions.write();
        if partitions.contains_key(partition) {
            return Ok(PartitionStatus::Existing);
        }
        partitions.insert(partition.to_string(), Vec::new());
        self.creations.fetch_add(1, Ordering::SeqCst);
        Ok(PartitionStatus::Created)
    }

    async fn bulk_write(
        &self,
        partition: &str,
        documents: &[Document],
        _timeout: Duration,
    ) -> Result<BulkOutcome> {
        self.check_available()?;
        if documents.is_empty() {
            return Ok(BulkOutcome::default());
        }

        let reject_field = self.reject_field.read().clone();
        let mut failed = 0u64;
        let mut partitions = self.partitions.write();
        let stored = partitions.entry(partition.to_string()).or_default();
        for document in documents {
            if reject_field
                .as_deref()
                .is_some_and(|field| document.get(field).is_some())
            {
                failed += 1;
                continue;
            }
            stored.push(document.clone());
        }

        Ok(BulkOutcome {
            submitted: documents.len() as u64,
            failed,
        })
    }

    async fn search(&self, pattern: &str, query: &BackendQuery) -> Result<Vec<Document>> {
        self.check_available()?;

        let mut hits: Vec<(i64, Document)> = Vec::new();
        {
            let partitions = self.partitions.read();
            for (name, documents) in partitions.iter() {
                if !pattern_matches(pattern, name) {
                    continue;
                }
                for document in documents {
                    let timestamp = document.timestamp_ms()?;
                    if query.matches(document.fields(), timestamp) {
                        hits.push((timestamp, document.clone()));
                    }
                }
            }
        }

        if hits.is_empty() {
            return Err(Error::NoDataFound);
        }
        // Stable: equal timestamps keep partition then insertion order
        hits.sort_by_key(|(timestamp, _)| *timestamp);
        hits.truncate(query.size());
        Ok(hits.into_iter().map(|(_, document)| document).collect())
    }
}
