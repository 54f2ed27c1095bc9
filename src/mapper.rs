//! Write batch to backend document conversion
//!
//! Every sample with a finite value becomes one document; NaN and ±Inf are
//! dropped and counted, as are timestamps outside the representable range. The destination partition is computed once per batch
//! from the ingest time, not from sample timestamps, so a batch straddling
//! midnight lands entirely in the partition of the day it arrived.

use crate::model::{Document, WriteBatch};

use chrono::{DateTime, Utc};
use tracing::debug;

const PARTITION_SEPARATOR: &str = "-";
const PARTITION_DATE_FORMAT: &str = "%Y-%m-%d";

/// Names day partitions as `<prefix>-YYYY-MM-DD` (UTC).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionNamer {
    prefix: String,
}

impl PartitionNamer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn name_for(&self, now: DateTime<Utc>) -> String {
        format!(
            "{}{}{}",
            self.prefix,
            PARTITION_SEPARATOR,
            now.format(PARTITION_DATE_FORMAT)
        )
    }

    /// Pattern matching every day partition under this prefix.
    pub fn read_pattern(&self) -> String {
        format!("{}{}*", self.prefix, PARTITION_SEPARATOR)
    }
}

/// Documents produced from one write batch.
#[derive(Debug, Clone, Default)]
pub struct MappedBatch {
    pub partition: String,
    pub documents: Vec<Document>,
    /// Samples dropped for a NaN or infinite value or an unrepresentable
    /// timestamp
    pub dropped: u64,
    /// Sample count of each wire series, in batch order
    pub series_sample_counts: Vec<u64>,
}

impl MappedBatch {
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Converts decoded write batches into backend documents.
#[derive(Debug, Clone)]
pub struct SampleMapper {
    namer: PartitionNamer,
}

impl SampleMapper {
    pub fn new(namer: PartitionNamer) -> Self {
        Self { namer }
    }

    pub fn namer(&self) -> &PartitionNamer {
        &self.namer
    }

    /// Map every storable sample of `batch` into a document destined for the
    /// partition of `now`.
    pub fn to_documents(&self, batch: &WriteBatch, now: DateTime<Utc>) -> MappedBatch {
        let partition = self.namer.name_for(now);
        let mut documents = Vec::with_capacity(batch.len());
        let mut dropped = 0u64;

        for sample in batch.samples() {
            if !sample.value.is_finite() {
                debug!(
                    value = sample.value,
                    timestamp_ms = sample.timestamp_ms,
                    labels = ?sample.labels,
                    "cannot send value to Elasticsearch, skipping sample"
                );
                dropped += 1;
                continue;
            }
            match Document::from_sample(&sample) {
                Some(document) => documents.push(document),
                None => {
                    debug!(
                        timestamp_ms = sample.timestamp_ms,
                        labels = ?sample.labels,
                        "timestamp out of range, skipping sample"
                    );
                    dropped += 1;
                }
            }
        }

        MappedBatch {
            partition,
            documents,
            dropped,
            series_sample_counts: batch
                .series()
                .iter()
                .map(|ts| ts.samples.len() as u64)
                .collect(),
        }
    }
}
