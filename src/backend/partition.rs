//! Known-partition cache
//!
//! Concurrent batches for a day whose partition has not been verified share
//! one existence check: the first caller probes the backend and the rest
//! await its result. A failed check leaves the entry unset, so the next batch
//! probes again. Entries for other days are dropped when a new day is first
//! seen.

use super::SearchBackend;
use crate::Result;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

/// Single-flight partition existence guard.
#[derive(Debug)]
pub struct PartitionGuard {
    enabled: bool,
    known: DashMap<String, Arc<OnceCell<()>>>,
}

impl Default for PartitionGuard {
    fn default() -> Self {
        Self::new(true)
    }
}

impl PartitionGuard {
    /// With `enabled = false` every call probes the backend.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            known: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether `partition` has been verified and is cached.
    pub fn is_known(&self, partition: &str) -> bool {
        self.known
            .get(partition)
            .is_some_and(|cell| cell.initialized())
    }

    /// Ensure `partition` exists in `backend`, probing at most once per
    /// partition while the cache is enabled.
    pub async fn ensure(&self, backend: &dyn SearchBackend, partition: &str) -> Result<()> {
        if !self.enabled {
            backend.ensure_partition(partition).await?;
            return Ok(());
        }

        let cell = match self.known.get(partition) {
            Some(cell) => cell.clone(),
            None => {
                let cell = self
                    .known
                    .entry(partition.to_string())
                    .or_default()
                    .clone();
                self.known.retain(|name, _| name == partition);
                cell
            }
        };

        cell.get_or_try_init(|| async {
            let status = backend.ensure_partition(partition).await?;
            debug!(partition = %partition, ?status, "Partition verified");
            Ok::<(), crate::Error>(())
        })
        .await?;
        Ok(())
    }
}
