//! Synchronous read path
//!
//! Translate, search every day partition under the prefix, aggregate. All of
//! it runs on the request task.

use crate::aggregate::ResultAggregator;
use crate::backend::SearchBackend;
use crate::mapper::PartitionNamer;
use crate::metrics::MetricsSink;
use crate::model::ReadQuery;
use crate::prompb::{QueryResult, ReadResponse};
use crate::query::QueryTranslator;
use crate::{Error, Result};

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Serves remote read queries from the backend.
pub struct ReadService {
    translator: QueryTranslator,
    aggregator: ResultAggregator,
    namer: PartitionNamer,
    backend: Arc<dyn SearchBackend>,
    metrics: Arc<dyn MetricsSink>,
}

impl ReadService {
    pub fn new(
        translator: QueryTranslator,
        aggregator: ResultAggregator,
        namer: PartitionNamer,
        backend: Arc<dyn SearchBackend>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            translator,
            aggregator,
            namer,
            backend,
            metrics,
        }
    }

    /// Answer one query. Zero matching documents is an empty result, not an
    /// error.
    pub async fn read(&self, query: &ReadQuery) -> Result<ReadResponse> {
        let start = Instant::now();
        let result = self.execute(query).await;
        self.metrics
            .observe_read_latency(start.elapsed().as_secs_f64());

        match result {
            Ok(response) => Ok(response),
            Err(Error::NoDataFound) => {
                debug!(matchers = query.matchers.len(), "Found no metrics");
                Ok(empty_response())
            }
            Err(e) => {
                warn!(error = %e, "Error executing query");
                self.metrics.record_read_failure();
                Err(e)
            }
        }
    }

    async fn execute(&self, query: &ReadQuery) -> Result<ReadResponse> {
        let backend_query = self.translator.build(query);
        let documents = self
            .backend
            .search(&self.namer.read_pattern(), &backend_query)
            .await?;
        let timeseries = self.aggregator.group(documents)?;

        debug!(
            series = timeseries.len(),
            start_ms = query.start_ms,
            end_ms = query.end_ms,
            "Read query answered"
        );
        Ok(ReadResponse {
            results: vec![QueryResult { timeseries }],
        })
    }
}

/// One empty result for the single query.
pub fn empty_response() -> ReadResponse {
    ReadResponse {
        results: vec![QueryResult::default()],
    }
}
