//! Fire-and-forget write dispatch
//!
//! A write request is decoded and mapped to documents on the request task,
//! then handed to the dispatcher queue and acknowledged. The dispatcher loop
//! runs each batch on its own tracked task: partition check, one bulk call,
//! metrics. Backend failures are only visible through metrics and logs.
//!
//! Every submission returns a [`WriteTicket`]. The HTTP layer drops it;
//! tests await it for the batch's [`WriteReport`].
//!
//! Shutdown policy: in-flight batches are never cancelled. `close()` stops
//! intake and lets the loop dispatch anything already queued; `shutdown()`
//! also waits for all batch tasks to finish.

use crate::backend::{PartitionGuard, SearchBackend};
use crate::clock::Clock;
use crate::mapper::{MappedBatch, SampleMapper};
use crate::metrics::MetricsSink;
use crate::model::WriteBatch;
use crate::{Error, Result};

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Write path settings
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Timeout of each bulk call
    pub bulk_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            bulk_timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome of one dispatched batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// Destination partition
    pub partition: String,
    /// Samples decoded from the request
    pub received: u64,
    /// Documents handed to the backend
    pub submitted: u64,
    /// Samples dropped for a NaN or infinite value or a bad timestamp
    pub dropped: u64,
    /// Documents the backend rejected individually
    pub rejected: u64,
    /// Batch-level failure, if the call did not go through
    pub error: Option<String>,
}

impl WriteReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Samples counted as ignored: drops plus backend rejections.
    pub fn ignored(&self) -> u64 {
        self.dropped + self.rejected
    }
}

/// Batch mapped on the request path, waiting for dispatch.
#[derive(Debug, Clone)]
pub struct PreparedBatch {
    received: u64,
    mapped: MappedBatch,
}

impl PreparedBatch {
    pub fn partition(&self) -> &str {
        &self.mapped.partition
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn mapped(&self) -> &MappedBatch {
        &self.mapped
    }
}

/// Write path stages shared by the request task and batch tasks.
pub struct WritePipeline {
    mapper: SampleMapper,
    guard: PartitionGuard,
    backend: Arc<dyn SearchBackend>,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
    config: WriterConfig,
}

impl WritePipeline {
    pub fn new(
        mapper: SampleMapper,
        guard: PartitionGuard,
        backend: Arc<dyn SearchBackend>,
        metrics: Arc<dyn MetricsSink>,
        clock: Arc<dyn Clock>,
        config: WriterConfig,
    ) -> Self {
        Self {
            mapper,
            guard,
            backend,
            metrics,
            clock,
            config,
        }
    }

    pub fn backend(&self) -> &Arc<dyn SearchBackend> {
        &self.backend
    }

    /// Map a batch into documents for today's partition and count what was
    /// received and dropped.
    pub fn prepare(&self, batch: &WriteBatch) -> PreparedBatch {
        let received = batch.len() as u64;
        self.metrics.record_received(received);

        let mapped = self.mapper.to_documents(batch, self.clock.now());
        for samples in &mapped.series_sample_counts {
            self.metrics.observe_series_samples(*samples);
        }
        if mapped.dropped > 0 {
            self.metrics.record_ignored(mapped.dropped);
        }

        PreparedBatch { received, mapped }
    }

    /// Ensure the partition and submit the documents in one bulk call.
    pub async fn deliver(&self, prepared: PreparedBatch) -> WriteReport {
        let PreparedBatch { received, mapped } = prepared;
        let mut report = WriteReport {
            partition: mapped.partition.clone(),
            received,
            dropped: mapped.dropped,
            ..Default::default()
        };
        if mapped.is_empty() {
            debug!(partition = %report.partition, received, "No storable samples in batch");
            return report;
        }

        let remote = self.backend.name().to_string();
        let num_samples = mapped.len() as u64;
        let start = Instant::now();

        let result = match self
            .guard
            .ensure(self.backend.as_ref(), &mapped.partition)
            .await
        {
            Ok(()) => {
                self.backend
                    .bulk_write(&mapped.partition, &mapped.documents, self.config.bulk_timeout)
                    .await
            }
            Err(e) => Err(e),
        };

        self.metrics
            .observe_batch_duration(&remote, start.elapsed().as_secs_f64());
        self.metrics.record_sent(&remote, received);

        match result {
            Ok(outcome) => {
                report.submitted = outcome.submitted;
                report.rejected = outcome.failed;
                if outcome.failed > 0 {
                    warn!(
                        partition = %mapped.partition,
                        rejected = outcome.failed,
                        "Backend rejected documents in bulk call"
                    );
                    self.metrics.record_ignored(outcome.failed);
                }
                debug!(
                    partition = %mapped.partition,
                    num_samples,
                    "Wrote samples to remote storage"
                );
            }
            Err(e) => {
                warn!(
                    storage = %remote,
                    num_samples,
                    error = %e,
                    "Error sending samples to remote storage"
                );
                self.metrics.record_failed(&remote, num_samples);
                report.error = Some(e.to_string());
            }
        }

        report
    }
}

struct WriteJob {
    prepared: PreparedBatch,
    reply: oneshot::Sender<WriteReport>,
}

/// Handle on a submitted batch.
#[derive(Debug)]
pub struct WriteTicket {
    receiver: oneshot::Receiver<WriteReport>,
}

impl WriteTicket {
    /// Wait for the batch task to finish.
    pub async fn wait(self) -> Result<WriteReport> {
        self.receiver
            .await
            .map_err(|_| Error::Internal("write task ended without a report".to_string()))
    }
}

/// Queue from request tasks to background batch tasks.
#[derive(Clone)]
pub struct WriteDispatcher {
    pipeline: Arc<WritePipeline>,
    queue: mpsc::UnboundedSender<WriteJob>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl WriteDispatcher {
    /// Start the dispatcher loop on the current runtime.
    pub fn start(pipeline: WritePipeline) -> Self {
        let pipeline = Arc::new(pipeline);
        let (queue, receiver) = mpsc::unbounded_channel();
        let tracker = TaskTracker::new();
        let shutdown = CancellationToken::new();

        tracker.spawn(run_dispatch_loop(
            pipeline.clone(),
            receiver,
            tracker.clone(),
            shutdown.clone(),
        ));

        Self {
            pipeline,
            queue,
            tracker,
            shutdown,
        }
    }

    pub fn pipeline(&self) -> &Arc<WritePipeline> {
        &self.pipeline
    }

    /// Map the batch on the caller's task and queue it for delivery.
    pub fn submit(&self, batch: WriteBatch) -> Result<WriteTicket> {
        if self.shutdown.is_cancelled() {
            return Err(Error::Internal("write dispatcher is shut down".to_string()));
        }

        let prepared = self.pipeline.prepare(&batch);
        let (reply, receiver) = oneshot::channel();
        self.queue
            .send(WriteJob { prepared, reply })
            .map_err(|_| Error::Internal("write dispatcher is shut down".to_string()))?;

        Ok(WriteTicket { receiver })
    }

    /// Whether `submit` still accepts batches.
    pub fn is_accepting(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Batch tasks plus the dispatcher loop still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting batches. Queued ones are still dispatched.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Stop accepting batches and wait for queued and in-flight ones.
    pub async fn shutdown(&self) {
        self.close();
        self.tracker.close();
        self.tracker.wait().await;
        info!("Write dispatcher drained");
    }
}

fn spawn_job(pipeline: &Arc<WritePipeline>, tracker: &TaskTracker, job: WriteJob) {
    let pipeline = pipeline.clone();
    tracker.spawn(async move {
        let report = pipeline.deliver(job.prepared).await;
        if let Some(err) = &report.error {
            debug!(partition = %report.partition, error = %err, "Batch delivery failed");
        }
        // Receiver is gone when the caller dropped its ticket
        let _ = job.reply.send(report);
    });
}

async fn run_dispatch_loop(
    pipeline: Arc<WritePipeline>,
    mut receiver: mpsc::UnboundedReceiver<WriteJob>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            job = receiver.recv() => match job {
                Some(job) => spawn_job(&pipeline, &tracker, job),
                None => break,
            },
            _ = shutdown.cancelled() => {
                receiver.close();
                let mut drained = 0usize;
                while let Some(job) = receiver.recv().await {
                    spawn_job(&pipeline, &tracker, job);
                    drained += 1;
                }
                if drained > 0 {
                    info!(drained, "Dispatched queued batches during shutdown");
                }
                break;
            }
        }
    }
}
