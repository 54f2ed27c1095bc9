//! Adapter metrics sink
//!
//! Components take an `Arc<dyn MetricsSink>` instead of touching global
//! collectors. `OtelMetrics` records through OpenTelemetry instruments that
//! the telemetry bootstrap exports for Prometheus scraping; `InMemoryMetrics`
//! keeps plain atomic totals for tests.

use dashmap::DashMap;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;
use std::sync::atomic::{AtomicU64, Ordering};

const REMOTE_LABEL: &str = "remote";

/// Observability contract of the write and read paths.
pub trait MetricsSink: Send + Sync {
    /// Samples decoded from inbound write requests
    fn record_received(&self, samples: u64);
    /// Samples handed to a remote in one batch call
    fn record_sent(&self, remote: &str, samples: u64);
    /// Samples lost because the whole batch call failed
    fn record_failed(&self, remote: &str, samples: u64);
    /// Samples not stored: invalid value or rejected by the backend
    fn record_ignored(&self, samples: u64);
    /// Samples carried by one inbound wire series
    fn observe_series_samples(&self, samples: u64);
    fn observe_batch_duration(&self, remote: &str, seconds: f64);
    fn observe_read_latency(&self, seconds: f64);
    fn record_read_failure(&self);
}

/// OpenTelemetry-backed sink.
pub struct OtelMetrics {
    received_samples: Counter<u64>,
    sent_samples: Counter<u64>,
    failed_samples: Counter<u64>,
    ignored_samples: Counter<u64>,
    write_timeseries_samples: Histogram<u64>,
    sent_batch_duration_seconds: Histogram<f64>,
    read_latency_seconds: Histogram<f64>,
    read_failures: Counter<u64>,
}

impl OtelMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            received_samples: meter
                .u64_counter("received_samples")
                .with_description("Total number of received samples.")
                .init(),
            sent_samples: meter
                .u64_counter("es_sent_samples")
                .with_description("Total number of processed samples sent to remote storage.")
                .init(),
            failed_samples: meter
                .u64_counter("es_failed_samples")
                .with_description(
                    "Total number of processed samples which failed on send to remote storage.",
                )
                .init(),
            ignored_samples: meter
                .u64_counter("prometheus_elasticsearch_ignored_samples")
                .with_description(
                    "The total number of samples not sent to Elasticsearch due to unsupported float values (Inf, -Inf, NaN) or bulk item rejection.",
                )
                .init(),
            write_timeseries_samples: meter
                .u64_histogram("es_adapter_write_timeseries_samples")
                .with_description("How many samples each written timeseries has.")
                .init(),
            sent_batch_duration_seconds: meter
                .f64_histogram("es_sent_batch_duration")
                .with_description("Duration of sample batch send calls to the remote storage.")
                .with_unit("s")
                .init(),
            read_latency_seconds: meter
                .f64_histogram("es_adapter_read_latency")
                .with_description("How long it took us to respond to read requests.")
                .with_unit("s")
                .init(),
            read_failures: meter
                .u64_counter("es_adapter_read_failed")
                .with_description("How many selects from Elasticsearch failed.")
                .init(),
        }
    }
}

fn remote_attr(remote: &str) -> [KeyValue; 1] {
    [KeyValue::new(REMOTE_LABEL, remote.to_string())]
}

impl MetricsSink for OtelMetrics {
    fn record_received(&self, samples: u64) {
        self.received_samples.add(samples, &[]);
    }

    fn record_sent(&self, remote: &str, samples: u64) {
        self.sent_samples.add(samples, &remote_attr(remote));
    }

    fn record_failed(&self, remote: &str, samples: u64) {
        self.failed_samples.add(samples, &remote_attr(remote));
    }

    fn record_ignored(&self, samples: u64) {
        self.ignored_samples.add(samples, &[]);
    }

    fn observe_series_samples(&self, samples: u64) {
        self.write_timeseries_samples.record(samples, &[]);
    }

    fn observe_batch_duration(&self, remote: &str, seconds: f64) {
        self.sent_batch_duration_seconds
            .record(seconds, &remote_attr(remote));
    }

    fn observe_read_latency(&self, seconds: f64) {
        self.read_latency_seconds.record(seconds, &[]);
    }

    fn record_read_failure(&self) {
        self.read_failures.add(1, &[]);
    }
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_received(&self, _samples: u64) {}
    fn record_sent(&self, _remote: &str, _samples: u64) {}
    fn record_failed(&self, _remote: &str, _samples: u64) {}
    fn record_ignored(&self, _samples: u64) {}
    fn observe_series_samples(&self, _samples: u64) {}
    fn observe_batch_duration(&self, _remote: &str, _seconds: f64) {}
    fn observe_read_latency(&self, _seconds: f64) {}
    fn record_read_failure(&self) {}
}

/// Atomic in-process totals, safe to share across request and background tasks.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    received: AtomicU64,
    ignored: AtomicU64,
    read_failures: AtomicU64,
    read_observations: AtomicU64,
    series_observations: AtomicU64,
    sent: DashMap<String, AtomicU64>,
    failed: DashMap<String, AtomicU64>,
    batch_observations: DashMap<String, AtomicU64>,
}

fn load(map: &DashMap<String, AtomicU64>, remote: &str) -> u64 {
    map.get(remote)
        .map(|v| v.load(Ordering::Relaxed))
        .unwrap_or(0)
}

fn add(map: &DashMap<String, AtomicU64>, remote: &str, n: u64) {
    if let Some(counter) = map.get(remote) {
        counter.fetch_add(n, Ordering::Relaxed);
        return;
    }
    map.entry(remote.to_string())
        .or_default()
        .fetch_add(n, Ordering::Relaxed);
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn ignored(&self) -> u64 {
        self.ignored.load(Ordering::Relaxed)
    }

    pub fn read_failures(&self) -> u64 {
        self.read_failures.load(Ordering::Relaxed)
    }

    pub fn read_observations(&self) -> u64 {
        self.read_observations.load(Ordering::Relaxed)
    }

    pub fn series_observations(&self) -> u64 {
        self.series_observations.load(Ordering::Relaxed)
    }

    pub fn sent(&self, remote: &str) -> u64 {
        load(&self.sent, remote)
    }

    pub fn failed(&self, remote: &str) -> u64 {
        load(&self.failed, remote)
    }

    pub fn batch_observations(&self, remote: &str) -> u64 {
        load(&self.batch_observations, remote)
    }
}

impl MetricsSink for InMemoryMetrics {
    fn record_received(&self, samples: u64) {
        self.received.fetch_add(samples, Ordering::Relaxed);
    }

    fn record_sent(&self, remote: &str, samples: u64) {
        add(&self.sent, remote, samples);
    }

    fn record_failed(&self, remote: &str, samples: u64) {
        add(&self.failed, remote, samples);
    }

    fn record_ignored(&self, samples: u64) {
        self.ignored.fetch_add(samples, Ordering::Relaxed);
    }

    fn observe_series_samples(&self, _samples: u64) {
        self.series_observations.fetch_add(1, Ordering::Relaxed);
    }

    fn observe_batch_duration(&self, remote: &str, _seconds: f64) {
        add(&self.batch_observations, remote, 1);
    }

    fn observe_read_latency(&self, _seconds: f64) {
        self.read_observations.fetch_add(1, Ordering::Relaxed);
    }

    fn record_read_failure(&self) {
        self.read_failures.fetch_add(1, Ordering::Relaxed);
    }
}
