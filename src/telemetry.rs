//! Telemetry bootstrap for the adapter binary.
//!
//! Logs go to stdout as JSON through `tracing-subscriber`. Metrics are
//! recorded through OpenTelemetry instruments and read by a Prometheus
//! exporter into a `prometheus::Registry`, which the scrape endpoint renders
//! in the text exposition format.

use crate::{Error, Result};

use opentelemetry::global;
use opentelemetry::metrics::Meter;
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::Resource;
use prometheus::{Encoder, Registry, TextEncoder};
use std::collections::BTreeMap;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const ATTR_SERVICE_NAME: &str = "service.name";
const ATTR_SERVICE_NAMESPACE: &str = "service.namespace";
const SERVICE_NAMESPACE: &str = "promsearch";
/// Instrumentation scope of the adapter meters
pub const METER_NAME: &str = "promsearch";

/// Resource attributes from the environment plus the service identity.
pub fn resource_attributes(default_service_name: &str) -> Result<Vec<KeyValue>> {
    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| default_service_name.to_string());
    let service_name = service_name.trim();
    if service_name.is_empty() {
        return Err(Error::Config(
            "OTEL_SERVICE_NAME cannot be empty".to_string(),
        ));
    }

    let mut attr_map: BTreeMap<String, String> = BTreeMap::new();
    if let Ok(attr_str) = std::env::var("OTEL_RESOURCE_ATTRIBUTES") {
        for (key, value) in parse_resource_attributes(&attr_str)? {
            attr_map.insert(key, value);
        }
    }
    attr_map.insert(ATTR_SERVICE_NAME.to_string(), service_name.to_string());
    attr_map
        .entry(ATTR_SERVICE_NAMESPACE.to_string())
        .or_insert_with(|| SERVICE_NAMESPACE.to_string());

    Ok(attr_map
        .into_iter()
        .map(|(k, v)| KeyValue::new(k, v))
        .collect())
}

/// Meter provider wired to a Prometheus registry.
pub struct MetricsExporter {
    registry: Registry,
    meter_provider: SdkMeterProvider,
}

impl MetricsExporter {
    pub fn new(attributes: Vec<KeyValue>) -> Result<Self> {
        let registry = Registry::new();
        let reader = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .map_err(|e| Error::Config(format!("failed to build Prometheus exporter: {e}")))?;

        let resource = Resource::default().merge(&Resource::new(attributes));
        let meter_provider = SdkMeterProvider::builder()
            .with_reader(reader)
            .with_resource(resource)
            .build();

        Ok(Self {
            registry,
            meter_provider,
        })
    }

    pub fn meter(&self) -> Meter {
        use opentelemetry::metrics::MeterProvider;
        self.meter_provider.meter(METER_NAME)
    }

    pub fn meter_provider(&self) -> &SdkMeterProvider {
        &self.meter_provider
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Current metric families in the Prometheus text format.
    pub fn render(&self) -> Result<String> {
        render_registry(&self.registry)
    }
}

/// Encode every metric family of `registry` in the Prometheus text format.
pub fn render_registry(registry: &Registry) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(|e| Error::Internal(format!("failed to encode metrics: {e}")))?;
    String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metrics are not UTF-8: {e}")))
}

/// Handle that keeps the subscriber and meter provider alive for the process.
pub struct Telemetry {
    service_name: String,
    exporter: MetricsExporter,
}

impl Telemetry {
    /// Install the JSON log subscriber and the global meter provider.
    pub fn init(default_service_name: &str, log_level: &str) -> Result<Self> {
        let level = parse_log_level(log_level)?;

        FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .with_thread_ids(true)
            .json()
            .try_init()
            .map_err(|e| {
                Error::Config(format!("failed to initialize telemetry subscriber: {e}"))
            })?;

        let attributes = resource_attributes(default_service_name)?;
        let service_name = attributes
            .iter()
            .find(|kv| kv.key.as_str() == ATTR_SERVICE_NAME)
            .map(|kv| kv.value.to_string())
            .unwrap_or_else(|| default_service_name.to_string());

        let exporter = MetricsExporter::new(attributes)?;
        global::set_meter_provider(exporter.meter_provider().clone());

        info!(
            service_name = %service_name,
            log_level = %level,
            "Telemetry bootstrap initialized"
        );

        Ok(Self {
            service_name,
            exporter,
        })
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn exporter(&self) -> &MetricsExporter {
        &self.exporter
    }

    pub fn meter(&self) -> Meter {
        self.exporter.meter()
    }

    pub fn render(&self) -> Result<String> {
        self.exporter.render()
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        let _ = self.exporter.meter_provider.shutdown();
    }
}

pub fn parse_log_level(raw: &str) -> Result<Level> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(Error::Config(format!(
            "invalid log level '{other}', expected one of [trace, debug, info, warn, error]"
        ))),
    }
}

fn parse_resource_attributes(raw: &str) -> Result<Vec<(String, String)>> {
    let mut attrs = Vec::new();
    for pair in raw.split(',') {
        let trimmed = pair.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            return Err(Error::Config(format!(
                "OTEL_RESOURCE_ATTRIBUTES entry '{trimmed}' is invalid, expected key=value"
            )));
        };

        let key = key.trim();
        if key.is_empty() {
            return Err(Error::Config(
                "OTEL_RESOURCE_ATTRIBUTES contains an empty attribute key".to_string(),
            ));
        }

        attrs.push((key.to_string(), value.trim().to_string()));
    }
    Ok(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricsSink, OtelMetrics};

    #[test]
    fn parse_resource_attributes_accepts_valid_input() {
        let attrs = parse_resource_attributes("service.instance.id=abc,foo=bar").unwrap();
        assert_eq!(
            attrs,
            vec![
                ("service.instance.id".to_string(), "abc".to_string()),
                ("foo".to_string(), "bar".to_string())
            ]
        );
    }

    #[test]
    fn parse_resource_attributes_rejects_invalid_pairs() {
        let err = parse_resource_attributes("broken").unwrap_err();
        assert!(format!("{err}").contains("key=value"));
    }

    #[test]
    fn parse_log_level_rejects_unknown() {
        assert_eq!(parse_log_level(" WARN ").unwrap(), Level::WARN);
        assert!(matches!(parse_log_level("loud"), Err(Error::Config(_))));
    }

    #[test]
    fn exporter_renders_recorded_counters() {
        let exporter = MetricsExporter::new(vec![KeyValue::new(ATTR_SERVICE_NAME, "test")]).unwrap();
        let metrics = OtelMetrics::new(&exporter.meter());
        metrics.record_received(7);
        metrics.record_sent("elasticsearch", 7);

        let text = exporter.render().unwrap();
        assert!(text.contains("received_samples"));
        assert!(text.contains("es_sent_samples"));
        assert!(text.contains("remote=\"elasticsearch\""));
    }
}
