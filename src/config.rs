//! Adapter configuration and component factory
//!
//! The YAML file uses flat dotted keys:
//!
//! ```yaml
//! elasticsearch.url: http://localhost:9200
//! elasticsearch.max.retries: 3
//! elasticsearch.index.perfix: prometheus
//! elasticsearch.type: ""
//! elasticsearch.aws.service: false
//! elasticsearch.aws.region: us-east-1
//! web.timeout: 30s
//! web.listen.addr: 0.0.0.0:9201
//! web.telemetry.path: /metrics
//! web.max.body.bytes: 33554432
//! query.page.size: 1000
//! query.grouping: labels
//! partition.cache: true
//! ```
//!
//! `elasticsearch.index.prefix` is accepted as a spelling of the prefix key.

use crate::aggregate::{GroupingMode, ResultAggregator};
use crate::backend::{
    AwsCredentials, ElasticsearchConfig, ElasticsearchGateway, MemoryBackend, PartitionGuard,
    SearchBackend, SigV4Signer,
};
use crate::clock::Clock;
use crate::mapper::{PartitionNamer, SampleMapper};
use crate::metrics::MetricsSink;
use crate::query::{QueryTranslator, DEFAULT_PAGE_SIZE};
use crate::reader::ReadService;
use crate::writer::{WriteDispatcher, WritePipeline, WriterConfig};
use crate::{Error, Result};

use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use url::Url;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";
/// URL scheme selecting the in-process backend
pub const MEMORY_SCHEME: &str = "memory";
const DEFAULT_AWS_REGION: &str = "us-east-1";

fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
}

/// Adapter settings loaded from YAML.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    #[serde(rename = "elasticsearch.url")]
    pub elasticsearch_url: String,
    #[serde(rename = "elasticsearch.max.retries")]
    pub max_retries: u32,
    #[serde(
        rename = "elasticsearch.index.perfix",
        alias = "elasticsearch.index.prefix"
    )]
    pub index_prefix: String,
    /// Legacy mapping type; empty means none
    #[serde(rename = "elasticsearch.type")]
    pub doc_type: String,
    /// Sign requests for the AWS-hosted service
    #[serde(rename = "elasticsearch.aws.service")]
    pub aws_service: bool,
    #[serde(rename = "elasticsearch.aws.region")]
    pub aws_region: Option<String>,
    /// Bulk call timeout, also the backend request timeout
    #[serde(rename = "web.timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    #[serde(rename = "web.listen.addr")]
    pub listen_addr: String,
    #[serde(rename = "web.telemetry.path")]
    pub telemetry_path: String,
    #[serde(rename = "web.max.body.bytes")]
    pub max_body_bytes: usize,
    #[serde(rename = "query.page.size")]
    pub page_size: usize,
    #[serde(rename = "query.grouping")]
    pub grouping: GroupingMode,
    #[serde(rename = "partition.cache")]
    pub partition_cache: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            elasticsearch_url: "http://localhost:9200".to_string(),
            max_retries: 3,
            index_prefix: "prometheus".to_string(),
            doc_type: String::new(),
            aws_service: false,
            aws_region: None,
            timeout: Duration::from_secs(30),
            listen_addr: "0.0.0.0:9201".to_string(),
            telemetry_path: "/metrics".to_string(),
            max_body_bytes: 32 * 1024 * 1024, // 32MB
            page_size: DEFAULT_PAGE_SIZE,
            grouping: GroupingMode::LabelPairs,
            partition_cache: true,
        }
    }
}

impl AdapterConfig {
    /// Parse YAML text. Absent keys keep their defaults.
    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&text)
    }

    /// Load from `path`, else from `CONFIG_PATH`, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match std::env::var(CONFIG_PATH_ENV) {
                Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
                _ => {
                    info!("No config file given, using defaults");
                    Self::default()
                }
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.backend_url()?;
        if self.index_prefix.trim().is_empty() {
            return Err(Error::Config(
                "elasticsearch.index.perfix must not be empty".to_string(),
            ));
        }
        if self.page_size == 0 {
            return Err(Error::Config("query.page.size must be positive".to_string()));
        }
        if !self.telemetry_path.starts_with('/') {
            return Err(Error::Config(format!(
                "web.telemetry.path must start with '/': {}",
                self.telemetry_path
            )));
        }
        Ok(())
    }

    pub fn backend_url(&self) -> Result<Url> {
        Url::parse(self.elasticsearch_url.trim()).map_err(|e| {
            Error::Config(format!(
                "invalid elasticsearch.url '{}': {}",
                self.elasticsearch_url, e
            ))
        })
    }

    pub fn doc_type(&self) -> Option<&str> {
        let doc_type = self.doc_type.trim();
        (!doc_type.is_empty()).then_some(doc_type)
    }

    /// Region from config, then `AWS_REGION`, then us-east-1.
    pub fn aws_region(&self) -> String {
        self.aws_region
            .clone()
            .or_else(|| std::env::var("AWS_REGION").ok())
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_AWS_REGION.to_string())
    }
}

pub struct ComponentFactory;

impl ComponentFactory {
    /// Create the document store backend
    ///
    /// - `memory://...`: in-process backend (development mode)
    /// - anything else: Elasticsearch gateway, SigV4-signed when
    ///   `elasticsearch.aws.service` is set (credentials from the environment)
    pub fn create_backend(config: &AdapterConfig) -> Result<Arc<dyn SearchBackend>> {
        let url = config.backend_url()?;

        if url.scheme() == MEMORY_SCHEME {
            info!("Using in-memory backend (development mode)");
            return Ok(Arc::new(MemoryBackend::new()));
        }

        let mut es_config = ElasticsearchConfig::new(url);
        es_config.max_retries = config.max_retries;
        es_config.doc_type = config.doc_type().map(str::to_string);
        es_config.request_timeout = config.timeout;

        if config.aws_service {
            if es_config.url.scheme() != "https" {
                es_config
                    .url
                    .set_scheme("https")
                    .map_err(|_| Error::Config("cannot use https for AWS service URL".into()))?;
            }
            let region = config.aws_region();
            info!(region = %region, "Signing Elasticsearch requests for the AWS service");
            es_config.signer = Some(SigV4Signer::new(AwsCredentials::from_env()?, region));
        }

        info!(
            "Using Elasticsearch backend: url={}, prefix={}",
            es_config.url, config.index_prefix
        );
        Ok(Arc::new(ElasticsearchGateway::new(es_config)?))
    }

    /// Start the write dispatcher on the current runtime.
    pub fn create_write_dispatcher(
        config: &AdapterConfig,
        backend: Arc<dyn SearchBackend>,
        metrics: Arc<dyn MetricsSink>,
        clock: Arc<dyn Clock>,
    ) -> WriteDispatcher {
        let pipeline = WritePipeline::new(
            SampleMapper::new(PartitionNamer::new(config.index_prefix.clone())),
            PartitionGuard::new(config.partition_cache),
            backend,
            metrics,
            clock,
            WriterConfig {
                bulk_timeout: config.timeout,
            },
        );
        WriteDispatcher::start(pipeline)
    }

    pub fn create_read_service(
        config: &AdapterConfig,
        backend: Arc<dyn SearchBackend>,
        metrics: Arc<dyn MetricsSink>,
    ) -> ReadService {
        ReadService::new(
            QueryTranslator::with_page_size(config.page_size),
            ResultAggregator::new(config.grouping),
            PartitionNamer::new(config.index_prefix.clone()),
            backend,
            metrics,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(AdapterConfig::from_yaml("").unwrap(), AdapterConfig::default());
    }

    #[test]
    fn test_dotted_keys() {
        let config = AdapterConfig::from_yaml(
            r#"
elasticsearch.url: http://es:9200
elasticsearch.max.retries: 5
elasticsearch.index.perfix: metrics
elasticsearch.type: sample
web.timeout: 500ms
web.listen.addr: 127.0.0.1:9999
web.telemetry.path: /telemetry
query.page.size: 50
query.grouping: values
partition.cache: false
"#,
        )
        .unwrap();

        assert_eq!(config.elasticsearch_url, "http://es:9200");
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.index_prefix, "metrics");
        assert_eq!(config.doc_type(), Some("sample"));
        assert_eq!(config.timeout, Duration::from_millis(500));
        assert_eq!(config.listen_addr, "127.0.0.1:9999");
        assert_eq!(config.telemetry_path, "/telemetry");
        assert_eq!(config.page_size, 50);
        assert_eq!(config.grouping, GroupingMode::ValuesOnly);
        assert!(!config.partition_cache);
        config.validate().unwrap();
    }

    #[test]
    fn test_prefix_key_spellings() {
        let misspelled = AdapterConfig::from_yaml("elasticsearch.index.perfix: a").unwrap();
        let corrected = AdapterConfig::from_yaml("elasticsearch.index.prefix: a").unwrap();
        assert_eq!(misspelled.index_prefix, "a");
        assert_eq!(corrected.index_prefix, "a");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AdapterConfig::default();
        config.telemetry_path = "metrics".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = AdapterConfig::default();
        config.page_size = 0;
        assert!(config.validate().is_err());

        let mut config = AdapterConfig::default();
        config.elasticsearch_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = AdapterConfig::default();
        config.index_prefix = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_duration_is_config_error() {
        let err = AdapterConfig::from_yaml("web.timeout: soon").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_memory_url_selects_memory_backend() {
        let config = AdapterConfig {
            elasticsearch_url: "memory://local".to_string(),
            ..Default::default()
        };
        let backend = ComponentFactory::create_backend(&config).unwrap();
        assert_eq!(backend.name(), "memory");
    }

    #[test]
    fn test_http_url_selects_elasticsearch() {
        let backend = ComponentFactory::create_backend(&AdapterConfig::default()).unwrap();
        assert_eq!(backend.name(), "elasticsearch");
    }
}
