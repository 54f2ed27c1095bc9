//! Elasticsearch REST gateway

use super::{BulkOutcome, PartitionStatus, SearchBackend, SigV4Signer};
use crate::model::Document;
use crate::query::BackendQuery;
use crate::{Error, Result};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

const BACKEND_NAME: &str = "elasticsearch";
const JSON: &str = "application/json";
const NDJSON: &str = "application/x-ndjson";
const ALREADY_EXISTS: &str = "resource_already_exists_exception";
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(5);

/// Which failures a request may be re-sent after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retry {
    /// Connection failures, timeouts and 5xx responses
    Idempotent,
    /// Only failures where the request never reached the server. Bulk
    /// documents carry no `_id`, so a replayed bulk call stores them twice.
    ConnectOnly,
}

/// Connection settings for the gateway
#[derive(Debug, Clone)]
pub struct ElasticsearchConfig {
    /// Base URL of the cluster
    pub url: Url,
    /// Retries for connection failures and 5xx responses
    pub max_retries: u32,
    /// Mapping type for clusters older than 7.x
    pub doc_type: Option<String>,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Request signer for the AWS-hosted service
    pub signer: Option<SigV4Signer>,
}

impl ElasticsearchConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            max_retries: 3,
            doc_type: None,
            request_timeout: Duration::from_secs(30),
            signer: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Acknowledged {
    #[serde(default)]
    acknowledged: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    status: u16,
    #[serde(default)]
    error: Option<Value>,
}

impl BulkItem {
    fn failed(&self) -> bool {
        self.error.is_some() || self.status >= 300
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    #[serde(default)]
    total: Option<TotalHits>,
    #[serde(default)]
    hits: Vec<SearchHit>,
}

/// `hits.total` is a bare number before 7.x and an object after.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TotalHits {
    Count(u64),
    Object { value: u64 },
}

impl TotalHits {
    fn value(&self) -> u64 {
        match self {
            TotalHits::Count(n) | TotalHits::Object { value: n } => *n,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_source", default)]
    source: Map<String, Value>,
}

/// Gateway to an Elasticsearch cluster over its REST API.
pub struct ElasticsearchGateway {
    client: Client,
    config: ElasticsearchConfig,
}

impl ElasticsearchGateway {
    pub fn new(config: ElasticsearchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        info!(
            url = %config.url,
            max_retries = config.max_retries,
            signed = config.signer.is_some(),
            "Elasticsearch gateway configured"
        );

        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Url {
        let mut url = self.config.url.clone();
        let base = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{}/{}", base, path.trim_start_matches('/')));
        if query.is_empty() {
            url.set_query(None);
        } else {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        url
    }

    /// Send a request, retrying the failures `retry` allows with exponential
    /// backoff. Each attempt is signed afresh.
    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<(Bytes, &'static str)>,
        timeout: Option<Duration>,
        retry: Retry,
    ) -> Result<Response> {
        let mut attempt = 0u32;
        loop {
            let mut builder = self.client.request(method.clone(), url.clone());
            if let Some((payload, content_type)) = &body {
                builder = builder
                    .header(CONTENT_TYPE, *content_type)
                    .body(payload.clone());
            }
            if let Some(timeout) = timeout {
                builder = builder.timeout(timeout);
            }
            let mut request = builder.build()?;
            if let Some(signer) = &self.config.signer {
                signer.sign(&mut request, Utc::now())?;
            }

            let retryable = match self.client.execute(request).await {
                Ok(response)
                    if response.status().is_server_error() && retry == Retry::Idempotent =>
                {
                    Error::Backend {
                        status: response.status().as_u16(),
                        reason: response.text().await.unwrap_or_default(),
                    }
                }
                Ok(response) => return Ok(response),
                Err(e) if e.is_connect() => Error::from(e),
                Err(e) if e.is_timeout() && retry == Retry::Idempotent => Error::from(e),
                Err(e) => return Err(Error::from(e)),
            };

            if attempt >= self.config.max_retries {
                return Err(retryable);
            }
            let delay = RETRY_BASE_DELAY
                .saturating_mul(1 << attempt.min(16))
                .min(RETRY_MAX_DELAY);
            debug!(
                %url,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %retryable,
                "Retrying Elasticsearch request"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn create_partition(&self, partition: &str) -> Result<PartitionStatus> {
        let response = self
            .send(
                Method::PUT,
                self.endpoint(partition, &[]),
                None,
                None,
                Retry::Idempotent,
            )
            .await
            .map_err(|e| unavailable(format!("failed to create index {}: {}", partition, e)))?;
        let status = response.status();
        let body = response.bytes().await?;

        if status.is_success() {
            let ack: Acknowledged = serde_json::from_slice(&body)?;
            if !ack.acknowledged {
                return Err(unavailable(format!(
                    "creation of index {} was not acknowledged",
                    partition
                )));
            }
            info!(partition = %partition, "Created Elasticsearch index");
            return Ok(PartitionStatus::Created);
        }

        if status == StatusCode::BAD_REQUEST && error_type(&body).as_deref() == Some(ALREADY_EXISTS)
        {
            debug!(partition = %partition, "Index created concurrently");
            return Ok(PartitionStatus::Existing);
        }

        Err(unavailable(format!(
            "failed to create index {}: status {}: {}",
            partition,
            status,
            String::from_utf8_lossy(&body)
        )))
    }

    fn bulk_body(&self, partition: &str, documents: &[Document]) -> Result<Bytes> {
        let mut action = json!({ "index": { "_index": partition } });
        if let Some(doc_type) = &self.config.doc_type {
            action["index"]["_type"] = Value::from(doc_type.as_str());
        }
        let action = serde_json::to_vec(&action)?;

        let mut body = Vec::with_capacity(documents.len() * 128);
        for document in documents {
            body.extend_from_slice(&action);
            body.push(b'\n');
            serde_json::to_writer(&mut body, document.fields())?;
            body.push(b'\n');
        }
        Ok(Bytes::from(body))
    }
}

fn unavailable(msg: String) -> Error {
    Error::BackendUnavailable(msg)
}

/// `error.type` of an Elasticsearch error body.
fn error_type(body: &[u8]) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_slice(body).ok()?;
    parsed
        .error?
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string)
}

async fn backend_error(response: Response) -> Error {
    let status = response.status().as_u16();
    let reason = response.text().await.unwrap_or_default();
    Error::Backend { status, reason }
}

#[async_trait]
impl SearchBackend for ElasticsearchGateway {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    async fn ensure_partition(&self, partition: &str) -> Result<PartitionStatus> {
        let response = self
            .send(
                Method::HEAD,
                self.endpoint(partition, &[]),
                None,
                None,
                Retry::Idempotent,
            )
            .await
            .map_err(|e| unavailable(format!("index {} existence probe failed: {}", partition, e)))?;

        match response.status() {
            status if status.is_success() => Ok(PartitionStatus::Existing),
            StatusCode::NOT_FOUND => self.create_partition(partition).await,
            status => Err(unavailable(format!(
                "index {} existence probe returned {}",
                partition, status
            ))),
        }
    }

    async fn bulk_write(
        &self,
        partition: &str,
        documents: &[Document],
        timeout: Duration,
    ) -> Result<BulkOutcome> {
        if documents.is_empty() {
            return Ok(BulkOutcome::default());
        }

        let body = self.bulk_body(partition, documents)?;
        let url = self.endpoint("_bulk", &[("timeout", format!("{}ms", timeout.as_millis()))]);
        let response = self
            .send(
                Method::POST,
                url,
                Some((body, NDJSON)),
                Some(timeout),
                Retry::ConnectOnly,
            )
            .await?;
        if !response.status().is_success() {
            return Err(backend_error(response).await);
        }

        let parsed: BulkResponse = serde_json::from_slice(&response.bytes().await?)?;
        let failed = if parsed.errors {
            parsed
                .items
                .iter()
                .flat_map(|item| item.values())
                .filter(|item| item.failed())
                .count() as u64
        } else {
            0
        };
        debug!(
            partition = %partition,
            failed,
            "there are {} failed requests to Elasticsearch", failed
        );

        Ok(BulkOutcome {
            submitted: documents.len() as u64,
            failed,
        })
    }

    async fn search(&self, pattern: &str, query: &BackendQuery) -> Result<Vec<Document>> {
        let url = self.endpoint(
            &format!("{}/_search", pattern),
            &[
                ("ignore_unavailable", "true".to_string()),
                ("allow_no_indices", "true".to_string()),
            ],
        );
        let body = Bytes::from(serde_json::to_vec(&query.to_json())?);
        let response = self
            .send(Method::POST, url, Some((body, JSON)), None, Retry::Idempotent)
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::NoDataFound);
        }
        if !response.status().is_success() {
            return Err(backend_error(response).await);
        }

        let parsed: SearchResponse = serde_json::from_slice(&response.bytes().await?)?;
        let total = parsed
            .hits
            .total
            .as_ref()
            .map(TotalHits::value)
            .unwrap_or(parsed.hits.hits.len() as u64);

        if parsed.hits.hits.is_empty() {
            return Err(Error::NoDataFound);
        }
        debug!(total, "Found a total of {} data points", total);
        if total > query.size() as u64 {
            warn!(
                total,
                page_size = query.size(),
                "Read result truncated at page size"
            );
        }

        Ok(parsed
            .hits
            .hits
            .into_iter()
            .map(|hit| Document::from_fields(hit.source))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(url: &str) -> ElasticsearchGateway {
        ElasticsearchGateway::new(ElasticsearchConfig::new(Url::parse(url).unwrap())).unwrap()
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let g = gateway("http://localhost:9200/es/");
        assert_eq!(
            g.endpoint("prometheus-*/_search", &[]).as_str(),
            "http://localhost:9200/es/prometheus-*/_search"
        );
        assert_eq!(
            g.endpoint("_bulk", &[("timeout", "30000ms".into())]).as_str(),
            "http://localhost:9200/es/_bulk?timeout=30000ms"
        );
    }

    #[test]
    fn test_bulk_body_is_ndjson() {
        let mut g = gateway("http://localhost:9200");
        g.config.doc_type = Some("sample".to_string());
        let mut fields = Map::new();
        fields.insert("job".into(), Value::from("api"));
        let body = g
            .bulk_body("p-2024-01-01", &[Document::from_fields(fields)])
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 2);
        let action: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["index"]["_index"], "p-2024-01-01");
        assert_eq!(action["index"]["_type"], "sample");
        assert_eq!(lines[1], r#"{"job":"api"}"#);
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_total_hits_both_shapes() {
        let old: SearchHits = serde_json::from_str(r#"{"total": 3, "hits": []}"#).unwrap();
        let new: SearchHits =
            serde_json::from_str(r#"{"total": {"value": 4, "relation": "eq"}, "hits": []}"#).unwrap();
        assert_eq!(old.total.unwrap().value(), 3);
        assert_eq!(new.total.unwrap().value(), 4);
    }

    #[test]
    fn test_error_type_extraction() {
        let body = br#"{"error":{"type":"resource_already_exists_exception","reason":"x"},"status":400}"#;
        assert_eq!(error_type(body).as_deref(), Some(ALREADY_EXISTS));
        assert_eq!(error_type(b"not json"), None);
    }
}
