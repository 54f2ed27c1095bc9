//! Domain types shared by the write and read paths

use crate::prompb::{self, label_matcher, WriteRequest};
use crate::{Error, Result};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Document field holding the sample value
pub const VALUE_FIELD: &str = "value";
/// Document field holding the sample instant
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Label name to label value, unique keys, ordered by name.
pub type LabelSet = BTreeMap<String, String>;

/// One labeled sample decoded from a write batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: Arc<LabelSet>,
    pub value: f64,
    pub timestamp_ms: i64,
}

/// Decoded remote write payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    request: WriteRequest,
}

impl WriteBatch {
    pub fn new(request: WriteRequest) -> Self {
        Self { request }
    }

    pub fn request(&self) -> &WriteRequest {
        &self.request
    }

    pub fn into_request(self) -> WriteRequest {
        self.request
    }

    pub fn series(&self) -> &[prompb::TimeSeries] {
        &self.request.timeseries
    }

    /// Total number of samples across all series.
    pub fn len(&self) -> usize {
        self.request.timeseries.iter().map(|ts| ts.samples.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flatten into one `Sample` per wire sample. Series labels are built once
    /// and shared; a repeated label name keeps its last value.
    pub fn samples(&self) -> impl Iterator<Item = Sample> + '_ {
        self.request.timeseries.iter().flat_map(|ts| {
            let labels: Arc<LabelSet> = Arc::new(
                ts.labels
                    .iter()
                    .map(|l| (l.name.clone(), l.value.clone()))
                    .collect(),
            );
            ts.samples.iter().map(move |s| Sample {
                labels: labels.clone(),
                value: s.value,
                timestamp_ms: s.timestamp,
            })
        })
    }
}

/// Equality constraint on one label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Matcher {
    pub name: String,
    pub value: String,
}

impl Matcher {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// The single query of a remote read call.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadQuery {
    pub matchers: Vec<Matcher>,
    /// Inclusive lower bound, epoch millis
    pub start_ms: i64,
    /// Inclusive upper bound, epoch millis
    pub end_ms: i64,
}

impl ReadQuery {
    pub fn new(matchers: Vec<Matcher>, start_ms: i64, end_ms: i64) -> Self {
        Self {
            matchers,
            start_ms,
            end_ms,
        }
    }

    /// Validate a wire query. Only equality matchers are served.
    pub fn from_wire(query: &prompb::Query) -> Result<Self> {
        let mut matchers = Vec::with_capacity(query.matchers.len());
        for m in &query.matchers {
            match label_matcher::Type::try_from(m.r#type) {
                Ok(label_matcher::Type::Eq) => matchers.push(Matcher::new(&m.name, &m.value)),
                Ok(other) => {
                    return Err(Error::UnsupportedQueryShape(format!(
                        "matcher on '{}' uses {:?}; only equality matchers are supported",
                        m.name, other
                    )))
                }
                Err(_) => {
                    return Err(Error::MalformedRequest(format!(
                        "unknown matcher type {} on '{}'",
                        m.r#type, m.name
                    )))
                }
            }
        }
        Ok(Self::new(matchers, query.start_timestamp_ms, query.end_timestamp_ms))
    }

    pub fn contains(&self, timestamp_ms: i64) -> bool {
        self.start_ms <= timestamp_ms && timestamp_ms <= self.end_ms
    }
}

/// A backend-storable record: labels flattened to top-level fields plus
/// `value` and `timestamp`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    fields: Map<String, Value>,
}

impl Document {
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Build a document from a sample. Callers must have rejected
    /// non-finite values already. `None` when the timestamp cannot be
    /// represented as a calendar instant.
    pub fn from_sample(sample: &Sample) -> Option<Self> {
        let timestamp = format_timestamp(sample.timestamp_ms)?;
        let mut fields = Map::with_capacity(sample.labels.len() + 2);
        for (name, value) in sample.labels.iter() {
            fields.insert(name.clone(), Value::String(value.clone()));
        }
        fields.insert(VALUE_FIELD.to_string(), Value::from(sample.value));
        fields.insert(TIMESTAMP_FIELD.to_string(), Value::String(timestamp));
        Some(Self { fields })
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Non-reserved fields, in name order.
    pub fn labels(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields
            .iter()
            .filter(|(name, _)| !is_reserved(name))
    }

    pub fn value(&self) -> Result<f64> {
        match self.fields.get(VALUE_FIELD) {
            Some(Value::Number(n)) => n.as_f64().ok_or_else(|| {
                Error::MalformedDocument(format!("value '{}' is not a float", n))
            }),
            Some(other) => Err(Error::MalformedDocument(format!(
                "value field holds {}",
                other
            ))),
            None => Err(Error::MalformedDocument("missing value field".to_string())),
        }
    }

    pub fn timestamp_ms(&self) -> Result<i64> {
        match self.fields.get(TIMESTAMP_FIELD) {
            Some(Value::String(s)) => parse_timestamp(s),
            Some(Value::Number(n)) => n.as_i64().ok_or_else(|| {
                Error::MalformedDocument(format!("timestamp '{}' is not epoch millis", n))
            }),
            Some(other) => Err(Error::MalformedDocument(format!(
                "timestamp field holds {}",
                other
            ))),
            None => Err(Error::MalformedDocument(
                "missing timestamp field".to_string(),
            )),
        }
    }
}

pub fn is_reserved(field: &str) -> bool {
    field == VALUE_FIELD || field == TIMESTAMP_FIELD
}

/// RFC 3339, UTC, millisecond precision. `None` outside chrono's range.
pub fn format_timestamp(timestamp_ms: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

pub fn parse_timestamp(raw: &str) -> Result<i64> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| Error::MalformedDocument(format!("timestamp '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompb::{Label, TimeSeries};

    fn series(labels: &[(&str, &str)], samples: &[(i64, f64)]) -> TimeSeries {
        TimeSeries {
            labels: labels.iter().map(|(n, v)| Label::new(*n, *v)).collect(),
            samples: samples
                .iter()
                .map(|(t, v)| prompb::Sample {
                    value: *v,
                    timestamp: *t,
                })
                .collect(),
        }
    }

    #[test]
    fn test_samples_flatten_and_share_labels() {
        let batch = WriteBatch::new(WriteRequest {
            timeseries: vec![
                series(&[("__name__", "up"), ("job", "api")], &[(1, 1.0), (2, 0.0)]),
                series(&[("__name__", "up"), ("job", "db")], &[(3, 1.0)]),
            ],
        });

        assert_eq!(batch.len(), 3);
        let samples: Vec<Sample> = batch.samples().collect();
        assert_eq!(samples.len(), 3);
        assert!(Arc::ptr_eq(&samples[0].labels, &samples[1].labels));
        assert_eq!(samples[2].labels.get("job").map(String::as_str), Some("db"));
        assert_eq!(samples[2].timestamp_ms, 3);
    }

    #[test]
    fn test_repeated_label_keeps_last_value() {
        let batch = WriteBatch::new(WriteRequest {
            timeseries: vec![series(&[("job", "a"), ("job", "b")], &[(1, 1.0)])],
        });
        let sample = batch.samples().next().unwrap();
        assert_eq!(sample.labels.len(), 1);
        assert_eq!(sample.labels["job"], "b");
    }

    #[test]
    fn test_timestamp_format_and_parse() {
        assert_eq!(
            format_timestamp(1_200).as_deref(),
            Some("1970-01-01T00:00:01.200Z")
        );
        assert_eq!(format_timestamp(i64::MAX), None);
        assert_eq!(format_timestamp(i64::MIN), None);
        assert_eq!(parse_timestamp("1970-01-01T00:00:01.200Z").unwrap(), 1_200);
        assert_eq!(parse_timestamp("1970-01-01T01:00:01.200+01:00").unwrap(), 1_200);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_document_accessors() {
        let sample = Sample {
            labels: Arc::new(LabelSet::from([("job".to_string(), "api".to_string())])),
            value: 2.5,
            timestamp_ms: 1_500,
        };
        let doc = Document::from_sample(&sample).unwrap();
        assert_eq!(doc.value().unwrap(), 2.5);
        assert_eq!(doc.timestamp_ms().unwrap(), 1_500);
        let labels: Vec<_> = doc.labels().map(|(k, _)| k.as_str()).collect();
        assert_eq!(labels, vec!["job"]);
    }

    #[test]
    fn test_document_epoch_millis_timestamp() {
        let mut fields = Map::new();
        fields.insert(VALUE_FIELD.into(), Value::from(1.0));
        fields.insert(TIMESTAMP_FIELD.into(), Value::from(42_i64));
        assert_eq!(Document::from_fields(fields).timestamp_ms().unwrap(), 42);
    }

    #[test]
    fn test_document_missing_value_is_malformed() {
        let mut fields = Map::new();
        fields.insert(TIMESTAMP_FIELD.into(), Value::from(42_i64));
        let err = Document::from_fields(fields).value().unwrap_err();
        assert!(matches!(err, Error::MalformedDocument(_)));
    }

    #[test]
    fn test_read_query_rejects_regex_matchers() {
        let query = prompb::Query {
            start_timestamp_ms: 0,
            end_timestamp_ms: 10,
            matchers: vec![prompb::LabelMatcher {
                r#type: label_matcher::Type::Re as i32,
                name: "job".into(),
                value: "a.*".into(),
            }],
            hints: None,
        };
        let err = ReadQuery::from_wire(&query).unwrap_err();
        assert!(matches!(err, Error::UnsupportedQueryShape(_)));
    }

    #[test]
    fn test_read_query_range_is_inclusive() {
        let query = ReadQuery::new(vec![], 1000, 2000);
        assert!(query.contains(1000));
        assert!(query.contains(2000));
        assert!(!query.contains(999));
        assert!(!query.contains(2001));
    }
}
