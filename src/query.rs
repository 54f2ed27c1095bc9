//! Read query to backend search translation
//!
//! A read query becomes a bool query: one `term` clause per matcher under
//! `must`, and an inclusive `range` on `timestamp` under `filter`. Results
//! are sorted ascending by timestamp and capped at the page size; there is
//! no pagination past the cap.

use crate::model::{Matcher, ReadQuery, TIMESTAMP_FIELD};

use serde_json::{json, Value};

/// Default result cap per read call
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Backend-native search request built from a read query.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendQuery {
    /// Equality clauses in canonical (name, value) order
    terms: Vec<Matcher>,
    start_ms: i64,
    end_ms: i64,
    size: usize,
}

impl BackendQuery {
    pub fn terms(&self) -> &[Matcher] {
        &self.terms
    }

    /// Inclusive timestamp bounds, epoch millis.
    pub fn range(&self) -> (i64, i64) {
        (self.start_ms, self.end_ms)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether a document with these fields satisfies every clause.
    pub fn matches(&self, fields: &serde_json::Map<String, Value>, timestamp_ms: i64) -> bool {
        if timestamp_ms < self.start_ms || timestamp_ms > self.end_ms {
            return false;
        }
        self.terms.iter().all(|m| {
            fields
                .get(&m.name)
                .and_then(Value::as_str)
                .is_some_and(|v| v == m.value)
        })
    }

    /// Search body in the Elasticsearch query DSL.
    pub fn to_json(&self) -> Value {
        let must: Vec<Value> = self
            .terms
            .iter()
            .map(|m| json!({ "term": { m.name.as_str(): m.value.as_str() } }))
            .collect();

        json!({
            "query": {
                "bool": {
                    "must": must,
                    "filter": [{
                        "range": {
                            TIMESTAMP_FIELD: {
                                "gte": self.start_ms,
                                "lte": self.end_ms,
                                "format": "epoch_millis"
                            }
                        }
                    }]
                }
            },
            "size": self.size,
            "sort": [{ TIMESTAMP_FIELD: { "order": "asc" } }]
        })
    }
}

/// Builds backend queries with a fixed page size.
#[derive(Debug, Clone)]
pub struct QueryTranslator {
    page_size: usize,
}

impl Default for QueryTranslator {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl QueryTranslator {
    pub fn with_page_size(page_size: usize) -> Self {
        Self { page_size }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn build(&self, query: &ReadQuery) -> BackendQuery {
        let mut terms = query.matchers.clone();
        terms.sort();
        terms.dedup();

        BackendQuery {
            terms,
            start_ms: query.start_ms,
            end_ms: query.end_ms,
            size: self.page_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(matchers: &[(&str, &str)], start: i64, end: i64) -> ReadQuery {
        ReadQuery::new(
            matchers.iter().map(|(n, v)| Matcher::new(*n, *v)).collect(),
            start,
            end,
        )
    }

    #[test]
    fn test_one_term_per_matcher_plus_one_range() {
        let q = QueryTranslator::default().build(&query(
            &[("__name__", "up"), ("job", "api"), ("instance", "a:9100")],
            1000,
            2000,
        ));
        let body = q.to_json();

        assert_eq!(body["query"]["bool"]["must"].as_array().unwrap().len(), 3);
        let filter = body["query"]["bool"]["filter"].as_array().unwrap();
        assert_eq!(filter.len(), 1);
        assert_eq!(filter[0]["range"]["timestamp"]["gte"], 1000);
        assert_eq!(filter[0]["range"]["timestamp"]["lte"], 2000);
        assert_eq!(body["size"], 1000);
        assert_eq!(body["sort"][0]["timestamp"]["order"], "asc");
    }

    #[test]
    fn test_matcher_order_does_not_change_query() {
        let translator = QueryTranslator::default();
        let a = translator.build(&query(&[("job", "api"), ("env", "prod")], 0, 10));
        let b = translator.build(&query(&[("env", "prod"), ("job", "api")], 0, 10));
        assert_eq!(a, b);
        assert_eq!(a.to_json(), b.to_json());
    }

    #[test]
    fn test_no_matchers_is_range_only() {
        let q = QueryTranslator::default().build(&query(&[], 5, 6));
        let body = q.to_json();
        assert!(body["query"]["bool"]["must"].as_array().unwrap().is_empty());
        assert_eq!(q.range(), (5, 6));
    }

    #[test]
    fn test_custom_page_size() {
        let q = QueryTranslator::with_page_size(25).build(&query(&[], 0, 1));
        assert_eq!(q.size(), 25);
        assert_eq!(q.to_json()["size"], 25);
    }

    #[test]
    fn test_matches_is_inclusive_on_both_bounds() {
        let q = QueryTranslator::default().build(&query(&[("job", "api")], 1000, 2000));
        let mut fields = serde_json::Map::new();
        fields.insert("job".into(), Value::from("api"));

        assert!(q.matches(&fields, 1000));
        assert!(q.matches(&fields, 2000));
        assert!(!q.matches(&fields, 999));
        assert!(!q.matches(&fields, 2001));

        fields.insert("job".into(), Value::from("db"));
        assert!(!q.matches(&fields, 1500));
    }
}
