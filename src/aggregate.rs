//! Flat backend documents to label-keyed time series
//!
//! Documents arrive sorted ascending by timestamp (the translated query asks
//! for that), so samples are appended in input order and never re-sorted:
//! re-sorting could reorder equal-timestamp samples.
//!
//! # Grouping key
//!
//! `LabelPairs` keys a series on its sorted `(name, value)` pairs, so documents
//! whose label *names* differ never merge. `ValuesOnly` keys on the sorted,
//! comma-joined label values alone; two documents with the same values under
//! different names collide into one series. It exists for compatibility with
//! indexes read by older adapters that relied on that behavior.

use crate::model::Document;
use crate::prompb::{Label, Sample, TimeSeries};
use crate::{Error, Result};

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

/// How documents are assigned to series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingMode {
    #[default]
    #[serde(alias = "labels")]
    LabelPairs,
    #[serde(alias = "values")]
    ValuesOnly,
}

impl std::str::FromStr for GroupingMode {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "labels" | "label_pairs" => Ok(Self::LabelPairs),
            "values" | "values_only" => Ok(Self::ValuesOnly),
            other => Err(format!(
                "unknown grouping mode '{}'; expected one of labels, values",
                other
            )),
        }
    }
}

fn label_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Identity of a series under a grouping mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupKey {
    /// Sorted `(name, value)` pairs
    Pairs(Vec<(String, String)>),
    /// Sorted label values joined with `,`
    Values(String),
}

/// Compute the grouping key of a document under `mode`.
pub fn grouping_key(document: &Document, mode: GroupingMode) -> GroupKey {
    match mode {
        GroupingMode::LabelPairs => {
            let mut pairs: Vec<(String, String)> = document
                .labels()
                .map(|(name, value)| (name.clone(), label_value(value)))
                .collect();
            pairs.sort();
            GroupKey::Pairs(pairs)
        }
        GroupingMode::ValuesOnly => {
            let mut values: Vec<String> = document.labels().map(|(_, v)| label_value(v)).collect();
            values.sort();
            GroupKey::Values(values.join(","))
        }
    }
}

/// Groups search hits into remote read time series.
#[derive(Debug, Clone, Default)]
pub struct ResultAggregator {
    mode: GroupingMode,
}

impl ResultAggregator {
    pub fn new(mode: GroupingMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> GroupingMode {
        self.mode
    }

    /// Group documents into series. Zero documents is `NoDataFound`.
    ///
    /// Series are emitted in the order their first document was seen; labels
    /// within a series are sorted by name.
    pub fn group<I>(&self, documents: I) -> Result<Vec<TimeSeries>>
    where
        I: IntoIterator<Item = Document>,
    {
        let mut index: HashMap<GroupKey, usize> = HashMap::new();
        let mut series: Vec<TimeSeries> = Vec::new();

        for document in documents {
            let timestamp = document.timestamp_ms()?;
            let value = document.value()?;
            let key = grouping_key(&document, self.mode);

            let slot = *index.entry(key).or_insert_with(|| {
                series.push(TimeSeries {
                    labels: document
                        .labels()
                        .map(|(name, value)| Label::new(name.clone(), label_value(value)))
                        .collect(),
                    samples: Vec::new(),
                });
                series.len() - 1
            });

            series[slot].samples.push(Sample { value, timestamp });
        }

        if series.is_empty() {
            return Err(Error::NoDataFound);
        }
        Ok(series)
    }
}
