//! # promsearch
//!
//! A Prometheus remote storage adapter that keeps samples in Elasticsearch.
//!
//! Prometheus pushes snappy-compressed protobuf batches to `/write` and asks
//! for series on `/read`. Each sample becomes one flat document in a day
//! partition named `<prefix>-YYYY-MM-DD`; reads search every partition under
//! the prefix and regroup documents into series.
//!
//! ## Architecture
//!
//! - **Write path**: [`codec`] decodes the batch, [`mapper`] turns samples
//!   into documents, [`writer`] hands them to a background dispatcher that
//!   ensures the partition and issues one bulk call. The caller is
//!   acknowledged before the bulk call completes.
//! - **Read path**: [`codec`] decodes the query, [`query`] translates it into
//!   a backend search, [`backend`] runs it, [`aggregate`] regroups the hits.
//! - **Backends**: Elasticsearch over REST (optionally SigV4-signed), or an
//!   in-process store for development.

pub mod aggregate;
pub mod api;
pub mod backend;
pub mod clock;
pub mod codec;
pub mod config;
pub mod mapper;
pub mod metrics;
pub mod model;
pub mod prompb;
pub mod query;
pub mod reader;
pub mod telemetry;
pub mod writer;

mod error;

pub use error::{Error, Result};
