//! Snappy + protobuf envelope used by the remote storage protocol
//!
//! Requests and responses are protobuf messages compressed with the snappy
//! block format (not the framed stream format).

use crate::model::{ReadQuery, WriteBatch};
use crate::prompb::{ReadRequest, ReadResponse, WriteRequest};
use crate::{Error, Result};

use bytes::Bytes;
use prost::Message;

/// Response content type for remote read
pub const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";
/// Content encoding for every envelope
pub const SNAPPY_ENCODING: &str = "snappy";

/// Decompress a snappy block. Malformed input is `CorruptPayload`.
fn decompress(payload: &[u8]) -> Result<Vec<u8>> {
    snap::raw::Decoder::new()
        .decompress_vec(payload)
        .map_err(Error::from)
}

fn compress(raw: &[u8]) -> Result<Bytes> {
    let compressed = snap::raw::Encoder::new()
        .compress_vec(raw)
        .map_err(|e| Error::Internal(format!("snappy compression failed: {}", e)))?;
    Ok(Bytes::from(compressed))
}

/// Decode a remote write body into a batch.
pub fn decode_write(payload: &[u8]) -> Result<WriteBatch> {
    let raw = decompress(payload)?;
    let request = WriteRequest::decode(raw.as_slice())?;
    Ok(WriteBatch::new(request))
}

/// Encode a batch back into a remote write body.
pub fn encode_write(batch: &WriteBatch) -> Result<Bytes> {
    compress(&batch.request().encode_to_vec())
}

/// Decode a remote read body. Exactly one query per call is served.
pub fn decode_read(payload: &[u8]) -> Result<ReadQuery> {
    let raw = decompress(payload)?;
    let request = ReadRequest::decode(raw.as_slice())?;
    if request.queries.len() != 1 {
        return Err(Error::UnsupportedQueryShape(format!(
            "expected exactly one query per read request, found {}",
            request.queries.len()
        )));
    }
    ReadQuery::from_wire(&request.queries[0])
}

/// Encode a remote read request, as the metrics collector would send it.
pub fn encode_read_request(request: &ReadRequest) -> Result<Bytes> {
    compress(&request.encode_to_vec())
}

/// Encode a read result into a remote read response body.
pub fn encode_read(response: &ReadResponse) -> Result<Bytes> {
    compress(&response.encode_to_vec())
}

/// Decode a remote read response body.
pub fn decode_read_response(payload: &[u8]) -> Result<ReadResponse> {
    let raw = decompress(payload)?;
    Ok(ReadResponse::decode(raw.as_slice())?)
}
