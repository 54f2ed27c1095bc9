//! Prometheus remote write receiver
//!
//! POST /write
//! Content-Encoding: snappy
//! Content-Type: application/x-protobuf

use super::{ApiError, ApiState};
use crate::codec;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use tracing::debug;

/// Decode, map and queue the batch, then acknowledge. The bulk call happens
/// after the response is sent; its failures never reach the caller.
pub async fn handle_remote_write(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let batch = codec::decode_write(&body)?;
    debug!(
        series = batch.series().len(),
        num_samples = batch.len(),
        "Received write request"
    );

    // Ticket dropped: fire-and-forget
    state.dispatcher.submit(batch)?;
    Ok(StatusCode::NO_CONTENT)
}
