//! Prometheus remote read endpoint
//!
//! POST /read, one query per request, equality matchers only. The response
//! is a snappy-compressed protobuf `ReadResponse`.

use super::{ApiError, ApiState};
use crate::codec::{self, PROTOBUF_CONTENT_TYPE, SNAPPY_ENCODING};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{CONTENT_ENCODING, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};

pub async fn handle_remote_read(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let query = codec::decode_read(&body)?;
    let response = state.reader.read(&query).await?;
    let payload = codec::encode_read(&response)?;

    Ok((
        [
            (CONTENT_TYPE, PROTOBUF_CONTENT_TYPE),
            (CONTENT_ENCODING, SNAPPY_ENCODING),
        ],
        payload,
    )
        .into_response())
}
