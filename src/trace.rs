//! Per-request correlation id.
//!
//! Every request is tagged with an id read from the inbound
//! [`REQUEST_ID_HEADER`] when present and generated otherwise, and the id is
//! threaded through every log line for the request's lifetime.

use axum::http::HeaderMap;

/// Header carrying the caller-assigned correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Correlation id for a request: inbound header value, else a fresh v4 uuid.
pub fn trace_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}
