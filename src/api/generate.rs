//! `POST {base}/generate`: one generation request in, NDJSON protocol events out.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Deserialize;

use crate::intake::pipeline::run_intake_in_span;
use crate::intake::ProtocolEvent;
use crate::protocol::{DispatchAccess, HistoryMessage, ModelDescriptor};
use crate::state::AppState;

use super::router::bad_request;

const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Request body of the generate endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    pub access: DispatchAccess,
    pub model: ModelDescriptor,
    #[serde(default)]
    pub history: Vec<HistoryMessage>,
}

/// Decode the request and stream the connection's protocol events.
///
/// Failures after decoding (credentials, vendor errors, broken streams) are
/// reported in-band as an issue event on a `200` response.
pub async fn handler(state: Arc<AppState>, body: Bytes) -> Response {
    let request: GenerateRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => return bad_request(&format!("Invalid generate request: {err}")),
    };

    let connection_id = state.next_connection_id();
    let connection = tracing::info_span!(
        "connection",
        id = %connection_id,
        dialect = %request.access.dialect(),
        model = %request.model.id,
    );
    let events = run_intake_in_span(
        connection,
        Arc::clone(&state.transport),
        request.access,
        request.model,
        request.history,
    );

    let lines = events.map(|event| Ok::<_, Infallible>(encode_ndjson_line(&event)));
    stream_ok_response(
        Body::from_stream(lines),
        http::HeaderValue::from_static(NDJSON_CONTENT_TYPE),
    )
}

fn stream_ok_response(body: Body, content_type: http::HeaderValue) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(http::header::CONTENT_TYPE, content_type);
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    response
}

/// One event as a JSON line terminated by `\n`.
#[must_use]
pub fn encode_ndjson_line(event: &ProtocolEvent) -> Bytes {
    match serde_json::to_vec(event) {
        Ok(mut line) => {
            line.push(b'\n');
            Bytes::from(line)
        }
        Err(err) => {
            tracing::error!(error = %err, ?event, "failed to serialize protocol event");
            Bytes::new()
        }
    }
}
