//! Non-streaming forwarding.
//!
//! The full response is buffered, mirrored into the log store and sink when
//! the call is capturable, and returned to the client with hop-by-hop
//! headers stripped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde_json::Value;

use super::{Capture, HOP_BY_HOP_HEADERS, REQUEST_SKIP_HEADERS};
use crate::dashboard::store::NewEntry;
use crate::server::AppState;
use crate::sink::SinkTask;

static WARNED_TIMEOUT: AtomicBool = AtomicBool::new(false);
static WARNED_CONNECT: AtomicBool = AtomicBool::new(false);
static WARNED_FAILURE: AtomicBool = AtomicBool::new(false);

/// Forward one request upstream and return the buffered response.
pub async fn forward(
    state: Arc<AppState>,
    method: Method,
    upstream_url: String,
    headers: HeaderMap,
    body: Bytes,
    capture: Option<Capture>,
) -> Response {
    let start = Instant::now();

    let mut req_builder = state.client.request(method, &upstream_url).body(body);
    for (name, value) in headers.iter() {
        if REQUEST_SKIP_HEADERS.contains(&name.as_str())
            || HOP_BY_HOP_HEADERS.contains(&name.as_str())
        {
            continue;
        }
        req_builder = req_builder.header(name, value);
    }

    let upstream_resp = match req_builder.send().await {
        Ok(resp) => resp,
        Err(error) => return upstream_error_response(&error),
    };

    let status = upstream_resp.status();
    let resp_headers = upstream_resp.headers().clone();
    let content = match upstream_resp.bytes().await {
        Ok(bytes) => bytes,
        Err(error) => return upstream_error_response(&error),
    };
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

    if let Some(capture) = capture {
        record_capture(&state, capture, status.as_u16(), latency_ms, &content);
    }

    let mut response_builder = Response::builder()
        .status(StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY));
    for (name, value) in resp_headers.iter() {
        if HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
            continue;
        }
        response_builder = response_builder.header(name, value);
    }

    response_builder.body(Body::from(content)).unwrap_or_else(|error| {
        tracing::error!(%error, "failed to build response");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
    })
}

/// Add the log record and queue the sink task. The sink callback closes
/// over the record id only, never the record itself.
fn record_capture(
    state: &Arc<AppState>,
    capture: Capture,
    status_code: u16,
    latency_ms: f64,
    response_bytes: &[u8],
) {
    let response_body: Option<Value> = serde_json::from_slice(response_bytes).ok();
    let debug = state.config.debug;

    let entry_id = state.store.add(NewEntry {
        path: capture.api_path.clone(),
        model: capture.model.clone(),
        status_code,
        latency_ms,
        upstream: capture.upstream_url.clone(),
        trace_pending: !debug,
        request_body: capture.request_body.clone(),
        response_body: response_body.clone(),
        provider: Some(capture.provider.clone()),
        trace: capture.trace.clone(),
        debug_mode: debug,
    });

    if !debug {
        let store = state.store.clone();
        state.sink.enqueue(SinkTask {
            path: capture.api_path,
            upstream: capture.upstream_url,
            provider: Some(capture.provider),
            model: capture.model,
            status_code,
            latency_ms,
            request_body: capture.request_body,
            response_body,
            trace: capture.trace,
            callback: Box::new(move |url| store.update_trace_url(&entry_id, url)),
        });
    }
}

/// Map an upstream failure to the client-facing status. Each failure kind
/// logs once per process; no record is added for failed attempts.
fn upstream_error_response(error: &reqwest::Error) -> Response {
    if error.is_timeout() {
        if !WARNED_TIMEOUT.swap(true, Ordering::Relaxed) {
            tracing::error!(%error, "upstream timeout");
        }
        return (StatusCode::GATEWAY_TIMEOUT, "Upstream timeout").into_response();
    }
    if error.is_connect() {
        if !WARNED_CONNECT.swap(true, Ordering::Relaxed) {
            tracing::error!(%error, "upstream connection failed");
        }
        return (StatusCode::BAD_GATEWAY, "Connection failed").into_response();
    }
    if !WARNED_FAILURE.swap(true, Ordering::Relaxed) {
        tracing::error!(%error, "upstream request failed");
    }
    (StatusCode::BAD_GATEWAY, "Request failed").into_response()
}
