//! Streaming forwarding.
//!
//! Chunks are relayed to the client verbatim the moment they arrive; a copy
//! accumulates on the side and the logical response is reconstructed only at
//! end-of-stream. The pre-logged record is finalized even when the client
//! disconnects mid-stream.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_core::Stream;
use serde_json::{json, Value};

use super::{Capture, HOP_BY_HOP_HEADERS, REQUEST_SKIP_HEADERS};
use crate::dashboard::store::{LogStore, NewEntry};
use crate::server::AppState;
use crate::sink::{SinkTask, SinkWorker};

/// Forward a streaming request and relay the response chunk by chunk.
pub async fn forward_streaming(
    state: Arc<AppState>,
    method: Method,
    upstream_url: String,
    headers: HeaderMap,
    body: Bytes,
    capture: Option<Capture>,
) -> Response {
    // Pre-log so the dashboard shows the call while chunks are in flight.
    // Status and latency are provisional until end-of-stream.
    let pending = capture.map(|capture| {
        let debug = state.config.debug;
        let entry_id = state.store.add(NewEntry {
            path: capture.api_path.clone(),
            model: capture.model.clone(),
            status_code: 200,
            latency_ms: 0.0,
            upstream: capture.upstream_url.clone(),
            trace_pending: !debug,
            request_body: capture.request_body.clone(),
            response_body: Some(json!({"_streaming": true, "_status": "in_progress"})),
            provider: Some(capture.provider.clone()),
            trace: capture.trace.clone(),
            debug_mode: debug,
        });
        PendingRecord {
            store: state.store.clone(),
            sink: state.sink.clone(),
            debug,
            entry_id,
            capture,
        }
    });

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
        Err(error) => {
            let status = if error.is_timeout() {
                StatusCode::GATEWAY_TIMEOUT
            } else {
                StatusCode::BAD_GATEWAY
            };
            let message = error.to_string();
            tracing::error!(error = %message, url = %upstream_url, "streaming upstream request failed");
            if let Some(pending) = pending {
                let elapsed = elapsed_ms(start);
                pending.finalize(json!({"error": message}), status.as_u16(), elapsed);
            }
            // The client asked for a stream: emit one terminal SSE error
            // frame so its parser sees the failure.
            return sse_error_response(status, &message);
        }
    };

    let status = upstream_resp.status();
    let resp_headers = upstream_resp.headers().clone();

    let tee = TeeStream {
        inner: Box::pin(upstream_resp.bytes_stream()),
        capturing: pending.is_some(),
        pending,
        buffer: Vec::new(),
        status: status.as_u16(),
        start,
        ttfb_ms: None,
        done: false,
    };

    let mut response_builder = Response::builder()
        .status(StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY));
    for (name, value) in resp_headers.iter() {
        if HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
            continue;
        }
        response_builder = response_builder.header(name, value);
    }

    response_builder
        .body(Body::from_stream(tee))
        .unwrap_or_else(|error| {
            tracing::error!(%error, "failed to build response");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        })
}

/// The pre-logged record plus everything needed to finalize it once.
struct PendingRecord {
    store: Arc<LogStore>,
    sink: Arc<SinkWorker>,
    debug: bool,
    entry_id: String,
    capture: Capture,
}

impl PendingRecord {
    fn finalize(self, response_body: Value, status_code: u16, ttfb_ms: f64) {
        self.store.update_entry(
            &self.entry_id,
            Some(response_body.clone()),
            Some(ttfb_ms),
            Some(status_code),
        );

        if !self.debug {
            let store = self.store;
            let entry_id = self.entry_id;
            let response = if response_body.is_null() {
                None
            } else {
                Some(response_body)
            };
            self.sink.enqueue(SinkTask {
                path: self.capture.api_path,
                upstream: self.capture.upstream_url,
                provider: Some(self.capture.provider),
                model: self.capture.model,
                status_code,
                latency_ms: ttfb_ms,
                request_body: self.capture.request_body,
                response_body: response,
                trace: self.capture.trace,
                callback: Box::new(move |url| store.update_trace_url(&entry_id, url)),
            });
        }
    }
}

/// Passes chunks through unchanged while accumulating a copy. On stream end
/// (or error, or drop) the captured record is finalized exactly once.
struct TeeStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    capturing: bool,
    pending: Option<PendingRecord>,
    buffer: Vec<u8>,
    status: u16,
    start: Instant,
    ttfb_ms: Option<f64>,
    done: bool,
}

impl TeeStream {
    fn finalize(&mut self, error: Option<String>) {
        self.done = true;
        let Some(pending) = self.pending.take() else {
            return;
        };

        let ttfb_ms = self.ttfb_ms.unwrap_or_else(|| elapsed_ms(self.start));
        let total_ms = elapsed_ms(self.start);
        let response_body = match (aggregate_sse(&self.buffer, ttfb_ms, total_ms), error) {
            (Some(reconstructed), _) => reconstructed,
            (None, Some(message)) => json!({"error": message}),
            (None, None) => Value::Null,
        };

        pending.finalize(response_body, self.status, ttfb_ms);
    }
}

impl Stream for TeeStream {
    type Item = Result<Bytes, std::convert::Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if self.ttfb_ms.is_none() {
                    self.ttfb_ms = Some(elapsed_ms(self.start));
                }
                if self.capturing {
                    self.buffer.extend_from_slice(&chunk);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(error))) => {
                let message = error.to_string();
                tracing::error!(error = %message, "upstream stream failed mid-response");
                self.finalize(Some(message.clone()));
                // Terminal SSE frame instead of an abrupt close.
                Poll::Ready(Some(Ok(error_frame(&message))))
            }
            Poll::Ready(None) => {
                self.finalize(None);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for TeeStream {
    fn drop(&mut self) {
        // Client disconnected mid-stream: finalize with what was captured.
        if self.pending.is_some() {
            self.finalize(None);
        }
    }
}

/// Reconstruct a chat-completion object from accumulated SSE bytes.
///
/// `data:` lines are parsed as JSON ([DONE] and malformed events are
/// skipped); `choices[*].delta.content` fragments concatenate in order.
/// Returns None when neither an event id nor any content was recovered.
pub(crate) fn aggregate_sse(raw: &[u8], ttfb_ms: f64, total_ms: f64) -> Option<Value> {
    let text = String::from_utf8_lossy(raw);

    let mut id: Option<String> = None;
    let mut model: Option<String> = None;
    let mut content = String::new();
    let mut finish_reason: Option<String> = None;
    let mut usage: Option<Value> = None;

    for line in text.lines() {
        let Some(payload) = line.strip_prefix("data: ") else {
            continue;
        };
        let payload = payload.trim();
        if payload == "[DONE]" {
            continue;
        }
        let Ok(event) = serde_json::from_str::<Value>(payload) else {
            continue;
        };

        if id.is_none() {
            id = event.get("id").and_then(Value::as_str).map(str::to_string);
        }
        if model.is_none() {
            model = event.get("model").and_then(Value::as_str).map(str::to_string);
        }
        if let Some(choices) = event.get("choices").and_then(Value::as_array) {
            for choice in choices {
                if let Some(fragment) = choice
                    .get("delta")
                    .and_then(|d| d.get("content"))
                    .and_then(Value::as_str)
                {
                    content.push_str(fragment);
                }
                if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
                    finish_reason = Some(reason.to_string());
                }
            }
        }
        if let Some(u) = event.get("usage") {
            if !u.is_null() {
                usage = Some(u.clone());
            }
        }
    }

    if id.is_none() && content.is_empty() {
        return None;
    }

    Some(json!({
        "id": id,
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": finish_reason,
        }],
        "usage": usage,
        "_streamed": true,
        "_ttfb_ms": round_ms(ttfb_ms),
        "_total_ms": round_ms(total_ms),
    }))
}

fn error_frame(message: &str) -> Bytes {
    let payload = json!({"error": message});
    Bytes::from(format!("data: {payload}\n\n"))
}

fn sse_error_response(status: StatusCode, message: &str) -> Response {
    Response::builder()
        .status(status)
        .header("content-type", "text/event-stream")
        .body(Body::from(error_frame(message)))
        .unwrap_or_else(|error| {
            tracing::error!(%error, "failed to build response");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        })
}

fn round_ms(ms: f64) -> f64 {
    (ms * 10.0).round() / 10.0
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
