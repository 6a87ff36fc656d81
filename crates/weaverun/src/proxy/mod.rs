//! Request dispatch: target normalization, capture decision, engine handoff.

pub mod forward;
pub mod streaming;

use std::sync::Arc;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::Value;

use crate::server::AppState;
use crate::trace_context::{self, TraceContext};
use crate::upstream;

/// RFC 2616 hop-by-hop headers (plus content-encoding): never forwarded.
pub(crate) const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "content-encoding",
];

/// Request headers recomputed on the upstream hop.
pub(crate) const REQUEST_SKIP_HEADERS: &[&str] = &["host", "content-length"];

/// Dashboard path prefix; reserved, never forwarded.
pub const RESERVED_PREFIX: &str = "/__weaverun__";

/// Everything the engines need to record one captured call.
pub(crate) struct Capture {
    pub provider: String,
    pub api_path: String,
    pub upstream_url: String,
    pub model: Option<String>,
    pub request_body: Option<Value>,
    pub trace: TraceContext,
}

/// Entry point for every proxied request.
///
/// Absolute-form targets (explicit HTTP proxy clients) are honored as-is;
/// origin-form paths go through the upstream resolver. Requests whose body
/// carries `"stream": true` hand off to the streaming engine.
pub async fn dispatch(state: Arc<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let path = parts.uri.path().to_string();
    if path.starts_with(RESERVED_PREFIX) {
        return StatusCode::NOT_FOUND.into_response();
    }

    let query = parts
        .uri
        .query()
        .map(|q| format!("?{q}"))
        .unwrap_or_default();
    let upstream_url = if parts.uri.scheme().is_some() {
        // HTTP/1.1 absolute-form request target
        parts.uri.to_string()
    } else {
        resolve_target(&path, &query)
    };

    let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(error) => {
            tracing::error!(%error, "failed to read request body");
            return (StatusCode::BAD_REQUEST, "failed to read request body").into_response();
        }
    };

    let api_path = upstream::extract_path(&upstream_url);
    let host = upstream::extract_host(&upstream_url);

    let parsed_request: Option<Value> = if body_bytes.is_empty() {
        None
    } else {
        serde_json::from_slice(&body_bytes).ok()
    };

    let capture = state.config.is_capturable(&api_path, &host).map(|provider| {
        let model = parsed_request
            .as_ref()
            .and_then(|v| v.get("model"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let trace = trace_context::extract(&parts.headers, parsed_request.as_ref());
        Capture {
            provider,
            api_path,
            upstream_url: upstream_url.clone(),
            model,
            request_body: parsed_request.clone(),
            trace,
        }
    });

    let is_streaming = parsed_request
        .as_ref()
        .and_then(|v| v.get("stream"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if is_streaming {
        streaming::forward_streaming(
            state,
            parts.method,
            upstream_url,
            parts.headers,
            body_bytes,
            capture,
        )
        .await
    } else {
        forward::forward(
            state,
            parts.method,
            upstream_url,
            parts.headers,
            body_bytes,
            capture,
        )
        .await
    }
}

/// Map an origin-form request target to the upstream URL.
fn resolve_target(path: &str, query: &str) -> String {
    // Proxy-style targets that arrive embedded in the path
    if let Some(absolute) = path
        .strip_prefix('/')
        .filter(|p| p.starts_with("http://") || p.starts_with("https://"))
    {
        return format!("{absolute}{query}");
    }
    if path.starts_with("//") {
        return format!("http:{path}{query}");
    }

    let relative = path.trim_start_matches('/');
    format!("{}{query}", upstream::resolve_upstream(relative))
}
