//! Trace context extraction for grouping related API calls.
//!
//! Trace IDs are discovered from W3C `traceparent`, common vendor headers,
//! or request-body metadata, in that order. A fresh span ID is minted for
//! every call; a fresh trace ID only when nothing upstream supplied one.

use std::sync::LazyLock;

use axum::http::HeaderMap;
use regex::Regex;
use serde_json::Value;
use uuid::Uuid;

/// Identifiers correlating one call with its siblings and parent.
#[derive(Debug, Clone)]
pub struct TraceContext {
    /// Groups related calls (e.g. all calls for one user query). Never empty.
    pub trace_id: String,
    /// This specific call's ID.
    pub span_id: String,
    /// Parent call's span ID, when known.
    pub parent_span_id: Option<String>,
}

// W3C Trace Context: 00-{trace_id}-{parent_id}-{flags}
static W3C_TRACEPARENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9a-f]{2})-([0-9a-f]{32})-([0-9a-f]{16})-([0-9a-f]{2})$")
        .expect("static traceparent regex")
});

const TRACE_ID_HEADERS: &[&str] = &["x-trace-id", "x-request-id", "x-correlation-id", "x-b3-traceid"];
const PARENT_ID_HEADERS: &[&str] = &["x-parent-id", "x-b3-parentspanid", "x-parent-span-id"];

/// Extract trace context from request headers and (optionally) body.
pub fn extract(headers: &HeaderMap, body: Option<&Value>) -> TraceContext {
    let mut trace_id = None;
    let mut parent_span_id = None;

    // 1. W3C traceparent
    if let Some(value) = header_str(headers, "traceparent") {
        if let Some((tid, parent)) = parse_w3c_traceparent(value) {
            trace_id = Some(tid);
            parent_span_id = Some(parent);
        }
    }

    // 2. Common vendor headers
    if trace_id.is_none() {
        trace_id = TRACE_ID_HEADERS
            .iter()
            .filter_map(|name| header_str(headers, name))
            .map(|v| truncate(v, 32))
            .next();
    }

    // 3. Parent span from vendor headers
    if parent_span_id.is_none() {
        parent_span_id = PARENT_ID_HEADERS
            .iter()
            .filter_map(|name| header_str(headers, name))
            .map(|v| truncate(v, 16))
            .next();
    }

    // 4. Request body metadata
    if trace_id.is_none() {
        if let Some((tid, parent)) = body.and_then(extract_from_body) {
            trace_id = Some(tid);
            if parent_span_id.is_none() {
                parent_span_id = parent;
            }
        }
    }

    TraceContext {
        // 5. Isolated call: mint a fresh trace ID
        trace_id: trace_id.unwrap_or_else(new_trace_id),
        span_id: new_span_id(),
        parent_span_id,
    }
}

fn parse_w3c_traceparent(value: &str) -> Option<(String, String)> {
    let normalized = value.trim().to_lowercase();
    W3C_TRACEPARENT
        .captures(&normalized)
        .map(|caps| (caps[2].to_string(), caps[3].to_string()))
}

fn extract_from_body(body: &Value) -> Option<(String, Option<String>)> {
    let obj = body.as_object()?;

    let mut trace_id = None;
    let mut parent_span_id = None;

    if let Some(metadata) = obj.get("metadata").and_then(Value::as_object) {
        trace_id = ["trace_id", "traceId"]
            .iter()
            .filter_map(|k| metadata.get(*k))
            .filter_map(value_as_id)
            .next();
        parent_span_id = ["parent_id", "parentId", "span_id"]
            .iter()
            .filter_map(|k| metadata.get(*k))
            .filter_map(value_as_id)
            .map(|v| truncate(&v, 16))
            .next();
    }

    // LangChain-style run_id
    if trace_id.is_none() {
        trace_id = ["run_id", "runId"]
            .iter()
            .filter_map(|k| obj.get(*k))
            .filter_map(value_as_id)
            .next();
    }

    // Session/conversation ID as fallback trace ID
    if trace_id.is_none() {
        trace_id = [
            "session_id",
            "sessionId",
            "conversation_id",
            "conversationId",
            "thread_id",
            "threadId",
        ]
        .iter()
        .filter_map(|k| obj.get(*k))
        .filter_map(value_as_id)
        .next();
    }

    trace_id.map(|tid| (truncate(&tid, 32), parent_span_id))
}

fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn new_span_id() -> String {
    truncate(&Uuid::new_v4().simple().to_string(), 16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::try_from(*name).expect("valid header name"),
                HeaderValue::from_str(value).expect("valid header value"),
            );
        }
        map
    }

    #[test]
    fn w3c_traceparent_takes_priority() {
        let h = headers(&[
            (
                "traceparent",
                "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
            ),
            ("x-trace-id", "ignored"),
        ]);
        let ctx = extract(&h, None);
        assert_eq!(ctx.trace_id, "0af7651916cd43dd8448eb211c80319c");
        assert_eq!(ctx.parent_span_id.as_deref(), Some("b7ad6b7169203331"));
        assert_eq!(ctx.span_id.len(), 16);
        assert_ne!(ctx.span_id, "b7ad6b7169203331");
    }

    #[test]
    fn malformed_traceparent_falls_through() {
        let h = headers(&[("traceparent", "not-a-traceparent"), ("x-trace-id", "abc123")]);
        let ctx = extract(&h, None);
        assert_eq!(ctx.trace_id, "abc123");
    }

    #[test]
    fn vendor_headers_in_order() {
        let h = headers(&[("x-request-id", "req-1"), ("x-correlation-id", "corr-1")]);
        let ctx = extract(&h, None);
        assert_eq!(ctx.trace_id, "req-1");
    }

    #[test]
    fn header_ids_are_truncated() {
        let long = "a".repeat(64);
        let h = headers(&[("x-trace-id", &long), ("x-parent-id", &long)]);
        let ctx = extract(&h, None);
        assert_eq!(ctx.trace_id.len(), 32);
        assert_eq!(ctx.parent_span_id.map(|p| p.len()), Some(16));
    }

    #[test]
    fn body_metadata_trace_id() {
        let body = json!({"metadata": {"trace_id": "t-1", "parent_id": "p-1"}});
        let ctx = extract(&HeaderMap::new(), Some(&body));
        assert_eq!(ctx.trace_id, "t-1");
        assert_eq!(ctx.parent_span_id.as_deref(), Some("p-1"));
    }

    #[test]
    fn body_run_id_and_session_fallbacks() {
        let body = json!({"run_id": "run-7"});
        let ctx = extract(&HeaderMap::new(), Some(&body));
        assert_eq!(ctx.trace_id, "run-7");

        let body = json!({"conversation_id": "conv-9"});
        let ctx = extract(&HeaderMap::new(), Some(&body));
        assert_eq!(ctx.trace_id, "conv-9");
    }

    #[test]
    fn header_trace_id_beats_body() {
        let h = headers(&[("x-trace-id", "from-header")]);
        let body = json!({"metadata": {"trace_id": "from-body"}});
        let ctx = extract(&h, Some(&body));
        assert_eq!(ctx.trace_id, "from-header");
    }

    #[test]
    fn generated_ids_when_nothing_found() {
        let ctx = extract(&HeaderMap::new(), None);
        assert_eq!(ctx.trace_id.len(), 32);
        assert!(ctx.trace_id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(ctx.span_id.len(), 16);
        assert!(ctx.parent_span_id.is_none());

        let other = extract(&HeaderMap::new(), None);
        assert_ne!(ctx.trace_id, other.trace_id);
    }
}
