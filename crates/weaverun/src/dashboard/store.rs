//! In-memory log ring and dashboard event fan-out.
//!
//! The store owns every record; all mutation goes through its methods so
//! subscribers always observe `log` → `log_update` → `trace_update` in order
//! for any single record. Broadcasting never blocks: a full subscriber queue
//! drops that event, a closed one removes the subscriber.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::Local;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::trace_context::TraceContext;

/// Maximum records retained (ring and id index alike).
const MAX_ENTRIES: usize = 100;
/// Per-subscriber queue capacity; overflow drops the individual event.
const SUBSCRIBER_QUEUE: usize = 50;

/// One captured API call.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: String,
    pub method: String,
    pub path: String,
    pub model: Option<String>,
    pub status_code: u16,
    pub latency_ms: f64,
    pub upstream: String,
    pub trace_url: Option<String>,
    pub trace_pending: bool,
    pub request_body: Option<Value>,
    pub response_body: Option<Value>,
    pub provider: Option<String>,
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub debug_mode: bool,
}

/// Wire events pushed to dashboard subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardEvent {
    Log(LogEntry),
    LogUpdate(LogEntry),
    TraceUpdate {
        id: String,
        trace_url: Option<String>,
    },
}

/// Fields for a new record; the store assigns id and timestamp.
pub struct NewEntry {
    pub path: String,
    pub model: Option<String>,
    pub status_code: u16,
    pub latency_ms: f64,
    pub upstream: String,
    pub trace_pending: bool,
    pub request_body: Option<Value>,
    pub response_body: Option<Value>,
    pub provider: Option<String>,
    pub trace: TraceContext,
    pub debug_mode: bool,
}

#[derive(Default)]
struct StoreInner {
    order: VecDeque<String>,
    by_id: HashMap<String, LogEntry>,
    subscribers: Vec<mpsc::Sender<DashboardEvent>>,
}

/// Bounded FIFO of log records plus subscriber registry.
#[derive(Default)]
pub struct LogStore {
    inner: Mutex<StoreInner>,
}

impl LogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, evicting the oldest past capacity. Returns the new
    /// record's id and broadcasts a `log` event.
    pub fn add(&self, new: NewEntry) -> String {
        let id = truncate_id(&Uuid::new_v4().simple().to_string());
        let entry = LogEntry {
            id: id.clone(),
            timestamp: Local::now().format("%H:%M:%S").to_string(),
            method: "POST".to_string(),
            path: new.path,
            model: new.model,
            status_code: new.status_code,
            latency_ms: round_ms(new.latency_ms),
            upstream: new.upstream,
            trace_url: None,
            trace_pending: new.trace_pending,
            request_body: new.request_body,
            response_body: new.response_body,
            provider: new.provider,
            trace_id: new.trace.trace_id,
            span_id: new.trace.span_id,
            parent_span_id: new.trace.parent_span_id,
            debug_mode: new.debug_mode,
        };

        let Ok(mut inner) = self.inner.lock() else {
            return id;
        };
        inner.order.push_back(id.clone());
        inner.by_id.insert(id.clone(), entry.clone());
        while inner.order.len() > MAX_ENTRIES {
            if let Some(evicted) = inner.order.pop_front() {
                inner.by_id.remove(&evicted);
            }
        }

        broadcast(&mut inner, DashboardEvent::Log(entry));
        id
    }

    /// Finalize a record (end of stream): any field passed as `Some` is
    /// replaced. Broadcasts a `log_update` carrying the full record.
    pub fn update_entry(
        &self,
        id: &str,
        response_body: Option<Value>,
        latency_ms: Option<f64>,
        status_code: Option<u16>,
    ) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let Some(entry) = inner.by_id.get_mut(id) else {
            return;
        };

        if let Some(body) = response_body {
            entry.response_body = Some(body);
        }
        if let Some(latency) = latency_ms {
            entry.latency_ms = round_ms(latency);
        }
        if let Some(status) = status_code {
            entry.status_code = status;
        }
        let updated = entry.clone();

        broadcast(&mut inner, DashboardEvent::LogUpdate(updated));
    }

    /// Attach the sink's trace URL (or clear the pending marker on failure).
    /// Broadcasts a minimal `trace_update` event.
    pub fn update_trace_url(&self, id: &str, trace_url: Option<String>) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let Some(entry) = inner.by_id.get_mut(id) else {
            return;
        };

        entry.trace_url = trace_url.clone();
        entry.trace_pending = false;

        broadcast(
            &mut inner,
            DashboardEvent::TraceUpdate {
                id: id.to_string(),
                trace_url,
            },
        );
    }

    /// Register a subscriber. Returns the current ring contents (insertion
    /// order) and the live event queue; both are taken under one lock so no
    /// event is ever lost or duplicated across the boundary.
    pub fn subscribe(&self) -> (Vec<LogEntry>, mpsc::Receiver<DashboardEvent>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);

        let Ok(mut inner) = self.inner.lock() else {
            return (Vec::new(), rx);
        };
        let snapshot = inner
            .order
            .iter()
            .filter_map(|id| inner.by_id.get(id))
            .cloned()
            .collect();
        inner.subscribers.push(tx);

        (snapshot, rx)
    }

    #[cfg(test)]
    fn counts(&self) -> (usize, usize, usize) {
        let inner = self.inner.lock().expect("store lock");
        (inner.order.len(), inner.by_id.len(), inner.subscribers.len())
    }
}

fn broadcast(inner: &mut StoreInner, event: DashboardEvent) {
    inner.subscribers.retain(|tx| match tx.try_send(event.clone()) {
        Ok(()) => true,
        // Full queue: drop this event, keep the subscriber connected.
        Err(TrySendError::Full(_)) => true,
        Err(TrySendError::Closed(_)) => false,
    });
}

fn round_ms(ms: f64) -> f64 {
    (ms * 10.0).round() / 10.0
}

fn truncate_id(uuid_hex: &str) -> String {
    uuid_hex.chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_entry(path: &str) -> NewEntry {
        NewEntry {
            path: path.to_string(),
            model: Some("gpt-4o-mini".to_string()),
            status_code: 200,
            latency_ms: 12.34,
            upstream: "https://api.openai.com/v1/chat/completions".to_string(),
            trace_pending: true,
            request_body: Some(json!({"model": "gpt-4o-mini"})),
            response_body: Some(json!({"ok": true})),
            provider: Some("openai".to_string()),
            trace: TraceContext {
                trace_id: "0".repeat(32),
                span_id: "1".repeat(16),
                parent_span_id: None,
            },
            debug_mode: false,
        }
    }

    #[test]
    fn add_assigns_id_and_rounds_latency() {
        let store = LogStore::new();
        let id = store.add(new_entry("/v1/chat/completions"));
        assert_eq!(id.len(), 8);

        let (snapshot, _rx) = store.subscribe();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].latency_ms, 12.3);
        assert_eq!(snapshot[0].method, "POST");
    }

    #[test]
    fn ring_and_index_are_bounded() {
        let store = LogStore::new();
        let mut ids = Vec::new();
        for i in 0..130 {
            ids.push(store.add(new_entry(&format!("/v1/{i}"))));
        }

        let (order_len, map_len, _) = store.counts();
        assert_eq!(order_len, 100);
        assert_eq!(map_len, 100);

        let (snapshot, _rx) = store.subscribe();
        assert_eq!(snapshot.first().map(|e| e.path.as_str()), Some("/v1/30"));
        assert_eq!(snapshot.last().map(|e| e.path.as_str()), Some("/v1/129"));

        // Evicted records no longer receive updates.
        store.update_trace_url(&ids[0], Some("https://example".to_string()));
        let (snapshot, _rx) = store.subscribe();
        assert!(snapshot.iter().all(|e| e.trace_url.is_none()));
    }

    #[tokio::test]
    async fn subscriber_gets_snapshot_then_live_events() {
        let store = LogStore::new();
        store.add(new_entry("/v1/first"));

        let (snapshot, mut rx) = store.subscribe();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].path, "/v1/first");

        let id = store.add(new_entry("/v1/second"));
        store.update_entry(&id, Some(json!({"done": true})), Some(5.0), Some(201));
        store.update_trace_url(&id, None);

        match rx.recv().await {
            Some(DashboardEvent::Log(entry)) => assert_eq!(entry.path, "/v1/second"),
            other => panic!("expected log event, got {other:?}"),
        }
        match rx.recv().await {
            Some(DashboardEvent::LogUpdate(entry)) => {
                assert_eq!(entry.status_code, 201);
                assert_eq!(entry.latency_ms, 5.0);
                assert_eq!(entry.response_body, Some(json!({"done": true})));
            }
            other => panic!("expected log_update event, got {other:?}"),
        }
        match rx.recv().await {
            Some(DashboardEvent::TraceUpdate { id: event_id, trace_url }) => {
                assert_eq!(event_id, id);
                assert_eq!(trace_url, None);
            }
            other => panic!("expected trace_update event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn overflow_drops_events_but_keeps_subscriber() {
        let store = LogStore::new();
        let (_snapshot, mut rx) = store.subscribe();

        for i in 0..SUBSCRIBER_QUEUE + 10 {
            store.add(new_entry(&format!("/v1/{i}")));
        }
        let (_, _, subscriber_count) = store.counts();
        assert_eq!(subscriber_count, 1);

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_QUEUE);
    }

    #[test]
    fn dropped_subscriber_is_pruned_on_broadcast() {
        let store = LogStore::new();
        let (_snapshot, rx) = store.subscribe();
        drop(rx);

        store.add(new_entry("/v1/x"));
        let (_, _, subscriber_count) = store.counts();
        assert_eq!(subscriber_count, 0);
    }

    #[test]
    fn event_wire_format() {
        let event = DashboardEvent::TraceUpdate {
            id: "abcd1234".to_string(),
            trace_url: Some("https://wandb.ai/t".to_string()),
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "trace_update");
        assert_eq!(json["id"], "abcd1234");
        assert_eq!(json["trace_url"], "https://wandb.ai/t");

        let store = LogStore::new();
        store.add(new_entry("/v1/chat/completions"));
        let (snapshot, _rx) = store.subscribe();
        let json =
            serde_json::to_value(DashboardEvent::Log(snapshot[0].clone())).expect("serialize");
        assert_eq!(json["type"], "log");
        assert_eq!(json["path"], "/v1/chat/completions");
        assert_eq!(json["trace_pending"], true);
    }
}
