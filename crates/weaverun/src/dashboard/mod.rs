//! Dashboard endpoints: live log viewer, SSE stream, config snapshot.

pub mod store;

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::header::{HeaderName, CACHE_CONTROL};
use axum::response::sse::{Event, Sse};
use axum::response::{Html, IntoResponse};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::server::AppState;
use store::DashboardEvent;

static DASHBOARD_HTML: &str = include_str!("page.html");

/// GET /__weaverun__ — the live log viewer.
pub async fn page() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

/// GET /__weaverun__/events — SSE stream of `log`, `log_update`, and
/// `trace_update` events. The current ring is replayed first, in insertion
/// order.
pub async fn events(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (snapshot, rx) = state.store.subscribe();

    let backlog = tokio_stream::iter(snapshot.into_iter().map(DashboardEvent::Log));
    let stream = backlog.chain(ReceiverStream::new(rx)).map(|event| {
        let payload = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok::<_, Infallible>(Event::default().data(payload))
    });

    (
        [
            (CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(stream),
    )
}

/// GET /__weaverun__/config — effective configuration, safe fields only.
pub async fn config_snapshot(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(state.config.snapshot())
}
