//! Axum HTTP server: shared state, router, listener.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;

use crate::config::Config;
use crate::dashboard;
use crate::dashboard::store::LogStore;
use crate::proxy;
use crate::sink::SinkWorker;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(90);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared application state, bound to the server lifetime.
pub struct AppState {
    pub config: Config,
    pub client: reqwest::Client,
    pub store: Arc<LogStore>,
    pub sink: Arc<SinkWorker>,
}

/// Build the shared state: one upstream HTTP client, the log store, and the
/// sink worker pool.
pub fn build_state(config: Config) -> anyhow::Result<AppState> {
    let client = reqwest::Client::builder()
        .timeout(UPSTREAM_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()?;

    Ok(AppState {
        config,
        client,
        store: Arc::new(LogStore::new()),
        sink: Arc::new(SinkWorker::start()),
    })
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/__weaverun__", get(dashboard::page))
        .route("/__weaverun__/events", get(dashboard::events))
        .route("/__weaverun__/config", get(dashboard::config_snapshot))
        .fallback(handle_proxy)
        .with_state(state)
}

/// Bind the local port and serve until the process exits.
pub async fn run(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    tracing::info!(port, "proxy listening");

    axum::serve(listener, router(Arc::new(state))).await?;
    Ok(())
}

/// Catch-all: every non-dashboard request is proxied upstream.
async fn handle_proxy(State(state): State<Arc<AppState>>, request: Request) -> Response {
    proxy::dispatch(state, request).await
}
