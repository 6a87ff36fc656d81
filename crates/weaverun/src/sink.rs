//! Background Weave sink worker.
//!
//! A bounded queue feeds a small worker pool so slow sink I/O never blocks
//! or head-of-line-delays the wire path. The Weave client is initialized
//! lazily on the first task; a failed initialization is sticky for the life
//! of the process. Every warning here fires at most once per process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use weave_client::{resolve_project, CallRecord, WeaveClient};

use crate::trace_context::TraceContext;

const QUEUE_CAPACITY: usize = 1000;
const WORKER_COUNT: usize = 2;

/// Receives the sink's display URL (or None on failure); fires exactly once.
pub type TraceCallback = Box<dyn FnOnce(Option<String>) + Send + Sync + 'static>;

/// Snapshot of one captured call, queued for out-of-band submission.
pub struct SinkTask {
    pub path: String,
    pub upstream: String,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub status_code: u16,
    pub latency_ms: f64,
    pub request_body: Option<serde_json::Value>,
    pub response_body: Option<serde_json::Value>,
    pub trace: TraceContext,
    pub callback: TraceCallback,
}

struct SinkShared {
    client: OnceCell<Option<Arc<WeaveClient>>>,
    warned_failure: AtomicBool,
}

/// Bounded task queue consumed by a small worker pool.
pub struct SinkWorker {
    tx: Mutex<Option<mpsc::Sender<SinkTask>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    warned_full: AtomicBool,
}

impl SinkWorker {
    /// Start the worker pool.
    pub fn start() -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let shared = Arc::new(SinkShared {
            client: OnceCell::new(),
            warned_failure: AtomicBool::new(false),
        });

        let handles = (0..WORKER_COUNT)
            .map(|_| {
                let rx = rx.clone();
                let shared = shared.clone();
                tokio::spawn(async move {
                    loop {
                        // Hold the receiver lock only while waiting, never
                        // while submitting, so a slow call does not stall
                        // the other worker.
                        let task = { rx.lock().await.recv().await };
                        let Some(task) = task else { break };
                        let url = submit(&shared, &task).await;
                        (task.callback)(url);
                    }
                })
            })
            .collect();

        Self {
            tx: Mutex::new(Some(tx)),
            handles: Mutex::new(handles),
            warned_full: AtomicBool::new(false),
        }
    }

    /// Queue a task. O(1), never blocks. On overflow (or after shutdown) the
    /// task is dropped and its callback fired with None so the record's
    /// pending marker clears.
    pub fn enqueue(&self, task: SinkTask) {
        let rejected = match self.tx.lock() {
            Ok(guard) => match guard.as_ref() {
                Some(tx) => match tx.try_send(task) {
                    Ok(()) => None,
                    Err(TrySendError::Full(task)) | Err(TrySendError::Closed(task)) => Some(task),
                },
                None => Some(task),
            },
            Err(_) => return,
        };

        if let Some(task) = rejected {
            if !self.warned_full.swap(true, Ordering::Relaxed) {
                tracing::warn!("sink queue full, dropping task");
            }
            (task.callback)(None);
        }
    }

    /// Close the queue, wait up to `drain` for queued tasks to finish, then
    /// stop the workers.
    pub async fn shutdown(&self, drain: Duration) {
        let tx = match self.tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        drop(tx);

        let handles = match self.handles.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => Vec::new(),
        };

        let deadline = Instant::now() + drain;
        for mut handle in handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                handle.abort();
            }
        }
    }

    #[cfg(test)]
    fn for_tests(capacity: usize) -> (Self, mpsc::Receiver<SinkTask>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx: Mutex::new(Some(tx)),
                handles: Mutex::new(Vec::new()),
                warned_full: AtomicBool::new(false),
            },
            rx,
        )
    }
}

/// Submit one task to Weave. Returns the call's UI URL when available.
async fn submit(shared: &SinkShared, task: &SinkTask) -> Option<String> {
    let client = shared
        .client
        .get_or_init(|| async {
            let Some(project) = resolve_project() else {
                tracing::warn!(
                    "Weave logging disabled (set WEAVE_PROJECT, WEAVE_PROJECT_ID, or WANDB_PROJECT_ID)"
                );
                return None;
            };
            match WeaveClient::new(&project) {
                Ok(client) => Some(Arc::new(client)),
                Err(error) => {
                    tracing::warn!(%error, "Weave init failed");
                    None
                }
            }
        })
        .await
        .clone()?;

    let record = CallRecord {
        op_name: op_name(task.provider.as_deref(), &task.path),
        inputs: json!({
            "path": task.path,
            "model": task.model,
            "request": task.request_body,
        }),
        output: json!({
            "status_code": task.status_code,
            "response": task.response_body,
        }),
        attributes: json!({
            "upstream": task.upstream,
            "latency_ms": task.latency_ms,
            "trace_id": task.trace.trace_id,
            "span_id": task.trace.span_id,
            "parent_span_id": task.trace.parent_span_id,
            "run_id": std::env::var("WEAVE_RUN_ID").ok(),
            "app": std::env::var("WEAVE_APP_NAME").ok(),
        }),
    };

    match client.log_call(record).await {
        Ok(url) => url,
        Err(error) => {
            if !shared.warned_failure.swap(true, Ordering::Relaxed) {
                tracing::warn!(%error, "Weave logging failed");
            }
            None
        }
    }
}

fn op_name(provider: Option<&str>, path: &str) -> String {
    format!("{}{path}", provider.unwrap_or("openai"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(fired: Arc<Mutex<Vec<Option<String>>>>) -> SinkTask {
        SinkTask {
            path: "/v1/chat/completions".to_string(),
            upstream: "https://api.openai.com/v1/chat/completions".to_string(),
            provider: Some("openai".to_string()),
            model: None,
            status_code: 200,
            latency_ms: 1.0,
            request_body: None,
            response_body: None,
            trace: TraceContext {
                trace_id: "0".repeat(32),
                span_id: "1".repeat(16),
                parent_span_id: None,
            },
            callback: Box::new(move |url| {
                if let Ok(mut calls) = fired.lock() {
                    calls.push(url);
                }
            }),
        }
    }

    #[test]
    fn op_name_combines_provider_and_path() {
        assert_eq!(
            op_name(Some("ollama"), "/api/chat"),
            "ollama/api/chat"
        );
        assert_eq!(
            op_name(None, "/v1/chat/completions"),
            "openai/v1/chat/completions"
        );
    }

    #[tokio::test]
    async fn overflow_drops_task_and_clears_pending() {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let (worker, _rx) = SinkWorker::for_tests(1);

        worker.enqueue(task(fired.clone()));
        worker.enqueue(task(fired.clone()));

        let calls = fired.lock().expect("lock");
        // First task sits in the queue untouched; the overflow task's
        // callback fired with None.
        assert_eq!(calls.as_slice(), &[None]);
    }

    #[tokio::test]
    async fn enqueue_after_shutdown_fires_callback() {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let (worker, rx) = SinkWorker::for_tests(8);
        drop(rx);
        worker.shutdown(Duration::from_millis(10)).await;

        worker.enqueue(task(fired.clone()));
        let calls = fired.lock().expect("lock");
        assert_eq!(calls.as_slice(), &[None]);
    }
}
