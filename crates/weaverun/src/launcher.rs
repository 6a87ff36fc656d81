//! Child process launch: port selection, readiness wait, env rewrite.

use std::net::TcpListener;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use uuid::Uuid;

use crate::config::Config;
use crate::server;

const PORT_RANGE_START: u16 = 7777;
const PORT_ATTEMPTS: u16 = 100;
const READY_TIMEOUT: Duration = Duration::from_secs(10);
const SINK_DRAIN: Duration = Duration::from_secs(5);

/// Start the proxy, run the child with a rewritten environment, and return
/// the exit code to mirror. Proxy or sink trouble after startup never
/// changes the child's exit code.
pub async fn run(config: Config, command: Vec<String>, proxy_all: bool) -> i32 {
    let Some(port) = find_free_port(PORT_RANGE_START, PORT_ATTEMPTS) else {
        tracing::error!(
            start = PORT_RANGE_START,
            attempts = PORT_ATTEMPTS,
            "no free port found"
        );
        return 1;
    };

    // Preserve the user's base URL for the resolver before the child's copy
    // is pointed at the proxy. The child inherits this too.
    if let Ok(original) = std::env::var("OPENAI_BASE_URL") {
        if !original.is_empty() {
            std::env::set_var("WEAVE_ORIGINAL_OPENAI_BASE_URL", &original);
        }
    }

    // Run identity travels as sink attributes and into the child's env.
    std::env::set_var("WEAVE_RUN_ID", Uuid::new_v4().to_string());
    std::env::set_var("WEAVE_APP_NAME", &command[0]);

    let state = match server::build_state(config) {
        Ok(state) => state,
        Err(error) => {
            tracing::error!(%error, "failed to initialize proxy");
            return 1;
        }
    };
    let sink = state.sink.clone();

    tracing::info!(port, "starting proxy");
    tokio::spawn(async move {
        if let Err(error) = server::run(state, port).await {
            tracing::error!(%error, "proxy server exited");
        }
    });

    if !wait_for_port(port, READY_TIMEOUT).await {
        tracing::error!("proxy failed to start");
        return 1;
    }
    tracing::info!("proxy ready");
    tracing::info!("dashboard: http://127.0.0.1:{port}/__weaverun__");

    let exit_code = run_child(&command, port, proxy_all).await;

    sink.shutdown(SINK_DRAIN).await;

    tracing::info!(exit_code, "done");
    exit_code
}

async fn run_child(command: &[String], port: u16, proxy_all: bool) -> i32 {
    let proxy_address = format!("127.0.0.1:{port}");
    let proxy_url = format!("http://{proxy_address}");

    let mut child_cmd = tokio::process::Command::new(&command[0]);
    child_cmd.args(&command[1..]);
    // Route SDK traffic through the proxy; WEAVE_RUN_ID and WEAVE_APP_NAME
    // are inherited from this process.
    child_cmd.env("OPENAI_BASE_URL", &proxy_url);

    if proxy_all {
        // For apps that hardcode a base URL, intercept at the proxy level.
        tracing::info!("proxy mode: all HTTP traffic");
        child_cmd.env("HTTP_PROXY", &proxy_url);
        child_cmd.env("HTTPS_PROXY", &proxy_url);
        // Only the proxy itself is excluded from proxying.
        child_cmd.env("NO_PROXY", &proxy_address);
    }

    tracing::info!(command = %command.join(" "), "running");

    let mut child = match child_cmd.spawn() {
        Ok(child) => child,
        Err(error) => {
            tracing::error!(%error, command = %command[0], "failed to run command");
            return 1;
        }
    };

    tokio::select! {
        status = child.wait() => match status {
            // Terminated by a signal: report as interrupted.
            Ok(status) => status.code().unwrap_or(130),
            Err(error) => {
                tracing::error!(%error, "failed to wait for command");
                1
            }
        },
        // The terminal delivers SIGINT to the child as well; mirror the
        // conventional interrupt code without waiting for it.
        _ = tokio::signal::ctrl_c() => 130,
    }
}

fn find_free_port(start: u16, attempts: u16) -> Option<u16> {
    (start..start.saturating_add(attempts))
        .find(|port| TcpListener::bind(("127.0.0.1", *port)).is_ok())
}

async fn wait_for_port(port: u16, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .is_ok()
        {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_free_port_stays_in_range() {
        let port = find_free_port(17777, 50).expect("free port");
        assert!((17777..17827).contains(&port));
    }

    #[test]
    fn find_free_port_skips_bound_ports() {
        let holder = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let bound = holder.local_addr().expect("addr").port();
        let port = find_free_port(bound, 10).expect("free port");
        assert_ne!(port, bound);
    }

    #[tokio::test]
    async fn wait_for_port_times_out_when_nothing_listens() {
        let port = find_free_port(18900, 50).expect("free port");
        assert!(!wait_for_port(port, Duration::from_millis(120)).await);
    }

    #[tokio::test]
    async fn wait_for_port_sees_listener() {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
            .await
            .expect("bind");
        let port = listener.local_addr().expect("addr").port();
        assert!(wait_for_port(port, Duration::from_secs(1)).await);
    }
}
