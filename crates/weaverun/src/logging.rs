//! Stderr logging setup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber: env-filtered, stderr only, so the
/// child command owns stdout. `WEAVERUN_LOG` controls verbosity.
pub fn init() {
    let env_filter = EnvFilter::try_from_env("WEAVERUN_LOG")
        .unwrap_or_else(|_| EnvFilter::new("warn,weaverun=info"));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(env_filter)
        .init();
}
