//! weaverun: wrap a command and mirror its LLM API calls to a live
//! dashboard and Weave, while forwarding every byte unchanged.

mod config;
mod dashboard;
mod launcher;
mod logging;
mod providers;
mod proxy;
mod server;
mod sink;
mod trace_context;
mod upstream;

use std::process::ExitCode;

const USAGE: &str = "usage: weaverun run [--proxy-all|-p] -- <command> [args...]";

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.first().map(String::as_str) != Some("run") {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    }

    let mut proxy_all = false;
    let mut command: Vec<String> = Vec::new();
    let mut passthrough = false;
    for arg in &args[1..] {
        if passthrough {
            command.push(arg.clone());
            continue;
        }
        match arg.as_str() {
            "--" => passthrough = true,
            "--proxy-all" | "-p" => proxy_all = true,
            // Unknown flags belong to the child command.
            _ => command.push(arg.clone()),
        }
    }

    if command.is_empty() {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("weaverun: failed to start runtime: {error}");
            return ExitCode::from(1);
        }
    };

    let exit_code = runtime.block_on(async {
        logging::init();
        let config = config::load_config();
        launcher::run(config, command, proxy_all).await
    });

    ExitCode::from(exit_code.clamp(0, 255) as u8)
}
