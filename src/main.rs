//! bootymapper: a high-concurrency TCP banner grabber
//!
//! Reads target IPv4 addresses from stdin and, bounded by a concurrency
//! ceiling, connects to each on a fixed port, optionally sends a
//! templated request, and reports the response (or whatever a
//! search pattern matched within it) to stdout.

mod config;
mod counters;
mod emitter;
mod matcher;
mod runtime;

use clap::Parser;
use config::{CliArgs, Config};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    let args = CliArgs::parse();

    let config = match Config::resolve(args) {
        Ok(c) => c,
        Err(e) => {
            // Logging isn't initialized yet; a startup config failure
            // goes straight to stderr.
            eprintln!("bootymapper: {e}");
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter_directive()));
    // Match lines are the only thing allowed on stdout; every log line,
    // including the periodic status line, goes to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = runtime::fd_limit::raise_nofile_limit() {
        error!(error = %e, "could not raise the open-file-descriptor limit");
        std::process::exit(1);
    }

    info!(
        started = %chrono::Local::now().to_rfc3339(),
        port = config.port,
        concurrent = config.concurrent,
        pattern = config.matcher.pattern().unwrap_or("<none>"),
        "starting scan"
    );

    if let Err(e) = runtime::run(&config) {
        error!(error = %e, "scan aborted");
        std::process::exit(1);
    }
}
