//! Signal Sentry - gateway signal monitor.
//!
//! Polls a cellular home gateway for radio telemetry, pairs each reading
//! with continuously sampled ping statistics, and analyzes the logged history.

mod cli;
mod config;
mod db;
mod gateway;
mod probe;
mod render;
mod report;
mod scheduler;
mod stats;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = cli::Cli::parse();

    // Initialize logging
    let directive = if cli.verbose {
        "signal_sentry=debug"
    } else {
        "signal_sentry=info"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    cli::run(cli).await
}
