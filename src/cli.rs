use crate::config::{LogFormat, MonitorConfig};
use crate::db::load_samples;
use crate::gateway::GatewayClient;
use crate::probe::PingProbe;
use crate::render::{render_report, render_report_json};
use crate::report::{analyze, parse_range, FilterError, TimeFilter};
use crate::scheduler::{open_sinks, Monitor, Sampler};

use clap::{Args, Parser, Subcommand};
use std::error::Error;
use std::path::{Path, PathBuf};

type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Debug, Parser)]
#[command(
    name = "signal-sentry",
    version,
    about = "Gateway signal monitor with latency sampling and history reports"
)]
pub struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Poll the gateway and log samples (default)
    Monitor(MonitorArgs),
    /// Analyze a sample log
    Report(ReportArgs),
}

#[derive(Debug, Args, Default)]
pub struct MonitorArgs {
    /// Seconds between gateway polls
    #[arg(long)]
    pub interval: Option<u64>,

    /// Also log samples in this format
    #[arg(long, value_enum)]
    pub format: Option<LogFormat>,

    /// Output file for --format
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Disable the always-on stats.log
    #[arg(long)]
    pub no_auto_log: bool,

    /// Ping target
    #[arg(long)]
    pub target: Option<String>,

    /// Gateway status URL
    #[arg(long)]
    pub router_url: Option<String>,
}

impl MonitorArgs {
    /// Overlay explicitly given flags onto `cfg`.
    pub fn apply(&self, cfg: &mut MonitorConfig) {
        if let Some(interval) = self.interval {
            cfg.refresh_interval = interval;
        }
        if let Some(format) = self.format {
            cfg.format = Some(format);
        }
        if let Some(output) = &self.output {
            cfg.output = Some(output.clone());
        }
        if self.no_auto_log {
            cfg.disable_auto_log = true;
        }
        if let Some(target) = &self.target {
            cfg.ping_target = target.clone();
        }
        if let Some(url) = &self.router_url {
            cfg.router_url = url.clone();
        }
    }
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    /// Sample log to analyze
    #[arg(default_value = "stats.log")]
    pub log: PathBuf,

    /// Only the most recent span, e.g. 2h, 30m, 1day; `max` for everything
    #[arg(long, allow_hyphen_values = true)]
    pub range: Option<String>,

    /// Start time (YYYY-MM-DD, "YYYY-MM-DD HH:MM:SS" or RFC 3339)
    #[arg(long)]
    pub start: Option<String>,

    /// End time (same formats as --start)
    #[arg(long)]
    pub end: Option<String>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

impl ReportArgs {
    /// `None` when no time option was given.
    pub fn filter(&self) -> Result<Option<TimeFilter>, FilterError> {
        if self.range.is_none() && self.start.is_none() && self.end.is_none() {
            return Ok(None);
        }
        let range = match &self.range {
            Some(r) => parse_range(r)?,
            None => None,
        };
        TimeFilter::from_inputs(self.start.as_deref(), self.end.as_deref(), range).map(Some)
    }
}

pub async fn run(cli: Cli) -> Result<(), BoxError> {
    match cli.command {
        Some(Command::Report(args)) => run_report(&args),
        Some(Command::Monitor(args)) => run_monitor(cli.config.as_deref(), &args).await,
        None => run_monitor(cli.config.as_deref(), &MonitorArgs::default()).await,
    }
}

async fn run_monitor(config: Option<&Path>, args: &MonitorArgs) -> Result<(), BoxError> {
    let mut cfg = MonitorConfig::load(config)?;
    args.apply(&mut cfg);
    cfg.validate()?;

    let sinks = open_sinks(&cfg)?;
    let gateway = GatewayClient::new(cfg.router_url.clone())?;
    let sampler = Sampler::new(
        PingProbe,
        cfg.ping_target.clone(),
        cfg.probe_interval(),
        cfg.probe_timeout(),
    );
    let monitor = Monitor::new(gateway, sampler, cfg.refresh()).with_sinks(sinks);

    let stop = monitor.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down");
            let _ = stop.send(());
        }
    });

    monitor.run().await?;
    Ok(())
}

fn run_report(args: &ReportArgs) -> Result<(), BoxError> {
    let filter = args.filter()?;
    let samples = load_samples(&args.log)?;
    let report = analyze(&samples, filter.as_ref());

    if args.json {
        println!("{}", render_report_json(&report)?);
    } else {
        print!("{}", render_report(&report));
    }
    Ok(())
}
