//! Configuration module for Signal Sentry.
//!
//! Values are layered: built-in defaults, then an optional JSON file, then
//! environment variables. Command-line flags are applied last by the CLI.

use serde::{Deserialize, Serialize};
use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to open config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to decode config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value {value:?} for {name}")]
    InvalidEnv { name: &'static str, value: String },
    #[error("{0}")]
    Invalid(String),
}

/// Format of the user-selected sample log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Csv,
}

impl LogFormat {
    fn default_output(self) -> &'static str {
        match self {
            LogFormat::Json => "signal-data.json",
            LogFormat::Csv => "signal-data.csv",
        }
    }
}

/// Monitor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Gateway status endpoint.
    pub router_url: String,
    /// Host pinged for latency and loss.
    pub ping_target: String,
    /// Seconds between gateway polls.
    pub refresh_interval: u64,
    pub probe_interval_ms: u64,
    pub probe_timeout_ms: u64,
    /// User log format; `None` disables the user log.
    pub format: Option<LogFormat>,
    pub output: Option<PathBuf>,
    pub disable_auto_log: bool,
    /// Always-on JSON history log.
    pub auto_log_path: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            router_url: "http://192.168.12.1/TMI/v1/gateway?get=all".to_string(),
            ping_target: "8.8.8.8".to_string(),
            refresh_interval: 5,
            probe_interval_ms: 1000,
            probe_timeout_ms: 800,
            format: None,
            output: None,
            disable_auto_log: false,
            auto_log_path: PathBuf::from("stats.log"),
        }
    }
}

impl MonitorConfig {
    /// Load defaults, then `path` if given, then environment variables.
    ///
    /// A config file that does not exist is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        cfg.apply_env()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("Config file {} not found, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply overrides from the process environment.
    ///
    /// - `SIGNAL_SENTRY_ROUTER_URL`
    /// - `SIGNAL_SENTRY_PING_TARGET`
    /// - `SIGNAL_SENTRY_REFRESH_INTERVAL` (seconds)
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|name| env::var(name).ok())
    }

    fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(url) = lookup("SIGNAL_SENTRY_ROUTER_URL") {
            self.router_url = url;
        }
        if let Some(target) = lookup("SIGNAL_SENTRY_PING_TARGET") {
            self.ping_target = target;
        }
        if let Some(value) = lookup("SIGNAL_SENTRY_REFRESH_INTERVAL") {
            self.refresh_interval = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: "SIGNAL_SENTRY_REFRESH_INTERVAL",
                value,
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_interval == 0 {
            return Err(ConfigError::Invalid(
                "interval must be greater than 0".to_string(),
            ));
        }
        if self.probe_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "probe interval must be greater than 0".to_string(),
            ));
        }
        if self.probe_timeout_ms >= self.probe_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "probe timeout ({} ms) must be shorter than the probe interval ({} ms)",
                self.probe_timeout_ms, self.probe_interval_ms
            )));
        }
        Ok(())
    }

    pub fn refresh(&self) -> Duration {
        Duration::from_secs(self.refresh_interval)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// User log format and path, with the path defaulted from the format.
    pub fn user_log(&self) -> Option<(LogFormat, PathBuf)> {
        let format = self.format?;
        let path = self
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(format.default_output()));
        Some((format, path))
    }

    /// Whether the always-on history log should be opened.
    pub fn auto_log_enabled(&self) -> bool {
        !self.disable_auto_log && self.output.as_deref() != Some(self.auto_log_path.as_path())
    }
}
