//! Probe module for latency sampling.
//!
//! A probe makes exactly one attempt against a target and reports whether
//! it succeeded and, if so, the round-trip time in milliseconds.

mod ping;

pub use ping::*;

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("could not resolve target: {0}")]
    Resolve(String),
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("command failed: {0}")]
    Command(String),
}

impl ProbeError {
    pub fn kind(&self) -> ProbeErrorKind {
        match self {
            ProbeError::Timeout(_) => ProbeErrorKind::Timeout,
            ProbeError::Resolve(_) => ProbeErrorKind::Resolution,
            ProbeError::Permission(_) => ProbeErrorKind::Permission,
            ProbeError::Network(_) | ProbeError::Command(_) => ProbeErrorKind::Network,
        }
    }
}

/// Coarse failure classification, only used for operator-facing logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeErrorKind {
    Timeout,
    Resolution,
    Permission,
    Network,
}

/// Result of a single probe attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeOutcome {
    pub success: bool,
    pub rtt_ms: Option<f64>,
    pub error: Option<ProbeErrorKind>,
}

impl ProbeOutcome {
    pub fn success(rtt_ms: f64) -> Self {
        Self {
            success: true,
            rtt_ms: Some(rtt_ms),
            error: None,
        }
    }

    pub fn failure(kind: ProbeErrorKind) -> Self {
        Self {
            success: false,
            rtt_ms: None,
            error: Some(kind),
        }
    }
}

impl From<&Result<f64, ProbeError>> for ProbeOutcome {
    fn from(result: &Result<f64, ProbeError>) -> Self {
        match result {
            Ok(rtt_ms) => ProbeOutcome::success(*rtt_ms),
            Err(e) => ProbeOutcome::failure(e.kind()),
        }
    }
}

/// Something that can measure round-trip time to a target.
///
/// Implementations must return within `timeout` and must not retry.
pub trait Probe: Send + Sync + 'static {
    fn probe(&self, target: &str, timeout: Duration) -> impl Future<Output = ProbeOutcome> + Send;
}

/// ICMP echo probe with a `ping` command fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct PingProbe;

impl Probe for PingProbe {
    fn probe(&self, target: &str, timeout: Duration) -> impl Future<Output = ProbeOutcome> + Send {
        let target = target.to_string();
        async move {
            let result = run_ping_probe(&target, timeout).await;
            match &result {
                Ok(rtt) => tracing::trace!("Ping {}: {:.2} ms", target, rtt),
                Err(e @ ProbeError::Permission(_)) => tracing::warn!(
                    "Ping {} failed: {}. ICMP ping requires root privileges or CAP_NET_RAW",
                    target,
                    e
                ),
                Err(e) => tracing::debug!("Ping {} failed: {}", target, e),
            }
            ProbeOutcome::from(&result)
        }
    }
}
