//! Gateway telemetry client.
//!
//! Fetches the gateway's JSON status document over HTTP with a short
//! per-request timeout and a bounded retry.

use crate::db::GatewayResponse;

use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);
/// Total attempts per fetch.
const MAX_ATTEMPTS: u32 = 3;
/// Backoff unit; attempt `n` waits `n` units before retrying.
const BACKOFF_STEP: Duration = Duration::from_millis(100);

/// Gateway fetch errors.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status code: {0}")]
    Status(u16),
    #[error("invalid gateway response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("failed to fetch stats after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<GatewayError>,
    },
}

/// A source of structured radio telemetry.
pub trait Telemetry: Send + Sync + 'static {
    fn fetch(&self) -> impl Future<Output = Result<GatewayResponse, GatewayError>> + Send;
}

/// HTTP client for the gateway status endpoint.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    client: reqwest::Client,
    url: String,
    attempts: u32,
    backoff: Duration,
}

impl GatewayClient {
    pub fn new(url: impl Into<String>) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
            attempts: MAX_ATTEMPTS,
            backoff: BACKOFF_STEP,
        })
    }

    /// Override the retry policy. At least one attempt is always made.
    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.backoff = backoff;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch the status document, retrying transient failures.
    pub async fn fetch(&self) -> Result<GatewayResponse, GatewayError> {
        let mut attempt = 1;
        loop {
            match self.fetch_once().await {
                Ok(resp) => return Ok(resp),
                Err(e) if attempt >= self.attempts => {
                    return Err(GatewayError::Exhausted {
                        attempts: self.attempts,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    tracing::debug!("Gateway fetch attempt {} failed: {}", attempt, e);
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn fetch_once(&self) -> Result<GatewayResponse, GatewayError> {
        let resp = self.client.get(&self.url).send().await?;
        if resp.status() != StatusCode::OK {
            return Err(GatewayError::Status(resp.status().as_u16()));
        }
        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

impl Telemetry for GatewayClient {
    fn fetch(&self) -> impl Future<Output = Result<GatewayResponse, GatewayError>> + Send {
        GatewayClient::fetch(self)
    }
}
