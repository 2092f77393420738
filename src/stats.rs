//! Online accumulator for round-trip statistics.
//!
//! [`RunningStat`] keeps count, min, max, mean and the sum of squared
//! deviations using Welford's update, plus a sent/received pair for loss.

use crate::db::PingWindowStats;

/// Incremental min/mean/max/stddev over successes, with loss accounting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunningStat {
    sent: u64,
    received: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
    last: Option<f64>,
}

impl RunningStat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful measurement.
    pub fn record_success(&mut self, value: f64) {
        self.sent += 1;
        self.received += 1;
        self.last = Some(value);

        if self.received == 1 {
            self.mean = value;
            self.min = value;
            self.max = value;
            self.m2 = 0.0;
            return;
        }

        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }

        let delta = value - self.mean;
        self.mean += delta / self.received as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    /// Record an attempt that produced no measurement.
    pub fn record_failure(&mut self) {
        self.sent += 1;
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Loss percentage, 0 when nothing was sent.
    pub fn loss(&self) -> f64 {
        loss_percent(self.sent, self.received)
    }

    pub fn mean(&self) -> Option<f64> {
        (self.received > 0).then_some(self.mean)
    }

    pub fn min(&self) -> Option<f64> {
        (self.received > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.received > 0).then_some(self.max)
    }

    /// Population standard deviation of the recorded successes.
    pub fn stddev(&self) -> f64 {
        if self.received == 0 {
            0.0
        } else {
            (self.m2 / self.received as f64).sqrt()
        }
    }

    pub fn last(&self) -> Option<f64> {
        self.last
    }

    pub fn snapshot(&self) -> PingWindowStats {
        PingWindowStats {
            min: self.min(),
            avg: self.mean(),
            max: self.max(),
            stddev: self.stddev(),
            loss: self.loss(),
            last_rtt: self.last,
            sent: self.sent,
            received: self.received,
        }
    }

    /// Zero every field except the last recorded value.
    pub fn reset(&mut self) {
        *self = Self {
            last: self.last,
            ..Self::default()
        };
    }
}

/// `(sent - received) / sent * 100`, or 0 when `sent` is 0.
pub fn loss_percent(sent: u64, received: u64) -> f64 {
    if sent == 0 {
        0.0
    } else {
        sent.saturating_sub(received) as f64 / sent as f64 * 100.0
    }
}
