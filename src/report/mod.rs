//! Batch report over persisted samples.
//!
//! [`analyze`] makes a single pass over time-ordered samples, optionally
//! restricted by a [`TimeFilter`], and produces a [`Report`] with metric
//! summaries, loss totals, categorical histograms and derived averages.
//! Renderers consume the report as-is and never recompute aggregates.

mod filter;
mod scoring;

pub use filter::*;
pub use scoring::*;

use crate::db::{PingWindowStats, Sample};
use crate::stats::{loss_percent, RunningStat};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Serialize, Serializer};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Length of the trailing window for the rolling bar average.
const TRAILING_WINDOW_SECS: i64 = 60 * 60;

/// Minimum filtered span before the trailing average is reported.
const MIN_TRAILING_SPAN_SECS: i64 = 55 * 60;

/// Min/avg/max of one metric over the filtered samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricSummary {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
}

impl MetricSummary {
    fn from_stat(stat: &RunningStat) -> Option<Self> {
        Some(Self {
            min: stat.min()?,
            avg: stat.mean()?,
            max: stat.max()?,
        })
    }
}

/// Signal bar level, ordered so it can key a histogram.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(transparent)]
pub struct BarLevel(pub f64);

impl PartialEq for BarLevel {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for BarLevel {}

impl PartialOrd for BarLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BarLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for BarLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn serialize_secs<S: Serializer>(d: &ChronoDuration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_i64(d.num_seconds())
}

/// One histogram bucket with its share of the filtered data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket<K> {
    pub value: K,
    pub count: u64,
    /// Percentage of filtered samples.
    pub percent: f64,
    /// Estimated wall-clock time, assuming a uniform sampling cadence.
    #[serde(rename = "share_secs", serialize_with = "serialize_secs")]
    pub share: ChronoDuration,
    pub live: bool,
}

/// Sorted buckets plus the value seen in the most recent sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram<K> {
    pub buckets: Vec<Bucket<K>>,
    pub live: Option<K>,
}

impl<K> Default for Histogram<K> {
    fn default() -> Self {
        Self {
            buckets: Vec::new(),
            live: None,
        }
    }
}

impl<K: PartialEq> Histogram<K> {
    pub fn get(&self, value: &K) -> Option<&Bucket<K>> {
        self.buckets.iter().find(|b| &b.value == value)
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Running tally used while aggregating.
struct Tally<K> {
    counts: BTreeMap<K, u64>,
    live: Option<K>,
}

impl<K: Ord + Clone> Tally<K> {
    fn new() -> Self {
        Self {
            counts: BTreeMap::new(),
            live: None,
        }
    }

    fn record(&mut self, key: K) {
        *self.counts.entry(key).or_insert(0) += 1;
    }

    fn finish(self, total: usize, span: ChronoDuration) -> Histogram<K> {
        let live = self.live;
        let buckets = self
            .counts
            .into_iter()
            .map(|(value, count)| {
                let fraction = count as f64 / total as f64;
                Bucket {
                    live: live.as_ref() == Some(&value),
                    value,
                    count,
                    percent: fraction * 100.0,
                    share: ChronoDuration::milliseconds(
                        (span.num_milliseconds() as f64 * fraction).round() as i64,
                    ),
                }
            })
            .collect();
        Histogram { buckets, live }
    }
}

/// Aggregate latency, one observation per sample.
#[derive(Default)]
struct LatencyAggregate {
    avgs: RunningStat,
    min: Option<f64>,
    max: Option<f64>,
}

impl LatencyAggregate {
    fn add(&mut self, ping: &PingWindowStats) {
        if ping.received == 0 {
            return;
        }
        if let Some(avg) = ping.avg {
            self.avgs.record_success(avg);
            self.fold_min(avg);
            self.fold_max(avg);
        }
        // A minimum of 0 means "no minimum" in logs written before min was optional.
        if let Some(min) = ping.min.filter(|m| *m > 0.0) {
            self.fold_min(min);
        }
        if let Some(max) = ping.max {
            self.fold_max(max);
        }
    }

    fn fold_min(&mut self, v: f64) {
        self.min = Some(self.min.map_or(v, |m| m.min(v)));
    }

    fn fold_max(&mut self, v: f64) {
        self.max = Some(self.max.map_or(v, |m| m.max(v)));
    }

    fn summary(&self) -> Option<MetricSummary> {
        Some(MetricSummary {
            min: self.min?,
            avg: self.avgs.mean()?,
            max: self.max?,
        })
    }
}

/// Derived statistics over a filtered sample sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Report {
    pub total_samples: usize,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub filter: Option<TimeFilter>,

    pub rsrp: Option<MetricSummary>,
    pub sinr: Option<MetricSummary>,
    pub ping: Option<MetricSummary>,

    pub ping_sent: u64,
    pub ping_lost: u64,

    pub bands: Histogram<String>,
    pub towers: Histogram<i64>,
    pub bars: Histogram<BarLevel>,

    pub avg_bars: Option<f64>,
    /// Present only when the filtered data spans at least 55 minutes.
    pub avg_bars_last_hour: Option<f64>,
    pub avg_signal_health: Option<f64>,
}

impl Report {
    pub fn is_empty(&self) -> bool {
        self.total_samples == 0
    }

    /// Time between the first and last filtered sample.
    pub fn duration(&self) -> ChronoDuration {
        match (self.start, self.end) {
            (Some(start), Some(end)) => end - start,
            _ => ChronoDuration::zero(),
        }
    }

    /// Loss over all pings sent, `None` when nothing was sent.
    pub fn loss_percent(&self) -> Option<f64> {
        (self.ping_sent > 0).then(|| {
            loss_percent(self.ping_sent, self.ping_sent.saturating_sub(self.ping_lost))
        })
    }
}

struct Aggregator {
    total: usize,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    rsrp: RunningStat,
    sinr: RunningStat,
    latency: LatencyAggregate,
    ping_sent: u64,
    ping_lost: u64,
    bands: Tally<String>,
    towers: Tally<i64>,
    bars: Tally<BarLevel>,
    bars_sum: f64,
    health_sum: f64,
    bars_trail: Vec<(DateTime<Utc>, f64)>,
}

impl Aggregator {
    fn new() -> Self {
        Self {
            total: 0,
            start: None,
            end: None,
            rsrp: RunningStat::new(),
            sinr: RunningStat::new(),
            latency: LatencyAggregate::default(),
            ping_sent: 0,
            ping_lost: 0,
            bands: Tally::new(),
            towers: Tally::new(),
            bars: Tally::new(),
            bars_sum: 0.0,
            health_sum: 0.0,
            bars_trail: Vec::new(),
        }
    }

    fn add(&mut self, ts: DateTime<Utc>, sample: &Sample) {
        let radio = sample.five_g();

        self.total += 1;
        self.start = Some(self.start.map_or(ts, |s| s.min(ts)));
        self.end = Some(self.end.map_or(ts, |e| e.max(ts)));

        self.rsrp.record_success(f64::from(radio.rsrp));
        self.sinr.record_success(f64::from(radio.sinr));

        self.latency.add(&sample.ping);
        self.ping_sent += sample.ping.sent;
        self.ping_lost += sample.ping.sent.saturating_sub(sample.ping.received);

        for band in &radio.bands {
            self.bands.record(band.clone());
        }
        if let Some(tower) = radio.tower_id() {
            self.towers.record(tower);
            self.towers.live = Some(tower);
        }
        let bars = BarLevel(radio.bars);
        self.bars.record(bars);
        self.bars.live = Some(bars);

        self.bars_sum += radio.bars;
        self.health_sum += signal_health(radio.rsrp, radio.sinr);
        self.bars_trail.push((ts, radio.bars));
    }

    /// Average bars over the hour ending at the last sample.
    fn trailing_bars(&self, end: DateTime<Utc>) -> Option<f64> {
        let cutoff = end - ChronoDuration::seconds(TRAILING_WINDOW_SECS);
        let (sum, count) = self
            .bars_trail
            .iter()
            .rev()
            .take_while(|(ts, _)| *ts >= cutoff)
            .fold((0.0, 0usize), |(sum, count), (_, bars)| (sum + bars, count + 1));
        (count > 0).then(|| sum / count as f64)
    }

    fn finish(self, filter: Option<TimeFilter>) -> Report {
        let (Some(start), Some(end)) = (self.start, self.end) else {
            return Report {
                filter,
                ..Report::default()
            };
        };

        let span = end - start;
        let total = self.total;
        let avg_bars_last_hour = if span >= ChronoDuration::seconds(MIN_TRAILING_SPAN_SECS) {
            self.trailing_bars(end)
        } else {
            None
        };

        Report {
            total_samples: total,
            start: Some(start),
            end: Some(end),
            filter,
            rsrp: MetricSummary::from_stat(&self.rsrp),
            sinr: MetricSummary::from_stat(&self.sinr),
            ping: self.latency.summary(),
            ping_sent: self.ping_sent,
            ping_lost: self.ping_lost,
            bands: self.bands.finish(total, span),
            towers: self.towers.finish(total, span),
            bars: self.bars.finish(total, span),
            avg_bars: Some(self.bars_sum / total as f64),
            avg_bars_last_hour,
            avg_signal_health: Some(self.health_sum / total as f64),
        }
    }
}

/// Build a report from time-ordered samples.
///
/// Samples outside `filter` are skipped; `None` admits everything. An empty
/// or fully filtered input yields a report with `total_samples == 0`.
pub fn analyze<I>(samples: I, filter: Option<&TimeFilter>) -> Report
where
    I: IntoIterator,
    I::Item: Borrow<Sample>,
{
    let mut agg = Aggregator::new();
    for sample in samples {
        let sample = sample.borrow();
        let ts = sample.timestamp();
        if !admits(filter, ts) {
            continue;
        }
        agg.add(ts, sample);
    }
    agg.finish(filter.copied())
}
