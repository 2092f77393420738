//! Scheduler module: the monitor loop and the latency sampler it drives.

mod sampler;

pub use sampler::*;

use crate::config::{LogFormat, MonitorConfig};
use crate::db::{CsvLog, JsonLog, PingWindowStats, RadioMetrics, Sample, SampleSink, StoreError};
use crate::gateway::Telemetry;
use crate::probe::Probe;
use crate::render::{device_banner, live_header, live_rows, HEADER_INTERVAL, LEGEND};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

/// Open the user log and the always-on history log.
///
/// The user log failing to open is fatal; the history log only warns.
pub fn open_sinks(cfg: &MonitorConfig) -> Result<Vec<Box<dyn SampleSink>>, StoreError> {
    let mut sinks: Vec<Box<dyn SampleSink>> = Vec::new();

    if let Some((format, path)) = cfg.user_log() {
        let sink: Box<dyn SampleSink> = match format {
            LogFormat::Json => Box::new(JsonLog::open(&path)?),
            LogFormat::Csv => Box::new(CsvLog::open(&path)?),
        };
        tracing::info!("Logging samples to {}", path.display());
        sinks.push(sink);
    }

    if cfg.auto_log_enabled() {
        match JsonLog::open(&cfg.auto_log_path) {
            Ok(log) => sinks.push(Box::new(log)),
            Err(e) => tracing::warn!("Background log disabled: {}", e),
        }
    }

    Ok(sinks)
}

/// Polls gateway telemetry and pairs each reading with the ping window
/// accumulated since the previous one.
pub struct Monitor<P, T> {
    telemetry: T,
    sampler: Arc<Sampler<P>>,
    sinks: Vec<Box<dyn SampleSink>>,
    refresh: Duration,
    stop_tx: broadcast::Sender<()>,
    previous: Option<RadioMetrics>,
    rows_printed: usize,
    console: bool,
}

impl<P: Probe, T: Telemetry> Monitor<P, T> {
    pub fn new(telemetry: T, sampler: Sampler<P>, refresh: Duration) -> Self {
        let (stop_tx, _) = broadcast::channel(1);
        Self {
            telemetry,
            sampler: Arc::new(sampler),
            sinks: Vec::new(),
            refresh,
            stop_tx,
            previous: None,
            rows_printed: 0,
            console: true,
        }
    }

    pub fn with_sinks(mut self, sinks: Vec<Box<dyn SampleSink>>) -> Self {
        self.sinks.extend(sinks);
        self
    }

    /// Suppress terminal rows.
    pub fn quiet(mut self) -> Self {
        self.console = false;
        self
    }

    /// Sending on the returned channel stops both the monitor and the sampler.
    pub fn stop_handle(&self) -> broadcast::Sender<()> {
        self.stop_tx.clone()
    }

    pub fn sampler(&self) -> &Arc<Sampler<P>> {
        &self.sampler
    }

    /// Run until stopped, returning the lifetime ping window.
    pub async fn run(mut self) -> Result<PingWindowStats, SamplerError> {
        let probe_task = {
            let sampler = self.sampler.clone();
            let stop_rx = self.stop_tx.subscribe();
            tokio::spawn(async move { sampler.run(stop_rx).await })
        };

        tracing::info!(
            "Monitoring {} every {:?}",
            self.sampler.target(),
            self.refresh
        );

        let mut stop_rx = self.stop_tx.subscribe();
        let mut interval = tokio::time::interval(self.refresh);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = stop_rx.recv() => {
                    break;
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }

        let _ = self.stop_tx.send(());
        match probe_task.await {
            Ok(result) => result?,
            Err(e) => tracing::error!("Sampler task failed: {}", e),
        }

        let lifetime = self.sampler.lifetime_window();
        tracing::info!(
            "Session ping totals: {} sent, {} received, {:.1}% loss, avg {}",
            lifetime.sent,
            lifetime.received,
            lifetime.loss,
            lifetime
                .avg
                .map_or_else(|| "n/a".to_string(), |avg| format!("{:.1} ms", avg))
        );
        Ok(lifetime)
    }

    /// Fetch once and, on success, persist and display a sample.
    ///
    /// A failed fetch leaves the sampler's interval window untouched so its
    /// outcomes roll into the next successful sample.
    pub async fn tick(&mut self) -> Option<Sample> {
        let gateway = match self.telemetry.fetch().await {
            Ok(gateway) => gateway,
            Err(e) => {
                tracing::warn!("Error fetching stats: {}", e);
                return None;
            }
        };

        let sample = Sample::new(gateway, self.sampler.take_and_reset());

        for sink in self.sinks.iter_mut() {
            if let Err(e) = sink.append(&sample) {
                tracing::error!("Failed to log data to {}: {}", sink.path().display(), e);
            }
        }

        let first = self.previous.is_none();
        self.observe(&sample);
        if self.console {
            self.print(&sample, first);
        }
        Some(sample)
    }

    /// Track the 5G connection, returning whether its band set changed.
    fn observe(&mut self, sample: &Sample) -> bool {
        let radio = sample.five_g();
        let changed = match &self.previous {
            None => {
                let device = &sample.gateway.device;
                tracing::info!(
                    "Gateway {} (firmware {}, serial {})",
                    device.model,
                    device.software_version,
                    device.serial
                );
                false
            }
            Some(prev) if !prev.same_bands(radio) => {
                tracing::info!(
                    "Band change: {} -> {}",
                    prev.bands.join(","),
                    radio.bands.join(",")
                );
                true
            }
            Some(_) => false,
        };
        self.previous = Some(radio.clone());
        changed
    }

    fn print(&mut self, sample: &Sample, first: bool) {
        if first {
            println!("{}", device_banner(&sample.gateway.device));
            print!("{}", LEGEND);
        }
        for row in live_rows(sample) {
            if self.rows_printed % HEADER_INTERVAL == 0 {
                println!("{}", live_header());
            }
            println!("{}", row);
            self.rows_printed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{load_samples, GatewayResponse};
    use crate::gateway::GatewayError;
    use crate::probe::ProbeOutcome;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use tokio_test::assert_ok;

    struct FixedProbe(f64);

    impl Probe for FixedProbe {
        fn probe(&self, _target: &str, _timeout: Duration) -> impl Future<Output = ProbeOutcome> + Send {
            let rtt = self.0;
            async move { ProbeOutcome::success(rtt) }
        }
    }

    /// Replays readings; `None` is a failed fetch. Repeats the last entry.
    struct ScriptedTelemetry(Mutex<VecDeque<Option<GatewayResponse>>>);

    impl ScriptedTelemetry {
        fn new(script: Vec<Option<GatewayResponse>>) -> Self {
            Self(Mutex::new(script.into()))
        }
    }

    impl Telemetry for ScriptedTelemetry {
        fn fetch(&self) -> impl Future<Output = Result<GatewayResponse, GatewayError>> + Send {
            let next = {
                let mut script = self.0.lock().unwrap();
                if script.len() > 1 {
                    script.pop_front().flatten()
                } else {
                    script.front().cloned().flatten()
                }
            };
            async move { next.ok_or(GatewayError::Status(503)) }
        }
    }

    struct FailingSink(PathBuf);

    impl SampleSink for FailingSink {
        fn append(&mut self, _sample: &Sample) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk full")))
        }

        fn path(&self) -> &Path {
            &self.0
        }
    }

    fn reading(ts: i64, bands: &[&str]) -> GatewayResponse {
        let mut gateway = GatewayResponse::default();
        gateway.time.local_time = ts;
        gateway.device.model = "TMO-G5AR".into();
        gateway.signal.five_g.bands = bands.iter().map(|b| b.to_string()).collect();
        gateway.signal.five_g.bars = 4.0;
        gateway
    }

    fn sampler() -> Sampler<FixedProbe> {
        Sampler::new(
            FixedProbe(15.0),
            "example.com",
            Duration::from_millis(10),
            Duration::from_millis(5),
        )
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_interval_window() {
        let mut monitor = Monitor::new(ScriptedTelemetry::new(vec![None]), sampler(), Duration::from_secs(1)).quiet();
        monitor.sampler().record(ProbeOutcome::success(10.0));
        monitor.sampler().record(ProbeOutcome::success(20.0));

        assert!(monitor.tick().await.is_none());
        assert_eq!(monitor.sampler().current_window().sent, 2);
    }

    #[tokio::test]
    async fn test_tick_persists_sample_and_resets_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.log");
        let sinks: Vec<Box<dyn SampleSink>> = vec![
            Box::new(FailingSink(dir.path().join("broken"))),
            Box::new(JsonLog::open(&path).unwrap()),
        ];

        let telemetry = ScriptedTelemetry::new(vec![None, Some(reading(1_767_651_600, &["n41"]))]);
        let mut monitor = Monitor::new(telemetry, sampler(), Duration::from_secs(1))
            .with_sinks(sinks)
            .quiet();
        monitor.sampler().record(ProbeOutcome::success(10.0));

        assert!(monitor.tick().await.is_none());
        monitor.sampler().record(ProbeOutcome::success(30.0));
        let sample = monitor.tick().await.expect("sample");

        assert_eq!(sample.ping.sent, 2);
        assert_eq!(sample.ping.avg, Some(20.0));
        assert_eq!(monitor.sampler().current_window().sent, 0);
        assert_eq!(monitor.sampler().lifetime_window().sent, 2);

        let logged = load_samples(&path).unwrap();
        assert_eq!(logged, vec![sample]);
    }

    #[tokio::test]
    async fn test_band_change_uses_set_semantics() {
        let mut monitor = Monitor::new(ScriptedTelemetry::new(vec![None]), sampler(), Duration::from_secs(1)).quiet();

        let first = Sample::new(reading(1, &["n41", "n25"]), PingWindowStats::default());
        let reordered = Sample::new(reading(2, &["n25", "n41"]), PingWindowStats::default());
        let changed = Sample::new(reading(3, &["n71"]), PingWindowStats::default());

        assert!(!monitor.observe(&first));
        assert!(!monitor.observe(&reordered));
        assert!(monitor.observe(&changed));
    }

    #[tokio::test]
    async fn test_run_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.log");
        let sinks: Vec<Box<dyn SampleSink>> = vec![Box::new(JsonLog::open(&path).unwrap())];

        let telemetry = ScriptedTelemetry::new(vec![Some(reading(1_767_651_600, &["n41"]))]);
        let monitor = Monitor::new(telemetry, sampler(), Duration::from_millis(20))
            .with_sinks(sinks)
            .quiet();
        let stop = monitor.stop_handle();
        let sampler = monitor.sampler().clone();

        let handle = tokio::spawn(monitor.run());
        tokio::time::sleep(Duration::from_millis(100)).await;
        stop.send(()).unwrap();

        let lifetime = assert_ok!(handle.await.unwrap());
        assert!(lifetime.sent > 0);
        assert_eq!(lifetime.received, lifetime.sent);
        assert_eq!(sampler.state(), SamplerState::Stopped);
        assert!(!load_samples(&path).unwrap().is_empty());
    }

    #[test]
    fn test_open_sinks() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = MonitorConfig {
            format: Some(LogFormat::Csv),
            output: Some(dir.path().join("out.csv")),
            auto_log_path: dir.path().join("stats.log"),
            ..Default::default()
        };
        let sinks = open_sinks(&cfg).unwrap();
        assert_eq!(sinks.len(), 2);
        assert_eq!(sinks[0].path(), dir.path().join("out.csv"));

        let cfg = MonitorConfig {
            disable_auto_log: true,
            ..Default::default()
        };
        assert!(open_sinks(&cfg).unwrap().is_empty());
    }
}
