//! Periodic latency sampling into an interval window and a lifetime window.

use crate::db::PingWindowStats;
use crate::probe::{Probe, ProbeErrorKind, ProbeOutcome};
use crate::stats::RunningStat;

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

/// Sampler lifecycle errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SamplerError {
    #[error("sampler is already running")]
    AlreadyRunning,
    #[error("sampler has stopped and cannot be restarted")]
    Stopped,
}

/// `Idle -> Running -> Stopped`, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Idle,
    Running,
    Stopped,
}

/// Both windows live under one lock so a probe outcome lands in both or neither.
#[derive(Default)]
struct Windows {
    interval: RunningStat,
    lifetime: RunningStat,
}

/// Runs one probe per tick and accumulates the outcomes.
pub struct Sampler<P> {
    probe: P,
    target: String,
    tick: Duration,
    timeout: Duration,
    state: Mutex<SamplerState>,
    windows: Mutex<Windows>,
}

impl<P: Probe> Sampler<P> {
    /// `timeout` should be shorter than `tick` so probes never overlap.
    pub fn new(probe: P, target: impl Into<String>, tick: Duration, timeout: Duration) -> Self {
        Self {
            probe,
            target: target.into(),
            tick,
            timeout,
            state: Mutex::new(SamplerState::Idle),
            windows: Mutex::new(Windows::default()),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn state(&self) -> SamplerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Probe immediately and then once per tick until `stop` fires or closes.
    pub async fn run(&self, mut stop: broadcast::Receiver<()>) -> Result<(), SamplerError> {
        self.set_running()?;
        tracing::info!("Sampler: probing {} every {:?}", self.target, self.tick);

        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = stop.recv() => {
                    break;
                }
                _ = interval.tick() => {
                    let outcome = self.probe_once().await;
                    self.record(outcome);
                }
            }
        }

        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = SamplerState::Stopped;
        tracing::debug!("Sampler: stopped probing {}", self.target);
        Ok(())
    }

    fn set_running(&self) -> Result<(), SamplerError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            SamplerState::Idle => {
                *state = SamplerState::Running;
                Ok(())
            }
            SamplerState::Running => Err(SamplerError::AlreadyRunning),
            SamplerState::Stopped => Err(SamplerError::Stopped),
        }
    }

    async fn probe_once(&self) -> ProbeOutcome {
        let attempt = self.probe.probe(&self.target, self.timeout);
        match tokio::time::timeout(self.timeout, attempt).await {
            Ok(outcome) => outcome,
            Err(_) => ProbeOutcome::failure(ProbeErrorKind::Timeout),
        }
    }

    /// Fold one probe outcome into both windows.
    pub fn record(&self, outcome: ProbeOutcome) {
        let mut windows = self.windows();
        match outcome.rtt_ms.filter(|_| outcome.success) {
            Some(rtt) => {
                windows.interval.record_success(rtt);
                windows.lifetime.record_success(rtt);
            }
            None => {
                windows.interval.record_failure();
                windows.lifetime.record_failure();
            }
        }
    }

    /// Interval window snapshot, without resetting it.
    pub fn current_window(&self) -> PingWindowStats {
        self.windows().interval.snapshot()
    }

    pub fn lifetime_window(&self) -> PingWindowStats {
        self.windows().lifetime.snapshot()
    }

    /// Snapshot the interval window and reset it under the same lock.
    pub fn take_and_reset(&self) -> PingWindowStats {
        let mut windows = self.windows();
        let snapshot = windows.interval.snapshot();
        windows.interval.reset();
        snapshot
    }

    fn windows(&self) -> MutexGuard<'_, Windows> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    /// Replays a fixed script of outcomes, cycling when exhausted.
    struct ScriptedProbe {
        script: Vec<ProbeOutcome>,
        calls: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl ScriptedProbe {
        fn new(script: Vec<ProbeOutcome>) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let probe = Self {
                script,
                calls: calls.clone(),
                delay: Duration::ZERO,
            };
            (probe, calls)
        }
    }

    impl Probe for ScriptedProbe {
        fn probe(&self, _target: &str, _timeout: Duration) -> impl Future<Output = ProbeOutcome> + Send {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            let outcome = self.script[i % self.script.len()];
            let delay = self.delay;
            async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                outcome
            }
        }
    }

    async fn wait_for(mut done: impl FnMut() -> bool) {
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "condition not reached in time");
    }

    #[test]
    fn test_record_feeds_both_windows() {
        let (probe, _) = ScriptedProbe::new(vec![ProbeOutcome::success(1.0)]);
        let sampler = Sampler::new(probe, "example.com", Duration::from_secs(1), Duration::from_millis(500));

        sampler.record(ProbeOutcome::success(10.0));
        sampler.record(ProbeOutcome::failure(ProbeErrorKind::Resolution));
        sampler.record(ProbeOutcome::success(30.0));

        let current = sampler.current_window();
        assert_eq!(current.sent, 3);
        assert_eq!(current.received, 2);
        assert_eq!(current.avg, Some(20.0));
        assert_eq!(sampler.lifetime_window(), current);
        // Reading does not reset.
        assert_eq!(sampler.current_window().sent, 3);
    }

    #[test]
    fn test_take_and_reset() {
        let (probe, _) = ScriptedProbe::new(vec![ProbeOutcome::success(1.0)]);
        let sampler = Sampler::new(probe, "example.com", Duration::from_secs(1), Duration::from_millis(500));

        sampler.record(ProbeOutcome::success(12.0));
        sampler.record(ProbeOutcome::failure(ProbeErrorKind::Timeout));

        let taken = sampler.take_and_reset();
        assert_eq!(taken.sent, 2);
        assert_eq!(taken.received, 1);
        assert_eq!(taken.loss, 50.0);

        let after = sampler.current_window();
        assert_eq!(after.sent, 0);
        assert_eq!(after.avg, None);
        assert_eq!(after.last_rtt, Some(12.0));
        assert_eq!(sampler.lifetime_window().sent, 2);
    }

    #[test]
    fn test_take_and_reset_is_a_partition() {
        let (probe, _) = ScriptedProbe::new(vec![ProbeOutcome::success(1.0)]);
        let sampler = Arc::new(Sampler::new(
            probe,
            "example.com",
            Duration::from_secs(1),
            Duration::from_millis(500),
        ));

        let writers: Vec<_> = (0..4)
            .map(|w| {
                let sampler = sampler.clone();
                std::thread::spawn(move || {
                    for i in 0..2_000 {
                        if (i + w) % 3 == 0 {
                            sampler.record(ProbeOutcome::failure(ProbeErrorKind::Network));
                        } else {
                            sampler.record(ProbeOutcome::success(i as f64));
                        }
                    }
                })
            })
            .collect();

        let reader = {
            let sampler = sampler.clone();
            std::thread::spawn(move || {
                let (mut sent, mut received) = (0, 0);
                for _ in 0..500 {
                    let snap = sampler.take_and_reset();
                    assert!(snap.received <= snap.sent);
                    sent += snap.sent;
                    received += snap.received;
                    std::thread::yield_now();
                }
                (sent, received)
            })
        };

        for w in writers {
            w.join().unwrap();
        }
        let (mut sent, mut received) = reader.join().unwrap();
        let rest = sampler.take_and_reset();
        sent += rest.sent;
        received += rest.received;

        let lifetime = sampler.lifetime_window();
        assert_eq!(lifetime.sent, 8_000);
        assert_eq!(sent, lifetime.sent);
        assert_eq!(received, lifetime.received);
    }

    #[tokio::test]
    async fn test_run_probes_until_stopped() {
        let (probe, calls) = ScriptedProbe::new(vec![
            ProbeOutcome::success(5.0),
            ProbeOutcome::failure(ProbeErrorKind::Permission),
        ]);
        let sampler = Arc::new(Sampler::new(
            probe,
            "example.com",
            Duration::from_millis(10),
            Duration::from_millis(5),
        ));
        assert_eq!(sampler.state(), SamplerState::Idle);

        let (stop_tx, stop_rx) = broadcast::channel(1);
        let handle = {
            let sampler = sampler.clone();
            tokio::spawn(async move { sampler.run(stop_rx).await })
        };

        wait_for(|| calls.load(Ordering::SeqCst) >= 4).await;
        assert_eq!(sampler.state(), SamplerState::Running);
        stop_tx.send(()).unwrap();
        assert_ok!(handle.await.unwrap());

        assert_eq!(sampler.state(), SamplerState::Stopped);
        let lifetime = sampler.lifetime_window();
        let calls = calls.load(Ordering::SeqCst) as u64;
        assert_eq!(lifetime.sent, calls);
        assert_eq!(lifetime.received, calls.div_ceil(2));
        assert!(lifetime.received <= lifetime.sent);
    }

    #[tokio::test]
    async fn test_slow_probe_counts_as_failure() {
        let (mut probe, calls) = ScriptedProbe::new(vec![ProbeOutcome::success(5.0)]);
        probe.delay = Duration::from_secs(10);
        let sampler = Arc::new(Sampler::new(
            probe,
            "example.com",
            Duration::from_millis(20),
            Duration::from_millis(5),
        ));

        let (stop_tx, stop_rx) = broadcast::channel(1);
        let handle = {
            let sampler = sampler.clone();
            tokio::spawn(async move { sampler.run(stop_rx).await })
        };

        wait_for(|| sampler.lifetime_window().sent >= 2).await;
        stop_tx.send(()).unwrap();
        assert_ok!(handle.await.unwrap());

        let lifetime = sampler.lifetime_window();
        assert_eq!(lifetime.received, 0);
        assert_eq!(lifetime.sent, calls.load(Ordering::SeqCst) as u64);
        assert_eq!(lifetime.loss, 100.0);
    }

    #[tokio::test]
    async fn test_cannot_start_twice_or_restart() {
        let (probe, _) = ScriptedProbe::new(vec![ProbeOutcome::success(1.0)]);
        let sampler = Arc::new(Sampler::new(
            probe,
            "example.com",
            Duration::from_millis(10),
            Duration::from_millis(5),
        ));

        let (stop_tx, stop_rx) = broadcast::channel(1);
        let handle = {
            let sampler = sampler.clone();
            tokio::spawn(async move { sampler.run(stop_rx).await })
        };
        wait_for(|| sampler.state() == SamplerState::Running).await;

        let second = sampler.run(stop_tx.subscribe()).await;
        assert_eq!(assert_err!(second), SamplerError::AlreadyRunning);

        stop_tx.send(()).unwrap();
        assert_ok!(handle.await.unwrap());

        let restart = sampler.run(stop_tx.subscribe()).await;
        assert_eq!(assert_err!(restart), SamplerError::Stopped);
    }
}
