//! Hysteresis-based starvation alerts on top of a [`Poller`].
//!
//! A resource becomes starved when the selected average rises above the high
//! threshold and stays starved until it drops below the low threshold. Values
//! in between never flip the state, which keeps alerts from flapping around a
//! single boundary.
//!
//! Alerts are emitted on transitions only. A detector started while the
//! resource is already above the high threshold reports `starved = true` on the
//! first sample, since the initial state is normal.

use futures_util::StreamExt;
use log::{debug, info};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use super::handle::{CancelHandle, CollectorStream, shutdown_requested};
use super::poller::{Poller, SnapshotStream};
use crate::config::{DetectorConfig, PollerConfig};
use crate::error::Result;
use crate::metrics::PollerMetrics;
use crate::source::{PressureSource, ProcPressure};
use crate::types::{Metric, Resource, StarvationAlert};

pub type AlertStream = CollectorStream<StarvationAlert>;

/// Two-state machine: normal and starved.
#[derive(Debug, Clone, Copy)]
pub struct Hysteresis {
    low: f64,
    high: f64,
    starved: bool,
}

impl Hysteresis {
    pub fn new(low: u32, high: u32) -> Self {
        Self {
            low: f64::from(low),
            high: f64::from(high),
            starved: false,
        }
    }

    pub fn is_starved(&self) -> bool {
        self.starved
    }

    /// Feed one reading; returns the new state if it changed.
    pub fn observe(&mut self, current: f64) -> Option<bool> {
        let flip = if self.starved {
            current < self.low
        } else {
            current > self.high
        };
        if flip {
            self.starved = !self.starved;
            Some(self.starved)
        } else {
            None
        }
    }
}

pub struct StarvationDetector {
    config: DetectorConfig,
    poller: PollerConfig,
    metrics: Arc<PollerMetrics>,
}

impl StarvationDetector {
    /// Rejects `low_threshold >= high_threshold` before anything is spawned.
    pub fn new(config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            poller: PollerConfig::default(),
            metrics: Arc::new(PollerMetrics::new()),
        })
    }

    pub fn with_poller(mut self, poller: PollerConfig) -> Self {
        self.poller = poller;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<PollerMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Metrics of the inner poller.
    pub fn metrics(&self) -> Arc<PollerMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn start(self, source: Arc<dyn PressureSource>) -> Result<(AlertStream, CancelHandle)> {
        let (snapshots, poller) = Poller::new(source, self.config.resource, self.poller)
            .with_metrics(Arc::clone(&self.metrics))
            .start()?;

        let (tx, rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let name = format!(
            "starvation:{}:{}",
            self.config.resource, self.config.metric
        );

        let task = tokio::spawn(run(self.config, snapshots, poller, tx, shutdown_rx));

        Ok((
            CollectorStream::new(rx, shutdown_tx.subscribe()),
            CancelHandle::new(name, shutdown_tx, task),
        ))
    }
}

async fn run(
    config: DetectorConfig,
    mut snapshots: SnapshotStream,
    poller: CancelHandle,
    tx: mpsc::Sender<StarvationAlert>,
    mut shutdown: watch::Receiver<bool>,
) {
    let DetectorConfig {
        resource,
        metric,
        low_threshold,
        high_threshold,
    } = config;
    let mut state = Hysteresis::new(low_threshold, high_threshold);

    info!(
        "[starvation] watching {resource} {metric} low={low_threshold} high={high_threshold}"
    );

    loop {
        let stats = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            _ = tx.closed() => {
                debug!("[starvation] {resource} consumer dropped the alert stream");
                break;
            }
            next = snapshots.next() => match next {
                Some(stats) => stats,
                None => {
                    debug!("[starvation] {resource} snapshot stream ended");
                    break;
                }
            },
        };

        let current = stats.some.get(metric);
        let Some(starved) = state.observe(current) else {
            continue;
        };

        info!(
            "[starvation] {resource} {} ({metric}={current:.2})",
            if starved { "starved" } else { "recovered" }
        );

        let alert = StarvationAlert {
            resource,
            metric,
            low_threshold,
            high_threshold,
            starved,
            stats,
            current,
        };

        let delivered = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            sent = tx.send(alert) => sent.is_ok(),
        };
        if !delivered {
            debug!("[starvation] {resource} consumer dropped the alert stream");
            break;
        }
    }

    // Stop the poller before our own stream closes (tx drops on return).
    if let Err(err) = poller.cancel().await {
        debug!("[starvation] {resource} poller shutdown: {err}");
    }
    drop(snapshots);
    debug!("[starvation] {resource} {metric} stopped");
}

/// Watch `/proc/pressure/<resource>` with the default 100ms interval.
pub fn start_detecting(
    resource: Resource,
    metric: Metric,
    low_threshold: u32,
    high_threshold: u32,
) -> Result<(AlertStream, CancelHandle)> {
    StarvationDetector::new(DetectorConfig::new(
        resource,
        metric,
        low_threshold,
        high_threshold,
    ))?
    .start(Arc::new(ProcPressure::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::poller::tests::{Reading, ScriptedSource};
    use crate::error::PsiError;
    use std::time::Duration;
    use tokio::time::timeout;

    fn detector(low: u32, high: u32) -> StarvationDetector {
        StarvationDetector::new(DetectorConfig::new(Resource::Cpu, Metric::Avg10, low, high))
            .unwrap()
            .with_poller(PollerConfig::with_interval(Duration::from_millis(100)).unwrap())
    }

    fn values(script: &[f64]) -> Arc<ScriptedSource> {
        ScriptedSource::new(script.iter().copied().map(Reading::Value).collect())
    }

    #[test]
    fn hysteresis_ignores_values_inside_band() {
        let mut state = Hysteresis::new(70, 90);
        assert_eq!(state.observe(85.0), None);
        assert_eq!(state.observe(90.0), None);
        assert_eq!(state.observe(90.5), Some(true));
        assert_eq!(state.observe(95.0), None);
        assert_eq!(state.observe(70.0), None);
        assert_eq!(state.observe(69.9), Some(false));
        assert!(!state.is_starved());
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let err = StarvationDetector::new(DetectorConfig::new(
            Resource::Memory,
            Metric::Avg60,
            90,
            70,
        ))
        .err()
        .unwrap();
        assert!(matches!(err, PsiError::Configuration(_)));
        assert!(start_detecting(Resource::Cpu, Metric::Avg10, 50, 50).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn alerts_on_crossings_only() {
        let source = values(&[50.0, 85.0, 95.0, 80.0, 65.0, 95.0]);
        let (mut alerts, handle) = detector(70, 90).start(source).unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            let alert = alerts.next().await.unwrap();
            seen.push((alert.starved, alert.current));
        }
        assert_eq!(seen, vec![(true, 95.0), (false, 65.0), (true, 95.0)]);

        // The last value keeps repeating; no further transition.
        assert!(timeout(Duration::from_secs(1), alerts.next()).await.is_err());

        handle.cancel().await.unwrap();
        assert!(alerts.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn alert_carries_configuration_and_snapshot() {
        let source = values(&[10.0, 99.5]);
        let (mut alerts, handle) = detector(20, 40).start(source).unwrap();

        let alert = alerts.next().await.unwrap();
        assert_eq!(alert.resource, Resource::Cpu);
        assert_eq!(alert.metric, Metric::Avg10);
        assert_eq!(alert.low_threshold, 20);
        assert_eq!(alert.high_threshold, 40);
        assert!(alert.starved);
        assert_eq!(alert.stats.some.avg10, 99.5);
        assert_eq!(alert.current, 99.5);

        handle.cancel().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn alerts_strictly_alternate() {
        let source = values(&[
            95.0, 96.0, 50.0, 40.0, 91.0, 89.0, 92.0, 10.0, 100.0, 75.0, 69.0,
        ]);
        let (mut alerts, handle) = detector(70, 90).start(source).unwrap();

        let mut states = Vec::new();
        while let Ok(Some(alert)) = timeout(Duration::from_secs(1), alerts.next()).await {
            states.push(alert.starved);
        }
        assert_eq!(states, vec![true, false, true, false, true, false]);
        for pair in states.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }

        handle.cancel().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn read_errors_never_reach_alert_stream() {
        use Reading::{Fail, Value};
        let source = ScriptedSource::new(vec![Fail, Value(95.0), Fail, Fail, Value(10.0)]);
        let detector = detector(70, 90);
        let metrics = detector.metrics();
        let (mut alerts, handle) = detector.start(source).unwrap();

        assert!(alerts.next().await.unwrap().starved);
        assert!(!alerts.next().await.unwrap().starved);
        assert_eq!(metrics.read_errors(), 3);

        handle.cancel().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_inner_poller_and_closes_stream() {
        let source = values(&[95.0, 10.0, 95.0, 10.0, 95.0, 10.0]);
        let detector = detector(70, 90);
        let metrics = detector.metrics();
        let (mut alerts, handle) = detector.start(source).unwrap();

        assert!(alerts.next().await.is_some());
        handle.cancel().await.unwrap();
        assert!(alerts.next().await.is_none());

        let samples = metrics.snapshot().samples;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(metrics.snapshot().samples, samples, "poller still sampling");
    }

    #[tokio::test(start_paused = true)]
    async fn buffered_alert_discarded_on_cancel() {
        let source = values(&[95.0, 10.0]);
        let (mut alerts, handle) = detector(70, 90).start(source).unwrap();

        assert!(alerts.next().await.unwrap().starved);
        // The recovery alert is now waiting in the channel.
        tokio::time::sleep(Duration::from_millis(500)).await;
        handle.cancel().await.unwrap();
        assert!(alerts.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_alert_undelivered() {
        let source = values(&[95.0, 10.0, 95.0]);
        let (alerts, handle) = detector(70, 90).start(source).unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        timeout(Duration::from_millis(100), handle.cancel())
            .await
            .unwrap()
            .unwrap();
        drop(alerts);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_alert_stream_shuts_everything_down() {
        let source = values(&[95.0, 10.0, 95.0, 10.0]);
        let detector = detector(70, 90);
        let metrics = detector.metrics();
        let (alerts, handle) = detector.start(source).unwrap();
        drop(alerts);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(handle.is_finished());
        let samples = metrics.snapshot().samples;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(metrics.snapshot().samples, samples);

        let err = handle.cancel().await.unwrap_err();
        assert!(matches!(err, PsiError::ProtocolMisuse(_)));
    }
}
