//! Change-driven sampling of one pressure file.
//!
//! inotify does not work on procfs, so the file is re-read on a fixed
//! interval and only readings that differ from the last emitted one are
//! passed on.

use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use super::handle::{CancelHandle, CollectorStream, shutdown_requested};
use crate::config::PollerConfig;
use crate::error::Result;
use crate::metrics::PollerMetrics;
use crate::source::{PressureSource, ProcPressure};
use crate::types::{PressureSnapshot, Resource};

pub type SnapshotStream = CollectorStream<PressureSnapshot>;

pub struct Poller {
    source: Arc<dyn PressureSource>,
    resource: Resource,
    config: PollerConfig,
    metrics: Arc<PollerMetrics>,
}

impl Poller {
    pub fn new(source: Arc<dyn PressureSource>, resource: Resource, config: PollerConfig) -> Self {
        Self {
            source,
            resource,
            config,
            metrics: Arc::new(PollerMetrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PollerMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> Arc<PollerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Spawn the sampling task. Must be called from within a tokio runtime.
    pub fn start(self) -> Result<(SnapshotStream, CancelHandle)> {
        self.config.validate()?;

        let (tx, rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let name = format!("poller:{}", self.resource);

        info!(
            "[poller] starting {} every {:?}",
            self.resource,
            self.config.interval()
        );
        let task = tokio::spawn(self.run(tx, shutdown_rx));

        Ok((
            CollectorStream::new(rx, shutdown_tx.subscribe()),
            CancelHandle::new(name, shutdown_tx, task),
        ))
    }

    async fn run(self, tx: mpsc::Sender<PressureSnapshot>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last: Option<PressureSnapshot> = None;
        let mut last_error: Option<String> = None;

        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }

            self.metrics.inc_samples();
            let current = match self.source.read(self.resource) {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    self.metrics.inc_read_errors();
                    log_once(&mut last_error, format!("[poller] {}: {err}", self.resource));
                    continue;
                }
            };
            last_error = None;

            if last.as_ref() == Some(&current) {
                self.metrics.inc_duplicates();
                continue;
            }

            // Hand the snapshot over, then hold the next sample back until the
            // consumer has taken it.
            let delivered = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                sent = tx.send(current.clone()) => sent.is_ok(),
            };
            if !delivered {
                debug!("[poller] {} consumer dropped the stream", self.resource);
                break;
            }
            self.metrics.inc_emitted();
            last = Some(current);

            let consumed = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                permit = tx.reserve() => permit.is_ok(),
            };
            if !consumed {
                debug!("[poller] {} consumer dropped the stream", self.resource);
                break;
            }
        }

        debug!("[poller] {} stopped", self.resource);
    }
}

fn log_once(last_error: &mut Option<String>, message: String) {
    if last_error.as_ref() != Some(&message) {
        warn!("{message}");
        *last_error = Some(message);
    } else {
        debug!("{message}");
    }
}

/// Poll `/proc/pressure/<resource>` every `interval`.
pub fn start_polling(
    resource: Resource,
    interval: Duration,
) -> Result<(SnapshotStream, CancelHandle)> {
    Poller::new(
        Arc::new(ProcPressure::default()),
        resource,
        PollerConfig::with_interval(interval)?,
    )
    .start()
}
