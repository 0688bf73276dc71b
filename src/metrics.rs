use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-process counters for one poller. Nothing here is exported; callers can
/// read them through [`PollerMetrics::snapshot`].
#[derive(Debug, Default)]
pub struct PollerMetrics {
    samples: AtomicU64,
    emitted: AtomicU64,
    duplicates: AtomicU64,
    read_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PollerMetricsSnapshot {
    pub samples: u64,
    pub emitted: u64,
    pub duplicates: u64,
    pub read_errors: u64,
}

impl PollerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn inc_samples(&self) {
        self.samples.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_emitted(&self) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_duplicates(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_read_errors(&self) {
        self.read_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn read_errors(&self) -> u64 {
        self.read_errors.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> PollerMetricsSnapshot {
        PollerMetricsSnapshot {
            samples: self.samples.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
        }
    }
}
