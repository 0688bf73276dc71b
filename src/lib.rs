pub mod collectors;
pub mod config;
pub mod error;
pub mod metrics;
pub mod source;
pub mod types;
pub mod utils;

pub use collectors::{
    AlertStream, CancelHandle, CollectorStream, Poller, SnapshotStream, StarvationDetector,
    start_detecting, start_polling,
};
pub use config::{Config, DetectorConfig, LoggingConfig, PollerConfig, PressureConfig};
pub use error::{PsiError, Result};
pub use metrics::{PollerMetrics, PollerMetricsSnapshot};
pub use source::{PressureSource, ProcPressure};
pub use types::{
    Metric, PressureLine, PressureSnapshot, Resource, StarvationAlert, SystemPressure,
    compare_threshold,
};
