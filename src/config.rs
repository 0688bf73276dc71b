use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PsiError, Result};
use crate::source::DEFAULT_PRESSURE_ROOT;
use crate::types::{Metric, Resource};

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Top-level `psiwatch.toml`.
///
/// ```toml
/// [logging]
/// level = "debug"
///
/// [poller]
/// interval_ms = 250
///
/// [[detector]]
/// resource = "cpu"
/// metric = "avg10"
/// low_threshold = 70
/// high_threshold = 90
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub poller: PollerConfig,
    pub pressure: PressureConfig,
    #[serde(rename = "detector")]
    pub detectors: Vec<DetectorConfig>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            PsiError::Configuration(format!("failed to read {}: {err}", path.display()))
        })?;
        let config: Config = toml::from_str(&raw)
            .map_err(|err| PsiError::Configuration(format!("{}: {err}", path.display())))?;
        config.validate()?;
        log::debug!("[config] loaded {}", path.display());
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(raw).map_err(|err| PsiError::Configuration(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.poller.validate()?;
        for detector in &self.detectors {
            detector.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub interval_ms: u64,
}

impl PollerConfig {
    /// The interval is kept in whole milliseconds; anything finer is rejected
    /// rather than rounded.
    pub fn with_interval(interval: Duration) -> Result<Self> {
        if interval.subsec_nanos() % 1_000_000 != 0 {
            return Err(PsiError::Configuration(format!(
                "poller interval {interval:?} is not a whole number of milliseconds"
            )));
        }
        let interval_ms = u64::try_from(interval.as_millis()).map_err(|_| {
            PsiError::Configuration(format!("poller interval {interval:?} is too large"))
        })?;
        let config = Self { interval_ms };
        config.validate()?;
        Ok(config)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(PsiError::Configuration(
                "poller interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PressureConfig {
    pub root: PathBuf,
}

impl Default for PressureConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_PRESSURE_ROOT),
        }
    }
}

/// One hysteresis detector: starved above `high_threshold`, normal again
/// below `low_threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub resource: Resource,
    #[serde(default)]
    pub metric: Metric,
    pub low_threshold: u32,
    pub high_threshold: u32,
}

impl DetectorConfig {
    pub fn new(
        resource: Resource,
        metric: Metric,
        low_threshold: u32,
        high_threshold: u32,
    ) -> Self {
        Self {
            resource,
            metric,
            low_threshold,
            high_threshold,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.low_threshold >= self.high_threshold {
            return Err(PsiError::Configuration(format!(
                "{} {} detector: low_threshold ({}) must be below high_threshold ({})",
                self.resource, self.metric, self.low_threshold, self.high_threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_when_sections_missing() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.poller.interval(), Duration::from_millis(100));
        assert_eq!(config.pressure.root, PathBuf::from("/proc/pressure"));
        assert_eq!(config.logging.level, "info");
        assert!(config.detectors.is_empty());
    }

    #[test]
    fn parses_detectors() {
        let config = Config::from_toml(
            r#"
            [poller]
            interval_ms = 250

            [[detector]]
            resource = "cpu"
            low_threshold = 70
            high_threshold = 90

            [[detector]]
            resource = "memory"
            metric = "avg60"
            low_threshold = 10
            high_threshold = 20
            "#,
        )
        .unwrap();
        assert_eq!(config.poller.interval_ms, 250);
        assert_eq!(
            config.detectors,
            vec![
                DetectorConfig::new(Resource::Cpu, Metric::Avg10, 70, 90),
                DetectorConfig::new(Resource::Memory, Metric::Avg60, 10, 20),
            ]
        );
    }

    #[test]
    fn rejects_unknown_metric() {
        let err = Config::from_toml(
            r#"
            [[detector]]
            resource = "io"
            metric = "avg15"
            low_threshold = 1
            high_threshold = 2
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, PsiError::Configuration(_)));
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let err = Config::from_toml(
            r#"
            [[detector]]
            resource = "io"
            low_threshold = 90
            high_threshold = 90
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("must be below"));
    }

    #[test]
    fn rejects_zero_interval() {
        let err = Config::from_toml("[poller]\ninterval_ms = 0\n").unwrap_err();
        assert!(matches!(err, PsiError::Configuration(_)));
    }

    #[test]
    fn with_interval_keeps_whole_milliseconds() {
        let config = PollerConfig::with_interval(Duration::from_millis(250)).unwrap();
        assert_eq!(config.interval_ms, 250);
        assert_eq!(config.interval(), Duration::from_millis(250));
    }

    #[test]
    fn with_interval_rejects_sub_millisecond_precision() {
        let err = PollerConfig::with_interval(Duration::from_micros(500)).unwrap_err();
        assert!(matches!(err, PsiError::Configuration(_)));
        assert!(err.to_string().contains("whole number of milliseconds"));

        assert!(PollerConfig::with_interval(Duration::from_micros(1500)).is_err());
        assert!(PollerConfig::with_interval(Duration::ZERO).is_err());
    }

    #[test]
    fn load_reads_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
    }
}
