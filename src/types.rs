use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PsiError;

/// Resource with a pressure file under `/proc/pressure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Cpu,
    Memory,
    Io,
}

impl Resource {
    pub const ALL: [Resource; 3] = [Resource::Cpu, Resource::Memory, Resource::Io];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Cpu => "cpu",
            Resource::Memory => "memory",
            Resource::Io => "io",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resource {
    type Err = PsiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cpu" => Ok(Resource::Cpu),
            "memory" => Ok(Resource::Memory),
            "io" => Ok(Resource::Io),
            other => Err(PsiError::Configuration(format!(
                "unknown resource {other:?} (expected cpu, memory or io)"
            ))),
        }
    }
}

/// Rolling average compared against the detector thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Avg10,
    Avg60,
    Avg300,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Avg10 => "avg10",
            Metric::Avg60 => "avg60",
            Metric::Avg300 => "avg300",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = PsiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "avg10" => Ok(Metric::Avg10),
            "avg60" => Ok(Metric::Avg60),
            "avg300" => Ok(Metric::Avg300),
            other => Err(PsiError::Configuration(format!(
                "unknown metric {other:?} (expected avg10, avg60 or avg300)"
            ))),
        }
    }
}

/// One line of `/proc/pressure/*`.
///
/// The averages are percentages over 10, 60 and 300 seconds. `total` is the
/// cumulative stall time in microseconds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PressureLine {
    pub avg10: f64,
    pub avg60: f64,
    pub avg300: f64,
    pub total: u64,
}

impl PressureLine {
    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Avg10 => self.avg10,
            Metric::Avg60 => self.avg60,
            Metric::Avg300 => self.avg300,
        }
    }
}

// Bitwise on the averages so a NaN reading equals itself and does not defeat
// deduplication.
impl PartialEq for PressureLine {
    fn eq(&self, other: &Self) -> bool {
        self.avg10.to_bits() == other.avg10.to_bits()
            && self.avg60.to_bits() == other.avg60.to_bits()
            && self.avg300.to_bits() == other.avg300.to_bits()
            && self.total == other.total
    }
}

impl Eq for PressureLine {}

impl fmt::Display for PressureLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "avg10={:.2} avg60={:.2} avg300={:.2} total={}",
            self.avg10, self.avg60, self.avg300, self.total
        )
    }
}

/// Full reading of one pressure file.
///
/// "some" is the share of time at least one task was stalled, "full" the share
/// of time all non-idle tasks were stalled at once. CPU has no "full" line on
/// kernels before 5.13.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PressureSnapshot {
    pub some: PressureLine,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full: Option<PressureLine>,
}

impl PressureSnapshot {
    pub fn has_full(&self) -> bool {
        self.full.is_some()
    }

    /// Human-readable summary for logging
    pub fn summary(&self) -> String {
        match &self.full {
            Some(full) => format!(
                "some={:.1}/{:.1}/{:.1}% full={:.1}/{:.1}/{:.1}%",
                self.some.avg10,
                self.some.avg60,
                self.some.avg300,
                full.avg10,
                full.avg60,
                full.avg300
            ),
            None => format!(
                "some={:.1}/{:.1}/{:.1}%",
                self.some.avg10, self.some.avg60, self.some.avg300
            ),
        }
    }
}

impl PartialEq for PressureSnapshot {
    fn eq(&self, other: &Self) -> bool {
        if self.some != other.some {
            return false;
        }
        match (&self.full, &other.full) {
            (Some(a), Some(b)) => a == b,
            (None, None) => true,
            _ => false,
        }
    }
}

impl Eq for PressureSnapshot {}

impl fmt::Display for PressureSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "some {}", self.some)?;
        if let Some(full) = &self.full {
            write!(f, "\nfull {}", full)?;
        }
        Ok(())
    }
}

/// Snapshots of every resource taken back to back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemPressure {
    pub cpu: PressureSnapshot,
    pub memory: PressureSnapshot,
    pub io: PressureSnapshot,
}

impl SystemPressure {
    pub fn get(&self, resource: Resource) -> &PressureSnapshot {
        match resource {
            Resource::Cpu => &self.cpu,
            Resource::Memory => &self.memory,
            Resource::Io => &self.io,
        }
    }
}

impl fmt::Display for SystemPressure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "memory:\n{}\n\ncpu:\n{}\n\nio:\n{}",
            self.memory, self.cpu, self.io
        )
    }
}

/// Emitted by a starvation detector on every state transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StarvationAlert {
    pub resource: Resource,
    pub metric: Metric,
    pub low_threshold: u32,
    pub high_threshold: u32,

    /// State entered by this transition.
    pub starved: bool,
    pub stats: PressureSnapshot,
    pub current: f64,
}

impl fmt::Display for StarvationAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.starved { "STARVED" } else { "recovered" };
        write!(
            f,
            "{} {} {}={:.2}% (low={} high={})",
            state,
            self.resource,
            self.metric,
            self.current,
            self.low_threshold,
            self.high_threshold
        )
    }
}

/// A negative threshold disables the comparison.
pub fn compare_threshold(threshold: i64, current: i64) -> bool {
    threshold >= 0 && current > threshold
}
