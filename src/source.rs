use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::{PressureSnapshot, Resource, SystemPressure};
use crate::utils::psi::{parse_snapshot_bytes, psi_path, read_file_no_stat};

pub const DEFAULT_PRESSURE_ROOT: &str = "/proc/pressure";

/// One synchronous snapshot read of a resource's pressure stats.
pub trait PressureSource: Send + Sync {
    fn read(&self, resource: Resource) -> Result<PressureSnapshot>;

    /// Read every resource; fails on the first one that is unavailable.
    fn read_all(&self) -> Result<SystemPressure> {
        Ok(SystemPressure {
            cpu: self.read(Resource::Cpu)?,
            memory: self.read(Resource::Memory)?,
            io: self.read(Resource::Io)?,
        })
    }
}

/// Reads `<root>/{cpu,memory,io}`, `/proc/pressure` by default.
#[derive(Debug, Clone)]
pub struct ProcPressure {
    root: PathBuf,
}

impl ProcPressure {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, resource: Resource) -> PathBuf {
        psi_path(&self.root, resource)
    }

    /// Check if PSI is available on this kernel
    pub fn is_available(&self) -> bool {
        self.path(Resource::Cpu).exists()
    }
}

impl Default for ProcPressure {
    fn default() -> Self {
        Self::new(DEFAULT_PRESSURE_ROOT)
    }
}

impl PressureSource for ProcPressure {
    fn read(&self, resource: Resource) -> Result<PressureSnapshot> {
        let raw = read_file_no_stat(&self.path(resource))?;
        parse_snapshot_bytes(resource, &raw)
    }
}
