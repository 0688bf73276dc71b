use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::Resource;

#[derive(Error, Debug)]
pub enum PsiError {
    /// The pressure file could not be opened or read (kernel < 4.20, PSI
    /// disabled at boot, permissions).
    #[error("psi stats unavailable at {}: {source}", .path.display())]
    Unavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A `some`/`full` line was present but its fields did not parse.
    #[error("malformed {resource} pressure line {line:?}: {reason}")]
    Format {
        resource: Resource,
        line: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("protocol misuse: {0}")]
    ProtocolMisuse(String),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, PsiError>;

impl PsiError {
    /// Transient errors are absorbed by the poller; everything else is a
    /// caller mistake.
    pub fn is_transient(&self) -> bool {
        matches!(self, PsiError::Unavailable { .. } | PsiError::Format { .. })
    }
}
