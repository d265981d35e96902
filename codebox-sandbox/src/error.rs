//! Error types for the sandbox library

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SandboxError>;

/// Failures of the sandbox itself.
///
/// Errors raised by submitted code are not `SandboxError`s; they are reported
/// through [`crate::ExecutionResult`] instead.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Session initialization failed: {0}")]
    Initialization(String),

    #[error("Script engine error: {0}")]
    Engine(String),

    #[error("Session worker is not running")]
    SessionUnavailable,

    #[error("Scratch directory error at {}: {source}", path.display())]
    Scratch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{source} (after deleting {deleted} files)")]
    ClearFiles {
        deleted: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Figure rendering failed: {0}")]
    Render(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SandboxError {
    pub(crate) fn scratch(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Scratch {
            path: path.into(),
            source,
        }
    }
}
