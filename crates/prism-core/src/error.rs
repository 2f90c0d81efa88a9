//! Domain-specific errors for index operations

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::pool::TaskError;
use crate::render::RenderError;

/// Failure to read metadata out of a single archive.
#[derive(Error, Debug)]
pub enum InspectError {
    #[error("Unsupported archive format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("Corrupt archive {}: {reason}", path.display())]
    CorruptArchive { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl InspectError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::CorruptArchive {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether a bound quarantine handler may absorb this error.
    pub fn is_quarantinable(&self) -> bool {
        matches!(self, Self::UnsupportedFormat(_) | Self::CorruptArchive { .. })
    }
}

#[derive(Error, Debug)]
pub enum ManifestError {
    /// Missing or malformed manifest file. Recovered by reinitializing.
    #[error("Manifest {} is unreadable: {reason}", path.display())]
    Unreadable { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to serialize manifest: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Index lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Errors escalated to the caller of update, rebuild and sync.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Inspect(#[from] InspectError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid glob pattern: {0}")]
    Glob(#[from] glob::PatternError),

    #[error("Invalid project name: '{0}'")]
    InvalidProjectName(String),

    #[error("Sync source {} does not exist", .0.display())]
    SyncSourceMissing(PathBuf),

    #[error("No sync source configured; set [sync].cache_dir or $PIP_DOWNLOAD_CACHE")]
    SyncSourceUnset,

    /// A stop was requested; no new locked write was started.
    #[error("Interrupted")]
    Interrupted,
}

impl IndexError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}
