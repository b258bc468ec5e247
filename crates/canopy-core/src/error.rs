//! Error taxonomy shared by every canopy crate

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while resolving, attaching or running watches.
///
/// Cloneable so that a single native failure can be fanned out to every
/// path watcher attached to the failing handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    /// The requested root does not exist or cannot be resolved
    #[error("Cannot resolve watch root {path}: {reason}")]
    PathResolution { path: PathBuf, reason: String },

    /// The OS-level subscription could not be created or failed while running
    #[error("Native watch on {path} failed: {reason}")]
    NativeWatch { path: PathBuf, reason: String },

    /// The watched root disappeared; the native handle is gone for good
    #[error("Watched root {path} no longer exists")]
    RootVanished { path: PathBuf },

    /// Consolidation invariant violated. The trie topology is corrupt.
    #[error("Invalid watcher operation: {reason}")]
    InvalidOperation { reason: String },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    /// The owning manager was shut down or never initialized
    #[error("Watcher manager is not running")]
    ShutDown,

    #[error("Path watcher for {path} has been disposed")]
    Disposed { path: PathBuf },
}

impl WatchError {
    /// Build a resolution error from an I/O failure.
    pub fn resolution(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        WatchError::PathResolution {
            path: path.into(),
            reason: err.to_string(),
        }
    }

    /// Build a native watch error from any displayable failure.
    pub fn native(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        WatchError::NativeWatch {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        WatchError::InvalidOperation {
            reason: reason.into(),
        }
    }

    /// True for errors after which the native handle cannot keep running.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WatchError::RootVanished { .. })
    }
}

pub type Result<T> = std::result::Result<T, WatchError>;
