//! Filesystem change events
//!
//! The same shape is used for raw events produced by a native handle and for
//! the filtered, rewritten events handed to consumers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// What happened to a filesystem entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Entry created
    Created,
    /// Entry deleted
    Deleted,
    /// Entry contents or metadata modified
    Modified,
    /// Entry moved from `old_path` to `path`
    Renamed,
}

/// Type of the entry that was acted upon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Unknown,
}

/// A single filesystem change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub action: ActionKind,
    pub kind: EntryKind,
    /// Absolute path of the entry (the new path for renames)
    pub path: PathBuf,
    /// Former path, only present for renames
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub old_path: Option<PathBuf>,
}

impl ChangeEvent {
    pub fn created(kind: EntryKind, path: impl Into<PathBuf>) -> Self {
        Self::new(ActionKind::Created, kind, path)
    }

    pub fn deleted(kind: EntryKind, path: impl Into<PathBuf>) -> Self {
        Self::new(ActionKind::Deleted, kind, path)
    }

    pub fn modified(kind: EntryKind, path: impl Into<PathBuf>) -> Self {
        Self::new(ActionKind::Modified, kind, path)
    }

    pub fn renamed(kind: EntryKind, old_path: impl Into<PathBuf>, path: impl Into<PathBuf>) -> Self {
        Self {
            action: ActionKind::Renamed,
            kind,
            path: path.into(),
            old_path: Some(old_path.into()),
        }
    }

    fn new(action: ActionKind, kind: EntryKind, path: impl Into<PathBuf>) -> Self {
        Self {
            action,
            kind,
            path: path.into(),
            old_path: None,
        }
    }

    /// Former path for renames
    pub fn old_path(&self) -> Option<&Path> {
        self.old_path.as_deref()
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Created => "created",
            ActionKind::Deleted => "deleted",
            ActionKind::Modified => "modified",
            ActionKind::Renamed => "renamed",
        };
        f.write_str(name)
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryKind::File => "file",
            EntryKind::Directory => "directory",
            EntryKind::Symlink => "symlink",
            EntryKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.old_path {
            Some(old) => write!(
                f,
                "{} {}: {} → {}",
                self.action,
                self.kind,
                old.display(),
                self.path.display()
            ),
            None => write!(f, "{} {}: {}", self.action, self.kind, self.path.display()),
        }
    }
}
