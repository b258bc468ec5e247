//! Normalized absolute paths and filesystem case sensitivity
//!
//! A [`NormalizedPath`] keeps two views of the same location: the real,
//! symlink-resolved path (used for OS calls and event reporting) and a list of
//! segment keys (used to index the registry trie). On case-insensitive
//! filesystems the keys are case-folded; the stored path never is.

use serde::{Deserialize, Serialize};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// One trie key: a single path component, case-folded when required
pub type Segment = OsString;

/// Whether the filesystem distinguishes `File.txt` from `file.txt`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseSensitivity {
    Sensitive,
    Insensitive,
}

impl CaseSensitivity {
    /// Guess from the target platform without touching the filesystem
    pub fn platform_default() -> Self {
        if cfg!(any(target_os = "macos", target_os = "windows")) {
            CaseSensitivity::Insensitive
        } else {
            CaseSensitivity::Sensitive
        }
    }

    /// Probe the system temp directory. Done once at manager startup.
    pub fn probe() -> Self {
        Self::probe_dir(&std::env::temp_dir())
    }

    /// Probe `dir` by creating a mixed-case file and looking it up in lowercase.
    ///
    /// Falls back to [`CaseSensitivity::platform_default`] if the directory is
    /// not writable.
    pub fn probe_dir(dir: &Path) -> Self {
        let name = format!("Canopy-Case-Probe-{}", uuid::Uuid::new_v4().simple());
        let probe = dir.join(&name);

        if let Err(e) = fs::write(&probe, b"") {
            warn!("Case sensitivity probe failed in {}: {}", dir.display(), e);
            return Self::platform_default();
        }

        let folded = dir.join(name.to_lowercase());
        let result = if folded.exists() {
            CaseSensitivity::Insensitive
        } else {
            CaseSensitivity::Sensitive
        };

        if let Err(e) = fs::remove_file(&probe) {
            warn!("Failed to remove case probe {}: {}", probe.display(), e);
        }

        debug!("Filesystem at {} is case {:?}", dir.display(), result);
        result
    }

    /// Convert one path component into its trie key
    pub fn fold(self, segment: &OsStr) -> Segment {
        match self {
            CaseSensitivity::Sensitive => segment.to_os_string(),
            CaseSensitivity::Insensitive => OsString::from(segment.to_string_lossy().to_lowercase()),
        }
    }
}

/// An absolute, symlink-resolved path plus its trie segment keys
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct NormalizedPath {
    path: PathBuf,
    segments: Vec<Segment>,
}

impl NormalizedPath {
    /// Wrap an already resolved absolute path.
    ///
    /// Does not touch the filesystem; callers resolve symlinks first.
    pub fn new(path: impl Into<PathBuf>, case: CaseSensitivity) -> Self {
        let path = path.into();
        let segments = path
            .components()
            .filter_map(|component| match component {
                Component::Prefix(prefix) => Some(case.fold(prefix.as_os_str())),
                Component::Normal(name) => Some(case.fold(name)),
                Component::RootDir | Component::CurDir | Component::ParentDir => None,
            })
            .collect();

        Self { path, segments }
    }

    /// The real filesystem path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Trie keys, outermost first
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// True if `self` equals `ancestor` or lies beneath it (by trie keys)
    pub fn is_within(&self, ancestor: &NormalizedPath) -> bool {
        self.segments.starts_with(&ancestor.segments)
    }
}

impl fmt::Debug for NormalizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NormalizedPath({})", self.path.display())
    }
}

impl fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}
