//! Consumer and native watch options

use crate::event::EntryKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Predicate applied to reported event paths before delivery.
///
/// Receives the entry kind from the event itself, since a deleted path can no
/// longer be inspected on disk.
#[derive(Clone)]
pub struct IncludeFilter(Arc<dyn Fn(&Path, EntryKind) -> bool + Send + Sync>);

impl IncludeFilter {
    pub fn new(predicate: impl Fn(&Path, EntryKind) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(predicate))
    }

    pub fn matches(&self, path: &Path, kind: EntryKind) -> bool {
        (self.0)(path, kind)
    }

    /// Both filters must accept
    pub fn and(self, other: IncludeFilter) -> Self {
        Self::new(move |path, kind| self.matches(path, kind) && other.matches(path, kind))
    }
}

impl fmt::Debug for IncludeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IncludeFilter(..)")
    }
}

/// Options for one consumer watch request
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Report changes anywhere beneath the root, not only immediate children
    pub recursive: bool,
    /// Optional extra predicate on event paths
    pub include: Option<IncludeFilter>,
}

impl WatchOptions {
    pub fn recursive() -> Self {
        Self {
            recursive: true,
            include: None,
        }
    }

    pub fn non_recursive() -> Self {
        Self {
            recursive: false,
            include: None,
        }
    }

    pub fn with_include(mut self, filter: IncludeFilter) -> Self {
        self.include = Some(match self.include.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    /// The part of these options a native handle cares about
    pub fn native(&self) -> NativeOptions {
        NativeOptions {
            recursive: self.recursive,
        }
    }

    pub fn includes(&self, path: &Path, kind: EntryKind) -> bool {
        self.include.as_ref().map_or(true, |filter| filter.matches(path, kind))
    }
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self::recursive()
    }
}

/// Options used to create a native handle; also recorded for adopted children
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NativeOptions {
    pub recursive: bool,
}

impl NativeOptions {
    pub const RECURSIVE: NativeOptions = NativeOptions { recursive: true };
    pub const NON_RECURSIVE: NativeOptions = NativeOptions { recursive: false };
}
