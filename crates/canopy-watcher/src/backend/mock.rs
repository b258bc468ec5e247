//! In-memory backend for deterministic tests

use super::{BackendStatus, NativeBackend, RawEventSink, WatchToken};
use canopy_core::{BackendKind, ChangeEvent, NativeOptions, Result, WatchError};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

struct MockWatch {
    path: PathBuf,
    options: NativeOptions,
    sink: RawEventSink,
}

/// Records every watch created and destroyed; events and errors are injected by hand
#[derive(Default)]
pub(crate) struct MockBackend {
    next_token: AtomicU64,
    watches: Mutex<BTreeMap<WatchToken, MockWatch>>,
    created: Mutex<Vec<(PathBuf, NativeOptions)>>,
    destroyed: Mutex<Vec<PathBuf>>,
    release_calls: AtomicUsize,
    failing: Mutex<HashSet<PathBuf>>,
}

impl MockBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make `create_watch` fail for this path
    pub(crate) fn fail_on(&self, path: impl Into<PathBuf>) {
        self.failing.lock().insert(path.into());
    }

    /// Deliver events to the live watch rooted at `root`
    pub(crate) fn emit(&self, root: &Path, events: Vec<ChangeEvent>) -> bool {
        self.sink_for(root).map_or(false, |sink| sink.deliver(Ok(events)))
    }

    pub(crate) fn emit_error(&self, root: &Path, error: WatchError) -> bool {
        self.sink_for(root).map_or(false, |sink| sink.deliver(Err(error)))
    }

    /// Roots of watches currently open, with their options
    pub(crate) fn active(&self) -> Vec<(PathBuf, NativeOptions)> {
        self.watches
            .lock()
            .values()
            .map(|w| (w.path.clone(), w.options))
            .collect()
    }

    pub(crate) fn created(&self) -> Vec<(PathBuf, NativeOptions)> {
        self.created.lock().clone()
    }

    pub(crate) fn destroyed(&self) -> Vec<PathBuf> {
        self.destroyed.lock().clone()
    }

    /// Every `destroy_watch` call, including ones for unknown tokens
    pub(crate) fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }

    fn sink_for(&self, root: &Path) -> Option<RawEventSink> {
        self.watches
            .lock()
            .values()
            .find(|w| w.path == root)
            .map(|w| w.sink.clone())
    }
}

impl NativeBackend for MockBackend {
    fn create_watch(&self, path: &Path, options: NativeOptions, sink: RawEventSink) -> Result<WatchToken> {
        if self.failing.lock().contains(path) {
            return Err(WatchError::native(path, "Permission denied"));
        }

        let token = WatchToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.created.lock().push((path.to_path_buf(), options));
        self.watches.lock().insert(
            token,
            MockWatch {
                path: path.to_path_buf(),
                options,
                sink,
            },
        );
        Ok(token)
    }

    fn destroy_watch(&self, token: WatchToken) -> Result<()> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(watch) = self.watches.lock().remove(&token) {
            self.destroyed.lock().push(watch.path);
        }
        Ok(())
    }

    fn describe(&self) -> BackendStatus {
        BackendStatus {
            kind: BackendKind::Native,
            active_watches: self.watches.lock().len(),
            poll_interval_ms: None,
        }
    }
}
