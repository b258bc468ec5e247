//! Watcher manager
//!
//! Owns the native backend, the registry and the set of live native handles.
//! Construct one explicitly and pass it around; a process-wide default
//! instance is available through [`init_default`] for callers that want one.

use crate::backend::{BackendStatus, NativeBackend, NotifyBackend};
use crate::native::{HandleId, NativeWatcher};
use crate::path_watcher::{ChangeStream, PathWatcher};
use crate::registry::{NativeWatcherRegistry, WatchedRoot};
use canopy_core::{CanopyConfig, CaseSensitivity, Result, WatchError, WatchOptions};
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

static DEFAULT: RwLock<Option<Arc<WatcherManager>>> = parking_lot::const_rwlock(None);

/// Serializable snapshot for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub backend: BackendStatus,
    pub live_handles: usize,
    pub roots: Vec<WatchedRoot>,
    pub case_sensitive: bool,
}

pub struct WatcherManager {
    backend: Arc<dyn NativeBackend>,
    registry: Arc<NativeWatcherRegistry>,
    live: Arc<DashMap<HandleId, Arc<NativeWatcher>>>,
    case: CaseSensitivity,
    shut_down: AtomicBool,
}

impl WatcherManager {
    /// Manager over the `notify` backend
    pub fn new(config: &CanopyConfig) -> Arc<Self> {
        let backend = Arc::new(NotifyBackend::new(config.watcher.clone()));
        Self::with_backend(backend, config.watcher.case_sensitive.resolve())
    }

    pub fn with_backend(backend: Arc<dyn NativeBackend>, case: CaseSensitivity) -> Arc<Self> {
        let live: Arc<DashMap<HandleId, Arc<NativeWatcher>>> = Arc::new(DashMap::new());

        let registry = {
            let backend = Arc::clone(&backend);
            let live = Arc::clone(&live);
            NativeWatcherRegistry::new(move |path, options| {
                let handle = NativeWatcher::new(path.clone(), options, Arc::clone(&backend));
                let id = handle.id();
                live.insert(id, Arc::clone(&handle));

                let live: Weak<DashMap<HandleId, Arc<NativeWatcher>>> = Arc::downgrade(&live);
                handle
                    .on_did_stop(move || {
                        if let Some(live) = live.upgrade() {
                            live.remove(&id);
                        }
                    })
                    .forget();
                handle
            })
        };

        debug!("Watcher manager ready (case {:?})", case);
        Arc::new(Self {
            backend,
            registry,
            live,
            case,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn case_sensitivity(&self) -> CaseSensitivity {
        self.case
    }

    pub fn registry(&self) -> &Arc<NativeWatcherRegistry> {
        &self.registry
    }

    /// A path watcher that has not attached yet
    pub fn create_watcher(&self, root: impl Into<PathBuf>, options: WatchOptions) -> Result<PathWatcher> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(WatchError::ShutDown);
        }
        Ok(PathWatcher::new(root, options, Arc::clone(&self.registry), self.case))
    }

    /// Watch `root` and return once events are flowing
    pub async fn watch_path(
        &self,
        root: impl Into<PathBuf>,
        options: WatchOptions,
    ) -> Result<(PathWatcher, ChangeStream)> {
        let watcher = self.create_watcher(root, options)?;
        match watcher.subscribe().await {
            Ok(stream) => {
                debug!("Watching {}", watcher.requested_path().display());
                Ok((watcher, stream))
            }
            Err(e) => {
                watcher.dispose().await;
                Err(e)
            }
        }
    }

    /// Stop every live native handle without splitting
    pub async fn stop_all_watchers(&self) {
        let handles: Vec<_> = self.live.iter().map(|entry| Arc::clone(entry.value())).collect();
        if handles.is_empty() {
            return;
        }
        info!("Stopping {} native watchers", handles.len());
        join_all(handles.iter().map(|handle| handle.stop(false))).await;
    }

    /// Refuse new watches and stop everything
    pub async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        self.stop_all_watchers().await;
    }

    /// Handles created and not yet stopped
    pub fn live_handles(&self) -> Vec<Arc<NativeWatcher>> {
        self.live.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Indented rendering of the registry trie
    pub fn print_watchers(&self) -> String {
        self.registry.print()
    }

    /// Apply watcher settings to native handles created from now on
    pub fn configure(&self, config: &CanopyConfig) {
        self.backend.configure(&config.watcher);
    }

    pub fn status(&self) -> ManagerStatus {
        ManagerStatus {
            backend: self.backend.describe(),
            live_handles: self.live.len(),
            roots: self.registry.roots(),
            case_sensitive: self.case == CaseSensitivity::Sensitive,
        }
    }
}

/// Install the process-wide manager, replacing any previous one
pub fn init_default(config: &CanopyConfig) -> Arc<WatcherManager> {
    let manager = WatcherManager::new(config);
    *DEFAULT.write() = Some(Arc::clone(&manager));
    manager
}

/// The process-wide manager, if initialized
pub fn default_manager() -> Option<Arc<WatcherManager>> {
    DEFAULT.read().clone()
}

/// Remove the process-wide manager and stop its watchers
pub async fn shutdown_default() {
    let manager = DEFAULT.write().take();
    if let Some(manager) = manager {
        manager.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::registry::Lookup;
    use canopy_core::{ChangeEvent, EntryKind, NativeOptions, NormalizedPath};
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        backend: Arc<MockBackend>,
        manager: Arc<WatcherManager>,
    }

    impl Fixture {
        fn new(dirs: &[&str]) -> Self {
            let dir = TempDir::new().unwrap();
            let root = dir.path().canonicalize().unwrap();
            for sub in dirs {
                fs::create_dir_all(root.join(sub)).unwrap();
            }
            let backend = Arc::new(MockBackend::new());
            let manager = WatcherManager::with_backend(backend.clone(), CaseSensitivity::Sensitive);
            Self {
                _dir: dir,
                root,
                backend,
                manager,
            }
        }

        fn path(&self, sub: &str) -> PathBuf {
            if sub.is_empty() {
                self.root.clone()
            } else {
                self.root.join(sub)
            }
        }

        async fn watch(&self, sub: &str, recursive: bool) -> (PathWatcher, ChangeStream) {
            let options = if recursive {
                WatchOptions::recursive()
            } else {
                WatchOptions::non_recursive()
            };
            self.manager.watch_path(self.path(sub), options).await.unwrap()
        }

        fn lookup(&self, sub: &str) -> Lookup {
            self.manager
                .registry()
                .lookup(&NormalizedPath::new(self.path(sub), CaseSensitivity::Sensitive))
        }

        /// Trie rendering relative to the temp dir
        fn tree(&self) -> String {
            let printed = self.manager.print_watchers();
            let depth = NormalizedPath::new(&self.root, CaseSensitivity::Sensitive)
                .segments()
                .len();
            printed
                .lines()
                .filter_map(|line| {
                    let indent = line.len() - line.trim_start().len();
                    (indent >= depth * 2).then(|| format!("{}\n", &line[depth * 2..]))
                })
                .collect()
        }
    }

    fn handle(watcher: &PathWatcher) -> Arc<NativeWatcher> {
        watcher.attached_handle().expect("watcher is attached")
    }

    fn parent_handle(lookup: Lookup) -> HandleId {
        match lookup {
            Lookup::Parent(parent) => parent.handle.id(),
            other => panic!("expected a parent, got {:?}", other),
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_same_path_shares_one_handle() {
        let fx = Fixture::new(&["existing/path"]);
        let (first, _first_events) = fx.watch("existing/path", true).await;
        let (second, _second_events) = fx.watch("existing/path", true).await;

        let (third, fourth) = futures::join!(
            fx.manager.watch_path(fx.path("existing/path"), WatchOptions::recursive()),
            fx.manager.watch_path(fx.path("existing/path"), WatchOptions::recursive()),
        );
        let (third, _third_events) = third.unwrap();
        let (fourth, _fourth_events) = fourth.unwrap();

        let id = handle(&first).id();
        for watcher in [&second, &third, &fourth] {
            assert_eq!(handle(watcher).id(), id);
        }
        assert_eq!(fx.backend.created().len(), 1);
        assert_eq!(fx.manager.live_handles().len(), 1);
    }

    #[tokio::test]
    async fn test_child_path_reuses_parent_handle() {
        let fx = Fixture::new(&["existing/path/sub/directory"]);
        let (parent, _parent_events) = fx.watch("existing/path", true).await;
        let (child, mut child_events) = fx.watch("existing/path/sub/directory", true).await;

        assert_eq!(handle(&parent).id(), handle(&child).id());
        assert_eq!(fx.backend.created().len(), 1);
        assert_eq!(fx.tree(), "existing\n  path\n    [watcher +1]\n");

        fx.backend.emit(
            &fx.path("existing/path"),
            vec![
                ChangeEvent::created(EntryKind::File, fx.path("existing/path/outside.txt")),
                ChangeEvent::created(EntryKind::File, fx.path("existing/path/sub/directory/inside.txt")),
            ],
        );
        let batch = child_events.recv().await.unwrap();
        assert_eq!(
            batch,
            vec![ChangeEvent::created(
                EntryKind::File,
                fx.path("existing/path/sub/directory/inside.txt")
            )]
        );
    }

    #[tokio::test]
    async fn test_parent_watch_adopts_children() {
        let fx = Fixture::new(&[
            "existing/path/child/directory/zero",
            "existing/path/child/directory/one",
            "another/path",
        ]);
        let (zero, _zero_events) = fx.watch("existing/path/child/directory/zero", true).await;
        let (one, _one_events) = fx.watch("existing/path/child/directory/one", true).await;
        let (other, _other_events) = fx.watch("another/path", true).await;
        let old_zero = handle(&zero);
        let old_one = handle(&one);
        let other_id = handle(&other).id();

        let (parent, _parent_events) = fx.watch("existing/path", true).await;
        settle().await;

        let parent_id = handle(&parent).id();
        assert_eq!(handle(&zero).id(), parent_id);
        assert_eq!(handle(&one).id(), parent_id);
        assert_eq!(handle(&other).id(), other_id);
        assert!(old_zero.is_retired());
        assert!(old_one.is_retired());
        assert_eq!(fx.manager.live_handles().len(), 2);
        assert_eq!(
            fx.tree(),
            "another\n  path\n    [watcher]\nexisting\n  path\n    [watcher +2]\n"
        );
    }

    #[tokio::test]
    async fn test_stopped_handle_is_removed() {
        let fx = Fixture::new(&["stopped", "running"]);
        let (stopped, stopped_events) = fx.watch("stopped", true).await;
        let (running, _running_events) = fx.watch("running", true).await;

        drop(stopped_events);
        stopped.dispose().await;
        settle().await;

        assert!(matches!(fx.lookup("stopped"), Lookup::Missing));
        assert_eq!(parent_handle(fx.lookup("running")), handle(&running).id());
        assert_eq!(fx.backend.destroyed(), vec![fx.path("stopped")]);
    }

    #[tokio::test]
    async fn test_rewatch_during_release_gets_fresh_handle() {
        let fx = Fixture::new(&["a"]);
        let (first, _first_events) = fx.watch("a", true).await;
        let old = handle(&first);

        let disposal = first.dispose();
        assert!(old.is_retired());
        assert!(matches!(fx.lookup("a"), Lookup::Missing));

        let (second, mut second_events) = fx.watch("a", true).await;
        disposal.await;
        settle().await;

        let current = handle(&second);
        assert_ne!(current.id(), old.id());
        assert!(current.is_running());
        assert_eq!(fx.backend.created().len(), 2);
        assert_eq!(fx.backend.destroyed(), vec![fx.path("a")]);

        fx.backend.emit(
            &fx.path("a"),
            vec![ChangeEvent::created(EntryKind::File, fx.path("a/new.txt"))],
        );
        assert_eq!(second_events.recv().await.unwrap()[0].path, fx.path("a/new.txt"));
    }

    #[tokio::test]
    async fn test_dropping_last_stream_then_rewatching_keeps_new_stream() {
        let fx = Fixture::new(&["a"]);
        let (first, first_events) = fx.watch("a", true).await;
        let old = handle(&first);

        drop(first_events);
        let (second, mut second_events) = fx.watch("a", true).await;
        settle().await;

        assert!(old.is_retired());
        assert_ne!(handle(&second).id(), old.id());
        fx.backend.emit(
            &fx.path("a"),
            vec![ChangeEvent::modified(EntryKind::File, fx.path("a/f.txt"))],
        );
        assert_eq!(second_events.recv().await.unwrap()[0].path, fx.path("a/f.txt"));
    }

    #[tokio::test]
    async fn test_awaited_dispose_releases_without_settling() {
        let fx = Fixture::new(&["a"]);
        let (watcher, _events) = fx.watch("a", true).await;

        watcher.dispose().await;

        assert!(fx.manager.live_handles().is_empty());
        assert!(fx.backend.active().is_empty());
        assert_eq!(fx.manager.print_watchers(), "");
    }

    #[tokio::test]
    async fn test_dispose_racing_split_stop_releases_once() {
        let fx = Fixture::new(&["parent"]);
        let (parent, _parent_events) = fx.watch("parent", true).await;
        let covering = handle(&parent);

        let stops = Arc::new(AtomicUsize::new(0));
        let count = stops.clone();
        covering
            .on_will_stop(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
            .forget();

        futures::join!(parent.dispose(), covering.stop(true), covering.stop(true));

        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(fx.backend.release_calls(), 1);
        assert_eq!(fx.backend.destroyed(), vec![fx.path("parent")]);
        assert!(fx.manager.live_handles().is_empty());
        assert_eq!(fx.manager.print_watchers(), "");
    }

    #[tokio::test]
    async fn test_split_reassigns_children() {
        let fx = Fixture::new(&["parent/child0", "parent/child1"]);
        let (parent, _parent_events) = fx.watch("parent", true).await;
        let (child0, mut child0_events) = fx.watch("parent/child0", true).await;
        let (child1, _child1_events) = fx.watch("parent/child1", true).await;
        let covering = handle(&parent);
        assert_eq!(handle(&child0).id(), covering.id());

        parent.dispose().await;
        covering.stop(true).await;
        settle().await;

        assert!(matches!(fx.lookup("parent"), Lookup::Children(ref c) if c.len() == 2));
        let child0_handle = handle(&child0);
        assert_ne!(child0_handle.id(), covering.id());
        assert_eq!(child0_handle.path().path(), fx.path("parent/child0"));
        assert_eq!(parent_handle(fx.lookup("parent/child0")), child0_handle.id());
        assert_eq!(parent_handle(fx.lookup("parent/child1")), handle(&child1).id());
        assert!(child0_handle.is_running());

        fx.backend.emit(
            &fx.path("parent/child0"),
            vec![ChangeEvent::created(EntryKind::File, fx.path("parent/child0/new.txt"))],
        );
        assert_eq!(
            child0_events.recv().await.unwrap()[0].path,
            fx.path("parent/child0/new.txt")
        );
    }

    #[tokio::test]
    async fn test_split_consolidates_nested_children() {
        let fx = Fixture::new(&["parent/child0/child1"]);
        let (parent, _parent_events) = fx.watch("parent", true).await;
        let (child0, _child0_events) = fx.watch("parent/child0", true).await;
        let (child1, _child1_events) = fx.watch("parent/child0/child1", true).await;
        let covering = handle(&parent);

        parent.dispose().await;
        covering.stop(true).await;
        settle().await;

        let replacement = handle(&child0);
        assert_eq!(replacement.path().path(), fx.path("parent/child0"));
        assert_eq!(handle(&child1).id(), replacement.id());
        assert_eq!(fx.tree(), "parent\n  child0\n    [watcher +1]\n");
        assert_eq!(fx.backend.created().len(), 2);
    }

    #[tokio::test]
    async fn test_split_rebuilds_mixed_recursion() {
        let fx = Fixture::new(&["root/nonrec0/subdir/rec0", "root/rec1/nonrec1"]);
        let (root, _root_events) = fx.watch("root", true).await;
        let (nonrec0, _nonrec0_events) = fx.watch("root/nonrec0", false).await;
        let (rec0, _rec0_events) = fx.watch("root/nonrec0/subdir/rec0", true).await;
        let (rec1, _rec1_events) = fx.watch("root/rec1", true).await;
        let (nonrec1, _nonrec1_events) = fx.watch("root/rec1/nonrec1", false).await;
        let covering = handle(&root);
        assert_eq!(fx.tree(), "root\n  [watcher +4]\n");

        root.dispose().await;
        covering.stop(true).await;
        settle().await;

        assert_eq!(
            fx.tree(),
            "root\n  nonrec0\n    [non-recursive watcher]\n    subdir\n      rec0\n        [watcher]\n  rec1\n    [watcher +1]\n"
        );
        assert!(!handle(&nonrec0).options().recursive);
        assert_eq!(handle(&nonrec0).path().path(), fx.path("root/nonrec0"));
        assert_eq!(handle(&rec0).path().path(), fx.path("root/nonrec0/subdir/rec0"));
        assert_eq!(handle(&rec1).path().path(), fx.path("root/rec1"));
        assert_eq!(handle(&nonrec1).id(), handle(&rec1).id());

        // Stopping rec1 hands its non-recursive child its own handle
        let rec1_handle = handle(&rec1);
        rec1.dispose().await;
        rec1_handle.stop(true).await;
        settle().await;

        let nonrec1_handle = handle(&nonrec1);
        assert_eq!(nonrec1_handle.path().path(), fx.path("root/rec1/nonrec1"));
        assert!(!nonrec1_handle.options().recursive);
    }

    #[tokio::test]
    async fn test_split_prunes_unused_replacements() {
        let fx = Fixture::new(&["parent/child"]);
        let (parent, _parent_events) = fx.watch("parent", true).await;
        let (child, child_events) = fx.watch("parent/child", true).await;
        let covering = handle(&parent);

        drop(child_events);
        child.dispose().await;
        parent.dispose().await;
        settle().await;

        assert!(covering.is_retired());
        assert_eq!(fx.manager.print_watchers(), "");
        assert!(fx.manager.live_handles().is_empty());
        assert!(fx.backend.active().is_empty());
    }

    #[tokio::test]
    async fn test_nonrecursive_reuses_same_directory() {
        let fx = Fixture::new(&["dir"]);
        let (first, _first_events) = fx.watch("dir", false).await;
        let (second, _second_events) = fx.watch("dir", false).await;

        assert_eq!(handle(&first).id(), handle(&second).id());
        assert_eq!(fx.backend.active(), vec![(fx.path("dir"), NativeOptions::NON_RECURSIVE)]);
    }

    #[tokio::test]
    async fn test_nonrecursive_attaches_to_existing_recursive() {
        let fx = Fixture::new(&["dir/sub"]);
        let (recursive, _recursive_events) = fx.watch("dir", true).await;
        let (same, _same_events) = fx.watch("dir", false).await;
        let (below, mut below_events) = fx.watch("dir/sub", false).await;

        let id = handle(&recursive).id();
        assert_eq!(handle(&same).id(), id);
        assert_eq!(handle(&below).id(), id);

        fx.backend.emit(
            &fx.path("dir"),
            vec![
                ChangeEvent::created(EntryKind::File, fx.path("dir/sub/deep/file.txt")),
                ChangeEvent::created(EntryKind::File, fx.path("dir/sub/file.txt")),
            ],
        );
        assert_eq!(
            below_events.recv().await.unwrap(),
            vec![ChangeEvent::created(EntryKind::File, fx.path("dir/sub/file.txt"))]
        );
    }

    #[tokio::test]
    async fn test_nonrecursive_moves_to_new_recursive_on_same_directory() {
        let fx = Fixture::new(&["dir"]);
        let (narrow, _narrow_events) = fx.watch("dir", false).await;
        let old = handle(&narrow);

        let (broad, _broad_events) = fx.watch("dir", true).await;
        settle().await;

        assert_eq!(handle(&narrow).id(), handle(&broad).id());
        assert!(old.is_retired());
        assert_eq!(fx.backend.destroyed(), vec![fx.path("dir")]);
        assert_eq!(fx.backend.active(), vec![(fx.path("dir"), NativeOptions::RECURSIVE)]);
    }

    #[tokio::test]
    async fn test_nonrecursive_moves_to_new_recursive_parent() {
        let fx = Fixture::new(&["parent/dir"]);
        let (narrow, mut narrow_events) = fx.watch("parent/dir", false).await;
        let old = handle(&narrow);

        let (broad, _broad_events) = fx.watch("parent", true).await;
        settle().await;

        assert_eq!(handle(&narrow).id(), handle(&broad).id());
        assert!(old.is_retired());

        fx.backend.emit(
            &fx.path("parent"),
            vec![
                ChangeEvent::modified(EntryKind::File, fx.path("parent/dir/a/b.txt")),
                ChangeEvent::modified(EntryKind::File, fx.path("parent/dir/c.txt")),
            ],
        );
        assert_eq!(
            narrow_events.recv().await.unwrap(),
            vec![ChangeEvent::modified(EntryKind::File, fx.path("parent/dir/c.txt"))]
        );
    }

    #[tokio::test]
    async fn test_nonrecursive_parent_allows_recursive_child() {
        let fx = Fixture::new(&["parent/child"]);
        let (parent, _parent_events) = fx.watch("parent", false).await;
        let (child, _child_events) = fx.watch("parent/child", true).await;

        assert_ne!(handle(&parent).id(), handle(&child).id());
        assert!(handle(&child).options().recursive);
        assert!(fx.backend.destroyed().is_empty());
        assert_eq!(
            fx.tree(),
            "parent\n  [non-recursive watcher]\n  child\n    [watcher]\n"
        );
    }

    #[tokio::test]
    async fn test_nonrecursive_parent_does_not_adopt_children() {
        let fx = Fixture::new(&["parent/child"]);
        let (child, _child_events) = fx.watch("parent/child", true).await;
        let (parent, _parent_events) = fx.watch("parent", false).await;
        settle().await;

        assert_ne!(handle(&parent).id(), handle(&child).id());
        assert!(fx.backend.destroyed().is_empty());
        assert_eq!(fx.manager.live_handles().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_start_surfaces_error() {
        let fx = Fixture::new(&["denied"]);
        fx.backend.fail_on(fx.path("denied"));

        let err = fx
            .manager
            .watch_path(fx.path("denied"), WatchOptions::recursive())
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::NativeWatch { .. }));

        settle().await;
        assert_eq!(fx.manager.print_watchers(), "");
        assert!(fx.manager.live_handles().is_empty());
    }

    #[tokio::test]
    async fn test_stop_all_watchers_ends_streams() {
        let fx = Fixture::new(&["a", "b/c"]);
        let (_a, mut a_events) = fx.watch("a", true).await;
        let (_b, mut b_events) = fx.watch("b", true).await;
        let (_c, _c_events) = fx.watch("b/c", true).await;

        fx.manager.stop_all_watchers().await;

        assert_eq!(a_events.recv().await, None);
        assert_eq!(b_events.recv().await, None);
        assert!(fx.manager.live_handles().is_empty());
        assert!(fx.backend.active().is_empty());
        assert_eq!(fx.manager.print_watchers(), "");
        assert_eq!(fx.backend.created().len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_watches() {
        let fx = Fixture::new(&["a"]);
        fx.manager.shutdown().await;

        let err = fx
            .manager
            .watch_path(fx.path("a"), WatchOptions::recursive())
            .await
            .unwrap_err();
        assert_eq!(err, WatchError::ShutDown);
    }

    #[tokio::test]
    async fn test_status_reports_roots() {
        let fx = Fixture::new(&["a/b"]);
        let (_a, _a_events) = fx.watch("a", true).await;
        let (_b, _b_events) = fx.watch("a/b", false).await;

        let status = fx.manager.status();
        assert_eq!(status.live_handles, 1);
        assert_eq!(status.backend.active_watches, 1);
        assert_eq!(status.roots.len(), 1);
        assert_eq!(status.roots[0].path, fx.path("a"));
        assert_eq!(status.roots[0].adopted, 1);
        assert!(status.case_sensitive);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["roots"][0]["recursive"], true);
    }

    #[tokio::test]
    async fn test_default_manager_lifecycle() {
        let manager = init_default(&CanopyConfig::default());
        assert!(Arc::ptr_eq(&default_manager().unwrap(), &manager));

        shutdown_default().await;
        assert!(default_manager().is_none());
        assert!(manager.create_watcher(Path::new("/tmp"), WatchOptions::recursive()).is_err());
    }
}
