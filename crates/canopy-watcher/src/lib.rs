//! Consolidating filesystem watcher
//!
//! Many consumers can watch overlapping directory trees while the process
//! holds as few OS-level watches as possible:
//! - one native handle per distinct root, shared by every consumer beneath it
//! - a new recursive watch on a parent adopts the handles of its children
//! - stopping a covering handle splits it back into per-child handles
//! - each consumer sees only events inside its own root and scope
//!
//! ```no_run
//! use canopy_core::{CanopyConfig, WatchOptions};
//! use canopy_watcher::WatcherManager;
//!
//! # async fn run() -> canopy_core::Result<()> {
//! let manager = WatcherManager::new(&CanopyConfig::default());
//! let (watcher, mut events) = manager.watch_path("/tmp", WatchOptions::recursive()).await?;
//! while let Some(batch) = events.recv().await {
//!     for event in batch {
//!         println!("{}", event);
//!     }
//! }
//! watcher.dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod emitter;
pub mod manager;
pub mod native;
pub mod path_watcher;
pub mod registry;

pub use backend::{BackendStatus, NativeBackend, NotifyBackend, RawEventSink, WatchToken};
pub use emitter::{Emitter, Subscription};
pub use manager::{default_manager, init_default, shutdown_default, ManagerStatus, WatcherManager};
pub use native::{Detach, HandleId, HandleState, NativeWatcher};
pub use path_watcher::{ChangeStream, ErrorStream, PathWatcher};
pub use registry::{NativeWatcherRegistry, WatchedRoot};

use canopy_core::{Result, WatchError, WatchOptions};
use std::path::PathBuf;

/// Watch `root` through the default manager
pub async fn watch_path(root: impl Into<PathBuf>, options: WatchOptions) -> Result<(PathWatcher, ChangeStream)> {
    let manager = default_manager().ok_or(WatchError::ShutDown)?;
    manager.watch_path(root, options).await
}

/// Stop every native handle of the default manager
pub async fn stop_all_watchers() {
    if let Some(manager) = default_manager() {
        manager.stop_all_watchers().await;
    }
}

/// Registry trie of the default manager
pub fn print_watchers() -> String {
    default_manager().map(|manager| manager.print_watchers()).unwrap_or_default()
}
