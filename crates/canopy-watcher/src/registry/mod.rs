//! Registry of native watch handles
//!
//! Keeps a trie of every live native handle keyed by normalized path
//! segments and decides, for each new request, whether an existing handle can
//! serve it, whether a broader handle should replace narrower ones, or whether
//! a new handle is needed. Handles remove themselves from the trie when they
//! stop; a stop with `split` rebuilds replacement handles for whatever the
//! stopped handle had adopted.

mod node;
mod result;
mod tree;

pub use node::{AdoptedChild, DirectoryNode, Node, NonrecursiveWatcherNode, RecursiveWatcherNode};
pub use result::{Attachment, ChildWatcher, Consolidation, Eviction, Lookup, ParentMatch, Reattachment};
pub use tree::{Factory, Tree};

use crate::native::{HandleId, NativeWatcher};
use canopy_core::{NativeOptions, NormalizedPath, Result};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tracing::{debug, error};

/// One watcher node as reported by [`NativeWatcherRegistry::roots`]
#[derive(Debug, Clone, Serialize)]
pub struct WatchedRoot {
    pub path: PathBuf,
    pub recursive: bool,
    pub handle: HandleId,
    pub adopted: usize,
}

pub struct NativeWatcherRegistry {
    tree: Mutex<Tree>,
}

impl NativeWatcherRegistry {
    /// `create_native` builds an unstarted handle for a root and options
    pub fn new(
        create_native: impl Fn(&NormalizedPath, NativeOptions) -> Arc<NativeWatcher> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let factory: Factory = Arc::new(move |path: &NormalizedPath, options: NativeOptions| {
                let handle = create_native(path, options);
                let registry = weak.clone();
                let segments = path.segments().to_vec();
                let id = handle.id();

                // Lives as long as the handle; cleared when it stops
                handle
                    .on_will_stop(move |split| {
                        if let Some(registry) = registry.upgrade() {
                            registry.evict(&segments, id, split);
                        }
                    })
                    .forget();
                handle
            });

            Self {
                tree: Mutex::new(Tree::new(factory)),
            }
        })
    }

    /// Find or create the handle that should serve `root`.
    ///
    /// `on_attach` runs before any replaced handle is told to move its
    /// consumers, so the caller is already bound to the new handle by then.
    /// Replaced handles are stopped before this returns.
    pub async fn attach(
        &self,
        root: &NormalizedPath,
        options: NativeOptions,
        on_attach: impl FnOnce(&Attachment) + Send,
    ) -> Result<()> {
        let added = {
            let mut tree = self.tree.lock();
            tree.add(root.segments(), root, options)
        };
        let consolidation = added.map_err(|e| {
            error!("Registry: failed to add {}: {}", root, e);
            e
        })?;

        debug!(
            "Registry: {} served by {}. Tree state:\n{}",
            root,
            consolidation.attach.handle,
            self.print()
        );

        on_attach(&consolidation.attach);

        for reattachment in &consolidation.reattach {
            let to = &reattachment.to;
            reattachment.from.reattach_to(&to.handle, &to.root, to.options);
        }

        join_all(consolidation.retire.iter().map(|handle| handle.stop(false))).await;
        Ok(())
    }

    /// Drop the node owned by handle `id`, called from its will-stop signal
    fn evict(&self, segments: &[canopy_core::Segment], id: HandleId, split: bool) {
        let removed = {
            let mut tree = self.tree.lock();
            tree.remove(segments, id, split)
        };

        let eviction = match removed {
            Ok(eviction) => eviction,
            Err(e) => {
                error!("Registry: failed to evict {}: {}", id, e);
                return;
            }
        };

        if !eviction.evicted {
            debug!("Registry: {} no longer owns a node", id);
            return;
        }

        debug!(
            "Registry: evicted {} (split {}), {} replacement handles. Tree state:\n{}",
            id,
            split,
            eviction.created.len(),
            self.print()
        );

        for reattachment in &eviction.reattach {
            let to = &reattachment.to;
            reattachment.from.reattach_to(&to.handle, &to.root, to.options);
        }
        for handle in eviction.retire {
            handle.spawn_stop(false);
        }
        for handle in eviction.created {
            if handle.attached_count() == 0 {
                debug!("Registry: pruning unused replacement {}", handle);
                handle.spawn_stop(false);
            }
        }
    }

    /// Find watchers related to `path` without changing anything
    pub fn lookup(&self, path: &NormalizedPath) -> Lookup {
        self.tree.lock().lookup(path.segments())
    }

    /// Every watcher node currently in the trie
    pub fn roots(&self) -> Vec<WatchedRoot> {
        self.tree
            .lock()
            .watchers()
            .into_iter()
            .map(|watcher| WatchedRoot {
                path: watcher.path.path().to_path_buf(),
                recursive: watcher.options.recursive,
                handle: watcher.handle.id(),
                adopted: watcher.adopted.len(),
            })
            .collect()
    }

    pub fn print(&self) -> String {
        self.tree.lock().print()
    }
}
