//! Outcomes of trie lookups and consolidation decisions

use super::node::AdoptedChild;
use crate::native::NativeWatcher;
use canopy_core::{NativeOptions, NormalizedPath, Segment};
use std::fmt;
use std::sync::Arc;

/// What a lookup found for a requested path
pub enum Lookup {
    /// A watcher exists at the path or one of its ancestors
    Parent(ParentMatch),
    /// No covering watcher; these watchers live strictly beneath the path
    Children(Vec<ChildWatcher>),
    /// Nothing related is watched
    Missing,
}

pub struct ParentMatch {
    pub handle: Arc<NativeWatcher>,
    pub root: NormalizedPath,
    pub options: NativeOptions,
    /// Segments from the watcher's root down to the requested path
    pub remaining: Vec<Segment>,
}

/// A watcher node found beneath a requested path
pub struct ChildWatcher {
    /// Segments relative to the requested path
    pub relative: Vec<Segment>,
    pub path: NormalizedPath,
    pub handle: Arc<NativeWatcher>,
    pub options: NativeOptions,
    /// Paths that node had itself adopted, relative to the node
    pub adopted: Vec<(Vec<Segment>, AdoptedChild)>,
}

/// Where a consumer should attach
#[derive(Clone)]
pub struct Attachment {
    pub handle: Arc<NativeWatcher>,
    pub root: NormalizedPath,
    pub options: NativeOptions,
}

/// A handle whose consumers must move elsewhere
pub struct Reattachment {
    pub from: Arc<NativeWatcher>,
    pub to: Attachment,
}

/// Side effects of one `add`, applied by the caller after the trie is unlocked
pub struct Consolidation {
    pub attach: Attachment,
    pub reattach: Vec<Reattachment>,
    /// Handles replaced by this consolidation, to be stopped
    pub retire: Vec<Arc<NativeWatcher>>,
    /// Handles created by this consolidation
    pub created: Vec<Arc<NativeWatcher>>,
}

impl Consolidation {
    pub(crate) fn reuse(attach: Attachment) -> Self {
        Self {
            attach,
            reattach: Vec::new(),
            retire: Vec::new(),
            created: Vec::new(),
        }
    }
}

/// Side effects of removing a watcher node
#[derive(Default)]
pub struct Eviction {
    /// Whether a node owned by the stopping handle was found
    pub evicted: bool,
    pub reattach: Vec<Reattachment>,
    /// Replacement handles created by a split
    pub created: Vec<Arc<NativeWatcher>>,
    pub retire: Vec<Arc<NativeWatcher>>,
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("handle", &self.handle.id())
            .field("root", &self.root)
            .field("options", &self.options)
            .finish()
    }
}

impl fmt::Debug for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lookup::Parent(parent) => f
                .debug_struct("Parent")
                .field("handle", &parent.handle.id())
                .field("root", &parent.root)
                .field("remaining", &parent.remaining)
                .finish(),
            Lookup::Children(children) => f
                .debug_list()
                .entries(children.iter().map(|c| c.path.clone()))
                .finish(),
            Lookup::Missing => f.write_str("Missing"),
        }
    }
}
