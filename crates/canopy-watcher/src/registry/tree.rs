//! Consolidation decisions over the registry trie
//!
//! `add` never starts or stops anything. It mutates the trie and returns the
//! side effects for the caller to apply once the trie lock is released.

use super::node::{Node, NonrecursiveWatcherNode, RecursiveWatcherNode};
use super::result::{Attachment, ChildWatcher, Consolidation, Eviction, Lookup, Reattachment};
use crate::native::{HandleId, NativeWatcher};
use canopy_core::{NativeOptions, NormalizedPath, Result, Segment, WatchError};
use std::sync::Arc;
use tracing::debug;

/// Builds a fresh native handle for a normalized root
pub type Factory = Arc<dyn Fn(&NormalizedPath, NativeOptions) -> Arc<NativeWatcher> + Send + Sync>;

/// One trie of watcher nodes. The registry owns the outermost one; a split
/// builds a subtree mounted at the stopped handle's root.
pub struct Tree {
    root: Node,
    factory: Factory,
}

impl Tree {
    pub fn new(factory: Factory) -> Self {
        Self {
            root: Node::empty(),
            factory,
        }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub(crate) fn into_root(self) -> Node {
        self.root
    }

    /// `segments` are relative to where the tree is mounted
    pub fn lookup(&self, segments: &[Segment]) -> Lookup {
        self.root.lookup(segments)
    }

    /// Every watcher node in the tree
    pub fn watchers(&self) -> Vec<ChildWatcher> {
        self.root.child_watchers(&[])
    }

    /// Decide which handle serves `path` and update the trie accordingly.
    ///
    /// `segments` locate `path` relative to where the tree is mounted.
    pub fn add(&mut self, segments: &[Segment], path: &NormalizedPath, options: NativeOptions) -> Result<Consolidation> {
        match self.root.lookup(segments) {
            Lookup::Parent(parent) => {
                let compatible = parent.options.recursive || (!options.recursive && parent.remaining.is_empty());
                if !compatible {
                    debug!("Tree: broadening {} to cover {} recursively", parent.handle, path);
                    let watchers = self
                        .root
                        .node_at(segments)
                        .map(|node| node.child_watchers(&[]))
                        .unwrap_or_default();
                    return self.attach_recursive(segments, path, watchers);
                }

                debug!("Tree: attaching {} to existing {}", path, parent.handle);
                let depth = segments.len() - parent.remaining.len();
                let node = self.root.node_at_mut(&segments[..depth]).ok_or_else(|| {
                    WatchError::invalid(format!("watcher for {} vanished during lookup", parent.root))
                })?;
                node.add_child_path(parent.remaining, path, options)?;

                Ok(Consolidation::reuse(Attachment {
                    handle: parent.handle,
                    root: parent.root,
                    options: parent.options,
                }))
            }
            Lookup::Children(children) if options.recursive => {
                if !children.is_empty() {
                    debug!("Tree: {} adopting {} existing watchers", path, children.len());
                }
                self.attach_recursive(segments, path, children)
            }
            Lookup::Children(_) => self.attach_nonrecursive(segments, path),
            Lookup::Missing if options.recursive => {
                debug!("Tree: creating new recursive watcher for {}", path);
                self.attach_recursive(segments, path, Vec::new())
            }
            Lookup::Missing => {
                debug!("Tree: creating new non-recursive watcher for {}", path);
                self.attach_nonrecursive(segments, path)
            }
        }
    }

    /// Place a new recursive node at `segments`, replacing `watchers` beneath it
    fn attach_recursive(
        &mut self,
        segments: &[Segment],
        path: &NormalizedPath,
        watchers: Vec<ChildWatcher>,
    ) -> Result<Consolidation> {
        let slot = self.root.slot_mut(segments)?;
        let handle = (self.factory)(path, NativeOptions::RECURSIVE);
        *slot = Node::Recursive(RecursiveWatcherNode::new(Arc::clone(&handle), path.clone(), &watchers));

        let attach = Attachment {
            handle: Arc::clone(&handle),
            root: path.clone(),
            options: NativeOptions::RECURSIVE,
        };
        let reattach = watchers
            .iter()
            .map(|watcher| Reattachment {
                from: Arc::clone(&watcher.handle),
                to: attach.clone(),
            })
            .collect();
        let retire = watchers.into_iter().map(|watcher| watcher.handle).collect();

        Ok(Consolidation {
            attach,
            reattach,
            retire,
            created: vec![handle],
        })
    }

    /// Place a new non-recursive node at `segments`, keeping deeper watchers
    fn attach_nonrecursive(&mut self, segments: &[Segment], path: &NormalizedPath) -> Result<Consolidation> {
        let slot = self.root.slot_mut(segments)?;
        let children = match std::mem::replace(slot, Node::empty()) {
            Node::Directory(dir) => dir.into_children(),
            occupied => {
                *slot = occupied;
                return Err(WatchError::invalid(format!(
                    "non-recursive watcher for {} would replace an existing watcher",
                    path
                )));
            }
        };

        let handle = (self.factory)(path, NativeOptions::NON_RECURSIVE);
        *slot = Node::Nonrecursive(NonrecursiveWatcherNode::new(Arc::clone(&handle), path.clone(), children));

        Ok(Consolidation {
            attach: Attachment {
                handle: Arc::clone(&handle),
                root: path.clone(),
                options: NativeOptions::NON_RECURSIVE,
            },
            reattach: Vec::new(),
            retire: Vec::new(),
            created: vec![handle],
        })
    }

    /// Remove the node at `segments` if handle `id` still owns it.
    ///
    /// With `split`, a recursive node's adopted paths get replacement handles.
    pub fn remove(&mut self, segments: &[Segment], id: HandleId, split: bool) -> Result<Eviction> {
        let mut eviction = Eviction::default();
        let factory = split.then(|| Arc::clone(&self.factory));
        let root = std::mem::replace(&mut self.root, Node::empty());
        self.root = root
            .remove(segments, id, factory.as_ref(), &mut eviction)?
            .unwrap_or_else(Node::empty);
        Ok(eviction)
    }

    /// Indented rendering of the trie, for diagnostics
    pub fn print(&self) -> String {
        let mut out = String::new();
        self.root.print(0, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use canopy_core::CaseSensitivity;

    fn new_tree() -> (Tree, Arc<MockBackend>) {
        let backend = Arc::new(MockBackend::new());
        let b = backend.clone();
        let factory: Factory =
            Arc::new(move |path: &NormalizedPath, options: NativeOptions| NativeWatcher::new(path.clone(), options, b.clone()));
        (Tree::new(factory), backend)
    }

    fn add(tree: &mut Tree, path: &str, recursive: bool) -> Consolidation {
        add_with_case(tree, path, recursive, CaseSensitivity::Sensitive)
    }

    fn add_with_case(tree: &mut Tree, path: &str, recursive: bool, case: CaseSensitivity) -> Consolidation {
        let path = NormalizedPath::new(path, case);
        let options = if recursive {
            NativeOptions::RECURSIVE
        } else {
            NativeOptions::NON_RECURSIVE
        };
        tree.add(path.segments(), &path, options).unwrap()
    }

    fn lookup(tree: &Tree, path: &str) -> Lookup {
        tree.lookup(NormalizedPath::new(path, CaseSensitivity::Sensitive).segments())
    }

    fn parent_id(lookup: Lookup) -> HandleId {
        match lookup {
            Lookup::Parent(parent) => parent.handle.id(),
            other => panic!("expected a parent, got {:?}", other),
        }
    }

    #[test]
    fn test_new_path_creates_watcher() {
        let (mut tree, _) = new_tree();
        let result = add(&mut tree, "/some/path", true);

        assert_eq!(result.created.len(), 1);
        assert!(result.retire.is_empty());
        assert_eq!(parent_id(lookup(&tree, "/some/path")), result.attach.handle.id());
    }

    #[test]
    fn test_same_path_reuses_watcher() {
        let (mut tree, _) = new_tree();
        let first = add(&mut tree, "/existing/path", true);
        let second = add(&mut tree, "/existing/path", true);

        assert!(second.created.is_empty());
        assert_eq!(first.attach.handle.id(), second.attach.handle.id());
        assert_eq!(tree.print(), "existing\n  path\n    [watcher]\n");
    }

    #[test]
    fn test_case_sensitive_paths_are_distinct() {
        let (mut tree, _) = new_tree();
        let lower = add(&mut tree, "/existing/path", true);
        let upper = add(&mut tree, "/EXISTING/PATH", true);
        assert_ne!(lower.attach.handle.id(), upper.attach.handle.id());
    }

    #[test]
    fn test_case_insensitive_paths_share_watcher() {
        let (mut tree, _) = new_tree();
        let lower = add_with_case(&mut tree, "/existing/path", true, CaseSensitivity::Insensitive);
        let upper = add_with_case(&mut tree, "/EXISTING/PATH", true, CaseSensitivity::Insensitive);

        assert_eq!(lower.attach.handle.id(), upper.attach.handle.id());
        assert_eq!(upper.attach.root.path(), std::path::Path::new("/existing/path"));
    }

    #[test]
    fn test_child_path_reuses_recursive_parent() {
        let (mut tree, _) = new_tree();
        let parent = add(&mut tree, "/existing/path", true);
        let child = add(&mut tree, "/existing/path/sub/directory", true);

        assert!(child.created.is_empty());
        assert_eq!(parent.attach.handle.id(), child.attach.handle.id());
        assert_eq!(child.attach.root.path(), std::path::Path::new("/existing/path"));
        assert_eq!(tree.print(), "existing\n  path\n    [watcher +1]\n");
    }

    #[test]
    fn test_recursive_parent_adopts_children() {
        let (mut tree, _) = new_tree();
        let zero = add(&mut tree, "/existing/path/child/directory/zero", true);
        let one = add(&mut tree, "/existing/path/child/directory/one", true);
        let other = add(&mut tree, "/another/path", true);

        let parent = add(&mut tree, "/existing/path", true);

        let retired: Vec<_> = parent.retire.iter().map(|h| h.id()).collect();
        assert!(retired.contains(&zero.attach.handle.id()));
        assert!(retired.contains(&one.attach.handle.id()));
        assert_eq!(retired.len(), 2);
        assert!(parent
            .reattach
            .iter()
            .all(|r| r.to.handle.id() == parent.attach.handle.id()));

        assert_eq!(parent_id(lookup(&tree, "/existing/path/child/directory/zero")), parent.attach.handle.id());
        assert_eq!(parent_id(lookup(&tree, "/another/path")), other.attach.handle.id());
        assert_eq!(
            tree.print(),
            "another\n  path\n    [watcher]\nexisting\n  path\n    [watcher +2]\n"
        );
    }

    #[test]
    fn test_adoption_inherits_grandchildren() {
        let (mut tree, _) = new_tree();
        add(&mut tree, "/a/b", true);
        add(&mut tree, "/a/b/c", true);
        add(&mut tree, "/a", true);

        match tree.root().node_at(NormalizedPath::new("/a", CaseSensitivity::Sensitive).segments()) {
            Some(Node::Recursive(node)) => {
                let adopted: Vec<_> = node.adopted().values().map(|c| c.path.to_string()).collect();
                assert_eq!(adopted, vec!["/a/b", "/a/b/c"]);
            }
            _ => panic!("expected a recursive node at /a"),
        }
    }

    #[test]
    fn test_nonrecursive_reuses_same_directory() {
        let (mut tree, _) = new_tree();
        let first = add(&mut tree, "/dir", false);
        let second = add(&mut tree, "/dir", false);

        assert!(second.created.is_empty());
        assert_eq!(first.attach.handle.id(), second.attach.handle.id());
        assert_eq!(tree.print(), "dir\n  [non-recursive watcher]\n");
    }

    #[test]
    fn test_nonrecursive_attaches_to_recursive_ancestor() {
        let (mut tree, _) = new_tree();
        let parent = add(&mut tree, "/dir", true);
        let same = add(&mut tree, "/dir", false);
        let below = add(&mut tree, "/dir/sub", false);

        assert_eq!(same.attach.handle.id(), parent.attach.handle.id());
        assert_eq!(below.attach.handle.id(), parent.attach.handle.id());
        assert!(below.attach.options.recursive);
    }

    #[test]
    fn test_recursive_request_broadens_nonrecursive_watcher() {
        let (mut tree, _) = new_tree();
        let narrow = add(&mut tree, "/dir/sub", false);
        let broad = add(&mut tree, "/dir/sub", true);

        assert_ne!(narrow.attach.handle.id(), broad.attach.handle.id());
        assert_eq!(broad.retire.len(), 1);
        assert_eq!(broad.retire[0].id(), narrow.attach.handle.id());
        assert_eq!(broad.reattach[0].from.id(), narrow.attach.handle.id());
        assert_eq!(tree.print(), "dir\n  sub\n    [watcher]\n");
    }

    #[test]
    fn test_recursive_parent_adopts_nonrecursive_child() {
        let (mut tree, _) = new_tree();
        let narrow = add(&mut tree, "/dir/sub", false);
        let broad = add(&mut tree, "/dir", true);

        assert_eq!(broad.retire[0].id(), narrow.attach.handle.id());
        assert_eq!(parent_id(lookup(&tree, "/dir/sub")), broad.attach.handle.id());
    }

    #[test]
    fn test_nonrecursive_parent_keeps_children() {
        let (mut tree, _) = new_tree();
        let child = add(&mut tree, "/dir/sub", true);
        let parent = add(&mut tree, "/dir", false);

        assert!(parent.retire.is_empty());
        assert!(parent.reattach.is_empty());
        assert_eq!(parent_id(lookup(&tree, "/dir/sub/deeper")), child.attach.handle.id());
        assert_eq!(parent_id(lookup(&tree, "/dir")), parent.attach.handle.id());
        assert!(matches!(lookup(&tree, "/dir/other"), Lookup::Missing));
        assert_eq!(tree.print(), "dir\n  [non-recursive watcher]\n  sub\n    [watcher]\n");
    }

    #[test]
    fn test_recursive_child_beneath_nonrecursive_parent() {
        let (mut tree, _) = new_tree();
        let parent = add(&mut tree, "/dir", false);
        let child = add(&mut tree, "/dir/sub", true);

        assert_ne!(parent.attach.handle.id(), child.attach.handle.id());
        assert!(child.retire.is_empty());
        assert_eq!(parent_id(lookup(&tree, "/dir")), parent.attach.handle.id());
    }

    #[test]
    fn test_nonrecursive_node_rejects_adoption() {
        let (mut tree, _) = new_tree();
        add(&mut tree, "/dir", false);

        let dir = NormalizedPath::new("/dir", CaseSensitivity::Sensitive);
        let node = tree.root.node_at_mut(dir.segments()).unwrap();
        let nested = NormalizedPath::new("/dir/a/b", CaseSensitivity::Sensitive);

        let err = node
            .add_child_path(vec!["a".into(), "b".into()], &nested, NativeOptions::NON_RECURSIVE)
            .unwrap_err();
        assert!(matches!(err, WatchError::InvalidOperation { .. }));

        let err = node
            .add_child_path(Vec::new(), &dir, NativeOptions::RECURSIVE)
            .unwrap_err();
        assert!(matches!(err, WatchError::InvalidOperation { .. }));
    }

    #[test]
    fn test_remove_requires_owning_handle() {
        let (mut tree, _) = new_tree();
        let first = add(&mut tree, "/dir", true);
        let path = NormalizedPath::new("/dir", CaseSensitivity::Sensitive);

        let stale = NativeWatcher::new(path.clone(), NativeOptions::RECURSIVE, Arc::new(MockBackend::new()));
        let eviction = tree.remove(path.segments(), stale.id(), false).unwrap();
        assert!(!eviction.evicted);
        assert_eq!(parent_id(lookup(&tree, "/dir")), first.attach.handle.id());

        let eviction = tree.remove(path.segments(), first.attach.handle.id(), false).unwrap();
        assert!(eviction.evicted);
        assert!(matches!(lookup(&tree, "/dir"), Lookup::Missing));
        assert_eq!(tree.print(), "");
    }

    #[test]
    fn test_nonrecursive_removal_keeps_children() {
        let (mut tree, _) = new_tree();
        let child = add(&mut tree, "/dir/sub", true);
        let parent = add(&mut tree, "/dir", false);
        let dir = NormalizedPath::new("/dir", CaseSensitivity::Sensitive);

        tree.remove(dir.segments(), parent.attach.handle.id(), false).unwrap();
        assert_eq!(parent_id(lookup(&tree, "/dir/sub")), child.attach.handle.id());
        assert!(matches!(lookup(&tree, "/dir"), Lookup::Children(ref c) if c.len() == 1));

        // Removing the child leaves the non-recursive parent in place
        let (mut tree, _) = new_tree();
        let parent = add(&mut tree, "/dir", false);
        let child = add(&mut tree, "/dir/sub", true);
        let sub = NormalizedPath::new("/dir/sub", CaseSensitivity::Sensitive);
        tree.remove(sub.segments(), child.attach.handle.id(), true).unwrap();
        assert_eq!(parent_id(lookup(&tree, "/dir")), parent.attach.handle.id());
    }

    #[test]
    fn test_split_rebuilds_adopted_paths() {
        let (mut tree, _) = new_tree();
        add(&mut tree, "/root/nonrec0", false);
        add(&mut tree, "/root/nonrec0/subdir/rec0", true);
        add(&mut tree, "/root/rec1", true);
        add(&mut tree, "/root/rec1/nonrec1", false);
        let root = add(&mut tree, "/root", true);
        assert_eq!(tree.print(), "root\n  [watcher +4]\n");

        let path = NormalizedPath::new("/root", CaseSensitivity::Sensitive);
        let eviction = tree.remove(path.segments(), root.attach.handle.id(), true).unwrap();

        assert!(eviction.evicted);
        assert_eq!(eviction.created.len(), 3);
        assert!(eviction
            .reattach
            .iter()
            .any(|r| r.from.id() == root.attach.handle.id()));
        assert_eq!(
            tree.print(),
            "root\n  nonrec0\n    [non-recursive watcher]\n    subdir\n      rec0\n        [watcher]\n  rec1\n    [watcher +1]\n"
        );

        let rec1 = parent_id(lookup(&tree, "/root/rec1"));
        assert_eq!(parent_id(lookup(&tree, "/root/rec1/nonrec1")), rec1);
        assert!(matches!(lookup(&tree, "/root"), Lookup::Children(ref c) if c.len() == 3));
    }

    #[test]
    fn test_remove_without_split_drops_adopted() {
        let (mut tree, _) = new_tree();
        add(&mut tree, "/root/child", true);
        let root = add(&mut tree, "/root", true);

        let path = NormalizedPath::new("/root", CaseSensitivity::Sensitive);
        let eviction = tree.remove(path.segments(), root.attach.handle.id(), false).unwrap();

        assert!(eviction.created.is_empty());
        assert!(matches!(lookup(&tree, "/root/child"), Lookup::Missing));
    }
}
