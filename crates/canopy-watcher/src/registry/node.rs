//! Trie node variants
//!
//! Directory nodes only route. Recursive watcher nodes cover their whole
//! subtree and remember which descendant paths they adopted, so the subtree
//! can be rebuilt if the node is removed with splitting. Non-recursive
//! watcher nodes cover only their immediate children and keep routing to
//! deeper watchers.

use super::result::{ChildWatcher, Eviction, Lookup, ParentMatch, Reattachment};
use super::tree::{Factory, Tree};
use crate::native::{HandleId, NativeWatcher};
use canopy_core::{NativeOptions, NormalizedPath, Result, Segment, WatchError};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A path a recursive watcher is responsible for on behalf of someone else
#[derive(Debug, Clone)]
pub struct AdoptedChild {
    pub path: NormalizedPath,
    pub options: NativeOptions,
}

pub enum Node {
    Directory(DirectoryNode),
    Recursive(RecursiveWatcherNode),
    Nonrecursive(NonrecursiveWatcherNode),
}

#[derive(Default)]
pub struct DirectoryNode {
    children: BTreeMap<Segment, Node>,
}

impl DirectoryNode {
    pub(crate) fn into_children(self) -> BTreeMap<Segment, Node> {
        self.children
    }
}

pub struct RecursiveWatcherNode {
    handle: Arc<NativeWatcher>,
    path: NormalizedPath,
    /// Keyed by path relative to this node; ancestors sort before descendants
    adopted: BTreeMap<Vec<Segment>, AdoptedChild>,
}

pub struct NonrecursiveWatcherNode {
    handle: Arc<NativeWatcher>,
    path: NormalizedPath,
    children: BTreeMap<Segment, Node>,
}

impl RecursiveWatcherNode {
    /// New node taking over `watchers`, which lie beneath `path`.
    ///
    /// Paths those watchers had adopted themselves are inherited with their
    /// relative prefix, so nothing is forgotten across repeated adoptions.
    pub fn new(handle: Arc<NativeWatcher>, path: NormalizedPath, watchers: &[ChildWatcher]) -> Self {
        let mut node = Self {
            handle,
            path,
            adopted: BTreeMap::new(),
        };
        for watcher in watchers {
            node.adopt(
                watcher.relative.clone(),
                AdoptedChild {
                    path: watcher.path.clone(),
                    options: watcher.options,
                },
            );
            for (relative, child) in &watcher.adopted {
                let mut full = watcher.relative.clone();
                full.extend(relative.iter().cloned());
                node.adopt(full, child.clone());
            }
        }
        node
    }

    pub fn handle(&self) -> &Arc<NativeWatcher> {
        &self.handle
    }

    pub fn path(&self) -> &NormalizedPath {
        &self.path
    }

    pub fn adopted(&self) -> &BTreeMap<Vec<Segment>, AdoptedChild> {
        &self.adopted
    }

    fn adopt(&mut self, relative: Vec<Segment>, child: AdoptedChild) {
        // The node's own path needs no bookkeeping
        if relative.is_empty() {
            return;
        }
        self.adopted
            .entry(relative)
            .and_modify(|existing| existing.options.recursive |= child.options.recursive)
            .or_insert(child);
    }

    /// Rebuild the subtree for every adopted path with fresh handles
    fn split(self, factory: &Factory, eviction: &mut Eviction) -> Result<Option<Node>> {
        let mut subtree = Tree::new(Arc::clone(factory));

        for (relative, child) in &self.adopted {
            let consolidation = subtree.add(relative, &child.path, child.options)?;
            eviction.reattach.push(Reattachment {
                from: Arc::clone(&self.handle),
                to: consolidation.attach,
            });
            eviction.reattach.extend(consolidation.reattach);
            eviction.retire.extend(consolidation.retire);
            eviction.created.extend(consolidation.created);
        }

        let root = subtree.into_root();
        Ok(if root.is_empty_directory() { None } else { Some(root) })
    }
}

impl NonrecursiveWatcherNode {
    pub fn new(handle: Arc<NativeWatcher>, path: NormalizedPath, children: BTreeMap<Segment, Node>) -> Self {
        Self { handle, path, children }
    }

    pub fn handle(&self) -> &Arc<NativeWatcher> {
        &self.handle
    }

    pub fn path(&self) -> &NormalizedPath {
        &self.path
    }

    fn check_child_path(&self, remaining: &[Segment], options: NativeOptions) -> Result<()> {
        if options.recursive {
            return Err(WatchError::invalid(format!(
                "attempt to add an incompatible child watcher to non-recursive watcher at {}",
                self.path
            )));
        }
        if !remaining.is_empty() {
            return Err(WatchError::invalid(format!(
                "attempt to adopt a child watcher on non-recursive watcher at {}",
                self.path
            )));
        }
        Ok(())
    }
}

impl Node {
    pub fn empty() -> Self {
        Node::Directory(DirectoryNode::default())
    }

    pub fn is_empty_directory(&self) -> bool {
        matches!(self, Node::Directory(dir) if dir.children.is_empty())
    }

    /// The watcher handle owned by this node, if any
    pub fn handle(&self) -> Option<&Arc<NativeWatcher>> {
        match self {
            Node::Directory(_) => None,
            Node::Recursive(node) => Some(&node.handle),
            Node::Nonrecursive(node) => Some(&node.handle),
        }
    }

    /// Find watchers related to `segments`, relative to this node
    pub fn lookup(&self, segments: &[Segment]) -> Lookup {
        match self {
            Node::Directory(dir) => match segments.split_first() {
                None => Lookup::Children(self.child_watchers(&[])),
                Some((head, rest)) => descend(&dir.children, head, rest),
            },
            Node::Recursive(node) => Lookup::Parent(ParentMatch {
                handle: Arc::clone(&node.handle),
                root: node.path.clone(),
                options: NativeOptions::RECURSIVE,
                remaining: segments.to_vec(),
            }),
            Node::Nonrecursive(node) => match segments.split_first() {
                None => Lookup::Parent(ParentMatch {
                    handle: Arc::clone(&node.handle),
                    root: node.path.clone(),
                    options: NativeOptions::NON_RECURSIVE,
                    remaining: Vec::new(),
                }),
                Some((head, rest)) => descend(&node.children, head, rest),
            },
        }
    }

    /// Every watcher node in this subtree, this node included
    pub fn child_watchers(&self, prefix: &[Segment]) -> Vec<ChildWatcher> {
        match self {
            Node::Directory(dir) => collect_children(&dir.children, prefix),
            Node::Recursive(node) => vec![ChildWatcher {
                relative: prefix.to_vec(),
                path: node.path.clone(),
                handle: Arc::clone(&node.handle),
                options: NativeOptions::RECURSIVE,
                adopted: node
                    .adopted
                    .iter()
                    .map(|(relative, child)| (relative.clone(), child.clone()))
                    .collect(),
            }],
            Node::Nonrecursive(node) => {
                let mut watchers = vec![ChildWatcher {
                    relative: prefix.to_vec(),
                    path: node.path.clone(),
                    handle: Arc::clone(&node.handle),
                    options: NativeOptions::NON_RECURSIVE,
                    adopted: Vec::new(),
                }];
                watchers.extend(collect_children(&node.children, prefix));
                watchers
            }
        }
    }

    pub fn node_at(&self, segments: &[Segment]) -> Option<&Node> {
        let Some((head, rest)) = segments.split_first() else {
            return Some(self);
        };
        match self {
            Node::Directory(dir) => dir.children.get(head)?.node_at(rest),
            Node::Nonrecursive(node) => node.children.get(head)?.node_at(rest),
            Node::Recursive(_) => None,
        }
    }

    pub fn node_at_mut(&mut self, segments: &[Segment]) -> Option<&mut Node> {
        let Some((head, rest)) = segments.split_first() else {
            return Some(self);
        };
        match self {
            Node::Directory(dir) => dir.children.get_mut(head)?.node_at_mut(rest),
            Node::Nonrecursive(node) => node.children.get_mut(head)?.node_at_mut(rest),
            Node::Recursive(_) => None,
        }
    }

    /// The slot at `segments`, creating directory nodes along the way
    pub fn slot_mut(&mut self, segments: &[Segment]) -> Result<&mut Node> {
        let Some((head, rest)) = segments.split_first() else {
            return Ok(self);
        };
        let children = match self {
            Node::Directory(dir) => &mut dir.children,
            Node::Nonrecursive(node) => &mut node.children,
            Node::Recursive(node) => {
                return Err(WatchError::invalid(format!(
                    "cannot insert a watcher beneath recursive watcher at {}",
                    node.path
                )))
            }
        };
        children.entry(head.clone()).or_insert_with(Node::empty).slot_mut(rest)
    }

    /// Record that this watcher now serves `path` as well
    pub fn add_child_path(&mut self, remaining: Vec<Segment>, path: &NormalizedPath, options: NativeOptions) -> Result<()> {
        match self {
            Node::Recursive(node) => {
                node.adopt(
                    remaining,
                    AdoptedChild {
                        path: path.clone(),
                        options,
                    },
                );
                Ok(())
            }
            Node::Nonrecursive(node) => node.check_child_path(&remaining, options),
            Node::Directory(_) => Err(WatchError::invalid(format!(
                "attempt to add child path {} to a directory node",
                path
            ))),
        }
    }

    /// Remove the watcher at `segments` if it is still owned by handle `id`.
    ///
    /// A recursive node with adopted paths is replaced by a rebuilt subtree
    /// when `split` is given. Empty directory nodes are pruned; a
    /// non-recursive watcher node never disappears because of its children.
    pub fn remove(
        self,
        segments: &[Segment],
        id: HandleId,
        split: Option<&Factory>,
        eviction: &mut Eviction,
    ) -> Result<Option<Node>> {
        match self {
            Node::Directory(mut dir) => {
                let Some((head, rest)) = segments.split_first() else {
                    return Ok(Some(Node::Directory(dir)));
                };
                remove_child(&mut dir.children, head, rest, id, split, eviction)?;
                Ok(if dir.children.is_empty() {
                    None
                } else {
                    Some(Node::Directory(dir))
                })
            }
            Node::Recursive(node) => {
                if !segments.is_empty() || node.handle.id() != id {
                    return Ok(Some(Node::Recursive(node)));
                }
                eviction.evicted = true;
                match split {
                    Some(factory) if !node.adopted.is_empty() => node.split(factory, eviction),
                    _ => Ok(None),
                }
            }
            Node::Nonrecursive(mut node) => match segments.split_first() {
                None if node.handle.id() != id => Ok(Some(Node::Nonrecursive(node))),
                None => {
                    eviction.evicted = true;
                    Ok(if node.children.is_empty() {
                        None
                    } else {
                        Some(Node::Directory(DirectoryNode {
                            children: node.children,
                        }))
                    })
                }
                Some((head, rest)) => {
                    remove_child(&mut node.children, head, rest, id, split, eviction)?;
                    Ok(Some(Node::Nonrecursive(node)))
                }
            },
        }
    }

    /// Render this subtree, two spaces per level
    pub fn print(&self, indent: usize, out: &mut String) {
        match self {
            Node::Directory(dir) => print_children(&dir.children, indent, out),
            Node::Recursive(node) => {
                out.push_str(&" ".repeat(indent));
                out.push_str("[watcher");
                if !node.adopted.is_empty() {
                    out.push_str(&format!(" +{}", node.adopted.len()));
                }
                out.push_str("]\n");
            }
            Node::Nonrecursive(node) => {
                out.push_str(&" ".repeat(indent));
                out.push_str("[non-recursive watcher]\n");
                print_children(&node.children, indent, out);
            }
        }
    }
}

fn descend(children: &BTreeMap<Segment, Node>, head: &Segment, rest: &[Segment]) -> Lookup {
    match children.get(head) {
        Some(child) => child.lookup(rest),
        None => Lookup::Missing,
    }
}

fn collect_children(children: &BTreeMap<Segment, Node>, prefix: &[Segment]) -> Vec<ChildWatcher> {
    let mut watchers = Vec::new();
    for (segment, child) in children {
        let mut path = prefix.to_vec();
        path.push(segment.clone());
        watchers.extend(child.child_watchers(&path));
    }
    watchers
}

fn remove_child(
    children: &mut BTreeMap<Segment, Node>,
    head: &Segment,
    rest: &[Segment],
    id: HandleId,
    split: Option<&Factory>,
    eviction: &mut Eviction,
) -> Result<()> {
    if let Some(child) = children.remove(head) {
        if let Some(replacement) = child.remove(rest, id, split, eviction)? {
            children.insert(head.clone(), replacement);
        }
    }
    Ok(())
}

fn print_children(children: &BTreeMap<Segment, Node>, indent: usize, out: &mut String) {
    for (segment, child) in children {
        out.push_str(&" ".repeat(indent));
        out.push_str(&segment.to_string_lossy());
        out.push('\n');
        child.print(indent + 2, out);
    }
}
