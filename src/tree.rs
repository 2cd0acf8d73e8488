//! Generic render-tree node storage: identity, parent/child links, depth and
//! attachment. No layout or paint knowledge lives here.
//!
//! Nodes are stored in a central arena with interior mutability, so the tree
//! can be borrowed immutably while individual render objects are borrowed
//! mutably during layout or paint. Containers hold child ids rather than
//! owned children; "parent" is a plain id field, so reparenting never fights
//! ownership.
//!
//! Depth invariant: an attached child's depth is strictly greater than its
//! parent's (not necessarily by one), and a node's depth never decreases
//! while it stays in the same position. The flush phases rely on this to
//! process ancestors before descendants.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::object::Render;

/// Unique identifier for a render node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct NodeId(u64);

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

impl NodeId {
    /// Generate a new unique node id.
    pub fn next() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Reference-counted render-object cell.
///
/// Cloning the Rc lets callers release the arena borrow before invoking the
/// render object, so layout and paint can recurse into other nodes.
pub(crate) type RenderCell = Rc<RefCell<Box<dyn Render>>>;

#[derive(Default)]
struct TreeLinks {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    depth: u32,
    attached: bool,
}

/// Central arena for render objects and their tree structure.
#[derive(Default)]
pub struct RenderTree {
    cells: RefCell<HashMap<NodeId, RenderCell>>,
    links: RefCell<HashMap<NodeId, TreeLinks>>,
}

impl RenderTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a render object and return its id. The node starts detached,
    /// parentless, at depth zero.
    pub fn register(&self, render: Box<dyn Render>) -> NodeId {
        let id = NodeId::next();
        self.cells
            .borrow_mut()
            .insert(id, Rc::new(RefCell::new(render)));
        self.links.borrow_mut().insert(id, TreeLinks::default());
        id
    }

    /// Remove one node's storage. The caller is responsible for having
    /// dropped it from its parent and for its subtree.
    pub(crate) fn remove(&self, id: NodeId) {
        // Drop the cell after releasing the map borrow; dropping a render
        // object may re-enter the arena.
        let removed = self.cells.borrow_mut().remove(&id);
        self.links.borrow_mut().remove(&id);
        drop(removed);
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.links.borrow().contains_key(&id)
    }

    pub(crate) fn cell(&self, id: NodeId) -> RenderCell {
        self.cells
            .borrow()
            .get(&id)
            .cloned()
            .unwrap_or_else(|| panic!("unknown node {id:?}"))
    }

    /// Access a render object via a closure.
    pub fn with_render<R>(&self, id: NodeId, f: impl FnOnce(&dyn Render) -> R) -> R {
        let cell = self.cell(id);
        let render = cell.borrow();
        f(&**render)
    }

    /// Access a render object mutably via a closure.
    pub fn with_render_mut<R>(&self, id: NodeId, f: impl FnOnce(&mut dyn Render) -> R) -> R {
        let cell = self.cell(id);
        let mut render = cell.borrow_mut();
        f(&mut **render)
    }

    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.links.borrow().get(&id).and_then(|l| l.parent)
    }

    pub fn children_of(&self, id: NodeId) -> Vec<NodeId> {
        self.links
            .borrow()
            .get(&id)
            .map(|l| l.children.clone())
            .unwrap_or_default()
    }

    pub fn depth_of(&self, id: NodeId) -> u32 {
        self.links.borrow().get(&id).map(|l| l.depth).unwrap_or(0)
    }

    pub fn is_attached(&self, id: NodeId) -> bool {
        self.links.borrow().get(&id).is_some_and(|l| l.attached)
    }

    /// Make `child` a child of `parent`.
    ///
    /// Panics if the child already has a parent: that is a tree-consistency
    /// bug in the caller, not a recoverable condition. Attaches the child
    /// subtree when the parent is attached, then restores the depth
    /// invariant below `parent`.
    pub fn adopt(&self, parent: NodeId, child: NodeId) {
        assert_ne!(parent, child, "a node cannot adopt itself");
        let parent_attached = {
            let mut links = self.links.borrow_mut();
            let child_links = links
                .get_mut(&child)
                .unwrap_or_else(|| panic!("unknown node {child:?}"));
            assert!(
                child_links.parent.is_none(),
                "{child:?} already has a parent; drop it first"
            );
            child_links.parent = Some(parent);
            let parent_links = links
                .get_mut(&parent)
                .unwrap_or_else(|| panic!("unknown node {parent:?}"));
            parent_links.children.push(child);
            parent_links.attached
        };
        if parent_attached {
            self.attach_subtree(child);
        }
        self.redepth_child(parent, child);
    }

    /// Sever `child` from `parent`.
    ///
    /// Panics if `child` is not currently a child of `parent`.
    pub fn drop_child(&self, parent: NodeId, child: NodeId) {
        let was_attached = {
            let mut links = self.links.borrow_mut();
            let child_links = links
                .get_mut(&child)
                .unwrap_or_else(|| panic!("unknown node {child:?}"));
            assert_eq!(
                child_links.parent,
                Some(parent),
                "{child:?} is not a child of {parent:?}"
            );
            child_links.parent = None;
            let attached = child_links.attached;
            let parent_links = links.get_mut(&parent).expect("parent vanished");
            parent_links.children.retain(|&c| c != child);
            attached
        };
        if was_attached {
            self.detach_subtree(child);
        }
    }

    /// Attach a detached subtree rooted at `id` (making `id` a tree root).
    ///
    /// Panics if any node in the subtree is already attached.
    pub fn attach_subtree(&self, id: NodeId) {
        {
            let mut links = self.links.borrow_mut();
            let node = links
                .get_mut(&id)
                .unwrap_or_else(|| panic!("unknown node {id:?}"));
            assert!(!node.attached, "{id:?} is already attached");
            node.attached = true;
        }
        for child in self.children_of(id) {
            self.attach_subtree(child);
        }
    }

    /// Detach the subtree rooted at `id`.
    ///
    /// Panics if any node in the subtree is not attached.
    pub fn detach_subtree(&self, id: NodeId) {
        {
            let mut links = self.links.borrow_mut();
            let node = links
                .get_mut(&id)
                .unwrap_or_else(|| panic!("unknown node {id:?}"));
            assert!(node.attached, "{id:?} is not attached");
            node.attached = false;
        }
        for child in self.children_of(id) {
            self.detach_subtree(child);
        }
    }

    /// Raise `child`'s depth above `parent`'s if needed, recursing into
    /// grandchildren only when their depth also needs raising.
    pub fn redepth_child(&self, parent: NodeId, child: NodeId) {
        let needs_raise = {
            let links = self.links.borrow();
            let parent_depth = links.get(&parent).map(|l| l.depth).unwrap_or(0);
            let child_depth = links.get(&child).map(|l| l.depth).unwrap_or(0);
            child_depth <= parent_depth
        };
        if needs_raise {
            {
                let mut links = self.links.borrow_mut();
                let parent_depth = links.get(&parent).map(|l| l.depth).unwrap_or(0);
                if let Some(child_links) = links.get_mut(&child) {
                    child_links.depth = parent_depth + 1;
                }
            }
            self.redepth_children(child);
        }
    }

    /// Restore the depth invariant for every child of `id`.
    pub fn redepth_children(&self, id: NodeId) {
        for child in self.children_of(id) {
            self.redepth_child(id, child);
        }
    }

    /// Preorder walk of the subtree rooted at `id`, including `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            out.push(node);
            for child in self.children_of(node).into_iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    pub fn node_count(&self) -> usize {
        self.links.borrow().len()
    }
}
