//! The retained compositing layer tree.
//!
//! Layers mirror the repaint-boundary structure of the render tree and
//! survive across frames. Children hang off a container through doubly
//! linked sibling lists. Each frame the tree is flattened into an immutable
//! scene; a clean subtree with a live engine-layer handle is re-added by
//! reference instead of being walked.
//!
//! Structural changes and property mutations mark the affected container
//! dirty. Appending always dirties the new parent, so a clean layer is
//! never re-added in two places.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use log::trace;

use crate::backend::{EngineLayer, Path, Picture, Scene, SceneBuilder};
use crate::geometry::{Offset, Rect, RRect};
use crate::transform::Transform;

/// Unique identifier for a compositing layer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct LayerId(u64);

static NEXT_LAYER_ID: AtomicU64 = AtomicU64::new(1);

impl LayerId {
    fn next() -> Self {
        LayerId(NEXT_LAYER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// What a layer contributes to the scene.
///
/// `Picture` is the only leaf kind; everything else is a container whose
/// effect wraps its children.
#[derive(Debug, Clone)]
pub enum LayerKind {
    /// Plain grouping container with no effect of its own.
    Container,
    /// Translates its children. Repaint boundaries own one of these.
    Offset { offset: Offset },
    ClipRect { rect: Rect },
    ClipRRect { rrect: RRect },
    ClipPath { path: Path },
    Opacity { alpha: u8, offset: Offset },
    Transform { transform: Transform },
    /// Leaf holding recorded draw commands. Never carries an engine handle,
    /// so it is re-added (`add_picture`) whenever its parent is walked.
    Picture { picture: Option<Picture> },
}

impl LayerKind {
    fn is_container(&self) -> bool {
        !matches!(self, LayerKind::Picture { .. })
    }
}

struct LayerData {
    parent: Option<LayerId>,
    prev_sibling: Option<LayerId>,
    next_sibling: Option<LayerId>,
    first_child: Option<LayerId>,
    last_child: Option<LayerId>,
    kind: LayerKind,
    needs_add_to_scene: bool,
    engine_layer: Option<EngineLayer>,
    attached: bool,
}

/// Arena holding every live compositing layer.
#[derive(Default)]
pub struct LayerTree {
    layers: RefCell<HashMap<LayerId, LayerData>>,
}

impl LayerTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, kind: LayerKind) -> LayerId {
        let id = LayerId::next();
        self.layers.borrow_mut().insert(
            id,
            LayerData {
                parent: None,
                prev_sibling: None,
                next_sibling: None,
                first_child: None,
                last_child: None,
                kind,
                needs_add_to_scene: true,
                engine_layer: None,
                attached: false,
            },
        );
        id
    }

    fn with<R>(&self, id: LayerId, f: impl FnOnce(&LayerData) -> R) -> R {
        let layers = self.layers.borrow();
        let data = layers
            .get(&id)
            .unwrap_or_else(|| panic!("unknown layer {id:?}"));
        f(data)
    }

    fn with_mut<R>(&self, id: LayerId, f: impl FnOnce(&mut LayerData) -> R) -> R {
        let mut layers = self.layers.borrow_mut();
        let data = layers
            .get_mut(&id)
            .unwrap_or_else(|| panic!("unknown layer {id:?}"));
        f(data)
    }

    pub fn contains(&self, id: LayerId) -> bool {
        self.layers.borrow().contains_key(&id)
    }

    pub fn parent_of(&self, id: LayerId) -> Option<LayerId> {
        self.with(id, |l| l.parent)
    }

    pub fn is_attached(&self, id: LayerId) -> bool {
        self.with(id, |l| l.attached)
    }

    pub fn has_children(&self, id: LayerId) -> bool {
        self.with(id, |l| l.first_child.is_some())
    }

    pub fn needs_add_to_scene(&self, id: LayerId) -> bool {
        self.with(id, |l| l.needs_add_to_scene)
    }

    pub fn engine_layer_of(&self, id: LayerId) -> Option<EngineLayer> {
        self.with(id, |l| l.engine_layer.clone())
    }

    pub fn is_picture(&self, id: LayerId) -> bool {
        self.with(id, |l| matches!(l.kind, LayerKind::Picture { .. }))
    }

    /// The sealed picture of a picture layer, if one has been recorded.
    pub fn picture_of(&self, id: LayerId) -> Option<Picture> {
        self.with(id, |l| match &l.kind {
            LayerKind::Picture { picture } => picture.clone(),
            _ => None,
        })
    }

    /// Whether this layer kind can serve as a repaint boundary's retained
    /// layer (it must carry an offset or a full transform).
    pub fn is_boundary_kind(&self, id: LayerId) -> bool {
        self.with(id, |l| {
            matches!(l.kind, LayerKind::Offset { .. } | LayerKind::Transform { .. })
        })
    }

    /// Children of `id` in sibling order.
    pub fn children_of(&self, id: LayerId) -> Vec<LayerId> {
        let mut out = Vec::new();
        let mut next = self.with(id, |l| l.first_child);
        while let Some(child) = next {
            out.push(child);
            next = self.with(child, |l| l.next_sibling);
        }
        out
    }

    /// Append `child` as the last child of `parent`.
    ///
    /// The child must currently have no parent; callers that re-home a layer
    /// remove it first. Attachment state propagates from the parent, and the
    /// parent is marked dirty so the scene re-walks it.
    pub fn append(&self, parent: LayerId, child: LayerId) {
        assert_ne!(parent, child, "a layer cannot contain itself");
        assert!(
            self.with(parent, |l| l.kind.is_container()),
            "{parent:?} is a picture layer and cannot have children"
        );
        debug_assert!(
            !self.is_ancestor(child, parent),
            "appending {child:?} under {parent:?} would create a cycle"
        );
        let parent_attached = {
            let mut layers = self.layers.borrow_mut();
            let child_data = layers
                .get_mut(&child)
                .unwrap_or_else(|| panic!("unknown layer {child:?}"));
            assert!(
                child_data.parent.is_none(),
                "{child:?} already has a parent; remove it first"
            );
            child_data.parent = Some(parent);
            let parent_data = layers
                .get_mut(&parent)
                .unwrap_or_else(|| panic!("unknown layer {parent:?}"));
            let old_last = parent_data.last_child;
            parent_data.last_child = Some(child);
            if parent_data.first_child.is_none() {
                parent_data.first_child = Some(child);
            }
            let attached = parent_data.attached;
            if let Some(last) = old_last {
                layers.get_mut(&last).expect("sibling vanished").next_sibling = Some(child);
                layers.get_mut(&child).expect("child vanished").prev_sibling = Some(last);
            }
            attached
        };
        if parent_attached {
            self.set_attached_recursive(child, true);
        }
        self.mark_needs_add_to_scene(parent);
    }

    /// Unlink `child` from its parent, if it has one. The subtree detaches
    /// and the old parent is marked dirty.
    pub fn remove(&self, child: LayerId) {
        let old_parent = {
            let mut layers = self.layers.borrow_mut();
            let child_data = match layers.get_mut(&child) {
                Some(data) => data,
                None => panic!("unknown layer {child:?}"),
            };
            let Some(parent) = child_data.parent else {
                return;
            };
            let prev = child_data.prev_sibling;
            let next = child_data.next_sibling;
            child_data.parent = None;
            child_data.prev_sibling = None;
            child_data.next_sibling = None;
            match prev {
                Some(prev) => {
                    layers.get_mut(&prev).expect("sibling vanished").next_sibling = next;
                }
                None => {
                    layers.get_mut(&parent).expect("parent vanished").first_child = next;
                }
            }
            match next {
                Some(next) => {
                    layers.get_mut(&next).expect("sibling vanished").prev_sibling = prev;
                }
                None => {
                    layers.get_mut(&parent).expect("parent vanished").last_child = prev;
                }
            }
            parent
        };
        if self.with(child, |l| l.attached) {
            self.set_attached_recursive(child, false);
        }
        self.mark_needs_add_to_scene(old_parent);
    }

    pub fn remove_all_children(&self, parent: LayerId) {
        while let Some(child) = self.with(parent, |l| l.first_child) {
            self.remove(child);
        }
    }

    /// Delete `id` and its whole subtree from the arena.
    pub fn dispose(&self, id: LayerId) {
        self.remove(id);
        let mut stack = vec![id];
        while let Some(layer) = stack.pop() {
            let mut next = self.with(layer, |l| l.first_child);
            while let Some(child) = next {
                next = self.with(child, |l| l.next_sibling);
                stack.push(child);
            }
            self.layers.borrow_mut().remove(&layer);
        }
    }

    /// Mark `id` as needing to be re-added to the scene.
    pub fn mark_needs_add_to_scene(&self, id: LayerId) {
        self.with_mut(id, |l| {
            if !l.needs_add_to_scene {
                trace!("layer {id:?} marked needs-add-to-scene");
                l.needs_add_to_scene = true;
            }
        });
    }

    /// Record the engine handle minted for this layer in the current scene
    /// build. Assignment forces the parent to rebuild its reference to this
    /// child next frame.
    fn set_engine_layer(&self, id: LayerId, engine: EngineLayer) {
        let parent = self.with_mut(id, |l| {
            l.engine_layer = Some(engine);
            l.parent
        });
        if let Some(parent) = parent {
            self.mark_needs_add_to_scene(parent);
        }
    }

    /// Attach the subtree rooted at `id`, making it part of the visible
    /// layer tree. Root adapters call this once on their root layer.
    pub fn attach(&self, id: LayerId) {
        assert!(!self.with(id, |l| l.attached), "{id:?} is already attached");
        self.set_attached_recursive(id, true);
    }

    /// Detach the subtree rooted at `id`.
    pub fn detach(&self, id: LayerId) {
        assert!(self.with(id, |l| l.attached), "{id:?} is not attached");
        self.set_attached_recursive(id, false);
    }

    fn set_attached_recursive(&self, id: LayerId, attached: bool) {
        self.with_mut(id, |l| l.attached = attached);
        for child in self.children_of(id) {
            self.set_attached_recursive(child, attached);
        }
    }

    fn is_ancestor(&self, maybe_ancestor: LayerId, of: LayerId) -> bool {
        let mut current = self.with(of, |l| l.parent);
        while let Some(node) = current {
            if node == maybe_ancestor {
                return true;
            }
            current = self.with(node, |l| l.parent);
        }
        false
    }

    // -- Property setters (mutation marks the layer dirty on change) --

    pub fn set_offset(&self, id: LayerId, offset: Offset) {
        let changed = self.with_mut(id, |l| match &mut l.kind {
            LayerKind::Offset { offset: current } if *current != offset => {
                *current = offset;
                true
            }
            LayerKind::Offset { .. } => false,
            _ => panic!("{id:?} is not an offset layer"),
        });
        if changed {
            self.mark_needs_add_to_scene(id);
        }
    }

    pub fn set_opacity(&self, id: LayerId, alpha: u8, offset: Offset) {
        let changed = self.with_mut(id, |l| match &mut l.kind {
            LayerKind::Opacity {
                alpha: a,
                offset: o,
            } if *a != alpha || *o != offset => {
                *a = alpha;
                *o = offset;
                true
            }
            LayerKind::Opacity { .. } => false,
            _ => panic!("{id:?} is not an opacity layer"),
        });
        if changed {
            self.mark_needs_add_to_scene(id);
        }
    }

    pub fn set_clip_rect(&self, id: LayerId, rect: Rect) {
        let changed = self.with_mut(id, |l| match &mut l.kind {
            LayerKind::ClipRect { rect: current } if *current != rect => {
                *current = rect;
                true
            }
            LayerKind::ClipRect { .. } => false,
            _ => panic!("{id:?} is not a clip-rect layer"),
        });
        if changed {
            self.mark_needs_add_to_scene(id);
        }
    }

    pub fn set_clip_rrect(&self, id: LayerId, rrect: RRect) {
        let changed = self.with_mut(id, |l| match &mut l.kind {
            LayerKind::ClipRRect { rrect: current } if *current != rrect => {
                *current = rrect;
                true
            }
            LayerKind::ClipRRect { .. } => false,
            _ => panic!("{id:?} is not a clip-rrect layer"),
        });
        if changed {
            self.mark_needs_add_to_scene(id);
        }
    }

    pub fn set_clip_path(&self, id: LayerId, path: Path) {
        self.with_mut(id, |l| match &mut l.kind {
            LayerKind::ClipPath { path: current } => *current = path,
            _ => panic!("{id:?} is not a clip-path layer"),
        });
        // Path contents are opaque; assume every assignment is a change.
        self.mark_needs_add_to_scene(id);
    }

    pub fn set_transform(&self, id: LayerId, transform: Transform) {
        let changed = self.with_mut(id, |l| match &mut l.kind {
            LayerKind::Transform { transform: current } if *current != transform => {
                *current = transform;
                true
            }
            LayerKind::Transform { .. } => false,
            _ => panic!("{id:?} is not a transform layer"),
        });
        if changed {
            self.mark_needs_add_to_scene(id);
        }
    }

    pub fn set_picture(&self, id: LayerId, picture: Picture) {
        self.with_mut(id, |l| match &mut l.kind {
            LayerKind::Picture { picture: current } => *current = Some(picture),
            _ => panic!("{id:?} is not a picture layer"),
        });
        self.mark_needs_add_to_scene(id);
    }

    // -- Scene assembly --

    /// Bottom-up fixed point of the dirty bits: a container needs re-adding
    /// if it is dirty itself or any descendant is.
    pub fn update_subtree_needs_add_to_scene(&self, id: LayerId) {
        let mut needs = self.with(id, |l| l.needs_add_to_scene);
        for child in self.children_of(id) {
            self.update_subtree_needs_add_to_scene(child);
            needs = needs || self.with(child, |l| l.needs_add_to_scene);
        }
        self.with_mut(id, |l| l.needs_add_to_scene = needs);
    }

    /// Flatten the tree rooted at `root` into a scene.
    ///
    /// Runs the dirty-bit fixed point first, walks the tree (retaining clean
    /// subtrees), and clears `root`'s dirty bit only afterwards: children
    /// re-dirty their parents as engine handles are assigned during the walk.
    pub fn build_scene(&self, root: LayerId, mut builder: Box<dyn SceneBuilder>) -> Scene {
        self.update_subtree_needs_add_to_scene(root);
        self.add_to_scene(root, &mut *builder);
        self.with_mut(root, |l| l.needs_add_to_scene = false);
        builder.build()
    }

    /// Emit this layer's effect and contents into the builder.
    pub fn add_to_scene(&self, id: LayerId, builder: &mut dyn SceneBuilder) {
        let kind = self.with(id, |l| l.kind.clone());
        let old_engine = self.engine_layer_of(id);
        match kind {
            LayerKind::Picture { picture } => {
                if let Some(picture) = picture {
                    builder.add_picture(Offset::ZERO, &picture);
                }
            }
            LayerKind::Container => {
                self.add_children_to_scene(id, builder);
            }
            LayerKind::Offset { offset } => {
                let engine = builder.push_offset(offset.dx, offset.dy, old_engine.as_ref());
                self.set_engine_layer(id, engine);
                self.add_children_to_scene(id, builder);
                builder.pop();
            }
            LayerKind::ClipRect { rect } => {
                let engine = builder.push_clip_rect(rect, old_engine.as_ref());
                self.set_engine_layer(id, engine);
                self.add_children_to_scene(id, builder);
                builder.pop();
            }
            LayerKind::ClipRRect { rrect } => {
                let engine = builder.push_clip_rrect(&rrect, old_engine.as_ref());
                self.set_engine_layer(id, engine);
                self.add_children_to_scene(id, builder);
                builder.pop();
            }
            LayerKind::ClipPath { path } => {
                let engine = builder.push_clip_path(&path, old_engine.as_ref());
                self.set_engine_layer(id, engine);
                self.add_children_to_scene(id, builder);
                builder.pop();
            }
            LayerKind::Opacity { alpha, offset } => {
                let engine = builder.push_opacity(alpha, offset, old_engine.as_ref());
                self.set_engine_layer(id, engine);
                self.add_children_to_scene(id, builder);
                builder.pop();
            }
            LayerKind::Transform { transform } => {
                let engine = builder.push_transform(&transform, old_engine.as_ref());
                self.set_engine_layer(id, engine);
                self.add_children_to_scene(id, builder);
                builder.pop();
            }
        }
    }

    /// Add each child, taking the retained fast path for clean subtrees with
    /// a live engine handle. Each child's dirty bit clears only after it has
    /// been emitted.
    fn add_children_to_scene(&self, id: LayerId, builder: &mut dyn SceneBuilder) {
        for child in self.children_of(id) {
            let (needs, engine) =
                self.with(child, |l| (l.needs_add_to_scene, l.engine_layer.clone()));
            match engine {
                Some(engine) if !needs => builder.add_retained(&engine),
                _ => self.add_to_scene(child, builder),
            }
            self.with_mut(child, |l| l.needs_add_to_scene = false);
        }
    }

    pub fn layer_count(&self) -> usize {
        self.layers.borrow().len()
    }
}
