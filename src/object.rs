//! The layout/paint protocol for render objects.
//!
//! A render object is a [`Render`] implementation stored in the
//! [`RenderTree`](crate::tree::RenderTree) plus the per-node pipeline state
//! kept here: constraints, dirty bits, the relayout boundary, the derived
//! compositing bit and the optional retained layer. The protocol itself is
//! implemented as methods on [`PipelineOwner`], which owns all of that state;
//! render objects receive a [`LayoutCx`] or
//! [`PaintingContext`](crate::paint::PaintingContext) to talk back through.
//!
//! Dirty state propagates upward:
//!
//! - layout dirtiness bubbles to the nearest *relayout boundary*, which
//!   registers with the orchestrator;
//! - paint dirtiness bubbles to the nearest *repaint boundary*, which owns a
//!   retained compositing layer;
//! - compositing-bit dirtiness bubbles until it hits a boundary pair, then
//!   registers.

use bitflags::bitflags;
use log::trace;

use crate::error::NodeError;
use crate::geometry::{Constraints, Offset, Size};
use crate::layer::LayerId;
use crate::paint::PaintingContext;
use crate::pipeline::PipelineOwner;
use crate::transform::Transform;
use crate::tree::NodeId;

bitflags! {
    /// Static traits of a render object, fixed at registration (except for
    /// the repaint-boundary bit, which has an explicit runtime toggle).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct NodeFlags: u8 {
        /// The node owns a retained compositing layer; paint dirtiness in
        /// its subtree never escapes it.
        const REPAINT_BOUNDARY = 0b001;
        /// The node's size is a function of its constraints alone
        /// (`perform_resize`), never of its children.
        const SIZED_BY_PARENT = 0b010;
        /// The node requires a compositing layer even when it is not a
        /// repaint boundary (e.g. it hosts an external texture).
        const ALWAYS_COMPOSITES = 0b100;
    }
}

/// The behavior of one render object. Implementations hold their own fields
/// (colors, child metrics, whatever the node needs) and speak to the rest of
/// the tree only through the contexts they are handed.
pub trait Render {
    /// Compute this node's size from constraints alone. Only called for
    /// nodes registered with [`NodeFlags::SIZED_BY_PARENT`].
    fn perform_resize(&mut self, constraints: &Constraints) -> Size {
        constraints.smallest()
    }

    /// Lay out this node and (recursively, via
    /// [`LayoutCx::layout_child`]) any children, returning the node's size.
    /// Implementations must pass `parent_uses_size` truthfully when laying
    /// out children.
    fn perform_layout(
        &mut self,
        cx: &mut LayoutCx<'_>,
        constraints: &Constraints,
    ) -> Result<Size, NodeError>;

    /// Record this node's visual output and paint its children via
    /// [`PaintingContext::paint_child`].
    fn paint(&mut self, cx: &mut PaintingContext<'_>, offset: Offset) -> Result<(), NodeError>;

    /// Multiply in the transform this node applies to the given child.
    /// `child_offset` is the child's position in this node's coordinate
    /// space; the default contribution is that translation.
    fn apply_paint_transform(
        &self,
        _child: NodeId,
        child_offset: Offset,
        transform: &mut Transform,
    ) {
        *transform = transform.then(&Transform::translate_offset(child_offset));
    }
}

/// Per-node pipeline state.
pub(crate) struct RenderState {
    pub flags: NodeFlags,
    pub constraints: Option<Constraints>,
    pub size: Option<Size>,
    /// Position in the parent's coordinate space, set by the parent's
    /// layout. This is the resolved parent-data for the box protocol.
    pub offset: Offset,
    pub needs_layout: bool,
    pub relayout_boundary: Option<NodeId>,
    pub needs_compositing_bits_update: bool,
    pub needs_compositing: bool,
    pub needs_paint: bool,
    /// Retained compositing layer. Only repaint boundaries (and the root)
    /// have one; it is installed by `repaint_composited_child` or
    /// `schedule_initial_paint`, never by ordinary paint code.
    pub layer: Option<LayerId>,
}

impl RenderState {
    pub(crate) fn new(flags: NodeFlags) -> Self {
        Self {
            flags,
            constraints: None,
            size: None,
            offset: Offset::ZERO,
            needs_layout: true,
            relayout_boundary: None,
            needs_compositing_bits_update: false,
            needs_compositing: flags
                .intersects(NodeFlags::REPAINT_BOUNDARY | NodeFlags::ALWAYS_COMPOSITES),
            needs_paint: true,
            layer: None,
        }
    }
}

/// Context handed to [`Render::perform_layout`].
pub struct LayoutCx<'a> {
    pub(crate) owner: &'a PipelineOwner,
    pub(crate) node: NodeId,
}

impl LayoutCx<'_> {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn children(&self) -> Vec<NodeId> {
        self.owner.children_of(self.node)
    }

    /// Lay out a child. `parent_uses_size` must be true iff this node's own
    /// layout depends on the returned size; it decides whether the child can
    /// become a relayout boundary.
    pub fn layout_child(
        &mut self,
        child: NodeId,
        constraints: Constraints,
        parent_uses_size: bool,
    ) -> Result<Size, NodeError> {
        assert_eq!(
            self.owner.parent_of(child),
            Some(self.node),
            "{child:?} is not a child of the node being laid out"
        );
        self.owner.layout(child, constraints, parent_uses_size)
    }

    /// Position a child in this node's coordinate space.
    pub fn position_child(&mut self, child: NodeId, offset: Offset) {
        assert_eq!(
            self.owner.parent_of(child),
            Some(self.node),
            "{child:?} is not a child of the node being laid out"
        );
        self.owner.with_state_mut(child, |s| s.offset = offset);
    }

    pub fn size_of(&self, child: NodeId) -> Option<Size> {
        self.owner.size_of(child)
    }
}

impl PipelineOwner {
    // -- Layout protocol --

    /// Lay out `node` with the given constraints.
    ///
    /// This is the incrementality core: when the node is clean, the
    /// constraints are unchanged and the relayout boundary resolves to the
    /// same node, the call returns the cached size without visiting anyone.
    pub fn layout(
        &self,
        node: NodeId,
        constraints: Constraints,
        parent_uses_size: bool,
    ) -> Result<Size, NodeError> {
        assert!(
            constraints.is_normalized(),
            "malformed constraints {constraints:?} passed to {node:?}"
        );
        assert!(
            self.is_attached(node),
            "layout called on detached node {node:?}"
        );
        let parent = self.parent_of(node);
        let sized_by_parent = self.flags_of(node).contains(NodeFlags::SIZED_BY_PARENT);

        // A node is its own relayout boundary when its layout can never
        // force its parent to re-lay-out.
        let is_boundary =
            !parent_uses_size || sized_by_parent || constraints.is_tight() || parent.is_none();
        let relayout_boundary = if is_boundary {
            Some(node)
        } else {
            let parent = parent.expect("non-boundary node without parent");
            self.with_state(parent, |s| s.relayout_boundary)
        };

        let (needs_layout, same_constraints, old_boundary, cached_size) = self.with_state(node, |s| {
            (
                s.needs_layout,
                s.constraints == Some(constraints),
                s.relayout_boundary,
                s.size,
            )
        });
        if !needs_layout && same_constraints && old_boundary == relayout_boundary {
            return Ok(cached_size.expect("clean node has no size"));
        }

        self.with_state_mut(node, |s| s.constraints = Some(constraints));
        if old_boundary.is_some() && old_boundary != relayout_boundary {
            // The boundary moved: descendants cached the old one and must
            // recompute their own lazily.
            for child in self.children_of(node) {
                self.clean_relayout_boundary(child);
            }
        }
        self.with_state_mut(node, |s| s.relayout_boundary = relayout_boundary);

        if sized_by_parent {
            let cell = self.tree.cell(node);
            let size = cell.borrow_mut().perform_resize(&constraints);
            self.with_state_mut(node, |s| s.size = Some(size));
        }

        let cell = self.tree.cell(node);
        let result = {
            let mut render = cell.borrow_mut();
            let mut cx = LayoutCx { owner: self, node };
            render.perform_layout(&mut cx, &constraints)
        };
        match result {
            Ok(size) => {
                let size = if sized_by_parent {
                    self.with_state(node, |s| s.size.expect("perform_resize did not run"))
                } else {
                    self.with_state_mut(node, |s| s.size = Some(size));
                    size
                };
                self.with_state_mut(node, |s| s.needs_layout = false);
                // Layout always invalidates paint: even an unchanged size
                // may sit at a new position.
                self.mark_needs_paint(node);
                Ok(size)
            }
            Err(source) => {
                // Leave the node dirty so it is retried next frame.
                self.with_state_mut(node, |s| s.needs_layout = true);
                Err(source)
            }
        }
    }

    /// Re-run layout on a boundary node using its stored constraints. The
    /// flush loop's entry point.
    pub(crate) fn layout_without_resize(&self, node: NodeId) -> Result<(), NodeError> {
        let (constraints, boundary) =
            self.with_state(node, |s| (s.constraints, s.relayout_boundary));
        debug_assert!(
            boundary == Some(node) || self.parent_of(node).is_none(),
            "{node:?} reached the layout worklist without being a boundary"
        );
        let constraints = constraints.expect("boundary node was never given constraints");
        let cell = self.tree.cell(node);
        let result = {
            let mut render = cell.borrow_mut();
            let mut cx = LayoutCx { owner: self, node };
            render.perform_layout(&mut cx, &constraints)
        };
        match result {
            Ok(size) => {
                if !self.flags_of(node).contains(NodeFlags::SIZED_BY_PARENT) {
                    self.with_state_mut(node, |s| s.size = Some(size));
                }
                self.with_state_mut(node, |s| s.needs_layout = false);
                self.mark_needs_paint(node);
                Ok(())
            }
            Err(source) => Err(source),
        }
    }

    /// Mark `node` as needing layout. Dirtiness bubbles to the nearest
    /// relayout boundary, which registers with the layout worklist; only
    /// boundaries ever reach the orchestrator.
    pub fn mark_needs_layout(&self, node: NodeId) {
        let mut current = node;
        loop {
            let is_own_boundary = {
                let already = self.with_state(current, |s| s.needs_layout);
                if already {
                    return;
                }
                self.with_state_mut(current, |s| s.needs_layout = true);
                self.with_state(current, |s| s.relayout_boundary == Some(current))
            };
            if is_own_boundary {
                trace!("{current:?} registered for layout");
                if self.is_attached(current) {
                    self.enqueue_layout(current);
                }
                return;
            }
            match self.parent_of(current) {
                Some(parent) => current = parent,
                None => {
                    // Detached-from-boundary root; the orchestrator takes it
                    // directly.
                    if self.is_attached(current) {
                        self.enqueue_layout(current);
                    }
                    return;
                }
            }
        }
    }

    /// Bootstrap layout for a root node: it becomes its own relayout
    /// boundary with externally supplied constraints.
    pub fn schedule_initial_layout(&self, node: NodeId, constraints: Constraints) {
        assert!(
            self.is_attached(node) && self.parent_of(node).is_none(),
            "initial layout is only valid for an attached root"
        );
        assert!(constraints.is_normalized());
        self.with_state_mut(node, |s| {
            s.relayout_boundary = Some(node);
            s.constraints = Some(constraints);
        });
        self.enqueue_layout(node);
    }

    /// Forget cached relayout boundaries below `node`; they will be
    /// recomputed on the next layout that reaches them.
    pub(crate) fn clean_relayout_boundary(&self, node: NodeId) {
        let cleared = self.with_state_mut(node, |s| {
            if s.relayout_boundary != Some(node) {
                s.relayout_boundary = None;
                true
            } else {
                false
            }
        });
        if cleared {
            for child in self.children_of(node) {
                self.clean_relayout_boundary(child);
            }
        }
    }

    // -- Compositing-bit protocol --

    /// Mark `node`'s derived compositing bit stale. Like layout dirtiness
    /// this bubbles upward, stopping at an already-queued parent or at a
    /// boundary pair.
    pub fn mark_needs_compositing_bits_update(&self, node: NodeId) {
        if self.with_state(node, |s| s.needs_compositing_bits_update) {
            return;
        }
        self.with_state_mut(node, |s| s.needs_compositing_bits_update = true);
        if let Some(parent) = self.parent_of(node) {
            if self.with_state(parent, |s| s.needs_compositing_bits_update) {
                // The queued parent's update recomputes this node too.
                return;
            }
            if !self.is_repaint_boundary(node) && !self.is_repaint_boundary(parent) {
                self.mark_needs_compositing_bits_update(parent);
                return;
            }
        }
        // The parent is fine (or there is none): schedule an update here.
        if self.is_attached(node) {
            self.enqueue_compositing_bits(node);
        }
    }

    /// Recompute `needs_compositing` for `node`, children first. A changed
    /// result forces a repaint: a newly compositing subtree needs a layer
    /// created, one that stopped compositing needs its layer dropped.
    pub(crate) fn update_compositing_bits(&self, node: NodeId) {
        if !self.with_state(node, |s| s.needs_compositing_bits_update) {
            return;
        }
        let old = self.with_state(node, |s| s.needs_compositing);
        let mut needs = false;
        for child in self.children_of(node) {
            self.update_compositing_bits(child);
            needs = needs || self.with_state(child, |s| s.needs_compositing);
        }
        if self
            .flags_of(node)
            .intersects(NodeFlags::REPAINT_BOUNDARY | NodeFlags::ALWAYS_COMPOSITES)
        {
            needs = true;
        }
        self.with_state_mut(node, |s| {
            s.needs_compositing = needs;
            s.needs_compositing_bits_update = false;
        });
        if old != needs {
            self.mark_needs_paint(node);
        }
    }

    // -- Paint protocol --

    /// Mark `node` as needing paint. Dirtiness bubbles to the nearest
    /// repaint boundary; a parentless non-boundary root just asks for a
    /// frame, since the adapter repaints it unconditionally.
    pub fn mark_needs_paint(&self, node: NodeId) {
        if self.with_state(node, |s| s.needs_paint) {
            return;
        }
        self.with_state_mut(node, |s| s.needs_paint = true);
        if self.is_repaint_boundary(node) {
            trace!("{node:?} registered for paint");
            if self.is_attached(node) {
                self.enqueue_paint(node);
            }
        } else if let Some(parent) = self.parent_of(node) {
            self.mark_needs_paint(parent);
        } else if self.is_attached(node) {
            self.request_visual_update();
        }
    }

    /// Bootstrap paint for a root node by installing its retained layer.
    pub fn schedule_initial_paint(&self, node: NodeId, layer: LayerId) {
        assert!(
            self.is_attached(node) && self.parent_of(node).is_none(),
            "initial paint is only valid for an attached root"
        );
        assert!(
            self.layers.is_boundary_kind(layer),
            "a root layer must carry an offset or transform"
        );
        self.with_state_mut(node, |s| {
            assert!(s.layer.is_none(), "root layer installed twice");
            s.layer = Some(layer);
        });
        self.enqueue_paint(node);
    }

    /// Invoke `node`'s paint through `cx`.
    ///
    /// A node still marked needing layout was skipped this frame by an
    /// ancestor and will be repainted when that ancestor's layer reattaches;
    /// painting it now would read stale geometry.
    pub(crate) fn paint_with_context(
        &self,
        cx: &mut PaintingContext<'_>,
        node: NodeId,
        offset: Offset,
    ) -> Result<(), NodeError> {
        if self.with_state(node, |s| s.needs_layout) {
            return Ok(());
        }
        self.with_state_mut(node, |s| s.needs_paint = false);
        let cell = self.tree.cell(node);
        let result = {
            let mut render = cell.borrow_mut();
            let previous = cx.begin_node(node);
            let result = render.paint(cx, offset);
            cx.end_node(previous);
            result
        };
        if result.is_err() {
            // Failed nodes stay dirty and retry next frame.
            self.with_state_mut(node, |s| s.needs_paint = true);
        }
        result
    }

    /// Recovery path for a boundary whose retained layer is detached at
    /// flush time. Every repaint-boundary ancestor whose own layer is also
    /// detached is force-marked dirty; the first one with an attached layer
    /// is marked and queued, so its repaint re-composites (and reattaches)
    /// the skipped subtree next frame.
    pub(crate) fn skipped_painting_on_layer(&self, node: NodeId) {
        let mut current = self.parent_of(node);
        while let Some(ancestor) = current {
            if self.is_repaint_boundary(ancestor) {
                let Some(layer) = self.layer_of(ancestor) else {
                    break;
                };
                if self.layers.is_attached(layer) {
                    if !self.with_state(ancestor, |s| s.needs_paint) {
                        self.with_state_mut(ancestor, |s| s.needs_paint = true);
                        self.enqueue_paint(ancestor);
                    }
                    break;
                }
                self.with_state_mut(ancestor, |s| s.needs_paint = true);
            }
            current = self.parent_of(ancestor);
        }
    }

    /// Toggle the repaint-boundary trait at runtime. The compositing bits
    /// are recomputed and the nearest painting ancestor repaints, creating
    /// or dropping this node's retained layer.
    pub fn set_repaint_boundary(&self, node: NodeId, value: bool) {
        if self.is_repaint_boundary(node) == value {
            return;
        }
        let dropped = self.with_state_mut(node, |s| {
            s.flags.set(NodeFlags::REPAINT_BOUNDARY, value);
            if value {
                None
            } else {
                s.layer.take()
            }
        });
        if let Some(layer) = dropped {
            self.layers.dispose(layer);
        }
        self.mark_needs_compositing_bits_update(node);
        match self.parent_of(node) {
            Some(parent) => {
                // The node now being a boundary stops the bubbling at
                // itself; non-boundary ancestors still have to recompute
                // their derived bits, so the walk restarts at the parent.
                self.mark_needs_compositing_bits_update(parent);
                self.mark_needs_paint(parent);
            }
            None => self.mark_needs_paint(node),
        }
    }

    // -- Transforms --

    /// Compose the paint transform from `node`'s coordinate space to
    /// `ancestor`'s (or to the tree root when `None`), root-to-leaf.
    pub fn get_transform_to(&self, node: NodeId, ancestor: Option<NodeId>) -> Transform {
        let mut chain = vec![node];
        let mut current = node;
        while Some(current) != ancestor {
            match self.parent_of(current) {
                Some(parent) => {
                    chain.push(parent);
                    current = parent;
                }
                None => {
                    assert!(
                        ancestor.is_none(),
                        "{ancestor:?} is not an ancestor of {node:?}"
                    );
                    break;
                }
            }
        }
        let mut transform = Transform::IDENTITY;
        for i in (1..chain.len()).rev() {
            let parent = chain[i];
            let child = chain[i - 1];
            let child_offset = self.with_state(child, |s| s.offset);
            self.tree.with_render(parent, |render| {
                render.apply_paint_transform(child, child_offset, &mut transform);
            });
        }
        transform
    }

    // -- State accessors --

    pub(crate) fn with_state<R>(&self, node: NodeId, f: impl FnOnce(&RenderState) -> R) -> R {
        let states = self.states.borrow();
        let state = states
            .get(&node)
            .unwrap_or_else(|| panic!("unknown node {node:?}"));
        f(state)
    }

    pub(crate) fn with_state_mut<R>(
        &self,
        node: NodeId,
        f: impl FnOnce(&mut RenderState) -> R,
    ) -> R {
        let mut states = self.states.borrow_mut();
        let state = states
            .get_mut(&node)
            .unwrap_or_else(|| panic!("unknown node {node:?}"));
        f(state)
    }

    pub fn flags_of(&self, node: NodeId) -> NodeFlags {
        self.with_state(node, |s| s.flags)
    }

    pub fn is_repaint_boundary(&self, node: NodeId) -> bool {
        self.flags_of(node).contains(NodeFlags::REPAINT_BOUNDARY)
    }

    pub fn size_of(&self, node: NodeId) -> Option<Size> {
        self.with_state(node, |s| s.size)
    }

    pub fn constraints_of(&self, node: NodeId) -> Option<Constraints> {
        self.with_state(node, |s| s.constraints)
    }

    pub fn offset_of(&self, node: NodeId) -> Offset {
        self.with_state(node, |s| s.offset)
    }

    pub fn needs_layout(&self, node: NodeId) -> bool {
        self.with_state(node, |s| s.needs_layout)
    }

    pub fn needs_paint(&self, node: NodeId) -> bool {
        self.with_state(node, |s| s.needs_paint)
    }

    pub fn needs_compositing(&self, node: NodeId) -> bool {
        self.with_state(node, |s| s.needs_compositing)
    }

    pub fn relayout_boundary_of(&self, node: NodeId) -> Option<NodeId> {
        self.with_state(node, |s| s.relayout_boundary)
    }

    pub fn layer_of(&self, node: NodeId) -> Option<LayerId> {
        self.with_state(node, |s| s.layer)
    }
}
