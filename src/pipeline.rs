//! The frame orchestrator.
//!
//! [`PipelineOwner`] owns the render tree, the layer tree and every node's
//! pipeline state, and drives the dirty-node worklists through the frame
//! phases: flush layout, flush compositing bits, flush paint. Scene assembly
//! is the fourth phase and lives on the layer tree
//! ([`LayerTree::build_scene`](crate::layer::LayerTree::build_scene)); the
//! [`View`](crate::view::View) adapter sequences all four.
//!
//! Every phase drains its worklist in ascending depth order, so parents are
//! processed before the children they might clean in passing.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use log::{debug, warn};

use crate::backend::GraphicsBackend;
use crate::error::{FramePhase, FrameReport, NodeFailure};
use crate::layer::LayerTree;
use crate::object::{NodeFlags, Render, RenderState};
use crate::paint::PaintingContext;
use crate::tree::{NodeId, RenderTree};

/// Owns the render tree and drives the rendering pipeline.
pub struct PipelineOwner {
    pub(crate) tree: RenderTree,
    pub(crate) layers: LayerTree,
    pub(crate) states: RefCell<HashMap<NodeId, RenderState>>,
    root: Cell<Option<NodeId>>,
    nodes_needing_layout: RefCell<Vec<NodeId>>,
    nodes_needing_compositing_bits_update: RefCell<Vec<NodeId>>,
    nodes_needing_paint: RefCell<Vec<NodeId>>,
    paint_failures: RefCell<Vec<NodeFailure>>,
    on_visual_update: RefCell<Option<Box<dyn FnMut()>>>,
    #[cfg(debug_assertions)]
    doing_layout: Cell<bool>,
    #[cfg(debug_assertions)]
    allow_mutations_during_layout: Cell<bool>,
}

impl Default for PipelineOwner {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineOwner {
    pub fn new() -> Self {
        Self {
            tree: RenderTree::new(),
            layers: LayerTree::new(),
            states: RefCell::new(HashMap::new()),
            root: Cell::new(None),
            nodes_needing_layout: RefCell::new(Vec::new()),
            nodes_needing_compositing_bits_update: RefCell::new(Vec::new()),
            nodes_needing_paint: RefCell::new(Vec::new()),
            paint_failures: RefCell::new(Vec::new()),
            on_visual_update: RefCell::new(None),
            #[cfg(debug_assertions)]
            doing_layout: Cell::new(false),
            #[cfg(debug_assertions)]
            allow_mutations_during_layout: Cell::new(false),
        }
    }

    /// Callback invoked whenever dirty state first appears, so the embedder
    /// knows to schedule a frame.
    pub fn set_on_visual_update(&self, f: impl FnMut() + 'static) {
        *self.on_visual_update.borrow_mut() = Some(Box::new(f));
    }

    pub fn request_visual_update(&self) {
        // Taken out for the call so the callback can mark nodes dirty
        // without re-entering the slot.
        let callback = self.on_visual_update.borrow_mut().take();
        if let Some(mut f) = callback {
            f();
            let mut slot = self.on_visual_update.borrow_mut();
            if slot.is_none() {
                *slot = Some(f);
            }
        }
    }

    // -- Node lifecycle --

    /// Register a render object, returning its node id. The node starts
    /// detached, dirty for layout and paint, and with its compositing bit
    /// derived from its flags.
    pub fn register(&self, render: Box<dyn Render>, flags: NodeFlags) -> NodeId {
        let node = self.tree.register(render);
        self.states
            .borrow_mut()
            .insert(node, RenderState::new(flags));
        node
    }

    /// Unregister a node and its whole subtree, disposing any retained
    /// layers. The node must already be dropped from its parent.
    pub fn remove(&self, node: NodeId) {
        assert!(
            self.parent_of(node).is_none(),
            "{node:?} removed while still adopted"
        );
        if self.root.get() == Some(node) {
            self.root.set(None);
        }
        for id in self.tree.descendants(node) {
            let layer = self.with_state_mut(id, |s| s.layer.take());
            if let Some(layer) = layer {
                self.layers.dispose(layer);
            }
            self.states.borrow_mut().remove(&id);
            self.tree.remove(id);
        }
        // Stale worklist entries for these ids are skipped at flush time.
    }

    /// Make `child` a child of `parent`. If this attaches the child's
    /// subtree, dirty nodes in it re-register with the worklists.
    pub fn adopt_child(&self, parent: NodeId, child: NodeId) {
        self.debug_assert_mutation_allowed();
        let attaching = self.is_attached(parent);
        self.tree.adopt(parent, child);
        if attaching {
            self.restore_dirty_registrations(child);
        }
        self.mark_needs_layout(parent);
        self.mark_needs_compositing_bits_update(parent);
    }

    /// Detach `child` from `parent`. The child keeps its state and can be
    /// re-adopted elsewhere; its cached relayout boundaries are forgotten
    /// since they may point outside the detached subtree.
    pub fn drop_child(&self, parent: NodeId, child: NodeId) {
        self.debug_assert_mutation_allowed();
        self.clean_relayout_boundary(child);
        self.with_state_mut(child, |s| s.offset = crate::geometry::Offset::ZERO);
        self.tree.drop_child(parent, child);
        self.mark_needs_layout(parent);
        self.mark_needs_compositing_bits_update(parent);
    }

    /// Install `node` as the root of the tree and attach its subtree.
    pub fn set_root(&self, node: NodeId) {
        assert!(self.root.get().is_none(), "pipeline already has a root");
        assert!(self.parent_of(node).is_none());
        self.root.set(Some(node));
        self.tree.attach_subtree(node);
        self.restore_dirty_registrations(node);
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root.get()
    }

    /// Re-register dirty nodes in a freshly attached subtree. Flags were
    /// preserved across detachment but the worklist entries were not.
    fn restore_dirty_registrations(&self, node: NodeId) {
        for id in self.tree.descendants(node) {
            let (needs_layout, has_boundary, needs_bits, needs_paint, has_layer) =
                self.with_state(id, |s| {
                    (
                        s.needs_layout,
                        s.relayout_boundary.is_some(),
                        s.needs_compositing_bits_update,
                        s.needs_paint,
                        s.layer.is_some(),
                    )
                });
            if needs_layout && has_boundary {
                // Clear and re-mark so the bubbling logic runs afresh.
                self.with_state_mut(id, |s| s.needs_layout = false);
                self.mark_needs_layout(id);
            }
            if needs_bits {
                self.with_state_mut(id, |s| s.needs_compositing_bits_update = false);
                self.mark_needs_compositing_bits_update(id);
            }
            if needs_paint && has_layer {
                self.with_state_mut(id, |s| s.needs_paint = false);
                self.mark_needs_paint(id);
            }
        }
    }

    // -- Worklists --

    pub(crate) fn enqueue_layout(&self, node: NodeId) {
        self.nodes_needing_layout.borrow_mut().push(node);
        self.request_visual_update();
    }

    pub(crate) fn enqueue_compositing_bits(&self, node: NodeId) {
        self.nodes_needing_compositing_bits_update
            .borrow_mut()
            .push(node);
        self.request_visual_update();
    }

    pub(crate) fn enqueue_paint(&self, node: NodeId) {
        self.nodes_needing_paint.borrow_mut().push(node);
        self.request_visual_update();
    }

    fn node_exists(&self, node: NodeId) -> bool {
        self.states.borrow().contains_key(&node)
    }

    /// Capture a composited child's paint failure without aborting the
    /// ancestor that was compositing it. The child stays dirty and is queued
    /// for a retry.
    pub(crate) fn record_paint_failure(&self, node: NodeId, source: crate::error::NodeError) {
        warn!("paint failed for {node:?}: {source}");
        self.paint_failures.borrow_mut().push(NodeFailure {
            node,
            phase: FramePhase::Paint,
            source,
        });
        self.enqueue_paint(node);
    }

    // -- Frame phases --

    /// Phase one: drain the layout worklist, laying out dirty relayout
    /// boundaries in ascending depth order. Failures are collected per node
    /// and the failed boundaries retry next frame.
    pub fn flush_layout(&self) -> FrameReport {
        let mut report = FrameReport::new();
        let mut retry = Vec::new();
        loop {
            let mut batch: Vec<NodeId> =
                self.nodes_needing_layout.borrow_mut().drain(..).collect();
            if batch.is_empty() {
                break;
            }
            batch.sort_by_key(|&n| self.tree.depth_of(n));
            debug!("flushing layout for {} nodes", batch.len());
            #[cfg(debug_assertions)]
            self.doing_layout.set(true);
            for node in batch {
                if !self.node_exists(node)
                    || !self.needs_layout(node)
                    || !self.is_attached(node)
                {
                    continue;
                }
                if let Err(source) = self.layout_without_resize(node) {
                    warn!("layout failed for {node:?}: {source}");
                    report.push(NodeFailure {
                        node,
                        phase: FramePhase::Layout,
                        source,
                    });
                    retry.push(node);
                }
            }
            #[cfg(debug_assertions)]
            self.doing_layout.set(false);
        }
        self.nodes_needing_layout.borrow_mut().extend(retry);
        report
    }

    /// Phase two: recompute stale compositing bits, parents first. This
    /// phase runs no user code and cannot fail.
    pub fn flush_compositing_bits(&self) {
        let mut batch: Vec<NodeId> = self
            .nodes_needing_compositing_bits_update
            .borrow_mut()
            .drain(..)
            .collect();
        batch.sort_by_key(|&n| self.tree.depth_of(n));
        debug!("flushing compositing bits for {} nodes", batch.len());
        for node in batch {
            if self.node_exists(node) && self.is_attached(node) {
                self.update_compositing_bits(node);
            }
        }
    }

    /// Phase three: repaint dirty repaint boundaries in ascending depth
    /// order. A boundary whose retained layer is detached is skipped, with
    /// its painting ancestors re-dirtied for later recovery.
    pub fn flush_paint(&self, backend: &dyn GraphicsBackend) -> FrameReport {
        let mut report = FrameReport::new();
        let mut retry = Vec::new();
        let mut batch: Vec<NodeId> = self.nodes_needing_paint.borrow_mut().drain(..).collect();
        batch.sort_by_key(|&n| self.tree.depth_of(n));
        debug!("flushing paint for {} nodes", batch.len());
        for node in batch {
            if !self.node_exists(node) || !self.needs_paint(node) || !self.is_attached(node) {
                continue;
            }
            match self.layer_of(node) {
                Some(layer) if self.layers.is_attached(layer) => {
                    if let Err(source) =
                        PaintingContext::repaint_composited_child(self, backend, node)
                    {
                        warn!("paint failed for {node:?}: {source}");
                        report.push(NodeFailure {
                            node,
                            phase: FramePhase::Paint,
                            source,
                        });
                        retry.push(node);
                    }
                }
                _ => self.skipped_painting_on_layer(node),
            }
        }
        self.nodes_needing_paint.borrow_mut().extend(retry);
        report.failures.extend(self.paint_failures.take());
        report
    }

    /// Allow tree mutations below a relayout boundary while layout is in
    /// flight. Used by nodes that build children during their own layout.
    pub fn invoke_layout_callback<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        #[cfg(debug_assertions)]
        let previous = self.allow_mutations_during_layout.replace(true);
        let result = f(self);
        #[cfg(debug_assertions)]
        self.allow_mutations_during_layout.set(previous);
        result
    }

    fn debug_assert_mutation_allowed(&self) {
        #[cfg(debug_assertions)]
        assert!(
            !self.doing_layout.get() || self.allow_mutations_during_layout.get(),
            "render tree mutated during layout outside invoke_layout_callback"
        );
    }

    // -- Tree accessors --

    pub fn parent_of(&self, node: NodeId) -> Option<NodeId> {
        self.tree.parent_of(node)
    }

    pub fn children_of(&self, node: NodeId) -> Vec<NodeId> {
        self.tree.children_of(node)
    }

    pub fn depth_of(&self, node: NodeId) -> u32 {
        self.tree.depth_of(node)
    }

    pub fn is_attached(&self, node: NodeId) -> bool {
        self.tree.is_attached(node)
    }

    pub fn layers(&self) -> &LayerTree {
        &self.layers
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::backend::recording::RecordingBackend;
    use crate::backend::Paint;
    use crate::error::NodeError;
    use crate::geometry::{Color, Constraints, Offset, Rect, Size};
    use crate::object::tests::NoopRender;
    use crate::object::{LayoutCx, Render};
    use crate::transform::Transform;

    /// Single-child box that fills its constraints and passes them through.
    struct FillRender {
        child: Option<NodeId>,
    }

    impl Render for FillRender {
        fn perform_layout(
            &mut self,
            cx: &mut LayoutCx<'_>,
            constraints: &Constraints,
        ) -> Result<Size, NodeError> {
            if let Some(child) = self.child {
                cx.layout_child(child, *constraints, false)?;
                cx.position_child(child, Offset::ZERO);
            }
            Ok(constraints.max_size())
        }

        fn paint(
            &mut self,
            cx: &mut PaintingContext<'_>,
            offset: Offset,
        ) -> Result<(), NodeError> {
            if let Some(child) = self.child {
                cx.paint_child(child, offset)?;
            }
            Ok(())
        }
    }

    /// Leaf that draws one rect and counts its layout and paint passes.
    struct BlockRender {
        size: Size,
        layouts: Rc<Cell<u32>>,
        paints: Rc<Cell<u32>>,
    }

    impl BlockRender {
        fn new() -> (Self, Rc<Cell<u32>>, Rc<Cell<u32>>) {
            let layouts = Rc::new(Cell::new(0));
            let paints = Rc::new(Cell::new(0));
            (
                Self {
                    size: Size::new(10.0, 10.0),
                    layouts: layouts.clone(),
                    paints: paints.clone(),
                },
                layouts,
                paints,
            )
        }
    }

    impl Render for BlockRender {
        fn perform_layout(
            &mut self,
            _cx: &mut LayoutCx<'_>,
            constraints: &Constraints,
        ) -> Result<Size, NodeError> {
            self.layouts.set(self.layouts.get() + 1);
            Ok(constraints.constrain(self.size))
        }

        fn paint(
            &mut self,
            cx: &mut PaintingContext<'_>,
            offset: Offset,
        ) -> Result<(), NodeError> {
            self.paints.set(self.paints.get() + 1);
            let rect = Rect::from_offset_size(offset, self.size);
            cx.canvas().draw_rect(rect, &Paint::fill(Color::BLACK));
            Ok(())
        }
    }

    struct FailingRender;

    impl Render for FailingRender {
        fn perform_layout(
            &mut self,
            _cx: &mut LayoutCx<'_>,
            _constraints: &Constraints,
        ) -> Result<Size, NodeError> {
            Err("layout exploded".into())
        }

        fn paint(
            &mut self,
            _cx: &mut PaintingContext<'_>,
            _offset: Offset,
        ) -> Result<(), NodeError> {
            Ok(())
        }
    }

    fn loose(w: f32, h: f32) -> Constraints {
        Constraints::loose(Size::new(w, h))
    }

    #[test]
    fn test_mark_needs_layout_bubbles_to_boundary() {
        let owner = PipelineOwner::new();
        let child = owner.register(Box::<NoopRender>::default(), NodeFlags::empty());
        let root = owner.register(
            Box::new(FillRender { child: Some(child) }),
            NodeFlags::empty(),
        );
        owner.adopt_child(root, child);
        owner.set_root(root);
        owner.schedule_initial_layout(root, loose(100.0, 100.0));
        assert!(!owner.flush_layout().had_failures());

        // FillRender passes parent_uses_size = false, so the child is its
        // own relayout boundary and dirtiness stops there.
        assert_eq!(owner.relayout_boundary_of(child), Some(child));
        owner.mark_needs_layout(child);
        assert!(owner.needs_layout(child));
        assert!(!owner.needs_layout(root));

        // A shrink-wrapping parent uses the child's size: dirtiness must
        // walk up to the root boundary instead.
        assert!(!owner.flush_layout().had_failures());
        struct ShrinkWrap {
            child: NodeId,
        }
        impl Render for ShrinkWrap {
            fn perform_layout(
                &mut self,
                cx: &mut LayoutCx<'_>,
                constraints: &Constraints,
            ) -> Result<Size, NodeError> {
                let size = cx.layout_child(self.child, *constraints, true)?;
                cx.position_child(self.child, Offset::ZERO);
                Ok(size)
            }
            fn paint(
                &mut self,
                cx: &mut PaintingContext<'_>,
                offset: Offset,
            ) -> Result<(), NodeError> {
                cx.paint_child(self.child, offset)
            }
        }
        let owner = PipelineOwner::new();
        let leaf = owner.register(Box::<NoopRender>::default(), NodeFlags::empty());
        let wrap = owner.register(Box::new(ShrinkWrap { child: leaf }), NodeFlags::empty());
        owner.adopt_child(wrap, leaf);
        owner.set_root(wrap);
        owner.schedule_initial_layout(wrap, loose(100.0, 100.0));
        assert!(!owner.flush_layout().had_failures());
        assert_eq!(owner.relayout_boundary_of(leaf), Some(wrap));
        owner.mark_needs_layout(leaf);
        assert!(owner.needs_layout(leaf));
        assert!(owner.needs_layout(wrap));
    }

    #[test]
    fn test_layout_fast_path_skips_clean_subtree() {
        let owner = PipelineOwner::new();
        let (block, layouts, _) = BlockRender::new();
        let child = owner.register(Box::new(block), NodeFlags::empty());
        let root = owner.register(
            Box::new(FillRender { child: Some(child) }),
            NodeFlags::empty(),
        );
        owner.adopt_child(root, child);
        owner.set_root(root);
        owner.schedule_initial_layout(root, loose(100.0, 100.0));

        assert!(!owner.flush_layout().had_failures());
        assert_eq!(layouts.get(), 1);
        assert_eq!(owner.size_of(child), Some(Size::new(10.0, 10.0)));
        assert!(!owner.needs_layout(root));
        assert!(!owner.needs_layout(child));

        // Re-dirtying the root with unchanged constraints must not re-enter
        // the clean child: same constraints, same boundary, clean bit.
        owner.mark_needs_layout(root);
        assert!(!owner.flush_layout().had_failures());
        assert_eq!(layouts.get(), 1);
    }

    #[test]
    fn test_relayout_boundary_stops_dirty_bubbling() {
        let owner = PipelineOwner::new();
        let (block, layouts, _) = BlockRender::new();
        // Tight constraints make the child its own relayout boundary.
        let child = owner.register(Box::new(block), NodeFlags::empty());
        struct TightParent {
            child: NodeId,
        }
        impl Render for TightParent {
            fn perform_layout(
                &mut self,
                cx: &mut LayoutCx<'_>,
                constraints: &Constraints,
            ) -> Result<Size, NodeError> {
                let size = constraints.max_size();
                cx.layout_child(self.child, Constraints::tight(size), false)?;
                cx.position_child(self.child, Offset::ZERO);
                Ok(size)
            }
            fn paint(
                &mut self,
                cx: &mut PaintingContext<'_>,
                offset: Offset,
            ) -> Result<(), NodeError> {
                cx.paint_child(self.child, offset)
            }
        }
        let root = owner.register(Box::new(TightParent { child }), NodeFlags::empty());
        owner.adopt_child(root, child);
        owner.set_root(root);
        owner.schedule_initial_layout(root, loose(50.0, 50.0));
        assert!(!owner.flush_layout().had_failures());
        assert_eq!(owner.relayout_boundary_of(child), Some(child));

        // Dirty the child: layout must stop at the child, not re-run root.
        let root_layouts_before = layouts.get();
        owner.mark_needs_layout(child);
        assert!(owner.needs_layout(child));
        assert!(!owner.needs_layout(root));
        assert!(!owner.flush_layout().had_failures());
        assert_eq!(layouts.get(), root_layouts_before + 1);
    }

    #[test]
    fn test_compositing_bits_propagate_from_boundary_child() {
        let owner = PipelineOwner::new();
        let (block, _, _) = BlockRender::new();
        let child = owner.register(Box::new(block), NodeFlags::REPAINT_BOUNDARY);
        let mid = owner.register(
            Box::new(FillRender { child: Some(child) }),
            NodeFlags::empty(),
        );
        let root = owner.register(
            Box::new(FillRender { child: Some(mid) }),
            NodeFlags::REPAINT_BOUNDARY,
        );
        owner.adopt_child(mid, child);
        owner.adopt_child(root, mid);
        owner.set_root(root);
        owner.mark_needs_compositing_bits_update(child);
        owner.flush_compositing_bits();
        assert!(owner.needs_compositing(child));
        // A plain node between two boundaries derives its bit from below.
        assert!(owner.needs_compositing(mid));
        assert!(owner.needs_compositing(root));
    }

    #[test]
    fn test_boundary_toggle_updates_ancestor_bits() {
        let owner = PipelineOwner::new();
        let (block, _, _) = BlockRender::new();
        let leaf = owner.register(Box::new(block), NodeFlags::empty());
        let mid = owner.register(
            Box::new(FillRender { child: Some(leaf) }),
            NodeFlags::empty(),
        );
        let root = owner.register(
            Box::new(FillRender { child: Some(mid) }),
            NodeFlags::REPAINT_BOUNDARY,
        );
        owner.adopt_child(mid, leaf);
        owner.adopt_child(root, mid);
        owner.set_root(root);
        let backend = RecordingBackend::new();
        let root_layer = owner.layers.create(crate::layer::LayerKind::Transform {
            transform: Transform::IDENTITY,
        });
        owner.layers.attach(root_layer);
        owner.schedule_initial_layout(root, loose(100.0, 100.0));
        owner.schedule_initial_paint(root, root_layer);
        assert!(!owner.flush_layout().had_failures());
        owner.flush_compositing_bits();
        assert!(!owner.flush_paint(&backend).had_failures());
        assert!(!owner.needs_compositing(mid));
        assert!(!owner.needs_paint(mid));

        // Making the leaf a boundary must flip every ancestor's derived
        // bit, not just the leaf's; a stale false on `mid` would route its
        // push helpers down the inline-canvas path and lose the new layer.
        owner.set_repaint_boundary(leaf, true);
        owner.flush_compositing_bits();
        assert!(owner.needs_compositing(leaf));
        assert!(owner.needs_compositing(mid));
        assert!(owner.needs_compositing(root));
        assert!(owner.needs_paint(mid));

        owner.set_repaint_boundary(leaf, false);
        owner.flush_compositing_bits();
        assert!(!owner.needs_compositing(leaf));
        assert!(!owner.needs_compositing(mid));
    }

    #[test]
    fn test_toggling_repaint_boundary_recomputes_bits() {
        let owner = PipelineOwner::new();
        let (block, _, _) = BlockRender::new();
        let child = owner.register(Box::new(block), NodeFlags::empty());
        let root = owner.register(
            Box::new(FillRender { child: Some(child) }),
            NodeFlags::REPAINT_BOUNDARY,
        );
        owner.adopt_child(root, child);
        owner.set_root(root);
        owner.flush_compositing_bits();
        assert!(!owner.needs_compositing(child));

        owner.set_repaint_boundary(child, true);
        owner.flush_compositing_bits();
        assert!(owner.needs_compositing(child));
        assert!(owner.is_repaint_boundary(child));

        owner.set_repaint_boundary(child, false);
        owner.flush_compositing_bits();
        assert!(!owner.needs_compositing(child));
        assert!(owner.layer_of(child).is_none());
    }

    #[test]
    fn test_layout_failure_is_reported_and_node_stays_dirty() {
        let owner = PipelineOwner::new();
        let node = owner.register(Box::new(FailingRender), NodeFlags::empty());
        owner.set_root(node);
        owner.schedule_initial_layout(node, loose(10.0, 10.0));
        let report = owner.flush_layout();
        assert!(report.had_failures());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].node, node);
        assert_eq!(report.failures[0].phase, FramePhase::Layout);
        assert!(owner.needs_layout(node));
        // The failed boundary is queued again for the next frame.
        assert_eq!(owner.nodes_needing_layout.borrow().len(), 1);
    }

    #[test]
    fn test_visual_update_fires_on_first_dirt() {
        let owner = Rc::new(PipelineOwner::new());
        let updates = Rc::new(Cell::new(0u32));
        let seen = updates.clone();
        owner.set_on_visual_update(move || seen.set(seen.get() + 1));
        let (block, _, _) = BlockRender::new();
        let node = owner.register(Box::new(block), NodeFlags::empty());
        owner.set_root(node);
        owner.schedule_initial_layout(node, loose(10.0, 10.0));
        assert_eq!(updates.get(), 1);
        // Already dirty: marking again is a no-op.
        owner.mark_needs_layout(node);
        assert_eq!(updates.get(), 1);
    }

    #[test]
    fn test_boundary_paint_produces_retained_layer_content() {
        let owner = PipelineOwner::new();
        let backend = RecordingBackend::new();
        let (block, _, paints) = BlockRender::new();
        let child = owner.register(Box::new(block), NodeFlags::REPAINT_BOUNDARY);
        let root = owner.register(
            Box::new(FillRender { child: Some(child) }),
            NodeFlags::REPAINT_BOUNDARY,
        );
        owner.adopt_child(root, child);
        owner.set_root(root);

        let root_layer = owner
            .layers
            .create(crate::layer::LayerKind::Transform {
                transform: Transform::IDENTITY,
            });
        owner.layers.attach(root_layer);
        owner.schedule_initial_layout(root, loose(100.0, 100.0));
        owner.schedule_initial_paint(root, root_layer);

        assert!(!owner.flush_layout().had_failures());
        owner.flush_compositing_bits();
        assert!(!owner.flush_paint(&backend).had_failures());

        assert_eq!(paints.get(), 1);
        assert!(!owner.needs_paint(root));
        assert!(!owner.needs_paint(child));
        // The child boundary got its own offset layer under the root's.
        let child_layer = owner.layer_of(child).expect("boundary has a layer");
        assert_eq!(owner.layers.parent_of(child_layer), Some(root_layer));

        // Dirtying the child repaints only the child's layer.
        owner.mark_needs_paint(child);
        assert!(!owner.needs_paint(root));
        assert!(!owner.flush_paint(&backend).had_failures());
        assert_eq!(paints.get(), 2);
    }

    #[test]
    fn test_skipped_paint_marks_painting_ancestor() {
        let owner = PipelineOwner::new();
        let backend = RecordingBackend::new();
        let (block, _, _) = BlockRender::new();
        let leaf = owner.register(Box::new(block), NodeFlags::REPAINT_BOUNDARY);
        let mid = owner.register(
            Box::new(FillRender { child: Some(leaf) }),
            NodeFlags::REPAINT_BOUNDARY,
        );
        let root = owner.register(
            Box::new(FillRender { child: Some(mid) }),
            NodeFlags::REPAINT_BOUNDARY,
        );
        owner.adopt_child(mid, leaf);
        owner.adopt_child(root, mid);
        owner.set_root(root);
        let root_layer = owner.layers.create(crate::layer::LayerKind::Transform {
            transform: Transform::IDENTITY,
        });
        owner.layers.attach(root_layer);
        owner.schedule_initial_layout(root, loose(100.0, 100.0));
        owner.schedule_initial_paint(root, root_layer);
        assert!(!owner.flush_layout().had_failures());
        owner.flush_compositing_bits();
        assert!(!owner.flush_paint(&backend).had_failures());

        // Detach the leaf's retained layer externally, then dirty the leaf.
        let leaf_layer = owner.layer_of(leaf).expect("leaf layer");
        owner.layers.remove(leaf_layer);
        owner.mark_needs_paint(leaf);
        assert!(!owner.flush_paint(&backend).had_failures());
        // The leaf was skipped; its painting ancestor is dirty instead.
        assert!(owner.needs_paint(leaf));
        assert!(owner.needs_paint(mid));
        assert!(!owner.needs_paint(root));

        // The next flush repaints the ancestor, which re-composites the
        // leaf and reattaches its layer.
        assert!(!owner.flush_paint(&backend).had_failures());
        assert!(!owner.needs_paint(leaf));
        assert!(!owner.needs_paint(mid));
        assert!(owner.layers.is_attached(owner.layer_of(leaf).unwrap()));
    }

    #[test]
    fn test_detached_subtree_restores_dirty_registrations_on_adopt() {
        let owner = PipelineOwner::new();
        let (block, _, _) = BlockRender::new();
        let child = owner.register(Box::new(block), NodeFlags::empty());
        let root = owner.register(
            Box::new(FillRender { child: Some(child) }),
            NodeFlags::empty(),
        );
        owner.set_root(root);
        owner.schedule_initial_layout(root, loose(100.0, 100.0));
        // Adopt after attach: the child's dirty layout must land a boundary
        // registration via its attached parent.
        owner.adopt_child(root, child);
        assert!(!owner.flush_layout().had_failures());
        assert!(!owner.needs_layout(child));
    }
}
