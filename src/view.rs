//! The root adapter binding the pipeline to an output surface.
//!
//! [`View`] owns the [`PipelineOwner`], the backend and the root layer, and
//! sequences the four frame phases. The render object at the root is a
//! [`RenderView`], which sizes its single child to the surface and paints it
//! at the origin; the root layer is a transform layer carrying the
//! device-pixel-ratio scale, so everything below it works in logical pixels.

use log::debug;

use crate::backend::{GraphicsBackend, Scene};
use crate::error::{FrameReport, NodeError};
use crate::geometry::{Constraints, Offset, Size};
use crate::layer::{LayerId, LayerKind};
use crate::object::{LayoutCx, NodeFlags, Render};
use crate::paint::PaintingContext;
use crate::pipeline::PipelineOwner;
use crate::transform::Transform;
use crate::tree::NodeId;

/// How the output surface maps to logical pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewConfiguration {
    /// Surface size in logical pixels.
    pub size: Size,
    pub device_pixel_ratio: f32,
}

impl ViewConfiguration {
    pub fn to_transform(&self) -> Transform {
        Transform::scale(self.device_pixel_ratio)
    }
}

/// The render object at the root of the tree.
pub struct RenderView;

impl Render for RenderView {
    fn perform_layout(
        &mut self,
        cx: &mut LayoutCx<'_>,
        constraints: &Constraints,
    ) -> Result<Size, NodeError> {
        let size = constraints.max_size();
        for child in cx.children() {
            cx.layout_child(child, Constraints::tight(size), false)?;
            cx.position_child(child, Offset::ZERO);
        }
        Ok(size)
    }

    fn paint(&mut self, cx: &mut PaintingContext<'_>, offset: Offset) -> Result<(), NodeError> {
        for child in cx.children() {
            let child_offset = cx.offset_of(child);
            cx.paint_child(child, offset + child_offset)?;
        }
        Ok(())
    }
}

/// Owns one render tree and draws it to a backend surface.
pub struct View {
    owner: PipelineOwner,
    backend: Box<dyn GraphicsBackend>,
    configuration: ViewConfiguration,
    root: NodeId,
    root_layer: LayerId,
}

impl View {
    pub fn new(backend: Box<dyn GraphicsBackend>, configuration: ViewConfiguration) -> Self {
        let owner = PipelineOwner::new();
        let root = owner.register(Box::new(RenderView), NodeFlags::REPAINT_BOUNDARY);
        owner.set_root(root);
        let root_layer = owner.layers().create(LayerKind::Transform {
            transform: configuration.to_transform(),
        });
        Self {
            owner,
            backend,
            configuration,
            root,
            root_layer,
        }
    }

    pub fn owner(&self) -> &PipelineOwner {
        &self.owner
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn configuration(&self) -> ViewConfiguration {
        self.configuration
    }

    /// Change the surface geometry. The root relays out against the new size
    /// and the device-pixel-ratio scale is updated in place.
    pub fn set_configuration(&mut self, configuration: ViewConfiguration) {
        if self.configuration == configuration {
            return;
        }
        self.configuration = configuration;
        self.owner
            .layers()
            .set_transform(self.root_layer, configuration.to_transform());
        self.owner.with_state_mut(self.root, |s| {
            s.constraints = Some(Constraints::tight(configuration.size));
        });
        self.owner.mark_needs_layout(self.root);
    }

    /// Replace the root's content subtree.
    pub fn set_child(&self, child: NodeId) {
        for existing in self.owner.children_of(self.root) {
            self.owner.drop_child(self.root, existing);
        }
        self.owner.adopt_child(self.root, child);
    }

    /// Bootstrap the first frame: attach the root layer and schedule the
    /// root for layout and paint. Call once, before the first `draw_frame`.
    pub fn prepare_initial_frame(&self) {
        self.owner.layers().attach(self.root_layer);
        self.owner
            .schedule_initial_layout(self.root, Constraints::tight(self.configuration.size));
        self.owner.schedule_initial_paint(self.root, self.root_layer);
    }

    /// Run the four frame phases and hand back the assembled scene together
    /// with any per-node failures. Failed nodes stay dirty; the scene still
    /// reflects everything that succeeded.
    pub fn draw_frame(&self) -> (Scene, FrameReport) {
        debug!("drawing frame");
        let mut report = self.owner.flush_layout();
        self.owner.flush_compositing_bits();
        report.merge(self.owner.flush_paint(self.backend.as_ref()));
        let scene = self
            .owner
            .layers()
            .build_scene(self.root_layer, self.backend.new_scene_builder());
        (scene, report)
    }
}
