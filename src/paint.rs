//! Paint recording.
//!
//! A [`PaintingContext`] targets one container layer and hands render objects
//! a canvas. Recording is lazy: the picture layer and recorder are created on
//! the first draw call, and the recording is sealed into the layer whenever a
//! composited child interrupts it. Paint code draws on the canvas and calls
//! [`PaintingContext::paint_child`]; the context decides what becomes a
//! picture and what becomes a child layer.

use log::trace;

use crate::backend::{Canvas, GraphicsBackend, PictureRecorder};
use crate::error::NodeError;
use crate::geometry::{Offset, RRect, Rect, Size};
use crate::layer::{LayerId, LayerKind};
use crate::pipeline::PipelineOwner;
use crate::transform::Transform;
use crate::tree::NodeId;

/// A place for render objects to paint.
pub struct PaintingContext<'a> {
    owner: &'a PipelineOwner,
    backend: &'a dyn GraphicsBackend,
    container: LayerId,
    estimated_bounds: Rect,
    picture_layer: Option<LayerId>,
    recorder: Option<Box<dyn PictureRecorder>>,
    current: Option<NodeId>,
}

impl<'a> PaintingContext<'a> {
    fn new(
        owner: &'a PipelineOwner,
        backend: &'a dyn GraphicsBackend,
        container: LayerId,
        estimated_bounds: Rect,
    ) -> Self {
        Self {
            owner,
            backend,
            container,
            estimated_bounds,
            picture_layer: None,
            recorder: None,
            current: None,
        }
    }

    /// Cull-rect hint for the recording. Draw calls outside it may or may
    /// not appear in the output.
    pub fn estimated_bounds(&self) -> Rect {
        self.estimated_bounds
    }

    pub(crate) fn begin_node(&mut self, node: NodeId) -> Option<NodeId> {
        self.current.replace(node)
    }

    pub(crate) fn end_node(&mut self, previous: Option<NodeId>) {
        self.current = previous;
    }

    /// The canvas to draw on. The first call opens a recording backed by a
    /// fresh picture layer appended to the container; a later composited
    /// child seals it, and drawing again opens another.
    pub fn canvas(&mut self) -> &mut dyn Canvas {
        if self.recorder.is_none() {
            let layer = self
                .owner
                .layers
                .create(LayerKind::Picture { picture: None });
            self.owner.layers.append(self.container, layer);
            self.picture_layer = Some(layer);
            self.recorder = Some(self.backend.new_recorder(self.estimated_bounds));
            trace!("started recording into layer {layer:?}");
        }
        self.recorder
            .as_mut()
            .expect("recorder just installed")
            .canvas()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }

    /// Children of the node currently painting.
    pub fn children(&self) -> Vec<NodeId> {
        let node = self.current.expect("no node is painting");
        self.owner.children_of(node)
    }

    /// Offset of `child` in its parent's coordinate space, as positioned
    /// during layout.
    pub fn offset_of(&self, child: NodeId) -> Offset {
        self.owner.offset_of(child)
    }

    /// Seal the open recording, if any, into its picture layer.
    pub(crate) fn stop_recording_if_needed(&mut self) {
        let Some(recorder) = self.recorder.take() else {
            return;
        };
        let layer = self
            .picture_layer
            .take()
            .expect("recording without a picture layer");
        self.owner.layers.set_picture(layer, recorder.end_recording());
    }

    /// Paint a child at `offset` within the current node's coordinate space.
    ///
    /// A repaint-boundary child contributes its retained layer (repainting it
    /// only if dirty); any other child paints inline into this context.
    pub fn paint_child(&mut self, child: NodeId, offset: Offset) -> Result<(), NodeError> {
        if let Some(current) = self.current {
            assert_eq!(
                self.owner.parent_of(child),
                Some(current),
                "{child:?} painted by a node that is not its parent"
            );
        }
        if self.owner.is_repaint_boundary(child) {
            self.stop_recording_if_needed();
            self.composite_child(child, offset)
        } else {
            self.owner.paint_with_context(self, child, offset)
        }
    }

    fn composite_child(&mut self, child: NodeId, offset: Offset) -> Result<(), NodeError> {
        debug_assert!(self.owner.is_repaint_boundary(child));
        debug_assert!(!self.is_recording());
        if self.owner.needs_paint(child) || self.owner.layer_of(child).is_none() {
            // A failed boundary repaint is the child's problem, captured per
            // node; the ancestor keeps compositing with whatever the child's
            // layer last held.
            if let Err(source) = Self::repaint_composited_child(self.owner, self.backend, child)
            {
                self.owner.record_paint_failure(child, source);
            }
        }
        let layer = self
            .owner
            .layer_of(child)
            .expect("composited child without a layer");
        self.owner.layers.set_offset(layer, offset);
        // Unlink from wherever last frame left it before re-homing.
        self.owner.layers.remove(layer);
        self.owner.layers.append(self.container, layer);
        Ok(())
    }

    /// Repaint a repaint boundary into its retained layer, creating or
    /// replacing the layer as needed. The layer is left parentless; the
    /// caller (a painting ancestor, or the flush loop for already-parented
    /// layers) decides where it hangs.
    pub(crate) fn repaint_composited_child(
        owner: &PipelineOwner,
        backend: &dyn GraphicsBackend,
        child: NodeId,
    ) -> Result<(), NodeError> {
        debug_assert!(owner.is_repaint_boundary(child) || owner.parent_of(child).is_none());
        let layer = match owner.layer_of(child) {
            Some(layer) if owner.layers.is_boundary_kind(layer) => {
                Self::clear_container(owner, layer);
                layer
            }
            Some(stale) => {
                // Wrong kind, e.g. installed before the node became a
                // boundary. Start over.
                owner.layers.dispose(stale);
                let layer = owner.layers.create(LayerKind::Offset {
                    offset: Offset::ZERO,
                });
                owner.with_state_mut(child, |s| s.layer = Some(layer));
                layer
            }
            None => {
                let layer = owner.layers.create(LayerKind::Offset {
                    offset: Offset::ZERO,
                });
                owner.with_state_mut(child, |s| s.layer = Some(layer));
                layer
            }
        };
        owner.layers.mark_needs_add_to_scene(layer);
        let size = owner.size_of(child).unwrap_or(Size::new(0.0, 0.0));
        let bounds = Rect::from_offset_size(Offset::ZERO, size);
        let mut cx = PaintingContext::new(owner, backend, layer, bounds);
        let result = owner.paint_with_context(&mut cx, child, Offset::ZERO);
        cx.stop_recording_if_needed();
        result
    }

    /// Append `layer` to the container and run `painter` into it. The layer
    /// keeps no children from previous frames.
    pub fn push_layer(
        &mut self,
        layer: LayerId,
        offset: Offset,
        child_bounds: Option<Rect>,
        painter: impl FnOnce(&mut PaintingContext<'_>, Offset) -> Result<(), NodeError>,
    ) -> Result<(), NodeError> {
        Self::clear_container(self.owner, layer);
        self.stop_recording_if_needed();
        self.owner.layers.remove(layer);
        self.owner.layers.append(self.container, layer);
        let bounds = child_bounds.unwrap_or(self.estimated_bounds);
        let mut child_cx = PaintingContext::new(self.owner, self.backend, layer, bounds);
        child_cx.current = self.current;
        let result = painter(&mut child_cx, offset);
        child_cx.stop_recording_if_needed();
        result
    }

    /// Translate `painter`'s output by `offset`. Composites into a retained
    /// offset layer, or degrades to a canvas translation when the subtree
    /// paints inline.
    pub fn push_offset(
        &mut self,
        needs_compositing: bool,
        offset: Offset,
        old_layer: Option<LayerId>,
        painter: impl FnOnce(&mut PaintingContext<'_>, Offset) -> Result<(), NodeError>,
    ) -> Result<Option<LayerId>, NodeError> {
        if needs_compositing {
            let layer = match old_layer {
                Some(layer) if self.owner.layers.contains(layer) => {
                    self.owner.layers.set_offset(layer, offset);
                    layer
                }
                _ => self.owner.layers.create(LayerKind::Offset { offset }),
            };
            self.push_layer(layer, Offset::ZERO, None, painter)?;
            Ok(Some(layer))
        } else {
            self.dispose_stale(old_layer);
            {
                let canvas = self.canvas();
                canvas.save();
                canvas.translate(offset.dx, offset.dy);
            }
            let result = painter(self, Offset::ZERO);
            self.canvas().restore();
            result.map(|()| None)
        }
    }

    /// Clip `painter`'s output to `clip` (given in the caller's space before
    /// `offset` is applied). With `needs_compositing` a retained clip layer
    /// is used and returned for reuse next frame; otherwise the clip happens
    /// inline on the canvas and any stale layer is disposed. A false
    /// `needs_compositing` asserts the subtree composites no children.
    pub fn push_clip_rect(
        &mut self,
        needs_compositing: bool,
        offset: Offset,
        clip: Rect,
        old_layer: Option<LayerId>,
        painter: impl FnOnce(&mut PaintingContext<'_>, Offset) -> Result<(), NodeError>,
    ) -> Result<Option<LayerId>, NodeError> {
        let offset_clip = clip.shift(offset);
        if needs_compositing {
            let layer = match old_layer {
                Some(layer) if self.owner.layers.contains(layer) => {
                    self.owner.layers.set_clip_rect(layer, offset_clip);
                    layer
                }
                _ => self
                    .owner
                    .layers
                    .create(LayerKind::ClipRect { rect: offset_clip }),
            };
            self.push_layer(layer, offset, Some(offset_clip), painter)?;
            Ok(Some(layer))
        } else {
            self.dispose_stale(old_layer);
            {
                let canvas = self.canvas();
                canvas.save();
                canvas.clip_rect(offset_clip);
            }
            let result = painter(self, offset);
            self.canvas().restore();
            result.map(|()| None)
        }
    }

    pub fn push_clip_rrect(
        &mut self,
        needs_compositing: bool,
        offset: Offset,
        clip: RRect,
        old_layer: Option<LayerId>,
        painter: impl FnOnce(&mut PaintingContext<'_>, Offset) -> Result<(), NodeError>,
    ) -> Result<Option<LayerId>, NodeError> {
        let offset_clip = clip.shift(offset);
        if needs_compositing {
            let layer = match old_layer {
                Some(layer) if self.owner.layers.contains(layer) => {
                    self.owner.layers.set_clip_rrect(layer, offset_clip);
                    layer
                }
                _ => self
                    .owner
                    .layers
                    .create(LayerKind::ClipRRect { rrect: offset_clip }),
            };
            self.push_layer(layer, offset, Some(offset_clip.rect), painter)?;
            Ok(Some(layer))
        } else {
            self.dispose_stale(old_layer);
            {
                let canvas = self.canvas();
                canvas.save();
                canvas.clip_rrect(&offset_clip);
            }
            let result = painter(self, offset);
            self.canvas().restore();
            result.map(|()| None)
        }
    }

    pub fn push_clip_path(
        &mut self,
        needs_compositing: bool,
        offset: Offset,
        clip: crate::backend::Path,
        old_layer: Option<LayerId>,
        painter: impl FnOnce(&mut PaintingContext<'_>, Offset) -> Result<(), NodeError>,
    ) -> Result<Option<LayerId>, NodeError> {
        if needs_compositing {
            let layer = match old_layer {
                Some(layer) if self.owner.layers.contains(layer) => {
                    self.owner.layers.set_clip_path(layer, clip.clone());
                    layer
                }
                _ => self
                    .owner
                    .layers
                    .create(LayerKind::ClipPath { path: clip }),
            };
            self.push_layer(layer, offset, None, painter)?;
            Ok(Some(layer))
        } else {
            self.dispose_stale(old_layer);
            {
                let canvas = self.canvas();
                canvas.save();
                canvas.translate(offset.dx, offset.dy);
                canvas.clip_path(&clip);
                canvas.translate(-offset.dx, -offset.dy);
            }
            let result = painter(self, offset);
            self.canvas().restore();
            result.map(|()| None)
        }
    }

    /// Blend `painter`'s output at the given alpha. Opacity always
    /// composites: the blend has to apply to the finished subtree, not to
    /// each draw call.
    pub fn push_opacity(
        &mut self,
        offset: Offset,
        alpha: u8,
        old_layer: Option<LayerId>,
        painter: impl FnOnce(&mut PaintingContext<'_>, Offset) -> Result<(), NodeError>,
    ) -> Result<LayerId, NodeError> {
        let layer = match old_layer {
            Some(layer) if self.owner.layers.contains(layer) => {
                self.owner.layers.set_opacity(layer, alpha, offset);
                layer
            }
            _ => self
                .owner
                .layers
                .create(LayerKind::Opacity { alpha, offset }),
        };
        // The layer already carries the offset; the painter starts at zero.
        self.push_layer(layer, Offset::ZERO, None, painter)?;
        Ok(layer)
    }

    /// Apply `transform` around the painting origin. The stored transform is
    /// conjugated with the offset so the pivot is the node's own origin, not
    /// the boundary layer's.
    pub fn push_transform(
        &mut self,
        needs_compositing: bool,
        offset: Offset,
        transform: Transform,
        old_layer: Option<LayerId>,
        painter: impl FnOnce(&mut PaintingContext<'_>, Offset) -> Result<(), NodeError>,
    ) -> Result<Option<LayerId>, NodeError> {
        let effective = Transform::translate_offset(offset)
            .then(&transform)
            .then(&Transform::translate(-offset.dx, -offset.dy));
        if needs_compositing {
            let layer = match old_layer {
                Some(layer) if self.owner.layers.contains(layer) => {
                    self.owner.layers.set_transform(layer, effective);
                    layer
                }
                _ => self.owner.layers.create(LayerKind::Transform {
                    transform: effective,
                }),
            };
            self.push_layer(layer, offset, None, painter)?;
            Ok(Some(layer))
        } else {
            self.dispose_stale(old_layer);
            {
                let canvas = self.canvas();
                canvas.save();
                canvas.transform(&effective);
            }
            let result = painter(self, offset);
            self.canvas().restore();
            result.map(|()| None)
        }
    }

    /// Empty a container before repainting into it. Picture children are
    /// anonymous, created by the context for one recording, and die here;
    /// container children belong to render objects and are only unlinked so
    /// they can be re-homed.
    fn clear_container(owner: &PipelineOwner, container: LayerId) {
        for child in owner.layers.children_of(container) {
            if owner.layers.is_picture(child) {
                owner.layers.dispose(child);
            } else {
                owner.layers.remove(child);
            }
        }
    }

    fn dispose_stale(&self, old_layer: Option<LayerId>) {
        if let Some(stale) = old_layer {
            if self.owner.layers.contains(stale) {
                self.owner.layers.dispose(stale);
            }
        }
    }
}
