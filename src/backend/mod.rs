//! The seam between the pipeline and a native graphics backend.
//!
//! The pipeline never draws anything itself: it records draw commands into
//! pictures via a [`Canvas`], and flattens the retained layer tree into an
//! immutable [`Scene`] via a [`SceneBuilder`]. Both are provided by a
//! [`GraphicsBackend`] implementation. Pictures, paths, engine layers and
//! scenes are opaque handles whose contents only the backend understands.
//!
//! The crate ships one headless implementation, [`recording`], which records
//! every operation for inspection; GPU backends live outside this crate.

pub mod recording;

use std::any::Any;
use std::rc::Rc;

use crate::geometry::{Color, Offset, Rect, RRect};
use crate::transform::Transform;

/// An immutable recording of draw commands, produced by a
/// [`PictureRecorder`] and owned by a picture layer.
#[derive(Clone)]
pub struct Picture(pub Rc<dyn Any>);

impl std::fmt::Debug for Picture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Picture")
    }
}

/// An opaque handle to a native compositor layer retained across frames.
///
/// Identity (not content) is what matters to the pipeline: a retained layer
/// is re-added to a scene by handle via [`SceneBuilder::add_retained`].
#[derive(Clone)]
pub struct EngineLayer(pub Rc<dyn Any>);

impl EngineLayer {
    /// Whether two handles refer to the same native layer.
    pub fn ptr_eq(&self, other: &EngineLayer) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for EngineLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EngineLayer")
    }
}

/// An opaque path handle used for clip-path effects.
#[derive(Clone)]
pub struct Path(pub Rc<dyn Any>);

impl std::fmt::Debug for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Path")
    }
}

/// The immutable, backend-consumable result of flattening the layer tree
/// for one frame.
pub struct Scene(pub Box<dyn Any>);

impl Scene {
    /// Downcast to the backend's concrete scene type.
    pub fn downcast<T: 'static>(self) -> Result<Box<T>, Scene> {
        self.0.downcast::<T>().map_err(Scene)
    }
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Scene")
    }
}

/// Fill style for draw commands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Paint {
    pub color: Color,
}

impl Paint {
    pub fn fill(color: Color) -> Self {
        Self { color }
    }
}

/// Immediate-mode drawing surface backing one picture recording.
pub trait Canvas {
    fn save(&mut self);
    fn restore(&mut self);
    fn translate(&mut self, dx: f32, dy: f32);
    fn transform(&mut self, transform: &Transform);
    fn clip_rect(&mut self, rect: Rect);
    fn clip_rrect(&mut self, rrect: &RRect);
    fn clip_path(&mut self, path: &Path);
    fn draw_rect(&mut self, rect: Rect, paint: &Paint);
    fn draw_rrect(&mut self, rrect: &RRect, paint: &Paint);
}

/// Records draw commands issued through its [`Canvas`] into a [`Picture`].
pub trait PictureRecorder {
    fn canvas(&mut self) -> &mut dyn Canvas;
    fn end_recording(self: Box<Self>) -> Picture;
}

/// Assembles one frame's scene from the retained layer tree.
///
/// Each push accepts the engine layer produced for the same effect last
/// frame; a backend may reuse it to retain native resources. Pushes nest and
/// must be balanced by [`pop`](SceneBuilder::pop).
pub trait SceneBuilder {
    fn push_offset(&mut self, dx: f32, dy: f32, old_layer: Option<&EngineLayer>) -> EngineLayer;
    fn push_clip_rect(&mut self, rect: Rect, old_layer: Option<&EngineLayer>) -> EngineLayer;
    fn push_clip_rrect(&mut self, rrect: &RRect, old_layer: Option<&EngineLayer>) -> EngineLayer;
    fn push_clip_path(&mut self, path: &Path, old_layer: Option<&EngineLayer>) -> EngineLayer;
    fn push_opacity(
        &mut self,
        alpha: u8,
        offset: Offset,
        old_layer: Option<&EngineLayer>,
    ) -> EngineLayer;
    fn push_transform(
        &mut self,
        transform: &Transform,
        old_layer: Option<&EngineLayer>,
    ) -> EngineLayer;
    fn pop(&mut self);

    fn add_picture(&mut self, offset: Offset, picture: &Picture);

    /// Re-add a subtree from a previous frame by engine-layer handle,
    /// without walking it.
    fn add_retained(&mut self, layer: &EngineLayer);

    fn build(self: Box<Self>) -> Scene;
}

/// Factory for the per-frame objects the pipeline needs from the backend.
pub trait GraphicsBackend {
    /// Start a picture recording with an estimated culling bounds hint.
    fn new_recorder(&self, bounds: Rect) -> Box<dyn PictureRecorder>;
    fn new_scene_builder(&self) -> Box<dyn SceneBuilder>;
}
