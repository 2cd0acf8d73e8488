//! Headless backend that records every operation it is handed.
//!
//! Useful on its own for golden-file style testing of paint output, and used
//! throughout this crate's tests to verify the retained-rendering properties:
//! every scene op, including [`SceneOp::AddRetained`], ends up in the built
//! [`RecordedScene`] in submission order.

use std::cell::Cell;
use std::rc::Rc;

use log::trace;

use crate::geometry::{Offset, Rect, RRect};
use crate::transform::Transform;

use super::{
    Canvas, EngineLayer, GraphicsBackend, Paint, Path, Picture, PictureRecorder, Scene,
    SceneBuilder,
};

/// One draw command captured by a [`RecordingCanvas`].
#[derive(Debug, Clone, PartialEq)]
pub enum CanvasOp {
    Save,
    Restore,
    Translate { dx: f32, dy: f32 },
    Transform(Transform),
    ClipRect(Rect),
    ClipRRect(RRect),
    ClipPath,
    DrawRect { rect: Rect, paint: Paint },
    DrawRRect { rrect: RRect, paint: Paint },
}

/// The concrete picture type produced by [`RecordingBackend`].
#[derive(Debug)]
pub struct RecordedPicture {
    pub bounds: Rect,
    pub ops: Vec<CanvasOp>,
}

impl RecordedPicture {
    /// Unwrap an opaque [`Picture`] produced by this backend.
    pub fn unwrap(picture: &Picture) -> Rc<RecordedPicture> {
        picture
            .0
            .clone()
            .downcast::<RecordedPicture>()
            .expect("picture was not produced by the recording backend")
    }
}

/// One scene operation captured by a [`RecordingSceneBuilder`].
#[derive(Debug, Clone, PartialEq)]
pub enum SceneOp {
    PushOffset { dx: f32, dy: f32, engine: u64 },
    PushClipRect { rect: Rect, engine: u64 },
    PushClipRRect { rrect: RRect, engine: u64 },
    PushClipPath { engine: u64 },
    PushOpacity { alpha: u8, offset: Offset, engine: u64 },
    PushTransform { transform: Transform, engine: u64 },
    Pop,
    AddPicture { offset: Offset, op_count: usize },
    AddRetained { engine: u64 },
}

/// The concrete scene type produced by [`RecordingBackend`].
#[derive(Debug)]
pub struct RecordedScene {
    pub ops: Vec<SceneOp>,
}

impl RecordedScene {
    /// Unwrap an opaque [`Scene`] produced by this backend.
    pub fn unwrap(scene: Scene) -> Box<RecordedScene> {
        scene
            .downcast::<RecordedScene>()
            .expect("scene was not produced by the recording backend")
    }

    pub fn count(&self, pred: impl Fn(&SceneOp) -> bool) -> usize {
        self.ops.iter().filter(|op| pred(op)).count()
    }

    pub fn retained_count(&self) -> usize {
        self.count(|op| matches!(op, SceneOp::AddRetained { .. }))
    }

    pub fn picture_count(&self) -> usize {
        self.count(|op| matches!(op, SceneOp::AddPicture { .. }))
    }
}

struct RecordedEngineLayer {
    id: u64,
}

/// Headless [`GraphicsBackend`] implementation.
#[derive(Default)]
pub struct RecordingBackend {
    next_engine_id: Rc<Cell<u64>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn engine_id(layer: &EngineLayer) -> u64 {
    layer
        .0
        .downcast_ref::<RecordedEngineLayer>()
        .expect("engine layer was not produced by the recording backend")
        .id
}

impl GraphicsBackend for RecordingBackend {
    fn new_recorder(&self, bounds: Rect) -> Box<dyn PictureRecorder> {
        Box::new(RecordingPictureRecorder {
            bounds,
            ops: Vec::new(),
        })
    }

    fn new_scene_builder(&self) -> Box<dyn SceneBuilder> {
        Box::new(RecordingSceneBuilder {
            ops: Vec::new(),
            depth: 0,
            next_engine_id: self.next_engine_id.clone(),
        })
    }
}

struct RecordingPictureRecorder {
    bounds: Rect,
    ops: Vec<CanvasOp>,
}

impl PictureRecorder for RecordingPictureRecorder {
    fn canvas(&mut self) -> &mut dyn Canvas {
        self
    }

    fn end_recording(self: Box<Self>) -> Picture {
        trace!("picture recording ended with {} ops", self.ops.len());
        Picture(Rc::new(RecordedPicture {
            bounds: self.bounds,
            ops: self.ops,
        }))
    }
}

impl Canvas for RecordingPictureRecorder {
    fn save(&mut self) {
        self.ops.push(CanvasOp::Save);
    }

    fn restore(&mut self) {
        self.ops.push(CanvasOp::Restore);
    }

    fn translate(&mut self, dx: f32, dy: f32) {
        self.ops.push(CanvasOp::Translate { dx, dy });
    }

    fn transform(&mut self, transform: &Transform) {
        self.ops.push(CanvasOp::Transform(*transform));
    }

    fn clip_rect(&mut self, rect: Rect) {
        self.ops.push(CanvasOp::ClipRect(rect));
    }

    fn clip_rrect(&mut self, rrect: &RRect) {
        self.ops.push(CanvasOp::ClipRRect(*rrect));
    }

    fn clip_path(&mut self, _path: &Path) {
        self.ops.push(CanvasOp::ClipPath);
    }

    fn draw_rect(&mut self, rect: Rect, paint: &Paint) {
        self.ops.push(CanvasOp::DrawRect { rect, paint: *paint });
    }

    fn draw_rrect(&mut self, rrect: &RRect, paint: &Paint) {
        self.ops.push(CanvasOp::DrawRRect {
            rrect: *rrect,
            paint: *paint,
        });
    }
}

struct RecordingSceneBuilder {
    ops: Vec<SceneOp>,
    depth: usize,
    next_engine_id: Rc<Cell<u64>>,
}

impl RecordingSceneBuilder {
    fn fresh_engine_layer(&self) -> EngineLayer {
        let id = self.next_engine_id.get();
        self.next_engine_id.set(id + 1);
        EngineLayer(Rc::new(RecordedEngineLayer { id }))
    }

    /// Reuse the previous handle when offered, otherwise mint a new one.
    fn engine_for(&self, old_layer: Option<&EngineLayer>) -> EngineLayer {
        match old_layer {
            Some(old) => old.clone(),
            None => self.fresh_engine_layer(),
        }
    }
}

impl SceneBuilder for RecordingSceneBuilder {
    fn push_offset(&mut self, dx: f32, dy: f32, old_layer: Option<&EngineLayer>) -> EngineLayer {
        let engine = self.engine_for(old_layer);
        self.ops.push(SceneOp::PushOffset {
            dx,
            dy,
            engine: engine_id(&engine),
        });
        self.depth += 1;
        engine
    }

    fn push_clip_rect(&mut self, rect: Rect, old_layer: Option<&EngineLayer>) -> EngineLayer {
        let engine = self.engine_for(old_layer);
        self.ops.push(SceneOp::PushClipRect {
            rect,
            engine: engine_id(&engine),
        });
        self.depth += 1;
        engine
    }

    fn push_clip_rrect(&mut self, rrect: &RRect, old_layer: Option<&EngineLayer>) -> EngineLayer {
        let engine = self.engine_for(old_layer);
        self.ops.push(SceneOp::PushClipRRect {
            rrect: *rrect,
            engine: engine_id(&engine),
        });
        self.depth += 1;
        engine
    }

    fn push_clip_path(&mut self, _path: &Path, old_layer: Option<&EngineLayer>) -> EngineLayer {
        let engine = self.engine_for(old_layer);
        self.ops.push(SceneOp::PushClipPath {
            engine: engine_id(&engine),
        });
        self.depth += 1;
        engine
    }

    fn push_opacity(
        &mut self,
        alpha: u8,
        offset: Offset,
        old_layer: Option<&EngineLayer>,
    ) -> EngineLayer {
        let engine = self.engine_for(old_layer);
        self.ops.push(SceneOp::PushOpacity {
            alpha,
            offset,
            engine: engine_id(&engine),
        });
        self.depth += 1;
        engine
    }

    fn push_transform(
        &mut self,
        transform: &Transform,
        old_layer: Option<&EngineLayer>,
    ) -> EngineLayer {
        let engine = self.engine_for(old_layer);
        self.ops.push(SceneOp::PushTransform {
            transform: *transform,
            engine: engine_id(&engine),
        });
        self.depth += 1;
        engine
    }

    fn pop(&mut self) {
        assert!(self.depth > 0, "unbalanced SceneBuilder::pop");
        self.depth -= 1;
        self.ops.push(SceneOp::Pop);
    }

    fn add_picture(&mut self, offset: Offset, picture: &Picture) {
        let recorded = RecordedPicture::unwrap(picture);
        self.ops.push(SceneOp::AddPicture {
            offset,
            op_count: recorded.ops.len(),
        });
    }

    fn add_retained(&mut self, layer: &EngineLayer) {
        self.ops.push(SceneOp::AddRetained {
            engine: engine_id(layer),
        });
    }

    fn build(self: Box<Self>) -> Scene {
        assert_eq!(self.depth, 0, "unbalanced pushes at SceneBuilder::build");
        trace!("scene built with {} ops", self.ops.len());
        Scene(Box::new(RecordedScene { ops: self.ops }))
    }
}
