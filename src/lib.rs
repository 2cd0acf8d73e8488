//! A retained-mode rendering pipeline.
//!
//! Render objects form a tree; layout flows constraints down and sizes up,
//! painting records pictures into a retained layer tree, and each frame the
//! layer tree is flattened into an immutable scene for a graphics backend.
//! Work between frames is incremental: dirtiness is tracked per node and
//! stops at relayout and repaint boundaries, and clean layer subtrees are
//! re-added to the scene by reference instead of being rebuilt.
//!
//! [`View`](view::View) is the entry point: give it a
//! [`GraphicsBackend`](backend::GraphicsBackend), hang render objects under
//! its root, and call `draw_frame`.

pub mod backend;
pub mod error;
pub mod geometry;
pub mod layer;
pub mod object;
pub mod paint;
pub mod pipeline;
pub mod transform;
pub mod tree;
pub mod view;

pub mod prelude {
    pub use crate::backend::{Canvas, GraphicsBackend, Paint, Scene};
    pub use crate::error::{FrameReport, NodeError};
    pub use crate::geometry::{Color, Constraints, Offset, RRect, Rect, Size};
    pub use crate::layer::{LayerId, LayerKind, LayerTree};
    pub use crate::object::{LayoutCx, NodeFlags, Render};
    pub use crate::paint::PaintingContext;
    pub use crate::pipeline::PipelineOwner;
    pub use crate::transform::Transform;
    pub use crate::tree::NodeId;
    pub use crate::view::{RenderView, View, ViewConfiguration};
}
