//! End-to-end frame tests over the recording backend: a small tree of render
//! objects is driven through layout, compositing, paint and scene assembly,
//! and the emitted scene operations are checked frame by frame.

use std::cell::Cell;
use std::rc::Rc;

use strata::backend::recording::{RecordedScene, RecordingBackend, SceneOp};
use strata::prelude::*;

/// Container that stacks its children at fixed offsets and fills its
/// constraints.
struct Stack {
    children: Vec<(NodeId, Offset)>,
}

impl Render for Stack {
    fn perform_layout(
        &mut self,
        cx: &mut LayoutCx<'_>,
        constraints: &Constraints,
    ) -> Result<Size, NodeError> {
        for &(child, offset) in &self.children {
            cx.layout_child(child, Constraints::loose(constraints.max_size()), false)?;
            cx.position_child(child, offset);
        }
        Ok(constraints.max_size())
    }

    fn paint(&mut self, cx: &mut PaintingContext<'_>, offset: Offset) -> Result<(), NodeError> {
        for &(child, child_offset) in &self.children {
            cx.paint_child(child, offset + child_offset)?;
        }
        Ok(())
    }
}

/// Leaf drawing one colored rect, with a paint counter and a mutable color.
struct Swatch {
    color: Rc<Cell<Color>>,
    size: Size,
    paints: Rc<Cell<u32>>,
}

impl Swatch {
    fn new(color: Color) -> (Self, Rc<Cell<Color>>, Rc<Cell<u32>>) {
        let color = Rc::new(Cell::new(color));
        let paints = Rc::new(Cell::new(0));
        (
            Self {
                color: color.clone(),
                size: Size::new(10.0, 10.0),
                paints: paints.clone(),
            },
            color,
            paints,
        )
    }
}

impl Render for Swatch {
    fn perform_layout(
        &mut self,
        _cx: &mut LayoutCx<'_>,
        constraints: &Constraints,
    ) -> Result<Size, NodeError> {
        Ok(constraints.constrain(self.size))
    }

    fn paint(&mut self, cx: &mut PaintingContext<'_>, offset: Offset) -> Result<(), NodeError> {
        self.paints.set(self.paints.get() + 1);
        let rect = Rect::from_offset_size(offset, self.size);
        cx.canvas().draw_rect(rect, &Paint::fill(self.color.get()));
        Ok(())
    }
}

fn test_view() -> View {
    let _ = env_logger::builder().is_test(true).try_init();
    View::new(
        Box::new(RecordingBackend::new()),
        ViewConfiguration {
            size: Size::new(100.0, 100.0),
            device_pixel_ratio: 2.0,
        },
    )
}

/// Root -> Stack -> two boundary swatches.
fn boundary_pair(view: &View) -> (NodeId, Rc<Cell<u32>>, Rc<Cell<u32>>, Rc<Cell<Color>>) {
    let owner = view.owner();
    let (left, left_color, left_paints) = Swatch::new(Color::BLACK);
    let (right, _, right_paints) = Swatch::new(Color::WHITE);
    let left = owner.register(Box::new(left), NodeFlags::REPAINT_BOUNDARY);
    let right = owner.register(Box::new(right), NodeFlags::REPAINT_BOUNDARY);
    let stack = owner.register(
        Box::new(Stack {
            children: vec![(left, Offset::ZERO), (right, Offset::new(20.0, 0.0))],
        }),
        NodeFlags::empty(),
    );
    owner.adopt_child(stack, left);
    owner.adopt_child(stack, right);
    view.set_child(stack);
    (left, left_paints, right_paints, left_color)
}

#[test]
fn test_initial_frame_paints_everything_once() {
    let view = test_view();
    let (_, left_paints, right_paints, _) = boundary_pair(&view);
    view.prepare_initial_frame();

    let (scene, report) = view.draw_frame();
    assert!(!report.had_failures());
    assert_eq!(left_paints.get(), 1);
    assert_eq!(right_paints.get(), 1);

    let scene = RecordedScene::unwrap(scene);
    // Device-pixel-ratio transform wraps the whole scene.
    assert!(matches!(scene.ops.first(), Some(SceneOp::PushTransform { .. })));
    assert_eq!(scene.retained_count(), 0);
    // Two boundary swatches, each with its own picture.
    assert_eq!(scene.picture_count(), 2);
    assert_eq!(
        scene.count(|op| matches!(op, SceneOp::PushOffset { .. })),
        2
    );
}

#[test]
fn test_unchanged_frame_retains_boundary_layers() {
    let view = test_view();
    let (_, left_paints, right_paints, _) = boundary_pair(&view);
    view.prepare_initial_frame();
    let _ = view.draw_frame();

    // Nothing changed: nothing repaints, both subtrees come back retained.
    let (scene, report) = view.draw_frame();
    assert!(!report.had_failures());
    assert_eq!(left_paints.get(), 1);
    assert_eq!(right_paints.get(), 1);

    let scene = RecordedScene::unwrap(scene);
    assert_eq!(scene.retained_count(), 2);
    assert_eq!(scene.picture_count(), 0);
}

#[test]
fn test_leaf_mutation_repaints_only_its_boundary() {
    let view = test_view();
    let (left, left_paints, right_paints, left_color) = boundary_pair(&view);
    view.prepare_initial_frame();
    let _ = view.draw_frame();

    left_color.set(Color::rgb(255, 0, 0));
    view.owner().mark_needs_paint(left);

    let (scene, report) = view.draw_frame();
    assert!(!report.had_failures());
    assert_eq!(left_paints.get(), 2);
    assert_eq!(right_paints.get(), 1);

    let scene = RecordedScene::unwrap(scene);
    // The untouched sibling is retained; the mutated one is re-emitted.
    assert_eq!(scene.retained_count(), 1);
    assert_eq!(scene.picture_count(), 1);
}

#[test]
fn test_relayout_stays_at_leaf_boundary() {
    let view = test_view();
    let owner = view.owner();
    let (swatch, _, paints) = Swatch::new(Color::BLACK);
    let leaf = owner.register(Box::new(swatch), NodeFlags::empty());
    let stack = owner.register(
        Box::new(Stack {
            children: vec![(leaf, Offset::ZERO)],
        }),
        NodeFlags::empty(),
    );
    owner.adopt_child(stack, leaf);
    view.set_child(stack);
    view.prepare_initial_frame();
    let _ = view.draw_frame();
    assert_eq!(paints.get(), 1);

    // The leaf was laid out under loose constraints with
    // parent_uses_size = false, so it is its own relayout boundary: dirtying
    // it does not dirty the stack or the root.
    owner.mark_needs_layout(leaf);
    assert!(owner.needs_layout(leaf));
    assert!(!owner.needs_layout(stack));
    assert!(!owner.needs_layout(view.root()));

    let (_, report) = view.draw_frame();
    assert!(!report.had_failures());
    assert!(!owner.needs_layout(leaf));
    // Relayout marked the leaf for paint, which bubbled to the root layer.
    assert_eq!(paints.get(), 2);
}

#[test]
fn test_failed_paint_is_reported_and_retried() {
    struct Flaky {
        fail: Rc<Cell<bool>>,
    }
    impl Render for Flaky {
        fn perform_layout(
            &mut self,
            _cx: &mut LayoutCx<'_>,
            constraints: &Constraints,
        ) -> Result<Size, NodeError> {
            Ok(constraints.smallest())
        }
        fn paint(
            &mut self,
            _cx: &mut PaintingContext<'_>,
            _offset: Offset,
        ) -> Result<(), NodeError> {
            if self.fail.get() {
                Err("backend resource lost".into())
            } else {
                Ok(())
            }
        }
    }

    let view = test_view();
    let owner = view.owner();
    let fail = Rc::new(Cell::new(true));
    let flaky = owner.register(
        Box::new(Flaky { fail: fail.clone() }),
        NodeFlags::REPAINT_BOUNDARY,
    );
    view.set_child(flaky);
    view.prepare_initial_frame();

    let (_, report) = view.draw_frame();
    assert!(report.had_failures());
    assert_eq!(report.failures[0].node, flaky);
    assert!(owner.needs_paint(flaky));

    // The failure clears; the retried node paints on the next frame.
    fail.set(false);
    let (_, report) = view.draw_frame();
    assert!(!report.had_failures());
    assert!(!owner.needs_paint(flaky));
}

#[test]
fn test_resize_lays_out_and_repaints() {
    let mut view = test_view();
    let (_, left_paints, right_paints, _) = boundary_pair(&view);
    view.prepare_initial_frame();
    let _ = view.draw_frame();

    view.set_configuration(ViewConfiguration {
        size: Size::new(200.0, 50.0),
        device_pixel_ratio: 2.0,
    });
    let (scene, report) = view.draw_frame();
    assert!(!report.had_failures());
    // Loose constraints against the new surface still admit the swatch
    // size, but layout of a boundary always re-records its paint.
    assert_eq!(left_paints.get(), 2);
    assert_eq!(right_paints.get(), 2);
    let scene = RecordedScene::unwrap(scene);
    assert_eq!(scene.retained_count(), 0);
}
