//! Basic geometric types shared across layout, painting and compositing.

use std::ops::{Add, Neg, Sub};

/// A 2D translation, or a point expressed as its offset from an origin.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Offset {
    pub dx: f32,
    pub dy: f32,
}

impl Offset {
    pub const ZERO: Offset = Offset { dx: 0.0, dy: 0.0 };

    pub fn new(dx: f32, dy: f32) -> Self {
        Self { dx, dy }
    }
}

impl Add for Offset {
    type Output = Offset;

    fn add(self, other: Offset) -> Offset {
        Offset::new(self.dx + other.dx, self.dy + other.dy)
    }
}

impl Sub for Offset {
    type Output = Offset;

    fn sub(self, other: Offset) -> Offset {
        Offset::new(self.dx - other.dx, self.dy - other.dy)
    }
}

impl Neg for Offset {
    type Output = Offset;

    fn neg(self) -> Offset {
        Offset::new(-self.dx, -self.dy)
    }
}

/// Width and height.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub const ZERO: Size = Size {
        width: 0.0,
        height: 0.0,
    };

    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// An axis-aligned rectangle in left/top/right/bottom form.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Rect {
    pub const ZERO: Rect = Rect {
        left: 0.0,
        top: 0.0,
        right: 0.0,
        bottom: 0.0,
    };

    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn from_offset_size(offset: Offset, size: Size) -> Self {
        Self {
            left: offset.dx,
            top: offset.dy,
            right: offset.dx + size.width,
            bottom: offset.dy + size.height,
        }
    }

    pub fn size(&self) -> Size {
        Size::new(self.right - self.left, self.bottom - self.top)
    }

    pub fn shift(&self, offset: Offset) -> Rect {
        Rect::new(
            self.left + offset.dx,
            self.top + offset.dy,
            self.right + offset.dx,
            self.bottom + offset.dy,
        )
    }
}

/// A rectangle with uniformly rounded corners.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RRect {
    pub rect: Rect,
    pub corner_radius: f32,
}

impl RRect {
    pub fn new(rect: Rect, corner_radius: f32) -> Self {
        Self {
            rect,
            corner_radius,
        }
    }

    pub fn shift(&self, offset: Offset) -> RRect {
        RRect {
            rect: self.rect.shift(offset),
            corner_radius: self.corner_radius,
        }
    }
}

/// Immutable min/max bounds handed down during layout.
///
/// A parent constrains, a child sizes itself within the bounds, and the size
/// flows back up. Tight constraints (min equals max on both axes) leave the
/// child no choice, which is what makes them a relayout firewall.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Constraints {
    pub min_width: f32,
    pub max_width: f32,
    pub min_height: f32,
    pub max_height: f32,
}

impl Constraints {
    /// Constraints admitting exactly one size.
    pub fn tight(size: Size) -> Self {
        Self {
            min_width: size.width,
            max_width: size.width,
            min_height: size.height,
            max_height: size.height,
        }
    }

    /// Constraints admitting anything from zero up to `size`.
    pub fn loose(size: Size) -> Self {
        Self {
            min_width: 0.0,
            max_width: size.width,
            min_height: 0.0,
            max_height: size.height,
        }
    }

    /// No bounds at all.
    pub fn unbounded() -> Self {
        Self {
            min_width: 0.0,
            max_width: f32::INFINITY,
            min_height: 0.0,
            max_height: f32::INFINITY,
        }
    }

    /// Clamp `size` into these bounds.
    pub fn constrain(&self, size: Size) -> Size {
        Size::new(
            size.width.clamp(self.min_width, self.max_width),
            size.height.clamp(self.min_height, self.max_height),
        )
    }

    pub fn smallest(&self) -> Size {
        Size::new(self.min_width, self.min_height)
    }

    pub fn max_size(&self) -> Size {
        Size::new(self.max_width, self.max_height)
    }

    pub fn is_tight(&self) -> bool {
        self.min_width == self.max_width && self.min_height == self.max_height
    }

    /// Bounds are ordered and non-negative.
    pub fn is_normalized(&self) -> bool {
        0.0 <= self.min_width
            && self.min_width <= self.max_width
            && 0.0 <= self.min_height
            && self.min_height <= self.max_height
    }
}

impl Default for Constraints {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// An RGBA color with 8-bit channels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_shift_and_size() {
        let rect = Rect::from_offset_size(Offset::new(1.0, 2.0), Size::new(3.0, 4.0));
        assert_eq!(rect, Rect::new(1.0, 2.0, 4.0, 6.0));
        assert_eq!(rect.size(), Size::new(3.0, 4.0));
        assert_eq!(rect.shift(Offset::new(1.0, 1.0)), Rect::new(2.0, 3.0, 5.0, 7.0));
    }

    #[test]
    fn test_constraints_tight_and_loose() {
        let size = Size::new(10.0, 20.0);
        assert!(Constraints::tight(size).is_tight());
        assert!(!Constraints::loose(size).is_tight());
        assert!(Constraints::unbounded().is_normalized());
        assert_eq!(Constraints::tight(size).smallest(), size);
        assert_eq!(Constraints::loose(size).smallest(), Size::ZERO);
    }

    #[test]
    fn test_constrain_clamps() {
        let constraints = Constraints::loose(Size::new(10.0, 10.0));
        assert_eq!(
            constraints.constrain(Size::new(50.0, 5.0)),
            Size::new(10.0, 5.0)
        );
        let tight = Constraints::tight(Size::new(4.0, 4.0));
        assert_eq!(tight.constrain(Size::ZERO), Size::new(4.0, 4.0));
    }

    #[test]
    fn test_offset_arithmetic() {
        let a = Offset::new(1.0, 2.0);
        let b = Offset::new(3.0, 4.0);
        assert_eq!(a + b, Offset::new(4.0, 6.0));
        assert_eq!(b - a, Offset::new(2.0, 2.0));
        assert_eq!(-a, Offset::new(-1.0, -2.0));
    }
}
