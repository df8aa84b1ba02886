//! Viewport geometry for the zoom viewer.

use std::ops::{Add, Mul, Sub};

/// A point or displacement in viewport points.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    /// Horizontal, growing rightwards.
    pub x: f32,
    /// Vertical, growing downwards.
    pub y: f32,
}

impl Point {
    /// The origin.
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    /// Creates a point.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// True if neither coordinate is NaN or infinite.
    #[must_use]
    pub const fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Add for Point {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Point {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

/// A width and height in viewport points or pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Size {
    /// Horizontal extent.
    pub width: f32,
    /// Vertical extent.
    pub height: f32,
}

impl Size {
    /// Empty size; never valid.
    pub const ZERO: Self = Self {
        width: 0.0,
        height: 0.0,
    };

    /// Creates a size.
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// Size of an image in pixels.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn from_pixels(width: u32, height: u32) -> Self {
        Self::new(width as f32, height as f32)
    }

    /// True if both sides are finite and positive.
    #[must_use]
    pub fn is_valid(self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }

    /// Midpoint of a box with this size at the origin.
    #[must_use]
    pub fn center(self) -> Point {
        Point::new(self.width / 2.0, self.height / 2.0)
    }

    /// Both sides multiplied by `factor`.
    #[must_use]
    pub fn scaled(self, factor: f32) -> Self {
        Self::new(self.width * factor, self.height * factor)
    }

    /// Largest size with this aspect ratio that fits inside `container`.
    ///
    /// Returns zero if either size is degenerate.
    #[must_use]
    pub fn aspect_fit(self, container: Self) -> Self {
        if !self.is_valid() || !container.is_valid() {
            return Self::ZERO;
        }
        let ratio = (container.width / self.width).min(container.height / self.height);
        self.scaled(ratio)
    }
}

/// Largest offset magnitude per axis that keeps the image covering the
/// viewport along every axis where it is larger than the viewport.
///
/// The offset is measured from the viewport center.
#[must_use]
pub fn pan_bounds(image: Size, viewport: Size, scale: f32) -> Point {
    let displayed = image.aspect_fit(viewport).scaled(scale);
    if !displayed.is_valid() {
        return Point::ZERO;
    }
    Point::new(
        ((displayed.width - viewport.width) / 2.0).max(0.0),
        ((displayed.height - viewport.height) / 2.0).max(0.0),
    )
}

/// Clamps `offset` into `[-bounds, bounds]` per axis.
#[must_use]
pub fn clamp_offset(offset: Point, bounds: Point) -> Point {
    Point::new(
        offset.x.clamp(-bounds.x, bounds.x),
        offset.y.clamp(-bounds.y, bounds.y),
    )
}
