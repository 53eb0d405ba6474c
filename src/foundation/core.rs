use crate::foundation::error::{SortlastError, SortlastResult};

/// Integer pixel rectangle `(x, y, width, height)` in global display space.
///
/// An empty rectangle has zero width or height; its origin is meaningless.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Viewport {
    /// Left edge.
    pub x: i32,
    /// Bottom edge.
    pub y: i32,
    /// Width in pixels.
    pub width: i32,
    /// Height in pixels.
    pub height: i32,
}

impl Viewport {
    /// Build a viewport from its four components.
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The empty viewport at the origin.
    pub const fn empty() -> Self {
        Self::new(0, 0, 0, 0)
    }

    /// True when the viewport covers no pixels.
    pub fn is_empty(self) -> bool {
        self.width < 1 || self.height < 1
    }

    /// Number of pixels covered (zero for empty or negative extents).
    pub fn num_pixels(self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.width as usize * self.height as usize
        }
    }

    /// Exclusive right edge.
    pub fn right(self) -> i32 {
        self.x + self.width
    }

    /// Exclusive top edge.
    pub fn top(self) -> i32 {
        self.y + self.height
    }

    /// Intersection of two viewports, or [`Viewport::empty`] if they do not overlap.
    pub fn intersect(self, other: Viewport) -> Viewport {
        let min_x = self.x.max(other.x);
        let min_y = self.y.max(other.y);
        let max_x = self.right().min(other.right());
        let max_y = self.top().min(other.top());
        if max_x - min_x > 0 && max_y - min_y > 0 {
            Viewport::new(min_x, min_y, max_x - min_x, max_y - min_y)
        } else {
            Viewport::empty()
        }
    }

    /// Smallest viewport covering both. An empty operand is ignored.
    pub fn union(self, other: Viewport) -> Viewport {
        if self.is_empty() {
            return other;
        }
        if other.is_empty() {
            return self;
        }
        let min_x = self.x.min(other.x);
        let min_y = self.y.min(other.y);
        let max_x = self.right().max(other.right());
        let max_y = self.top().max(other.top());
        Viewport::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    /// True when `other` lies completely inside `self`.
    pub fn contains(self, other: Viewport) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.top() <= self.top()
    }

    /// Same rectangle shifted by `(-dx, -dy)`.
    pub fn relative_to(self, dx: i32, dy: i32) -> Viewport {
        Viewport::new(self.x - dx, self.y - dy, self.width, self.height)
    }
}

/// Straight float RGBA color, each channel in `[0, 1]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Rgba(pub [f32; 4]);

impl Rgba {
    /// Fully transparent black.
    pub const TRANSPARENT: Rgba = Rgba([0.0, 0.0, 0.0, 0.0]);

    /// Build a color from four channels.
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self([r, g, b, a])
    }

    /// 8-bit encoding used by byte color buffers (truncating, like `255*c`).
    pub fn to_rgba8(self) -> [u8; 4] {
        self.0.map(|c| (255.0 * c.clamp(0.0, 1.0)) as u8)
    }

    /// True if every channel encodes to zero in 8 bits.
    pub fn is_zero_word(self) -> bool {
        self.to_rgba8() == [0, 0, 0, 0]
    }
}

/// Column-major 4x4 matrix as used by the projection math.
pub type Matrix4 = [f64; 16];

/// Projection and modelview handed to a renderer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderMatrices {
    /// Projection already adjusted for the region being rendered.
    pub projection: Matrix4,
    /// Modelview as supplied by the application.
    pub modelview: Matrix4,
}

/// Checked `usize` to `u32` conversion for wire headers.
pub(crate) fn to_u32(v: usize, what: &str) -> SortlastResult<u32> {
    u32::try_from(v).map_err(|_| SortlastError::bad_cast(format!("{what} overflows u32: {v}")))
}

/// Checked `i32` to `usize` conversion for sizes that must be non-negative.
pub(crate) fn to_usize(v: i32, what: &str) -> SortlastResult<usize> {
    usize::try_from(v).map_err(|_| SortlastError::invalid_value(format!("{what} is negative: {v}")))
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
