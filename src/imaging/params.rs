//! Parameter types for image operations.
//!
//! - [`Quality`]: lossy encoding quality (1–100, default 85). Clamped on construction.
//! - [`Rect`]: a crop rectangle in pixels, with a containment check.

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(u8);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(85)
    }
}

/// A rectangle `(left, top, width, height)` in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(left: u32, top: u32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Build a rect from signed offsets, as produced by the position
    /// resolver. Negative offsets are `None`.
    pub fn from_offset(offset: (i32, i32), width: u32, height: u32) -> Option<Self> {
        let left = u32::try_from(offset.0).ok()?;
        let top = u32::try_from(offset.1).ok()?;
        Some(Self::new(left, top, width, height))
    }

    /// Does this rect lie entirely inside a `width`×`height` container?
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        let right = self.left.checked_add(self.width);
        let bottom = self.top.checked_add(self.height);
        matches!((right, bottom), (Some(r), Some(b)) if r <= width && b <= height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}
