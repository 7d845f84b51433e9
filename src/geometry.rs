//! Plain geometry values shared by the tracker, the resolver and the slots.
//!
//! All coordinates are document-relative CSS pixels as reported by the
//! host's geometry provider. Nothing here talks to a layout engine.

use serde::{Deserialize, Serialize};

/// Width and height of a container or image, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// A container can be resolved against once it has a positive width.
    ///
    /// Height may legitimately be zero (collapsed block); the resolver
    /// treats that as a square source instead of dividing by it.
    pub fn is_measurable(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height >= 0.0
    }

    /// `width / height`, or `1.0` when height is zero.
    pub fn aspect_ratio(&self) -> f64 {
        if self.height != 0.0 {
            self.width / self.height
        } else {
            1.0
        }
    }
}

/// An axis-aligned box: document offset plus extent.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Grow the rectangle by `dx` on the left and right and `dy` on the
    /// top and bottom.
    pub fn expand(&self, dx: f64, dy: f64) -> Rect {
        Rect {
            left: self.left - dx,
            top: self.top - dy,
            width: self.width + 2.0 * dx,
            height: self.height + 2.0 * dy,
        }
    }

    /// Whether `self` overlaps `zone`.
    ///
    /// The element is outside only when it lies strictly beyond one of the
    /// zone's edges; a shared edge counts as overlap.
    pub fn overlaps(&self, zone: &Rect) -> bool {
        !(self.left > zone.right()
            || self.top > zone.bottom()
            || self.right() < zone.left
            || self.bottom() < zone.top)
    }
}

/// The scrollable viewport: scroll offset plus visible extent.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Viewport {
    pub scroll_left: f64,
    pub scroll_top: f64,
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(scroll_left: f64, scroll_top: f64, width: f64, height: f64) -> Self {
        Self {
            scroll_left,
            scroll_top,
            width,
            height,
        }
    }

    /// A zero or non-finite extent means layout has not happened yet.
    pub fn is_measurable(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }

    /// The strictly visible rectangle.
    pub fn strict_zone(&self) -> Rect {
        Rect::new(self.scroll_left, self.scroll_top, self.width, self.height)
    }

    /// The preload rectangle: the strict zone grown by `threshold - 1`
    /// viewport widths/heights on each side.
    pub fn extended_zone(&self, threshold: f64) -> Rect {
        let factor = threshold - 1.0;
        self.strict_zone()
            .expand(factor * self.width, factor * self.height)
    }
}
