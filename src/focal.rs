//! Focal-point cover geometry.
//!
//! A slot wrapped in a focal-point container is shown scale-to-cover: the
//! loaded image is scaled until it covers the container, then shifted so the
//! focal subject stays in frame instead of cropping from the top-left.
//!
//! The result is a [`GeometryUpdate`] value. Applying it to the page (inline
//! styles, a canvas transform, ...) is the rendering adapter's job.

use crate::geometry::Size;
use serde::{Deserialize, Serialize};

/// Location of the visually important region, in percent of the source
/// image (`0..=100` on both axes; `50, 50` is the center).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FocalPoint {
    pub x: f64,
    pub y: f64,
}

impl FocalPoint {
    pub const CENTER: FocalPoint = FocalPoint { x: 50.0, y: 50.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_valid(&self) -> bool {
        (0.0..=100.0).contains(&self.x) && (0.0..=100.0).contains(&self.y)
    }
}

/// Declared full-bleed dimensions of a slot, used to reserve space before
/// the first image arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullSize {
    pub width: u32,
    pub height: u32,
}

/// Position and size of a cover-scaled image relative to its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverGeometry {
    pub left: i64,
    pub top: i64,
    pub width: u32,
    pub height: u32,
}

/// What the rendering adapter should do with the image element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeometryUpdate {
    /// Position and size for a focal-point crop.
    Cover(CoverGeometry),
    /// Aspect-locked size reserved before the first load.
    Placeholder { width: u32, height: u32 },
    /// Drop any explicit size and let natural layout take over.
    ClearSize,
    /// Nothing to apply.
    Unchanged,
}

/// Scale `image` to cover `container` and offset it towards `focal`.
///
/// `None` when the image has no area.
pub fn cover_geometry(container: Size, image: Size, focal: FocalPoint) -> Option<CoverGeometry> {
    if image.width <= 0.0 || image.height <= 0.0 {
        return None;
    }
    let scale = (container.width / image.width).max(container.height / image.height);
    let width = (scale * image.width).ceil();
    let height = (scale * image.height).ceil();

    Some(CoverGeometry {
        left: round_half_up((container.width - width) * focal.x / 100.0) as i64,
        top: round_half_up((container.height - height) * focal.y / 100.0) as i64,
        width: width as u32,
        height: height as u32,
    })
}

/// Round to nearest with halves going towards positive infinity, so a
/// `-0.5` offset lands on `0` rather than `-1`.
fn round_half_up(value: f64) -> f64 {
    (value + 0.5).floor()
}

/// Reserve the declared aspect ratio at the container's width, never wider
/// than the declared full width.
pub fn placeholder_geometry(container_width: f64, full: FullSize) -> GeometryUpdate {
    let aspect = full.height as f64 / full.width as f64;
    let width = container_width.min(full.width as f64);
    GeometryUpdate::Placeholder {
        width: width.round() as u32,
        height: (width * aspect).round() as u32,
    }
}

/// Inputs for [`plan_geometry`], gathered from a slot's state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryInputs {
    pub container: Option<Size>,
    pub loaded_image: Option<Size>,
    pub focal_point: Option<FocalPoint>,
    pub full_size: Option<FullSize>,
    pub first_load: bool,
}

/// Decide the geometry for a slot.
///
/// - unknown container: nothing to do
/// - no focal wrapper, or no image yet: full-bleed slots get a placeholder
///   on the first load and a cleared size afterwards
/// - otherwise: focal-point cover
pub fn plan_geometry(inputs: GeometryInputs) -> GeometryUpdate {
    let Some(container) = inputs.container else {
        return GeometryUpdate::Unchanged;
    };

    match (inputs.focal_point, inputs.loaded_image) {
        (Some(focal), Some(image)) => cover_geometry(container, image, focal)
            .map(GeometryUpdate::Cover)
            .unwrap_or(GeometryUpdate::Unchanged),
        _ => match inputs.full_size {
            Some(full) if inputs.first_load => placeholder_geometry(container.width, full),
            Some(_) => GeometryUpdate::ClearSize,
            None => GeometryUpdate::Unchanged,
        },
    }
}
