//! Size resolution: container geometry → ratio bucket + quantized pixel size.
//!
//! Everything here is a pure function of its inputs and the bucket table.
//! Two identical calls always return the identical [`ResolvedVariant`],
//! which is what lets a slot compare descriptors instead of URLs to
//! suppress duplicate requests.
//!
//! ## Pipeline
//!
//! ```text
//! container (w, h)
//!   │ select_bucket      closest crop aspect, first-declared wins ties
//!   ▼
//! governing extent       crop-corrected scale-to-fill on the bucket's axis
//!   │ × device pixel ratio
//!   ▼
//! snap to step           min + k·(step·dpr), nearest or ceiling
//!   │ interpolation curve
//!   ▼
//! clamp + round to 10    always inside [min, max]
//! ```
//!
//! Rounding to a multiple of ten collapses near-identical requests onto a
//! single URL so the browser and any CDN in front of the image styles can
//! reuse them.

use crate::config::{BucketConfig, ConfigError, SiteConfig};
use crate::geometry::Size;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Tolerance for float noise when snapping with the ceiling policy.
const SNAP_EPSILON: f64 = 1e-9;

/// Final sizes are multiples of this (when the bounds allow it).
const SIZE_GRANULARITY: f64 = 10.0;

/// Shape applied to a bucket's normalized size range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    #[default]
    #[serde(alias = "identity")]
    Linear,
    Quadratic,
    Cubic,
}

impl Interpolation {
    /// Map `t ∈ [0, 1]` onto `[0, 1]`, monotonically.
    pub fn apply(self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Interpolation::Linear => t,
            Interpolation::Quadratic => t * t,
            Interpolation::Cubic => t * t * t,
        }
    }
}

/// Which container dimension drives quantization for a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    Width,
    Height,
}

impl Axis {
    /// Landscape crops are sized by width, everything else by height.
    pub fn for_crop(crop: Option<CropRect>) -> Axis {
        match crop {
            Some(c) if c.width > c.height => Axis::Width,
            _ => Axis::Height,
        }
    }

    fn pick(self, width: f64, height: f64) -> f64 {
        match self {
            Axis::Width => width,
            Axis::Height => height,
        }
    }
}

/// The crop rectangle a bucket's image style produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    pub fn ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

/// One named aspect-ratio configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RatioBucket {
    pub id: String,
    pub crop: Option<CropRect>,
    /// Inclusive lower bound of the resolved size, in device pixels.
    pub min: u32,
    /// Inclusive upper bound of the resolved size, in device pixels.
    pub max: u32,
    pub interpolation: Interpolation,
    pub axis: Axis,
}

/// An ordered, non-empty set of buckets.
///
/// Non-emptiness is checked on construction, so [`select`](Self::select)
/// can always return a bucket: the first one declared is the fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketTable {
    buckets: Vec<RatioBucket>,
}

impl BucketTable {
    /// Build a table, rejecting empty tables, blank or duplicate ids,
    /// zero crop components and inverted bounds.
    pub fn new(buckets: Vec<RatioBucket>) -> Result<Self, ConfigError> {
        if buckets.is_empty() {
            return Err(ConfigError::Validation(
                "buckets must declare at least one bucket".into(),
            ));
        }
        let mut seen = HashSet::new();
        for bucket in &buckets {
            if bucket.id.trim().is_empty() {
                return Err(ConfigError::Validation("buckets.id must not be empty".into()));
            }
            if !seen.insert(bucket.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "buckets.id '{}' is declared twice",
                    bucket.id
                )));
            }
            if let Some(crop) = bucket.crop
                && (crop.width == 0 || crop.height == 0)
            {
                return Err(ConfigError::Validation(format!(
                    "buckets '{}': crop values must be non-zero",
                    bucket.id
                )));
            }
            if bucket.min > bucket.max {
                return Err(ConfigError::Validation(format!(
                    "buckets '{}': min ({}) must not exceed max ({})",
                    bucket.id, bucket.min, bucket.max
                )));
            }
        }
        Ok(Self { buckets })
    }

    pub fn from_config(buckets: &[BucketConfig]) -> Result<Self, ConfigError> {
        Self::new(
            buckets
                .iter()
                .map(|b| {
                    let crop = b.crop.map(|[width, height]| CropRect { width, height });
                    RatioBucket {
                        id: b.id.clone(),
                        crop,
                        min: b.min,
                        max: b.max,
                        interpolation: b.interpolation,
                        axis: b.axis.unwrap_or_else(|| Axis::for_crop(crop)),
                    }
                })
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = &RatioBucket> {
        self.buckets.iter()
    }

    pub fn get(&self, id: &str) -> Option<&RatioBucket> {
        self.buckets.iter().find(|b| b.id == id)
    }

    /// Pick the bucket whose crop aspect is closest to `width / height`.
    ///
    /// The first declared bucket is the fallback. Only buckets with a crop
    /// compete; a strictly smaller delta is needed to replace the current
    /// winner, so ties go to the earlier declaration.
    pub fn select(&self, width: f64, height: f64) -> &RatioBucket {
        let source_ratio = Size::new(width, height).aspect_ratio();
        let mut best = &self.buckets[0];
        let mut best_delta = f64::INFINITY;

        for bucket in &self.buckets {
            if let Some(crop) = bucket.crop {
                let delta = (source_ratio - crop.ratio()).abs();
                if delta < best_delta {
                    best = bucket;
                    best_delta = delta;
                }
            }
        }
        best
    }
}

/// Device pixel ratio used to scale requested sizes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DevicePixelRatio(f64);

impl DevicePixelRatio {
    pub const ONE: DevicePixelRatio = DevicePixelRatio(1.0);

    /// Use the raw ratio as reported. Non-finite or non-positive values
    /// fall back to 1.
    pub fn exact(raw: f64) -> Self {
        if raw.is_finite() && raw > 0.0 {
            Self(raw)
        } else {
            Self::ONE
        }
    }

    /// Collapse to two classes: `>= 1.5` is treated as 2x, anything else
    /// as 1x.
    pub fn snapped(raw: f64) -> Self {
        if raw >= 1.5 { Self(2.0) } else { Self::ONE }
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl Default for DevicePixelRatio {
    fn default() -> Self {
        Self::ONE
    }
}

/// How the raw size is snapped onto the step grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    Nearest,
    /// Never snap below the raw size.
    Ceiling,
}

impl Rounding {
    fn apply(self, value: f64) -> f64 {
        match self {
            Rounding::Nearest => value.round(),
            Rounding::Ceiling => (value - SNAP_EPSILON).ceil(),
        }
    }
}

/// The structured result of resolving a container: which bucket, what size.
///
/// Two resolutions are "the same request" exactly when these compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedVariant {
    pub bucket: String,
    pub size: u32,
}

/// Snap `raw` onto `[min, max]` along `min + k·step`, reshape with `curve`,
/// and round to a multiple of ten without leaving the bounds.
pub fn quantize(
    raw: f64,
    min: u32,
    max: u32,
    step: f64,
    rounding: Rounding,
    curve: Interpolation,
) -> u32 {
    if min >= max {
        return min;
    }
    let (lo, hi) = (min as f64, max as f64);
    let range = hi - lo;

    let snapped = if step > 0.0 {
        rounding.apply((raw - lo) / step) * step + lo
    } else {
        raw
    };
    let snapped = if snapped.is_nan() {
        lo
    } else {
        snapped.clamp(lo, hi)
    };

    let shaped = lo + curve.apply((snapped - lo) / range) * range;
    let rounded = rounding.apply(shaped / SIZE_GRANULARITY) * SIZE_GRANULARITY;
    rounded.clamp(lo, hi).round() as u32
}

/// Resolves container sizes against one bucket table.
#[derive(Debug, Clone, PartialEq)]
pub struct SizeResolver {
    table: BucketTable,
    step: u32,
    allow_upscaling: bool,
}

impl SizeResolver {
    pub fn new(table: BucketTable, step: u32, allow_upscaling: bool) -> Self {
        Self {
            table,
            step,
            allow_upscaling,
        }
    }

    pub fn from_config(config: &SiteConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            BucketTable::from_config(&config.buckets)?,
            config.resolver.step,
            config.resolver.allow_upscaling,
        ))
    }

    pub fn table(&self) -> &BucketTable {
        &self.table
    }

    pub fn rounding(&self) -> Rounding {
        if self.allow_upscaling {
            Rounding::Nearest
        } else {
            Rounding::Ceiling
        }
    }

    pub fn select_bucket(&self, container: Size) -> &RatioBucket {
        self.table.select(container.width, container.height)
    }

    /// The quantized size to request for `container` under `bucket`.
    ///
    /// With a crop, the container is first scaled to fill the crop
    /// rectangle, so the governing extent reflects the pixels the cropped
    /// image must actually cover.
    pub fn resolve_target_size(
        &self,
        bucket: &RatioBucket,
        container: Size,
        dpr: DevicePixelRatio,
    ) -> u32 {
        let governing = match bucket.crop {
            Some(crop) => {
                let (cw, ch) = (crop.width as f64, crop.height as f64);
                let scale = (container.width / cw).max(container.height / ch);
                (scale * bucket.axis.pick(cw, ch)).round()
            }
            None => bucket.axis.pick(container.width, container.height),
        };
        let dpr = dpr.value();

        quantize(
            governing * dpr,
            bucket.min,
            bucket.max,
            self.step as f64 * dpr,
            self.rounding(),
            bucket.interpolation,
        )
    }

    /// Select a bucket and resolve its size. `None` while the container is
    /// not measurable.
    pub fn resolve(&self, container: Size, dpr: DevicePixelRatio) -> Option<ResolvedVariant> {
        if !container.is_measurable() {
            return None;
        }
        let bucket = self.select_bucket(container);
        Some(ResolvedVariant {
            bucket: bucket.id.clone(),
            size: self.resolve_target_size(bucket, container, dpr),
        })
    }
}
