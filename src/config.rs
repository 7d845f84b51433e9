//! Configuration module.
//!
//! Handles loading, validating, and merging `config.toml` files. Configuration
//! is layered: stock defaults are overridden by the site's `config.toml`, and
//! a slot may carry its own overlay on top of that (see [`crate::scenario`]).
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [viewport]
//! threshold = 2.0                # Extended zone = threshold × viewport
//! disable_on_constrained = true  # Pin every slot visible on constrained devices
//! constrained_device = false     # Host's constrained-profile detection result
//! disabled = false               # Treat every slot as visible
//!
//! [resolver]
//! step = 50                      # Size quantization step in CSS pixels
//! allow_upscaling = true         # false = never request fewer pixels than needed
//! snap_device_pixel_ratio = true # Collapse DPR to 1x / 2x
//!
//! [urls]
//! base_path = "/"
//! file_path = "sites/default/files"
//! style = "responsive"
//! type_tag = "crop"
//! scheme = "public://"
//!
//! [slot]
//! debounce_ms = 250              # Resize settle time before recomputing
//! forget_when_outside = false    # Release requests when leaving the preload zone
//! # focal_point = [50.0, 50.0]   # Percent; enables cover geometry
//! # full_size = [1600, 900]      # Reserve this aspect before the first load
//!
//! [[buckets]]
//! id = "ls"
//! crop = [16, 9]
//! min = 200
//! max = 2000
//! interpolation = "linear"       # linear | quadratic | cubic
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse. Tables merge key by key, but `[[buckets]]` is an
//! array and replaces the stock table as a whole:
//!
//! ```toml
//! [resolver]
//! step = 100
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::focal::FocalPoint;
use crate::resolver::{Axis, BucketTable, Interpolation};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Site configuration loaded from `config.toml`.
///
/// All fields have sensible defaults. User config files need only specify
/// the values they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    /// Zone tracking settings.
    pub viewport: ViewportConfig,
    /// Size quantization settings.
    pub resolver: ResolverConfig,
    /// Derived-image URL template.
    pub urls: UrlConfig,
    /// Per-slot behavior (debounce, focal point, full-bleed size).
    pub slot: SlotBehaviorConfig,
    /// Ratio buckets in priority order.
    pub buckets: Vec<BucketConfig>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            viewport: ViewportConfig::default(),
            resolver: ResolverConfig::default(),
            urls: UrlConfig::default(),
            slot: SlotBehaviorConfig::default(),
            buckets: default_buckets(),
        }
    }
}

impl SiteConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.viewport.threshold.is_finite() || self.viewport.threshold < 1.0 {
            return Err(ConfigError::Validation(
                "viewport.threshold must be a finite number >= 1".into(),
            ));
        }
        if self.resolver.step == 0 {
            return Err(ConfigError::Validation(
                "resolver.step must be greater than 0".into(),
            ));
        }
        if self.urls.scheme.is_empty() {
            return Err(ConfigError::Validation(
                "urls.scheme must not be empty".into(),
            ));
        }
        if let Some([x, y]) = self.slot.focal_point
            && !FocalPoint::new(x, y).is_valid()
        {
            return Err(ConfigError::Validation(
                "slot.focal_point values must be within 0-100".into(),
            ));
        }
        if let Some([w, h]) = self.slot.full_size
            && (w == 0 || h == 0)
        {
            return Err(ConfigError::Validation(
                "slot.full_size values must be non-zero".into(),
            ));
        }
        BucketTable::from_config(&self.buckets)?;
        Ok(())
    }
}

/// Zone tracking settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ViewportConfig {
    /// Extended zone multiplier. `1.0` makes it equal to the viewport.
    pub threshold: f64,
    /// On a constrained device, register every slot as permanently visible.
    pub disable_on_constrained: bool,
    /// Whether the host detected a constrained device profile.
    pub constrained_device: bool,
    /// Disable tracking outright: every slot is in both zones.
    pub disabled: bool,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            threshold: 2.0,
            disable_on_constrained: true,
            constrained_device: false,
            disabled: false,
        }
    }
}

/// Size quantization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverConfig {
    /// Quantization step in CSS pixels, scaled by the device pixel ratio.
    pub step: u32,
    /// When false, sizes snap upward so the image never has fewer pixels
    /// than the container needs.
    pub allow_upscaling: bool,
    /// Collapse the reported device pixel ratio to 1 or 2.
    pub snap_device_pixel_ratio: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            step: 50,
            allow_upscaling: true,
            snap_device_pixel_ratio: true,
        }
    }
}

/// Derived-image URL template settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UrlConfig {
    pub base_path: String,
    pub file_path: String,
    /// Image style prefix; the full style is `{style}_{bucket}_{type_tag}_{size}`.
    pub style: String,
    pub type_tag: String,
    /// Source prefix replaced by the styles path.
    pub scheme: String,
}

impl Default for UrlConfig {
    fn default() -> Self {
        Self {
            base_path: "/".to_string(),
            file_path: "sites/default/files".to_string(),
            style: "responsive".to_string(),
            type_tag: "crop".to_string(),
            scheme: "public://".to_string(),
        }
    }
}

/// Per-slot behavior. Usually set site-wide, overridden per slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SlotBehaviorConfig {
    /// Resize settle time before a recompute, in milliseconds.
    pub debounce_ms: u64,
    /// Release the in-flight request when the slot leaves the preload zone.
    pub forget_when_outside: bool,
    /// Focal point `[x, y]` in percent. Enables cover geometry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focal_point: Option<[f64; 2]>,
    /// Declared `[width, height]` of a full-bleed slot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_size: Option<[u32; 2]>,
}

impl Default for SlotBehaviorConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 250,
            forget_when_outside: false,
            focal_point: None,
            full_size: None,
        }
    }
}

/// One `[[buckets]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BucketConfig {
    pub id: String,
    /// Crop rectangle as `[width, height]`. Buckets without one only serve
    /// as the fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop: Option<[u32; 2]>,
    pub min: u32,
    pub max: u32,
    #[serde(default)]
    pub interpolation: Interpolation,
    /// Governing dimension. Defaults to width for landscape crops.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub axis: Option<Axis>,
}

impl BucketConfig {
    pub fn new(id: &str, crop: [u32; 2], min: u32, max: u32) -> Self {
        Self {
            id: id.to_string(),
            crop: Some(crop),
            min,
            max,
            interpolation: Interpolation::Linear,
            axis: None,
        }
    }
}

fn default_buckets() -> Vec<BucketConfig> {
    vec![
        BucketConfig::new("ls", [16, 9], 200, 2000),
        BucketConfig::new("sq", [1, 1], 100, 1200),
        BucketConfig::new("pt", [3, 4], 200, 1600),
    ]
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(SiteConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely, arrays
///   of tables included.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a `config.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if no `config.toml` exists in the directory.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = path.join("config.toml");
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<SiteConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: SiteConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `config.toml` in the given directory.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result.
pub fn load_config(root: &Path) -> Result<SiteConfig, ConfigError> {
    let base = stock_defaults_value();
    let overlay = load_raw_config(root)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Viewport Images Configuration
# =============================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Scenario files may carry a per-slot overlay with the same keys; it is
# merged on top of this file for that slot only.
#
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Zone tracking
# ---------------------------------------------------------------------------
[viewport]
# Size of the preload zone as a multiple of the viewport. 2.0 extends the
# visible area by one full viewport on every side. Must be >= 1.
threshold = 2.0

# On devices flagged as constrained, skip tracking and treat every slot as
# visible from the moment it registers.
disable_on_constrained = true

# Result of the host's constrained-profile detection.
constrained_device = false

# Disable tracking entirely: every slot counts as in view.
disabled = false

# ---------------------------------------------------------------------------
# Size resolution
# ---------------------------------------------------------------------------
[resolver]
# Quantization step in CSS pixels. Multiplied by the device pixel ratio.
step = 50

# When false, sizes always snap upward so an image is never smaller than
# the space it fills.
allow_upscaling = true

# Collapse the device pixel ratio to 1x (below 1.5) or 2x.
snap_device_pixel_ratio = true

# ---------------------------------------------------------------------------
# Derived image URLs
# ---------------------------------------------------------------------------
# Built as {base_path}{file_path}/styles/{style}_{bucket}_{type_tag}_{size}/public/
# followed by the part of the source after `scheme`.
[urls]
base_path = "/"
file_path = "sites/default/files"
style = "responsive"
type_tag = "crop"
scheme = "public://"

# ---------------------------------------------------------------------------
# Slot behavior
# ---------------------------------------------------------------------------
[slot]
# Milliseconds of quiet after the last resize before sizes are recomputed.
debounce_ms = 250

# Release a pending request when the slot scrolls out of the preload zone.
forget_when_outside = false

# Focal point in percent of the image, [x, y]. Enables scale-to-cover.
# focal_point = [50.0, 50.0]

# Declared [width, height] of a full-bleed slot; reserves space before the
# first image arrives.
# full_size = [1600, 900]

# ---------------------------------------------------------------------------
# Ratio buckets
# ---------------------------------------------------------------------------
# Declaration order matters: ties go to the earlier bucket, and the first
# bucket is the fallback. Declaring [[buckets]] replaces this whole list.
#
# interpolation: "linear" | "quadratic" | "cubic"
# axis (optional): "width" | "height"; defaults to width for landscape crops

[[buckets]]
id = "ls"
crop = [16, 9]
min = 200
max = 2000
interpolation = "linear"

[[buckets]]
id = "sq"
crop = [1, 1]
min = 100
max = 1200
interpolation = "linear"

[[buckets]]
id = "pt"
crop = [3, 4]
min = 200
max = 1600
interpolation = "linear"
"##
}
