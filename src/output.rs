//! CLI output formatting for all commands.
//!
//! # Output Format
//!
//! ## Resolve
//!
//! ```text
//! Container 800x450 @1x
//!     Bucket: ls (16:9)
//!     Size: 800px
//!     URL: /sites/default/files/styles/responsive_ls_crop_800/public/a.jpg
//! ```
//!
//! ## Check
//!
//! ```text
//! Buckets
//! 001 ls 16:9, width, 200-2000px, linear
//! 002 sq 1:1, height, 100-1200px, linear
//!
//! Resolver
//!     Step: 50px
//!     Upscaling: allowed
//!     Device pixel ratio: snapped
//! ```
//!
//! ## Simulate
//!
//! ```text
//! [     0ms] document ready
//!     hero enters preload zone
//!     hero in viewport
//!     hero requests ls 800px (ticket 0)
//!         /sites/default/files/styles/responsive_ls_crop_800/public/hero.jpg
//! [   400ms] complete loads
//!     hero loaded ticket 0
//!     hero ready 800x450 (first)
//!
//! Slots
//! 001 hero: loaded, in viewport
//!     Request: ls 800px
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::config::ResolverConfig;
use crate::focal::GeometryUpdate;
use crate::geometry::Size;
use crate::host::SlotUpdate;
use crate::resolver::{
    Axis, BucketTable, DevicePixelRatio, Interpolation, RatioBucket, ResolvedVariant,
};
use crate::scenario::{LoadEvent, ScenarioReport, SlotSummary, StepReport};
use crate::slot::{Lifecycle, SlotId};

// ============================================================================
// Shared helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// `800x450`, dropping a zero fraction.
fn format_size(size: Size) -> String {
    format!("{}x{}", size.width, size.height)
}

fn format_crop(bucket: &RatioBucket) -> String {
    match bucket.crop {
        Some(crop) => format!("{}:{}", crop.width, crop.height),
        None => "free".to_string(),
    }
}

fn axis_name(axis: Axis) -> &'static str {
    match axis {
        Axis::Width => "width",
        Axis::Height => "height",
    }
}

fn interpolation_name(curve: Interpolation) -> &'static str {
    match curve {
        Interpolation::Linear => "linear",
        Interpolation::Quadratic => "quadratic",
        Interpolation::Cubic => "cubic",
    }
}

fn format_variant(variant: &ResolvedVariant) -> String {
    format!("{} {}px", variant.bucket, variant.size)
}

// ============================================================================
// resolve
// ============================================================================

/// Format one resolution: container, chosen bucket, size and URL.
pub fn format_resolution(
    container: Size,
    dpr: DevicePixelRatio,
    bucket: &RatioBucket,
    variant: &ResolvedVariant,
    url: Option<&str>,
) -> Vec<String> {
    let mut lines = vec![
        format!("Container {} @{}x", format_size(container), dpr.value()),
        format!("{}Bucket: {} ({})", indent(1), bucket.id, format_crop(bucket)),
        format!("{}Size: {}px", indent(1), variant.size),
    ];
    if let Some(url) = url {
        lines.push(format!("{}URL: {}", indent(1), url));
    }
    lines
}

pub fn print_resolution(
    container: Size,
    dpr: DevicePixelRatio,
    bucket: &RatioBucket,
    variant: &ResolvedVariant,
    url: Option<&str>,
) {
    for line in format_resolution(container, dpr, bucket, variant, url) {
        println!("{}", line);
    }
}

// ============================================================================
// check
// ============================================================================

/// Format the bucket table in priority order plus resolver settings.
pub fn format_bucket_table(table: &BucketTable, resolver: &ResolverConfig) -> Vec<String> {
    let mut lines = vec!["Buckets".to_string()];
    for (i, bucket) in table.iter().enumerate() {
        lines.push(format!(
            "{} {} {}, {}, {}-{}px, {}",
            format_index(i + 1),
            bucket.id,
            format_crop(bucket),
            axis_name(bucket.axis),
            bucket.min,
            bucket.max,
            interpolation_name(bucket.interpolation)
        ));
    }

    lines.push(String::new());
    lines.push("Resolver".to_string());
    lines.push(format!("{}Step: {}px", indent(1), resolver.step));
    lines.push(format!(
        "{}Upscaling: {}",
        indent(1),
        if resolver.allow_upscaling {
            "allowed"
        } else {
            "never below container"
        }
    ));
    lines.push(format!(
        "{}Device pixel ratio: {}",
        indent(1),
        if resolver.snap_device_pixel_ratio {
            "snapped"
        } else {
            "exact"
        }
    ));
    lines
}

pub fn print_bucket_table(table: &BucketTable, resolver: &ResolverConfig) {
    for line in format_bucket_table(table, resolver) {
        println!("{}", line);
    }
}

// ============================================================================
// simulate
// ============================================================================

fn format_geometry(geometry: &GeometryUpdate) -> String {
    match geometry {
        GeometryUpdate::Cover(c) => format!(
            "cover {}x{} at {},{}",
            c.width, c.height, c.left, c.top
        ),
        GeometryUpdate::Placeholder { width, height } => {
            format!("placeholder {}x{}", width, height)
        }
        GeometryUpdate::ClearSize => "clear size".to_string(),
        GeometryUpdate::Unchanged => "unchanged".to_string(),
    }
}

fn format_load(load: &LoadEvent, name: &dyn Fn(SlotId) -> String) -> Vec<String> {
    match load {
        LoadEvent::Requested(request) => vec![
            format!(
                "{}{} requests {} (ticket {})",
                indent(1),
                name(request.slot),
                format_variant(&request.variant),
                request.ticket.0
            ),
            format!("{}{}", indent(2), request.url),
        ],
        LoadEvent::Released { slot, ticket } => {
            vec![format!("{}{} releases ticket {}", indent(1), name(*slot), ticket.0)]
        }
        LoadEvent::Completed { slot, ticket } => {
            vec![format!("{}{} loaded ticket {}", indent(1), name(*slot), ticket.0)]
        }
    }
}

fn format_update(update: &SlotUpdate, name: &dyn Fn(SlotId) -> String) -> String {
    let line = match update {
        SlotUpdate::EnterExtended { slot } => format!("{} enters preload zone", name(*slot)),
        SlotUpdate::ExitExtended { slot } => format!("{} leaves preload zone", name(*slot)),
        SlotUpdate::ViewportChange { slot, in_viewport } => {
            if *in_viewport {
                format!("{} in viewport", name(*slot))
            } else {
                format!("{} out of viewport", name(*slot))
            }
        }
        SlotUpdate::Geometry { slot, geometry } => {
            format!("{} geometry: {}", name(*slot), format_geometry(geometry))
        }
        SlotUpdate::Ready(ready) => format!(
            "{} ready {}{}",
            name(ready.slot),
            format_size(ready.natural_size),
            if ready.first { " (first)" } else { "" }
        ),
        SlotUpdate::LoadFailed { slot, ticket } => {
            format!("{} failed ticket {}", name(*slot), ticket.0)
        }
    };
    format!("{}{}", indent(1), line)
}

/// Format one step: header, then load events, then slot updates.
pub fn format_step(step: &StepReport, name: &dyn Fn(SlotId) -> String) -> Vec<String> {
    let mut lines = vec![format!("[{:>6}ms] {}", step.at_ms, step.label)];
    for load in &step.loads {
        lines.extend(format_load(load, name));
    }
    for update in &step.updates {
        lines.push(format_update(update, name));
    }
    lines
}

fn format_slot_summary(index: usize, summary: &SlotSummary) -> Vec<String> {
    let lifecycle = match summary.state.lifecycle {
        Lifecycle::Idle => "idle",
        Lifecycle::Loading { .. } if summary.presentation.initial_loading => "initial loading",
        Lifecycle::Loading { .. } => "loading",
        Lifecycle::Loaded => "loaded",
    };
    let visibility = if summary.presentation.in_viewport {
        "in viewport"
    } else {
        "out of viewport"
    };
    let mut lines = vec![format!(
        "{} {}: {}, {}",
        format_index(index),
        summary.name,
        lifecycle,
        visibility
    )];
    if let Some(variant) = &summary.state.current_request {
        lines.push(format!("{}Request: {}", indent(1), format_variant(variant)));
    }
    if let Some(size) = summary.state.loaded_image_size {
        lines.push(format!("{}Image: {}", indent(1), format_size(size)));
    }
    if summary.state.geometry != GeometryUpdate::Unchanged {
        lines.push(format!(
            "{}Geometry: {}",
            indent(1),
            format_geometry(&summary.state.geometry)
        ));
    }
    lines
}

/// Format a whole scenario run. Steps with nothing to report are skipped
/// unless `verbose` is set.
pub fn format_scenario_report(report: &ScenarioReport, verbose: bool) -> Vec<String> {
    let name = |id: SlotId| report.slot_name(id);
    let mut lines = Vec::new();
    for step in &report.steps {
        if verbose || !step.is_quiet() {
            lines.extend(format_step(step, &name));
        }
    }

    lines.push(String::new());
    lines.push("Slots".to_string());
    for (i, summary) in report.slots.iter().enumerate() {
        lines.extend(format_slot_summary(i + 1, summary));
    }
    lines
}

pub fn print_scenario_report(report: &ScenarioReport, verbose: bool) {
    for line in format_scenario_report(report, verbose) {
        println!("{}", line);
    }
}
