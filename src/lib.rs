//! # Viewport Images
//!
//! Viewport-aware responsive image slots. Each slot on a page loads an image
//! variant sized and cropped for its container, only once the slot is near
//! enough to the viewport to matter.
//!
//! # Architecture: Three Cooperating Parts
//!
//! ```text
//! host events ──► ViewportTracker ──zone edges──► ImageSlotController ──► LoadSink
//!  (scroll,         (per-slot zone                 (resolve, dedupe,        (host
//!   resize, ...)     membership)                    request, geometry)      loads it)
//!                                                        │
//!                                                  SizeResolver
//!                                          (bucket + quantized size)
//! ```
//!
//! - The **tracker** classifies every registered slot against the visible
//!   viewport and a larger preload zone, and reports only changes.
//! - The **resolver** turns a container size into a ratio bucket and a
//!   quantized pixel size. It is pure.
//! - The **slot controller** decides when to request a new variant, ignores
//!   stale completions, and computes focal-point geometry.
//!
//! [`host::SlotHost`] wires the three together for one page. Nothing here
//! talks to a browser: geometry comes in through
//! [`viewport::GeometryProvider`], requests go out through
//! [`slot::LoadSink`], and presentation is a value the renderer reads.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`geometry`] | `Size`, `Rect`, `Viewport` value types and the overlap test |
//! | [`viewport`] | Edge-triggered zone tracking over caller-chosen keys |
//! | [`resolver`] | Ratio buckets, quantization curves, device pixel ratio |
//! | [`urls`] | `UrlBuilder` trait and the image-style URL template |
//! | [`focal`] | Scale-to-cover geometry around a focal point |
//! | [`debounce`] | Single pending, cancelable trailing-edge task |
//! | [`slot`] | Per-slot state machine and request tickets |
//! | [`host`] | Composition root dispatching host events to slots |
//! | [`config`] | `config.toml` loading, validation and merging |
//! | [`scenario`] | Scripted pages for the `simulate` command |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## No Global Tracker
//!
//! A tracker is an ordinary value owned by whoever composes the slots.
//! Two pages, or two scroll containers, simply get two hosts.
//!
//! ## Edges Are Delivered After the Pass
//!
//! The tracker hands zone edges to a [`viewport::ZoneListener`] passed into
//! each pass instead of storing per-element callbacks. The host collects the
//! edges and dispatches them once the pass is over, so a slot reacting to an
//! edge can never re-enter the tracker.
//!
//! ## Compare Descriptors, Not URLs
//!
//! Whether a new request is needed is decided on the structured
//! [`resolver::ResolvedVariant`] (bucket id plus size). URL formatting is a
//! separate, pluggable step, so a different URL scheme never changes which
//! requests are made.
//!
//! ## Host-Driven Time
//!
//! The resize debounce runs on a `Duration` the host supplies with each
//! event. There is no timer thread; tests and the `simulate` command step
//! time explicitly.

pub mod config;
pub mod debounce;
pub mod focal;
pub mod geometry;
pub mod host;
pub mod output;
pub mod resolver;
pub mod scenario;
pub mod slot;
pub mod urls;
pub mod viewport;

#[cfg(test)]
pub(crate) mod test_helpers;
