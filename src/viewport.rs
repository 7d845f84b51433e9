//! Viewport membership tracking.
//!
//! A [`ViewportTracker`] keeps an ordered registry of elements and, on every
//! [`Trigger`], classifies each one against two nested zones:
//!
//! ```text
//! ┌──────────────── extended zone ────────────────┐
//! │            (threshold - 1) × viewport         │
//! │   ┌──────────── strict zone ─────────────┐    │
//! │   │        scroll offset + extent        │    │
//! │   └──────────────────────────────────────┘    │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! Notifications are edge-triggered: a [`ZoneListener`] hears about an
//! element only when its membership in a zone flips. Repeating a pass with
//! unchanged geometry produces nothing.
//!
//! The tracker never owns the elements. It stores a caller-chosen key `K`
//! and asks a [`GeometryProvider`] for that key's box on each pass, so the
//! same tracker works over DOM handles, arena indices or test fixtures.
//!
//! ## Per-element states
//!
//! ```text
//!                 enter extended              enter strict
//!   Outside ───────────────────► Preload ─────────────────► Visible
//!      ▲  ◄───────────────────      ▲   ◄─────────────────     │
//!      │       exit extended        │       exit strict        │
//!      └────────────────────────────┴──────────────────────────┘
//!                  (one pass may cross both edges)
//! ```

use crate::config::ViewportConfig;
use crate::geometry::{Rect, Viewport};
use std::collections::HashMap;
use std::hash::Hash;

/// Source of live geometry, queried once per element per pass.
///
/// Returning `None` means "not measurable yet" (before layout, detached
/// element). The tracker skips that element, or the whole pass for a
/// missing viewport, and retries on the next trigger.
pub trait GeometryProvider<K> {
    /// Current scroll offset and visible extent of the scrollable viewport.
    fn viewport(&self) -> Option<Viewport>;

    /// Document-relative bounding box of a tracked element.
    fn element_box(&self, element: &K) -> Option<Rect>;
}

/// Receives zone edges produced by a tracker pass.
pub trait ZoneListener<K> {
    /// Extended-zone membership went false → true.
    fn on_enter_extended(&mut self, element: &K);

    /// Extended-zone membership went true → false.
    fn on_exit_extended(&mut self, element: &K);

    /// Strict-zone membership flipped; `in_viewport` is the new value.
    fn on_viewport_change(&mut self, element: &K, in_viewport: bool);
}

/// A zone edge as a value, for callers that prefer to collect and
/// dispatch after the pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneEvent<K> {
    EnterExtended(K),
    ExitExtended(K),
    ViewportChange(K, bool),
}

impl<K: Clone> ZoneListener<K> for Vec<ZoneEvent<K>> {
    fn on_enter_extended(&mut self, element: &K) {
        self.push(ZoneEvent::EnterExtended(element.clone()));
    }

    fn on_exit_extended(&mut self, element: &K) {
        self.push(ZoneEvent::ExitExtended(element.clone()));
    }

    fn on_viewport_change(&mut self, element: &K, in_viewport: bool) {
        self.push(ZoneEvent::ViewportChange(element.clone(), in_viewport));
    }
}

/// Why a pass is being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Resize,
    Scroll,
    DocumentReady,
    /// Layout changed independently of scroll/resize. Recorded membership
    /// is forgotten before the pass, so every element inside a zone
    /// re-announces itself.
    Invalidate,
}

/// Last known zone membership of one element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Membership {
    pub in_extended: bool,
    pub in_strict: bool,
}

impl Membership {
    const EVERYWHERE: Membership = Membership {
        in_extended: true,
        in_strict: true,
    };
}

/// Tracker settings, usually built from [`ViewportConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerOptions {
    /// Extended zone multiplier; `2.0` adds one viewport on every side.
    pub threshold: f64,
    /// Skip tracking entirely on constrained devices.
    pub disable_on_constrained: bool,
    /// Result of the host's constrained-profile detection.
    pub constrained_device: bool,
    /// Treat every element as inside both zones.
    pub disabled: bool,
}

impl TrackerOptions {
    pub fn from_config(config: &ViewportConfig) -> Self {
        Self {
            threshold: config.threshold,
            disable_on_constrained: config.disable_on_constrained,
            constrained_device: config.constrained_device,
            disabled: config.disabled,
        }
    }

    fn pins_new_elements(&self) -> bool {
        self.disable_on_constrained && self.constrained_device
    }
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self::from_config(&ViewportConfig::default())
    }
}

#[derive(Debug)]
struct TrackedElement<K> {
    key: K,
    membership: Membership,
    /// Registered on a constrained profile: always visible, never re-checked.
    pinned: bool,
}

/// Edge-triggered zone membership for an ordered set of elements.
#[derive(Debug)]
pub struct ViewportTracker<K> {
    options: TrackerOptions,
    elements: Vec<TrackedElement<K>>,
    index: HashMap<K, usize>,
}

impl<K> ViewportTracker<K>
where
    K: Clone + Eq + Hash + std::fmt::Debug,
{
    pub fn new(options: TrackerOptions) -> Self {
        Self {
            options,
            elements: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn options(&self) -> &TrackerOptions {
        &self.options
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Start tracking `element`.
    ///
    /// On a constrained profile with `disable_on_constrained` set, the
    /// element is pinned inside both zones and `on_enter_extended` fires
    /// immediately; it is never re-evaluated afterwards. Otherwise it starts
    /// outside both zones and the next pass decides.
    ///
    /// Registering a key twice keeps the first registration.
    pub fn register(&mut self, element: K, listener: &mut impl ZoneListener<K>) {
        if self.index.contains_key(&element) {
            tracing::debug!(?element, "element already tracked, ignoring registration");
            return;
        }

        let pinned = self.options.pins_new_elements();
        let membership = if pinned {
            Membership::EVERYWHERE
        } else {
            Membership::default()
        };

        self.index.insert(element.clone(), self.elements.len());
        self.elements.push(TrackedElement {
            key: element.clone(),
            membership,
            pinned,
        });

        if pinned {
            tracing::debug!(?element, "constrained profile, element pinned visible");
            listener.on_enter_extended(&element);
        }
    }

    /// Stop tracking `element`. Returns whether it was tracked.
    pub fn unregister(&mut self, element: &K) -> bool {
        let Some(pos) = self.index.remove(element) else {
            return false;
        };
        self.elements.remove(pos);
        for (i, tracked) in self.elements.iter().enumerate().skip(pos) {
            self.index.insert(tracked.key.clone(), i);
        }
        true
    }

    /// Last recorded membership, or `None` for an unknown element.
    pub fn membership(&self, element: &K) -> Option<Membership> {
        self.index
            .get(element)
            .map(|&pos| self.elements[pos].membership)
    }

    /// Whether `element` is in the strict zone. Unknown elements count as
    /// visible so a mis-registered slot still loads.
    pub fn in_strict_zone(&self, element: &K) -> bool {
        self.membership(element).is_none_or(|m| m.in_strict)
    }

    /// Whether `element` is in the extended zone. Unknown elements count as
    /// inside.
    pub fn in_extended_zone(&self, element: &K) -> bool {
        self.membership(element).is_none_or(|m| m.in_extended)
    }

    /// Switch to "everything visible" and run a pass.
    pub fn disable(
        &mut self,
        geometry: &impl GeometryProvider<K>,
        listener: &mut impl ZoneListener<K>,
    ) {
        self.options.disabled = true;
        self.recompute(geometry, listener);
    }

    /// Run a pass for the given trigger.
    pub fn handle(
        &mut self,
        trigger: Trigger,
        geometry: &impl GeometryProvider<K>,
        listener: &mut impl ZoneListener<K>,
    ) {
        tracing::trace!(?trigger, "viewport trigger");
        if trigger == Trigger::Invalidate {
            self.reset_recorded_membership();
        }
        self.recompute(geometry, listener);
    }

    /// Forget recorded membership and run a pass.
    pub fn invalidate(
        &mut self,
        geometry: &impl GeometryProvider<K>,
        listener: &mut impl ZoneListener<K>,
    ) {
        self.handle(Trigger::Invalidate, geometry, listener);
    }

    fn reset_recorded_membership(&mut self) {
        for tracked in self.elements.iter_mut().filter(|t| !t.pinned) {
            tracked.membership = Membership::default();
        }
    }

    /// Reclassify every tracked element and notify edges, in registration
    /// order. Each element produces at most one extended edge and one strict
    /// edge per pass.
    pub fn recompute(
        &mut self,
        geometry: &impl GeometryProvider<K>,
        listener: &mut impl ZoneListener<K>,
    ) {
        if self.elements.is_empty() {
            return;
        }

        let zones = if self.options.disabled {
            None
        } else {
            match geometry.viewport() {
                Some(vp) if vp.is_measurable() => {
                    Some((vp.strict_zone(), vp.extended_zone(self.options.threshold)))
                }
                _ => {
                    tracing::trace!("viewport not measurable, skipping pass");
                    return;
                }
            }
        };

        for tracked in self.elements.iter_mut().filter(|t| !t.pinned) {
            let next = match &zones {
                None => Membership::EVERYWHERE,
                Some((strict, extended)) => match geometry.element_box(&tracked.key) {
                    Some(rect) => Membership {
                        in_extended: rect.overlaps(extended),
                        in_strict: rect.overlaps(strict),
                    },
                    None => continue,
                },
            };

            let prev = tracked.membership;
            tracked.membership = next;

            if next.in_extended != prev.in_extended {
                tracing::debug!(
                    element = ?tracked.key,
                    entered = next.in_extended,
                    "extended zone edge"
                );
                if next.in_extended {
                    listener.on_enter_extended(&tracked.key);
                } else {
                    listener.on_exit_extended(&tracked.key);
                }
            }

            if next.in_strict != prev.in_strict {
                tracing::debug!(
                    element = ?tracked.key,
                    visible = next.in_strict,
                    "strict zone edge"
                );
                listener.on_viewport_change(&tracked.key, next.in_strict);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::StaticLayout;

    fn tracker() -> ViewportTracker<&'static str> {
        ViewportTracker::new(TrackerOptions {
            threshold: 2.0,
            disable_on_constrained: true,
            constrained_device: false,
            disabled: false,
        })
    }

    fn layout() -> StaticLayout<&'static str> {
        // 800x600 viewport at the top of the page; extended zone reaches
        // y = 1200 below and y = -600 above.
        StaticLayout::new(Viewport::new(0.0, 0.0, 800.0, 600.0))
    }

    // =========================================================================
    // Registration
    // =========================================================================

    #[test]
    fn registration_starts_outside_without_events() {
        let mut t = tracker();
        let mut events = Vec::new();
        t.register("a", &mut events);
        assert!(events.is_empty());
        assert_eq!(t.membership(&"a"), Some(Membership::default()));
    }

    #[test]
    fn unknown_element_reports_visible() {
        let t = tracker();
        assert!(t.in_strict_zone(&"ghost"));
        assert!(t.in_extended_zone(&"ghost"));
    }

    #[test]
    fn constrained_profile_pins_and_fires_enter_once() {
        let mut t = ViewportTracker::new(TrackerOptions {
            constrained_device: true,
            ..TrackerOptions::default()
        });
        let mut events = Vec::new();
        t.register("a", &mut events);
        assert_eq!(events, vec![ZoneEvent::EnterExtended("a")]);

        // Far offscreen, but pinned elements are never re-evaluated.
        let geo = layout().with_element("a", Rect::new(0.0, 50_000.0, 10.0, 10.0));
        events.clear();
        t.recompute(&geo, &mut events);
        t.invalidate(&geo, &mut events);
        assert!(events.is_empty());
        assert!(t.in_strict_zone(&"a"));
    }

    #[test]
    fn constrained_device_without_opt_out_tracks_normally() {
        let mut t = ViewportTracker::new(TrackerOptions {
            constrained_device: true,
            disable_on_constrained: false,
            ..TrackerOptions::default()
        });
        let mut events = Vec::new();
        t.register("a", &mut events);
        assert!(events.is_empty());
    }

    #[test]
    fn duplicate_registration_is_ignored() {
        let mut t = tracker();
        let mut events = Vec::new();
        t.register("a", &mut events);
        t.register("a", &mut events);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn unregister_keeps_order_of_remaining_elements() {
        let mut t = tracker();
        let mut events = Vec::new();
        for key in ["a", "b", "c"] {
            t.register(key, &mut events);
        }
        assert!(t.unregister(&"a"));
        assert!(!t.unregister(&"a"));

        let geo = layout()
            .with_element("b", Rect::new(0.0, 0.0, 10.0, 10.0))
            .with_element("c", Rect::new(0.0, 0.0, 10.0, 10.0));
        t.recompute(&geo, &mut events);
        assert_eq!(
            events,
            vec![
                ZoneEvent::EnterExtended("b"),
                ZoneEvent::ViewportChange("b", true),
                ZoneEvent::EnterExtended("c"),
                ZoneEvent::ViewportChange("c", true),
            ]
        );
        assert_eq!(t.membership(&"a"), None);
    }

    // =========================================================================
    // Edge detection
    // =========================================================================

    #[test]
    fn element_outside_extended_zone_never_enters() {
        let mut t = tracker();
        let mut events = Vec::new();
        t.register("far", &mut events);
        let geo = layout().with_element("far", Rect::new(0.0, 5000.0, 100.0, 100.0));
        for _ in 0..3 {
            t.recompute(&geo, &mut events);
        }
        assert!(events.is_empty());
        assert!(!t.in_extended_zone(&"far"));
    }

    #[test]
    fn preload_zone_enter_without_strict_edge() {
        let mut t = tracker();
        let mut events = Vec::new();
        t.register("below", &mut events);
        let geo = layout().with_element("below", Rect::new(0.0, 900.0, 100.0, 100.0));
        t.recompute(&geo, &mut events);
        assert_eq!(events, vec![ZoneEvent::EnterExtended("below")]);
        assert_eq!(
            t.membership(&"below"),
            Some(Membership {
                in_extended: true,
                in_strict: false
            })
        );
    }

    #[test]
    fn move_in_then_out_fires_one_edge_each_way() {
        let mut t = tracker();
        let mut events = Vec::new();
        t.register("a", &mut events);

        let mut geo = layout().with_element("a", Rect::new(0.0, 5000.0, 100.0, 100.0));
        t.recompute(&geo, &mut events);
        assert!(events.is_empty());

        geo.scroll_to(0.0, 4800.0);
        t.recompute(&geo, &mut events);
        t.recompute(&geo, &mut events);
        assert_eq!(
            events,
            vec![
                ZoneEvent::EnterExtended("a"),
                ZoneEvent::ViewportChange("a", true)
            ]
        );

        events.clear();
        geo.scroll_to(0.0, 0.0);
        t.recompute(&geo, &mut events);
        t.recompute(&geo, &mut events);
        assert_eq!(
            events,
            vec![
                ZoneEvent::ExitExtended("a"),
                ZoneEvent::ViewportChange("a", false)
            ]
        );
    }

    #[test]
    fn strict_edges_fire_both_directions_inside_extended_zone() {
        let mut t = tracker();
        let mut events = Vec::new();
        t.register("a", &mut events);
        let mut geo = layout().with_element("a", Rect::new(0.0, 100.0, 100.0, 100.0));
        t.recompute(&geo, &mut events);
        events.clear();

        // Scroll so the element leaves the strict zone but stays preloaded.
        geo.scroll_to(0.0, 700.0);
        t.recompute(&geo, &mut events);
        assert_eq!(events, vec![ZoneEvent::ViewportChange("a", false)]);

        events.clear();
        geo.scroll_to(0.0, 0.0);
        t.recompute(&geo, &mut events);
        assert_eq!(events, vec![ZoneEvent::ViewportChange("a", true)]);
    }

    #[test]
    fn invalidate_replays_enter_events() {
        let mut t = tracker();
        let mut events = Vec::new();
        t.register("a", &mut events);
        let geo = layout().with_element("a", Rect::new(0.0, 0.0, 100.0, 100.0));
        t.handle(Trigger::Scroll, &geo, &mut events);
        events.clear();

        t.handle(Trigger::Resize, &geo, &mut events);
        assert!(events.is_empty());

        t.handle(Trigger::Invalidate, &geo, &mut events);
        assert_eq!(
            events,
            vec![
                ZoneEvent::EnterExtended("a"),
                ZoneEvent::ViewportChange("a", true)
            ]
        );
    }

    #[test]
    fn unmeasurable_viewport_skips_pass() {
        let mut t = tracker();
        let mut events = Vec::new();
        t.register("a", &mut events);
        let mut geo = StaticLayout::new(Viewport::new(0.0, 0.0, 0.0, 0.0))
            .with_element("a", Rect::new(0.0, 0.0, 10.0, 10.0));
        t.recompute(&geo, &mut events);
        assert!(events.is_empty());

        geo.resize(800.0, 600.0);
        t.recompute(&geo, &mut events);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn unmeasurable_element_keeps_previous_state() {
        let mut t = tracker();
        let mut events = Vec::new();
        t.register("a", &mut events);
        t.register("b", &mut events);
        let geo = layout().with_element("b", Rect::new(0.0, 0.0, 10.0, 10.0));
        t.recompute(&geo, &mut events);
        assert_eq!(t.membership(&"a"), Some(Membership::default()));
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn disable_marks_everything_visible() {
        let mut t = tracker();
        let mut events = Vec::new();
        t.register("far", &mut events);
        let geo = layout().with_element("far", Rect::new(0.0, 9000.0, 10.0, 10.0));
        t.recompute(&geo, &mut events);
        assert!(events.is_empty());

        t.disable(&geo, &mut events);
        assert_eq!(
            events,
            vec![
                ZoneEvent::EnterExtended("far"),
                ZoneEvent::ViewportChange("far", true)
            ]
        );
    }

    #[test]
    fn custom_threshold_widens_preload_zone() {
        let mut t = ViewportTracker::new(TrackerOptions {
            threshold: 4.0,
            ..TrackerOptions::default()
        });
        let mut events = Vec::new();
        t.register("a", &mut events);
        // 3 viewports of margin below a 600px viewport: up to y = 2400.
        let geo = layout().with_element("a", Rect::new(0.0, 2300.0, 10.0, 10.0));
        t.recompute(&geo, &mut events);
        assert_eq!(events, vec![ZoneEvent::EnterExtended("a")]);
    }
}
