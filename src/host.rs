//! Composition root: one tracker, many slots, one event entry point.
//!
//! A [`SlotHost`] owns a [`ViewportTracker`] keyed by [`SlotId`] and one
//! [`ImageSlotController`] per slot. Hosts feed it [`HostEvent`]s; zone
//! edges from the tracker are collected first and dispatched to the
//! controllers afterwards, so a controller never runs while the tracker
//! is mid-pass.
//!
//! Load requests leave through the caller's [`LoadSink`]; everything else
//! a renderer needs comes back as [`SlotUpdate`]s.

use crate::config::{ConfigError, SiteConfig};
use crate::focal::GeometryUpdate;
use crate::geometry::Size;
use crate::resolver::SizeResolver;
use crate::slot::{
    ComputeOutcome, ImageReady, ImageSlotController, LoadSink, Presentation, RequestTicket,
    SlotId, SlotSettings,
};
use crate::urls::{StyleTemplate, UrlBuilder};
use crate::viewport::{GeometryProvider, TrackerOptions, Trigger, ViewportTracker, ZoneEvent};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Everything a host can tell the slots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HostEvent {
    Scroll,
    Resize { now: Duration },
    DocumentReady,
    /// Layout changed without scroll or resize; re-announce every edge.
    Invalidate,
    /// Clock advanced; run due debounced computes.
    Tick { now: Duration },
    LoadComplete {
        slot: SlotId,
        ticket: RequestTicket,
        natural_size: Size,
    },
    LoadFailed { slot: SlotId, ticket: RequestTicket },
    Refresh { slot: SlotId },
}

/// Observable result of handling an event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "update", rename_all = "snake_case")]
pub enum SlotUpdate {
    EnterExtended { slot: SlotId },
    ExitExtended { slot: SlotId },
    ViewportChange { slot: SlotId, in_viewport: bool },
    Geometry { slot: SlotId, geometry: GeometryUpdate },
    Ready(ImageReady),
    LoadFailed { slot: SlotId, ticket: RequestTicket },
}

/// What to register: a source plus optional per-slot overrides.
pub struct SlotSpec {
    pub source: String,
    /// Fully resolved config for this slot; the host's own when `None`.
    pub config: Option<SiteConfig>,
    /// URL builder; a [`StyleTemplate`] over the slot's config when `None`.
    pub urls: Option<Box<dyn UrlBuilder>>,
}

impl SlotSpec {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            config: None,
            urls: None,
        }
    }

    pub fn with_config(mut self, config: SiteConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_urls(mut self, urls: impl UrlBuilder + 'static) -> Self {
        self.urls = Some(Box::new(urls));
        self
    }
}

pub struct SlotHost<G> {
    config: SiteConfig,
    device_pixel_ratio: f64,
    geometry: G,
    tracker: ViewportTracker<SlotId>,
    slots: BTreeMap<SlotId, ImageSlotController>,
    next_id: usize,
}

impl<G: GeometryProvider<SlotId>> SlotHost<G> {
    /// `device_pixel_ratio` is the raw value the device reports.
    pub fn new(config: SiteConfig, device_pixel_ratio: f64, geometry: G) -> Self {
        let tracker = ViewportTracker::new(TrackerOptions::from_config(&config.viewport));
        Self {
            config,
            device_pixel_ratio,
            geometry,
            tracker,
            slots: BTreeMap::new(),
            next_id: 0,
        }
    }

    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    pub fn geometry(&self) -> &G {
        &self.geometry
    }

    /// Mutable layout access; follow changes with the matching event.
    pub fn geometry_mut(&mut self) -> &mut G {
        &mut self.geometry
    }

    pub fn tracker(&self) -> &ViewportTracker<SlotId> {
        &self.tracker
    }

    pub fn slot(&self, id: SlotId) -> Option<&ImageSlotController> {
        self.slots.get(&id)
    }

    pub fn slot_mut(&mut self, id: SlotId) -> Option<&mut ImageSlotController> {
        self.slots.get_mut(&id)
    }

    pub fn slot_ids(&self) -> impl Iterator<Item = SlotId> + '_ {
        self.slots.keys().copied()
    }

    pub fn presentation(&self, id: SlotId) -> Option<Presentation> {
        self.slots.get(&id).map(ImageSlotController::presentation)
    }

    /// Earliest pending debounced compute across all slots.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.slots
            .values()
            .filter_map(ImageSlotController::pending_compute_at)
            .min()
    }

    /// Register a slot and run its initial compute.
    ///
    /// Fails before anything is registered if the slot's config is invalid.
    /// `[viewport]` settings belong to the page's tracker, so a slot config
    /// that changes them is rejected.
    pub fn add_slot(
        &mut self,
        spec: SlotSpec,
        sink: &mut impl LoadSink,
    ) -> Result<(SlotId, Vec<SlotUpdate>), ConfigError> {
        let config = spec.config.as_ref().unwrap_or(&self.config);
        config.validate()?;
        if config.viewport != self.config.viewport {
            return Err(ConfigError::Validation(
                "viewport settings apply to the whole page and cannot be set per slot".into(),
            ));
        }
        let resolver = SizeResolver::from_config(config)?;
        let settings = SlotSettings::from_config(spec.source, config, self.device_pixel_ratio);
        let urls: Box<dyn UrlBuilder> = match spec.urls {
            Some(urls) => urls,
            None => Box::new(StyleTemplate::from_config(&config.urls)),
        };

        let id = SlotId(self.next_id);
        self.next_id += 1;
        tracing::debug!(slot = %id, source = %settings.source, "slot registered");
        self.slots
            .insert(id, ImageSlotController::new(id, settings, resolver, urls));

        let mut edges = Vec::new();
        self.tracker.register(id, &mut edges);
        let mut updates = self.dispatch(edges, sink);

        let membership = self.tracker.membership(&id).unwrap_or_default();
        let container = self.container(id);
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.on_viewport_change(membership.in_strict);
            let (geometry, _) = slot.refresh(membership.in_extended, container, sink);
            push_geometry(&mut updates, id, geometry);
        }
        Ok((id, updates))
    }

    /// Unregister a slot, releasing its in-flight request.
    pub fn remove_slot(&mut self, id: SlotId, sink: &mut impl LoadSink) -> bool {
        self.tracker.unregister(&id);
        match self.slots.remove(&id) {
            Some(mut slot) => {
                slot.teardown(sink);
                tracing::debug!(slot = %id, "slot removed");
                true
            }
            None => false,
        }
    }

    /// Permanently treat every slot as visible.
    pub fn disable_tracking(&mut self, sink: &mut impl LoadSink) -> Vec<SlotUpdate> {
        let mut edges = Vec::new();
        self.tracker.disable(&self.geometry, &mut edges);
        self.dispatch(edges, sink)
    }

    pub fn handle(&mut self, event: HostEvent, sink: &mut impl LoadSink) -> Vec<SlotUpdate> {
        match event {
            HostEvent::Scroll => self.tracker_pass(Trigger::Scroll, sink),
            HostEvent::DocumentReady => self.tracker_pass(Trigger::DocumentReady, sink),
            HostEvent::Invalidate => self.tracker_pass(Trigger::Invalidate, sink),
            HostEvent::Resize { now } => {
                let mut updates = self.tracker_pass(Trigger::Resize, sink);
                let ids: Vec<_> = self.slots.keys().copied().collect();
                for id in ids {
                    let container = self.container(id);
                    if let Some(slot) = self.slots.get_mut(&id) {
                        let geometry = slot.on_resize(now, container);
                        push_geometry(&mut updates, id, geometry);
                    }
                }
                updates
            }
            HostEvent::Tick { now } => {
                let ids: Vec<_> = self.slots.keys().copied().collect();
                for id in ids {
                    let in_extended = self.tracker.in_extended_zone(&id);
                    let container = self.container(id);
                    if let Some(slot) = self.slots.get_mut(&id)
                        && let Some(outcome) = slot.tick(now, in_extended, container, sink)
                    {
                        log_outcome(id, outcome);
                    }
                }
                Vec::new()
            }
            HostEvent::LoadComplete {
                slot,
                ticket,
                natural_size,
            } => {
                let container = self.container(slot);
                self.slots
                    .get_mut(&slot)
                    .and_then(|s| s.on_load_complete(ticket, natural_size, container))
                    .map(SlotUpdate::Ready)
                    .into_iter()
                    .collect()
            }
            HostEvent::LoadFailed { slot, ticket } => {
                let failed = self
                    .slots
                    .get_mut(&slot)
                    .is_some_and(|s| s.on_load_failed(ticket));
                if failed {
                    vec![SlotUpdate::LoadFailed { slot, ticket }]
                } else {
                    Vec::new()
                }
            }
            HostEvent::Refresh { slot } => {
                let in_extended = self.tracker.in_extended_zone(&slot);
                let container = self.container(slot);
                let mut updates = Vec::new();
                if let Some(s) = self.slots.get_mut(&slot) {
                    let (geometry, outcome) = s.refresh(in_extended, container, sink);
                    log_outcome(slot, outcome);
                    push_geometry(&mut updates, slot, geometry);
                }
                updates
            }
        }
    }

    fn tracker_pass(&mut self, trigger: Trigger, sink: &mut impl LoadSink) -> Vec<SlotUpdate> {
        let mut edges = Vec::new();
        self.tracker.handle(trigger, &self.geometry, &mut edges);
        self.dispatch(edges, sink)
    }

    fn dispatch(
        &mut self,
        edges: Vec<ZoneEvent<SlotId>>,
        sink: &mut impl LoadSink,
    ) -> Vec<SlotUpdate> {
        let mut updates = Vec::with_capacity(edges.len());
        for edge in edges {
            match edge {
                ZoneEvent::EnterExtended(id) => {
                    let container = self.container(id);
                    if let Some(slot) = self.slots.get_mut(&id) {
                        log_outcome(id, slot.on_enter_extended(container, sink));
                    }
                    updates.push(SlotUpdate::EnterExtended { slot: id });
                }
                ZoneEvent::ExitExtended(id) => {
                    if let Some(slot) = self.slots.get_mut(&id) {
                        slot.on_exit_extended(sink);
                    }
                    updates.push(SlotUpdate::ExitExtended { slot: id });
                }
                ZoneEvent::ViewportChange(id, in_viewport) => {
                    if let Some(slot) = self.slots.get_mut(&id) {
                        slot.on_viewport_change(in_viewport);
                    }
                    updates.push(SlotUpdate::ViewportChange {
                        slot: id,
                        in_viewport,
                    });
                }
            }
        }
        updates
    }

    fn container(&self, id: SlotId) -> Option<Size> {
        self.geometry.element_box(&id).map(|r| r.size())
    }
}

fn push_geometry(updates: &mut Vec<SlotUpdate>, slot: SlotId, geometry: GeometryUpdate) {
    if geometry != GeometryUpdate::Unchanged {
        updates.push(SlotUpdate::Geometry { slot, geometry });
    }
}

fn log_outcome(slot: SlotId, outcome: ComputeOutcome) {
    tracing::trace!(%slot, ?outcome, "compute");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BucketConfig;
    use crate::geometry::{Rect, Viewport};
    use crate::resolver::ResolvedVariant;
    use crate::slot::Lifecycle;
    use crate::test_helpers::{RecordedLoad, RecordingSink, StaticLayout};

    fn config() -> SiteConfig {
        SiteConfig {
            buckets: vec![BucketConfig::new("ls", [16, 9], 200, 2000)],
            ..SiteConfig::default()
        }
    }

    /// Two slots: one on screen, one two viewports down.
    fn host() -> SlotHost<StaticLayout<SlotId>> {
        let layout = StaticLayout::new(Viewport::new(0.0, 0.0, 1000.0, 800.0))
            .with_element(SlotId(0), Rect::new(0.0, 0.0, 800.0, 450.0))
            .with_element(SlotId(1), Rect::new(0.0, 2500.0, 800.0, 450.0));
        SlotHost::new(config(), 1.0, layout)
    }

    #[test]
    fn registration_waits_for_first_pass() {
        let mut host = host();
        let mut sink = RecordingSink::default();
        let (id, updates) = host.add_slot(SlotSpec::new("public://a.jpg"), &mut sink).unwrap();
        assert_eq!(id, SlotId(0));
        assert!(updates.is_empty());
        assert!(sink.loads.is_empty());

        let updates = host.handle(HostEvent::DocumentReady, &mut sink);
        assert_eq!(
            updates,
            vec![
                SlotUpdate::EnterExtended { slot: SlotId(0) },
                SlotUpdate::ViewportChange {
                    slot: SlotId(0),
                    in_viewport: true
                },
            ]
        );
        assert_eq!(
            sink.requests(),
            vec!["/sites/default/files/styles/responsive_ls_crop_800/public/a.jpg".to_string()]
        );
    }

    #[test]
    fn far_slot_loads_only_after_scrolling_near() {
        let mut host = host();
        let mut sink = RecordingSink::default();
        host.add_slot(SlotSpec::new("public://a.jpg"), &mut sink).unwrap();
        host.add_slot(SlotSpec::new("public://b.jpg"), &mut sink).unwrap();
        host.handle(HostEvent::DocumentReady, &mut sink);
        assert_eq!(sink.requests().len(), 1);

        host.geometry_mut().scroll_to(0.0, 1000.0);
        let updates = host.handle(HostEvent::Scroll, &mut sink);
        assert!(updates.contains(&SlotUpdate::EnterExtended { slot: SlotId(1) }));
        assert_eq!(sink.requests().len(), 2);
        assert!(!host.presentation(SlotId(1)).unwrap().in_viewport);
    }

    #[test]
    fn constrained_profile_loads_at_registration() {
        let mut config = config();
        config.viewport.constrained_device = true;
        let layout = StaticLayout::new(Viewport::new(0.0, 0.0, 1000.0, 800.0))
            .with_element(SlotId(0), Rect::new(0.0, 9000.0, 800.0, 450.0));
        let mut host = SlotHost::new(config, 1.0, layout);
        let mut sink = RecordingSink::default();
        let (_, updates) = host.add_slot(SlotSpec::new("public://a.jpg"), &mut sink).unwrap();
        assert!(updates.contains(&SlotUpdate::EnterExtended { slot: SlotId(0) }));
        assert_eq!(sink.requests().len(), 1);
        assert!(host.presentation(SlotId(0)).unwrap().in_viewport);
    }

    #[test]
    fn invalid_slot_config_fails_fast() {
        let mut host = host();
        let mut sink = RecordingSink::default();
        let mut bad = config();
        bad.buckets.clear();
        let result = host.add_slot(SlotSpec::new("public://a.jpg").with_config(bad), &mut sink);
        assert!(matches!(result, Err(ConfigError::Validation(_))));
        assert!(host.tracker().is_empty());
        assert_eq!(host.slot_ids().count(), 0);
    }

    #[test]
    fn per_slot_viewport_settings_rejected() {
        let mut host = host();
        let mut sink = RecordingSink::default();
        let mut overlay = config();
        overlay.viewport.threshold = 4.0;
        let result = host.add_slot(SlotSpec::new("public://a.jpg").with_config(overlay), &mut sink);
        match result {
            Err(ConfigError::Validation(message)) => assert!(message.contains("viewport")),
            other => panic!("expected a validation error, got {other:?}"),
        }
        assert!(host.tracker().is_empty());
    }

    #[test]
    fn resize_debounces_and_uses_geometry_at_fire_time() {
        let mut host = host();
        let mut sink = RecordingSink::default();
        host.add_slot(SlotSpec::new("public://a.jpg"), &mut sink).unwrap();
        host.handle(HostEvent::DocumentReady, &mut sink);

        host.geometry_mut()
            .set_element(SlotId(0), Rect::new(0.0, 0.0, 1000.0, 562.0));
        host.handle(HostEvent::Resize { now: Duration::ZERO }, &mut sink);
        host.geometry_mut()
            .set_element(SlotId(0), Rect::new(0.0, 0.0, 1600.0, 900.0));
        host.handle(
            HostEvent::Resize {
                now: Duration::from_millis(100),
            },
            &mut sink,
        );
        assert_eq!(host.next_deadline(), Some(Duration::from_millis(350)));

        host.handle(
            HostEvent::Tick {
                now: Duration::from_millis(349),
            },
            &mut sink,
        );
        assert_eq!(sink.requests().len(), 1);
        host.handle(
            HostEvent::Tick {
                now: Duration::from_millis(350),
            },
            &mut sink,
        );
        assert_eq!(
            sink.requests().last().map(String::as_str),
            Some("/sites/default/files/styles/responsive_ls_crop_1600/public/a.jpg")
        );
    }

    #[test]
    fn completion_flows_back_as_ready() {
        let mut host = host();
        let mut sink = RecordingSink::default();
        host.add_slot(SlotSpec::new("public://a.jpg"), &mut sink).unwrap();
        host.handle(HostEvent::DocumentReady, &mut sink);

        let updates = host.handle(
            HostEvent::LoadComplete {
                slot: SlotId(0),
                ticket: RequestTicket(0),
                natural_size: Size::new(800.0, 450.0),
            },
            &mut sink,
        );
        assert!(matches!(&updates[..], [SlotUpdate::Ready(r)] if r.first));
        assert_eq!(
            host.slot(SlotId(0)).unwrap().state().lifecycle,
            Lifecycle::Loaded
        );
    }

    #[test]
    fn failure_is_reported_once() {
        let mut host = host();
        let mut sink = RecordingSink::default();
        host.add_slot(SlotSpec::new("public://a.jpg"), &mut sink).unwrap();
        host.handle(HostEvent::DocumentReady, &mut sink);
        let failed = HostEvent::LoadFailed {
            slot: SlotId(0),
            ticket: RequestTicket(0),
        };
        assert_eq!(host.handle(failed, &mut sink).len(), 1);
        assert!(host.handle(failed, &mut sink).is_empty());
    }

    #[test]
    fn custom_url_builder_is_used() {
        let mut host = host();
        let mut sink = RecordingSink::default();
        let spec = SlotSpec::new("a.jpg").with_urls(|source: &str, v: &ResolvedVariant| {
            format!("https://img.example/{source}?w={}", v.size)
        });
        host.add_slot(spec, &mut sink).unwrap();
        host.handle(HostEvent::DocumentReady, &mut sink);
        assert_eq!(sink.requests(), vec!["https://img.example/a.jpg?w=800".to_string()]);
    }

    #[test]
    fn remove_slot_releases_in_flight() {
        let mut host = host();
        let mut sink = RecordingSink::default();
        let (id, _) = host.add_slot(SlotSpec::new("public://a.jpg"), &mut sink).unwrap();
        host.handle(HostEvent::DocumentReady, &mut sink);
        assert!(host.remove_slot(id, &mut sink));
        assert_eq!(sink.loads.last(), Some(&RecordedLoad::Release { ticket: 0 }));
        assert!(!host.remove_slot(id, &mut sink));
        assert!(host.tracker().is_empty());
    }

    #[test]
    fn disable_tracking_loads_everything() {
        let mut host = host();
        let mut sink = RecordingSink::default();
        host.add_slot(SlotSpec::new("public://a.jpg"), &mut sink).unwrap();
        host.add_slot(SlotSpec::new("public://b.jpg"), &mut sink).unwrap();
        host.disable_tracking(&mut sink);
        assert_eq!(sink.requests().len(), 2);
    }
}
