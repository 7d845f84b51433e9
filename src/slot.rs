//! Per-slot controller: resolution, request bookkeeping and geometry.
//!
//! One [`ImageSlotController`] exists per image slot. It reacts to zone
//! edges, resizes and load completions, and keeps an explicit
//! [`SlotState`] that a rendering adapter projects onto the page through
//! [`Presentation`] and [`GeometryUpdate`]. The controller never touches
//! presentation itself.
//!
//! ## Lifecycle
//!
//! ```text
//!          compute (new variant)        load complete (current ticket)
//!   Idle ───────────────────────► Loading ───────────────────────► Loaded
//!                                  │   ▲                             │
//!                                  └───┘ newer variant supersedes    │
//!                                      ▲                             │
//!                                      └─────────────────────────────┘
//!                                        resize → different variant
//! ```
//!
//! Every request carries a [`RequestTicket`]. Only the ticket of the most
//! recent request can complete it; anything older is released to the sink
//! when superseded and silently dropped if it still arrives.

use crate::config::SiteConfig;
use crate::debounce::Debouncer;
use crate::focal::{FocalPoint, FullSize, GeometryInputs, GeometryUpdate, plan_geometry};
use crate::geometry::Size;
use crate::resolver::{DevicePixelRatio, ResolvedVariant, SizeResolver};
use crate::urls::UrlBuilder;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Index of a slot within its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SlotId(pub usize);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Tags one load request so late completions can be recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RequestTicket(pub u64);

/// A variant load handed to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadRequest {
    pub slot: SlotId,
    pub ticket: RequestTicket,
    pub url: String,
    pub variant: ResolvedVariant,
}

/// Where load requests go. The host answers later through
/// [`ImageSlotController::on_load_complete`] or
/// [`ImageSlotController::on_load_failed`].
pub trait LoadSink {
    fn request(&mut self, request: LoadRequest);

    /// `ticket` has been superseded; its completion handler can be detached.
    fn release(&mut self, slot: SlotId, ticket: RequestTicket);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Lifecycle {
    Idle,
    Loading { ticket: RequestTicket },
    Loaded,
}

/// Everything the controller knows about its slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotState {
    /// Last observed container size.
    pub container_size: Option<Size>,
    /// Last variant requested; equal resolutions are not re-requested.
    pub current_request: Option<ResolvedVariant>,
    /// Natural size of the most recently loaded variant.
    pub loaded_image_size: Option<Size>,
    pub is_first_load: bool,
    pub lifecycle: Lifecycle,
    pub in_viewport: bool,
    /// Last geometry that asked for a change.
    pub geometry: GeometryUpdate,
}

impl Default for SlotState {
    fn default() -> Self {
        Self {
            container_size: None,
            current_request: None,
            loaded_image_size: None,
            is_first_load: true,
            lifecycle: Lifecycle::Idle,
            in_viewport: false,
            geometry: GeometryUpdate::Unchanged,
        }
    }
}

/// Presentation flags derived from [`SlotState`], one per styling hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Presentation {
    pub initial_loading: bool,
    pub loading: bool,
    pub loaded: bool,
    pub in_viewport: bool,
}

/// Sent to image-ready listeners after a load is applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageReady {
    pub slot: SlotId,
    pub natural_size: Size,
    /// This was the slot's first successful load.
    pub first: bool,
    pub geometry: GeometryUpdate,
}

/// Result of one compute pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeOutcome {
    OutsideZone,
    Unmeasurable,
    /// Resolution matched the current request.
    Unchanged,
    Requested(RequestTicket),
}

/// Per-slot settings that do not change after registration.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotSettings {
    /// Original asset reference, e.g. `public://gallery/dawn.jpg`.
    pub source: String,
    pub focal_point: Option<FocalPoint>,
    pub full_size: Option<FullSize>,
    pub debounce: Duration,
    pub forget_when_outside: bool,
    pub device_pixel_ratio: DevicePixelRatio,
}

impl SlotSettings {
    /// Read slot settings from an already validated config.
    pub fn from_config(source: impl Into<String>, config: &SiteConfig, raw_dpr: f64) -> Self {
        let device_pixel_ratio = if config.resolver.snap_device_pixel_ratio {
            DevicePixelRatio::snapped(raw_dpr)
        } else {
            DevicePixelRatio::exact(raw_dpr)
        };
        Self {
            source: source.into(),
            focal_point: config.slot.focal_point.map(|[x, y]| FocalPoint::new(x, y)),
            full_size: config
                .slot
                .full_size
                .map(|[width, height]| FullSize { width, height }),
            debounce: Duration::from_millis(config.slot.debounce_ms),
            forget_when_outside: config.slot.forget_when_outside,
            device_pixel_ratio,
        }
    }
}

type ReadyListener = Box<dyn FnMut(&ImageReady)>;

pub struct ImageSlotController {
    id: SlotId,
    settings: SlotSettings,
    resolver: SizeResolver,
    urls: Box<dyn UrlBuilder>,
    state: SlotState,
    debounce: Debouncer,
    next_ticket: u64,
    listeners: Vec<ReadyListener>,
}

impl ImageSlotController {
    pub fn new(
        id: SlotId,
        settings: SlotSettings,
        resolver: SizeResolver,
        urls: Box<dyn UrlBuilder>,
    ) -> Self {
        let debounce = Debouncer::new(settings.debounce);
        Self {
            id,
            settings,
            resolver,
            urls,
            state: SlotState::default(),
            debounce,
            next_ticket: 0,
            listeners: Vec::new(),
        }
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    pub fn settings(&self) -> &SlotSettings {
        &self.settings
    }

    pub fn state(&self) -> &SlotState {
        &self.state
    }

    pub fn resolver(&self) -> &SizeResolver {
        &self.resolver
    }

    /// Earliest time a debounced compute is waiting for.
    pub fn pending_compute_at(&self) -> Option<Duration> {
        self.debounce.due_at()
    }

    pub fn presentation(&self) -> Presentation {
        let loading = matches!(self.state.lifecycle, Lifecycle::Loading { .. });
        Presentation {
            initial_loading: loading && self.state.is_first_load,
            loading: loading && !self.state.is_first_load,
            loaded: self.state.lifecycle == Lifecycle::Loaded,
            in_viewport: self.state.in_viewport,
        }
    }

    /// Register a listener for completed loads.
    pub fn on_image_ready(&mut self, listener: impl FnMut(&ImageReady) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Resolve the container and request a new variant if it differs from
    /// the current request.
    pub fn compute(
        &mut self,
        in_extended: bool,
        container: Option<Size>,
        sink: &mut impl LoadSink,
    ) -> ComputeOutcome {
        if !in_extended {
            return ComputeOutcome::OutsideZone;
        }
        if let Some(size) = container {
            self.state.container_size = Some(size);
        }
        let Some(variant) = container
            .and_then(|size| self.resolver.resolve(size, self.settings.device_pixel_ratio))
        else {
            tracing::trace!(slot = %self.id, "container not measurable, compute skipped");
            return ComputeOutcome::Unmeasurable;
        };

        if self.state.current_request.as_ref() == Some(&variant) {
            return ComputeOutcome::Unchanged;
        }

        self.release_in_flight(sink);

        let ticket = RequestTicket(self.next_ticket);
        self.next_ticket += 1;
        let url = self.urls.build(&self.settings.source, &variant);
        tracing::debug!(
            slot = %self.id,
            bucket = %variant.bucket,
            size = variant.size,
            %url,
            "requesting variant"
        );

        self.state.current_request = Some(variant.clone());
        self.state.lifecycle = Lifecycle::Loading { ticket };
        sink.request(LoadRequest {
            slot: self.id,
            ticket,
            url,
            variant,
        });
        ComputeOutcome::Requested(ticket)
    }

    pub fn on_enter_extended(
        &mut self,
        container: Option<Size>,
        sink: &mut impl LoadSink,
    ) -> ComputeOutcome {
        self.compute(true, container, sink)
    }

    /// Leaving the preload zone only matters when the slot is configured to
    /// forget its image: the in-flight request is released and re-entry
    /// will request again.
    pub fn on_exit_extended(&mut self, sink: &mut impl LoadSink) {
        if !self.settings.forget_when_outside {
            return;
        }
        self.release_in_flight(sink);
        self.state.current_request = None;
        self.state.lifecycle = self.settled_lifecycle();
    }

    pub fn on_viewport_change(&mut self, in_viewport: bool) {
        self.state.in_viewport = in_viewport;
    }

    /// Re-fit geometry now and schedule a debounced compute.
    pub fn on_resize(&mut self, now: Duration, container: Option<Size>) -> GeometryUpdate {
        let update = self.apply_focal_point(container);
        let task = self.debounce.schedule(now);
        tracing::trace!(slot = %self.id, ?task, "compute scheduled");
        update
    }

    /// Run the debounced compute if it is due at `now`.
    pub fn tick(
        &mut self,
        now: Duration,
        in_extended: bool,
        container: Option<Size>,
        sink: &mut impl LoadSink,
    ) -> Option<ComputeOutcome> {
        self.debounce.poll(now)?;
        Some(self.compute(in_extended, container, sink))
    }

    /// Apply a finished load. Completions for anything but the current
    /// ticket are ignored.
    pub fn on_load_complete(
        &mut self,
        ticket: RequestTicket,
        natural_size: Size,
        container: Option<Size>,
    ) -> Option<ImageReady> {
        if self.state.lifecycle != (Lifecycle::Loading { ticket }) {
            tracing::debug!(slot = %self.id, ?ticket, "stale completion discarded");
            return None;
        }

        let first = self.state.is_first_load;
        self.state.loaded_image_size = Some(natural_size);
        self.state.lifecycle = Lifecycle::Loaded;
        self.state.is_first_load = false;
        let geometry = self.apply_focal_point(container);

        let ready = ImageReady {
            slot: self.id,
            natural_size,
            first,
            geometry,
        };
        for listener in &mut self.listeners {
            listener(&ready);
        }
        Some(ready)
    }

    /// A load failed. The requested variant is forgotten so the next
    /// compute trigger retries; whatever was shown before stays.
    pub fn on_load_failed(&mut self, ticket: RequestTicket) -> bool {
        if self.state.lifecycle != (Lifecycle::Loading { ticket }) {
            return false;
        }
        tracing::warn!(
            slot = %self.id,
            ?ticket,
            source = %self.settings.source,
            "variant failed to load"
        );
        self.state.current_request = None;
        self.state.lifecycle = self.settled_lifecycle();
        true
    }

    /// Re-apply geometry and recompute unconditionally.
    pub fn refresh(
        &mut self,
        in_extended: bool,
        container: Option<Size>,
        sink: &mut impl LoadSink,
    ) -> (GeometryUpdate, ComputeOutcome) {
        let update = self.apply_focal_point(container);
        (update, self.compute(in_extended, container, sink))
    }

    /// Compute the geometry for the current container and image.
    pub fn apply_focal_point(&mut self, container: Option<Size>) -> GeometryUpdate {
        if let Some(size) = container {
            self.state.container_size = Some(size);
        }
        let update = plan_geometry(GeometryInputs {
            container,
            loaded_image: self.state.loaded_image_size,
            focal_point: self.settings.focal_point,
            full_size: self.settings.full_size,
            first_load: self.state.is_first_load,
        });
        if update != GeometryUpdate::Unchanged {
            self.state.geometry = update;
        }
        update
    }

    /// Release everything before the slot goes away.
    pub fn teardown(&mut self, sink: &mut impl LoadSink) {
        self.debounce.cancel();
        self.release_in_flight(sink);
    }

    fn release_in_flight(&mut self, sink: &mut impl LoadSink) {
        if let Lifecycle::Loading { ticket } = self.state.lifecycle {
            tracing::debug!(slot = %self.id, ?ticket, "in-flight request released");
            sink.release(self.id, ticket);
        }
    }

    fn settled_lifecycle(&self) -> Lifecycle {
        if self.state.loaded_image_size.is_some() {
            Lifecycle::Loaded
        } else {
            Lifecycle::Idle
        }
    }
}

impl fmt::Debug for ImageSlotController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageSlotController")
            .field("id", &self.id)
            .field("settings", &self.settings)
            .field("state", &self.state)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::focal::CoverGeometry;
    use crate::test_helpers::{RecordedLoad, RecordingSink, landscape_resolver};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn settings() -> SlotSettings {
        SlotSettings {
            source: "public://a.jpg".into(),
            focal_point: None,
            full_size: None,
            debounce: ms(250),
            forget_when_outside: false,
            device_pixel_ratio: DevicePixelRatio::ONE,
        }
    }

    fn controller(settings: SlotSettings) -> ImageSlotController {
        let urls = |source: &str, v: &ResolvedVariant| format!("{source}:{}:{}", v.bucket, v.size);
        ImageSlotController::new(SlotId(0), settings, landscape_resolver(), Box::new(urls))
    }

    fn container(w: f64, h: f64) -> Option<Size> {
        Some(Size::new(w, h))
    }

    // =========================================================================
    // compute
    // =========================================================================

    #[test]
    fn compute_requests_resolved_variant() {
        let mut slot = controller(settings());
        let mut sink = RecordingSink::default();
        let outcome = slot.compute(true, container(800.0, 450.0), &mut sink);
        assert_eq!(outcome, ComputeOutcome::Requested(RequestTicket(0)));
        assert_eq!(
            sink.loads,
            vec![RecordedLoad::Request {
                ticket: 0,
                url: "public://a.jpg:landscape:800".into()
            }]
        );
        assert!(slot.presentation().initial_loading);
    }

    #[test]
    fn identical_resolution_is_not_requested_twice() {
        let mut slot = controller(settings());
        let mut sink = RecordingSink::default();
        slot.compute(true, container(800.0, 450.0), &mut sink);
        // 810 snaps back onto the same 800 step.
        let outcome = slot.compute(true, container(810.0, 455.0), &mut sink);
        assert_eq!(outcome, ComputeOutcome::Unchanged);
        assert_eq!(sink.requests().len(), 1);
    }

    #[test]
    fn zero_width_container_never_requests() {
        let mut slot = controller(settings());
        let mut sink = RecordingSink::default();
        assert_eq!(
            slot.compute(true, container(0.0, 450.0), &mut sink),
            ComputeOutcome::Unmeasurable
        );
        assert_eq!(
            slot.compute(true, None, &mut sink),
            ComputeOutcome::Unmeasurable
        );
        assert!(sink.loads.is_empty());
        assert_eq!(slot.state().lifecycle, Lifecycle::Idle);
    }

    #[test]
    fn outside_extended_zone_never_requests() {
        let mut slot = controller(settings());
        let mut sink = RecordingSink::default();
        assert_eq!(
            slot.compute(false, container(800.0, 450.0), &mut sink),
            ComputeOutcome::OutsideZone
        );
        assert!(sink.loads.is_empty());
    }

    #[test]
    fn newer_request_releases_in_flight_one() {
        let mut slot = controller(settings());
        let mut sink = RecordingSink::default();
        slot.compute(true, container(800.0, 450.0), &mut sink);
        slot.compute(true, container(1600.0, 900.0), &mut sink);
        assert_eq!(
            sink.loads,
            vec![
                RecordedLoad::Request {
                    ticket: 0,
                    url: "public://a.jpg:landscape:800".into()
                },
                RecordedLoad::Release { ticket: 0 },
                RecordedLoad::Request {
                    ticket: 1,
                    url: "public://a.jpg:landscape:1600".into()
                },
            ]
        );
    }

    // =========================================================================
    // Load completion
    // =========================================================================

    #[test]
    fn stale_completion_is_discarded() {
        let mut slot = controller(settings());
        let mut sink = RecordingSink::default();
        slot.compute(true, container(800.0, 450.0), &mut sink);
        slot.compute(true, container(1600.0, 900.0), &mut sink);

        let late = slot.on_load_complete(RequestTicket(0), Size::new(800.0, 450.0), None);
        assert!(late.is_none());
        assert_eq!(
            slot.state().lifecycle,
            Lifecycle::Loading {
                ticket: RequestTicket(1)
            }
        );

        let ready = slot
            .on_load_complete(RequestTicket(1), Size::new(1600.0, 900.0), None)
            .unwrap();
        assert!(ready.first);
        assert_eq!(slot.state().lifecycle, Lifecycle::Loaded);
        assert_eq!(
            slot.state().loaded_image_size,
            Some(Size::new(1600.0, 900.0))
        );
    }

    #[test]
    fn completion_clears_first_load_and_notifies() {
        let mut slot = controller(settings());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink_seen = Rc::clone(&seen);
        slot.on_image_ready(move |ready| sink_seen.borrow_mut().push(ready.first));

        let mut sink = RecordingSink::default();
        slot.compute(true, container(800.0, 450.0), &mut sink);
        slot.on_load_complete(RequestTicket(0), Size::new(800.0, 450.0), None);
        slot.compute(true, container(1600.0, 900.0), &mut sink);
        assert!(slot.presentation().loading);
        assert!(!slot.presentation().initial_loading);
        slot.on_load_complete(RequestTicket(1), Size::new(1600.0, 900.0), None);

        assert_eq!(*seen.borrow(), vec![true, false]);
        assert!(slot.presentation().loaded);
    }

    #[test]
    fn completion_applies_focal_geometry() {
        let mut slot = controller(SlotSettings {
            focal_point: Some(FocalPoint::new(100.0, 50.0)),
            ..settings()
        });
        let mut sink = RecordingSink::default();
        slot.compute(true, container(300.0, 200.0), &mut sink);
        let ready = slot
            .on_load_complete(RequestTicket(0), Size::new(100.0, 50.0), container(300.0, 200.0))
            .unwrap();
        assert_eq!(
            ready.geometry,
            GeometryUpdate::Cover(CoverGeometry {
                left: -100,
                top: 0,
                width: 400,
                height: 200
            })
        );
        assert_eq!(slot.state().geometry, ready.geometry);
    }

    #[test]
    fn failed_load_allows_retry() {
        let mut slot = controller(settings());
        let mut sink = RecordingSink::default();
        slot.compute(true, container(800.0, 450.0), &mut sink);
        assert!(!slot.on_load_failed(RequestTicket(7)));
        assert!(slot.on_load_failed(RequestTicket(0)));
        assert_eq!(slot.state().lifecycle, Lifecycle::Idle);
        assert_eq!(slot.state().current_request, None);

        let outcome = slot.compute(true, container(800.0, 450.0), &mut sink);
        assert_eq!(outcome, ComputeOutcome::Requested(RequestTicket(1)));
    }

    // =========================================================================
    // Resize debounce
    // =========================================================================

    #[test]
    fn two_resizes_inside_window_compute_once_with_latest_geometry() {
        let mut slot = controller(settings());
        let mut sink = RecordingSink::default();

        slot.on_resize(ms(0), container(800.0, 450.0));
        slot.on_resize(ms(100), container(1000.0, 562.0));
        assert_eq!(slot.tick(ms(250), true, container(1600.0, 900.0), &mut sink), None);

        let fired = slot.tick(ms(350), true, container(1600.0, 900.0), &mut sink);
        assert_eq!(fired, Some(ComputeOutcome::Requested(RequestTicket(0))));
        assert_eq!(slot.tick(ms(1000), true, container(1600.0, 900.0), &mut sink), None);
        assert_eq!(
            sink.requests(),
            vec!["public://a.jpg:landscape:1600".to_string()]
        );
    }

    #[test]
    fn resize_applies_geometry_immediately() {
        let mut slot = controller(SlotSettings {
            full_size: Some(FullSize {
                width: 1600,
                height: 900,
            }),
            ..settings()
        });
        let update = slot.on_resize(ms(0), container(800.0, 600.0));
        assert_eq!(
            update,
            GeometryUpdate::Placeholder {
                width: 800,
                height: 450
            }
        );
        assert!(slot.pending_compute_at().is_some());
    }

    // =========================================================================
    // Zone callbacks
    // =========================================================================

    #[test]
    fn viewport_change_only_touches_presentation() {
        let mut slot = controller(settings());
        slot.on_viewport_change(true);
        assert!(slot.presentation().in_viewport);
        assert_eq!(slot.state().lifecycle, Lifecycle::Idle);
        slot.on_viewport_change(false);
        assert!(!slot.presentation().in_viewport);
    }

    #[test]
    fn exit_without_forget_keeps_request() {
        let mut slot = controller(settings());
        let mut sink = RecordingSink::default();
        slot.on_enter_extended(container(800.0, 450.0), &mut sink);
        slot.on_exit_extended(&mut sink);
        assert_eq!(sink.loads.len(), 1);
        assert!(slot.state().current_request.is_some());
    }

    #[test]
    fn exit_with_forget_releases_and_rerequests_on_entry() {
        let mut slot = controller(SlotSettings {
            forget_when_outside: true,
            ..settings()
        });
        let mut sink = RecordingSink::default();
        slot.on_enter_extended(container(800.0, 450.0), &mut sink);
        slot.on_exit_extended(&mut sink);
        assert_eq!(slot.state().lifecycle, Lifecycle::Idle);
        slot.on_enter_extended(container(800.0, 450.0), &mut sink);
        assert_eq!(
            sink.loads,
            vec![
                RecordedLoad::Request {
                    ticket: 0,
                    url: "public://a.jpg:landscape:800".into()
                },
                RecordedLoad::Release { ticket: 0 },
                RecordedLoad::Request {
                    ticket: 1,
                    url: "public://a.jpg:landscape:800".into()
                },
            ]
        );
    }

    #[test]
    fn refresh_recomputes_and_reapplies() {
        let mut slot = controller(settings());
        let mut sink = RecordingSink::default();
        let (update, outcome) = slot.refresh(true, container(800.0, 450.0), &mut sink);
        assert_eq!(update, GeometryUpdate::Unchanged);
        assert!(matches!(outcome, ComputeOutcome::Requested(_)));
    }

    #[test]
    fn teardown_releases_and_cancels() {
        let mut slot = controller(settings());
        let mut sink = RecordingSink::default();
        slot.compute(true, container(800.0, 450.0), &mut sink);
        slot.on_resize(ms(0), container(800.0, 450.0));
        slot.teardown(&mut sink);
        assert_eq!(sink.loads.last(), Some(&RecordedLoad::Release { ticket: 0 }));
        assert_eq!(slot.pending_compute_at(), None);
    }
}
