//! Scripted pages for the `simulate` command.
//!
//! A scenario file describes a page (viewport plus slot boxes) and a list of
//! timed steps. [`Scenario::run`] drives a [`SlotHost`] over a
//! [`StaticLayout`] through those steps and records what every step caused:
//! zone edges, load requests and releases, geometry, completions.
//!
//! ```toml
//! [page]
//! width = 1000
//! height = 800
//! device_pixel_ratio = 2.0
//!
//! [[slots]]
//! name = "hero"
//! source = "public://hero.jpg"
//! rect = [0, 0, 1000, 560]
//! natural_size = [2000, 1125]
//!
//! [slots.config.slot]          # overlay merged on top of the site config
//! focal_point = [50.0, 30.0]
//!
//! [[steps]]
//! action = "document_ready"
//!
//! [[steps]]
//! at_ms = 400
//! action = "scroll"
//! to = [0, 1200]
//!
//! [[steps]]
//! action = "complete_loads"
//! ```
//!
//! Steps run in order. `at_ms` is absolute and may only move forward; moving
//! the clock first fires any debounced compute that came due.

use crate::config::{ConfigError, SiteConfig, resolve_config};
use crate::geometry::{Rect, Size, Viewport};
use crate::host::{HostEvent, SlotHost, SlotSpec, SlotUpdate};
use crate::slot::{LoadRequest, LoadSink, Presentation, RequestTicket, SlotId, SlotState};
use crate::viewport::GeometryProvider;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::hash::Hash;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScenarioError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML encode error: {0}")]
    Encode(#[from] toml::ser::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("unknown slot '{0}'")]
    UnknownSlot(String),
    #[error("slot '{0}' is declared more than once")]
    DuplicateSlot(String),
    #[error("step {index}: {message}")]
    Script { index: usize, message: String },
}

// =============================================================================
// Static layout
// =============================================================================

/// Fixed geometry: one viewport and a box per key, changed only by hand.
#[derive(Debug, Clone)]
pub struct StaticLayout<K> {
    viewport: Option<Viewport>,
    elements: HashMap<K, Rect>,
}

impl<K: Eq + Hash> StaticLayout<K> {
    pub fn new(viewport: Viewport) -> Self {
        Self {
            viewport: Some(viewport),
            elements: HashMap::new(),
        }
    }

    /// A layout with no measurable viewport yet.
    pub fn unmeasured() -> Self {
        Self {
            viewport: None,
            elements: HashMap::new(),
        }
    }

    pub fn with_element(mut self, key: K, rect: Rect) -> Self {
        self.elements.insert(key, rect);
        self
    }

    pub fn set_element(&mut self, key: K, rect: Rect) {
        self.elements.insert(key, rect);
    }

    pub fn remove_element(&mut self, key: &K) -> Option<Rect> {
        self.elements.remove(key)
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = Some(viewport);
    }

    pub fn scroll_to(&mut self, left: f64, top: f64) {
        let vp = self.viewport.get_or_insert_with(Viewport::default);
        vp.scroll_left = left;
        vp.scroll_top = top;
    }

    pub fn resize(&mut self, width: f64, height: f64) {
        let vp = self.viewport.get_or_insert_with(Viewport::default);
        vp.width = width;
        vp.height = height;
    }
}

impl<K: Eq + Hash> GeometryProvider<K> for StaticLayout<K> {
    fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    fn element_box(&self, element: &K) -> Option<Rect> {
        self.elements.get(element).copied()
    }
}

// =============================================================================
// Scenario file
// =============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    pub page: PageSpec,
    #[serde(default)]
    pub slots: Vec<SlotEntry>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PageSpec {
    pub width: f64,
    pub height: f64,
    /// Initial scroll offset `[left, top]`.
    #[serde(default)]
    pub scroll: [f64; 2],
    #[serde(default = "default_dpr")]
    pub device_pixel_ratio: f64,
}

fn default_dpr() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SlotEntry {
    pub name: String,
    pub source: String,
    /// Document box `[left, top, width, height]`.
    pub rect: [f64; 4],
    /// Pixel size loads complete with. Defaults to the requested size at
    /// the container's aspect ratio.
    #[serde(default)]
    pub natural_size: Option<[f64; 2]>,
    /// Config overlay for this slot only.
    #[serde(default)]
    pub config: Option<toml::Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Step {
    /// Absolute time of the step; unset keeps the previous step's time.
    #[serde(default)]
    pub at_ms: Option<u64>,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    DocumentReady,
    Scroll { to: [f64; 2] },
    /// Resize the viewport, optionally moving slot boxes with it.
    Resize {
        viewport: [f64; 2],
        #[serde(default)]
        slots: HashMap<String, [f64; 4]>,
    },
    /// Move a slot without a resize or scroll.
    Move { slot: String, rect: [f64; 4] },
    Invalidate,
    /// Only advance the clock.
    Wait,
    CompleteLoads {
        #[serde(default)]
        slot: Option<String>,
    },
    FailLoads {
        #[serde(default)]
        slot: Option<String>,
    },
    Refresh { slot: String },
    Remove { slot: String },
    DisableTracking,
}

impl Scenario {
    pub fn from_toml(content: &str) -> Result<Self, ScenarioError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Run every step against `site` and report what happened.
    pub fn run(&self, site: &SiteConfig) -> Result<ScenarioReport, ScenarioError> {
        let base = toml::Value::try_from(site)?;
        let [left, top] = self.page.scroll;
        let layout = StaticLayout::new(Viewport::new(left, top, self.page.width, self.page.height));
        let mut host = SlotHost::new(site.clone(), self.page.device_pixel_ratio, layout);
        let mut sink = PendingLoads::default();
        let mut names = SlotNames::default();
        let mut steps = Vec::with_capacity(self.slots.len() + self.steps.len());

        for entry in &self.slots {
            if names.contains(&entry.name) {
                return Err(ScenarioError::DuplicateSlot(entry.name.clone()));
            }
            let config = match &entry.config {
                Some(overlay) => resolve_config(base.clone(), Some(overlay.clone()))?,
                None => site.clone(),
            };
            let id = SlotId(names.len());
            host.geometry_mut().set_element(id, rect(entry.rect));
            let spec = SlotSpec::new(entry.source.clone()).with_config(config);
            let (registered, updates) = host.add_slot(spec, &mut sink)?;
            debug_assert_eq!(registered, id);
            names.insert(entry, registered);
            steps.push(StepReport::new(
                0,
                format!("register {}", entry.name),
                updates,
                sink.drain_log(),
            ));
        }

        let mut now = Duration::ZERO;
        for (index, step) in self.steps.iter().enumerate() {
            if let Some(at) = step.at_ms.map(Duration::from_millis) {
                if at < now {
                    return Err(ScenarioError::Script {
                        index,
                        message: format!("at_ms {} is before {}", at.as_millis(), now.as_millis()),
                    });
                }
                now = at;
            }
            let mut updates = host.handle(HostEvent::Tick { now }, &mut sink);
            updates.extend(self.apply(&step.action, now, &mut host, &mut sink, &names)?);
            steps.push(StepReport::new(
                now.as_millis() as u64,
                step.action.label(),
                updates,
                sink.drain_log(),
            ));
        }

        // Let any trailing debounce settle.
        if let Some(deadline) = host.next_deadline() {
            let updates = host.handle(HostEvent::Tick { now: deadline }, &mut sink);
            steps.push(StepReport::new(
                deadline.as_millis() as u64,
                "settle".to_string(),
                updates,
                sink.drain_log(),
            ));
        }

        let slots = names
            .iter()
            .filter_map(|(name, id)| {
                host.slot(id).map(|slot| SlotSummary {
                    name: name.to_string(),
                    slot: id,
                    state: slot.state().clone(),
                    presentation: slot.presentation(),
                })
            })
            .collect();
        Ok(ScenarioReport {
            names: names.order,
            steps,
            slots,
        })
    }

    fn apply(
        &self,
        action: &Action,
        now: Duration,
        host: &mut SlotHost<StaticLayout<SlotId>>,
        sink: &mut PendingLoads,
        names: &SlotNames,
    ) -> Result<Vec<SlotUpdate>, ScenarioError> {
        let updates = match action {
            Action::DocumentReady => host.handle(HostEvent::DocumentReady, sink),
            Action::Scroll { to: [left, top] } => {
                host.geometry_mut().scroll_to(*left, *top);
                host.handle(HostEvent::Scroll, sink)
            }
            Action::Resize {
                viewport: [width, height],
                slots,
            } => {
                host.geometry_mut().resize(*width, *height);
                for (name, r) in slots {
                    let id = names.get(name)?;
                    host.geometry_mut().set_element(id, rect(*r));
                }
                host.handle(HostEvent::Resize { now }, sink)
            }
            Action::Move { slot, rect: r } => {
                let id = names.get(slot)?;
                host.geometry_mut().set_element(id, rect(*r));
                Vec::new()
            }
            Action::Invalidate => host.handle(HostEvent::Invalidate, sink),
            Action::Wait => Vec::new(),
            Action::CompleteLoads { slot } => {
                let filter = slot.as_deref().map(|n| names.get(n)).transpose()?;
                let mut updates = Vec::new();
                for request in sink.take_pending(filter) {
                    let natural_size = self.natural_size(host, names, &request);
                    sink.log.push(LoadEvent::Completed {
                        slot: request.slot,
                        ticket: request.ticket,
                    });
                    updates.extend(host.handle(
                        HostEvent::LoadComplete {
                            slot: request.slot,
                            ticket: request.ticket,
                            natural_size,
                        },
                        sink,
                    ));
                }
                updates
            }
            Action::FailLoads { slot } => {
                let filter = slot.as_deref().map(|n| names.get(n)).transpose()?;
                let mut updates = Vec::new();
                for request in sink.take_pending(filter) {
                    updates.extend(host.handle(
                        HostEvent::LoadFailed {
                            slot: request.slot,
                            ticket: request.ticket,
                        },
                        sink,
                    ));
                }
                updates
            }
            Action::Refresh { slot } => {
                let id = names.get(slot)?;
                host.handle(HostEvent::Refresh { slot: id }, sink)
            }
            Action::Remove { slot } => {
                let id = names.get(slot)?;
                host.remove_slot(id, sink);
                host.geometry_mut().remove_element(&id);
                Vec::new()
            }
            Action::DisableTracking => host.disable_tracking(sink),
        };
        Ok(updates)
    }

    fn natural_size(
        &self,
        host: &SlotHost<StaticLayout<SlotId>>,
        names: &SlotNames,
        request: &LoadRequest,
    ) -> Size {
        let declared = names
            .entry_index(request.slot)
            .and_then(|i| self.slots.get(i))
            .and_then(|entry| entry.natural_size);
        if let Some([width, height]) = declared {
            return Size::new(width, height);
        }
        let width = request.variant.size as f64;
        let aspect = host
            .geometry()
            .element_box(&request.slot)
            .map(|r| r.size().aspect_ratio())
            .unwrap_or(1.0);
        Size::new(width, (width / aspect).round())
    }
}

impl Action {
    fn label(&self) -> String {
        match self {
            Action::DocumentReady => "document ready".into(),
            Action::Scroll { to: [x, y] } => format!("scroll to {x},{y}"),
            Action::Resize {
                viewport: [w, h], ..
            } => format!("resize to {w}x{h}"),
            Action::Move { slot, .. } => format!("move {slot}"),
            Action::Invalidate => "invalidate".into(),
            Action::Wait => "wait".into(),
            Action::CompleteLoads { slot: None } => "complete loads".into(),
            Action::CompleteLoads { slot: Some(s) } => format!("complete loads for {s}"),
            Action::FailLoads { slot: None } => "fail loads".into(),
            Action::FailLoads { slot: Some(s) } => format!("fail loads for {s}"),
            Action::Refresh { slot } => format!("refresh {slot}"),
            Action::Remove { slot } => format!("remove {slot}"),
            Action::DisableTracking => "disable tracking".into(),
        }
    }
}

fn rect([left, top, width, height]: [f64; 4]) -> Rect {
    Rect::new(left, top, width, height)
}

// =============================================================================
// Slot names
// =============================================================================

#[derive(Debug, Default)]
struct SlotNames {
    by_name: HashMap<String, SlotId>,
    /// Declaration order; `SlotId(i)` came from `order[i]`.
    order: Vec<String>,
}

impl SlotNames {
    fn len(&self) -> usize {
        self.order.len()
    }

    fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    fn insert(&mut self, entry: &SlotEntry, id: SlotId) {
        self.by_name.insert(entry.name.clone(), id);
        self.order.push(entry.name.clone());
    }

    fn get(&self, name: &str) -> Result<SlotId, ScenarioError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| ScenarioError::UnknownSlot(name.to_string()))
    }

    fn entry_index(&self, id: SlotId) -> Option<usize> {
        (id.0 < self.order.len()).then_some(id.0)
    }

    fn iter(&self) -> impl Iterator<Item = (&str, SlotId)> {
        self.order
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), SlotId(i)))
    }
}

// =============================================================================
// Load bookkeeping
// =============================================================================

/// Request-side events recorded by the runner's sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "load", rename_all = "snake_case")]
pub enum LoadEvent {
    Requested(LoadRequest),
    Released { slot: SlotId, ticket: RequestTicket },
    Completed { slot: SlotId, ticket: RequestTicket },
}

/// Sink that keeps unanswered requests until a step completes or fails them.
#[derive(Debug, Default)]
struct PendingLoads {
    pending: Vec<LoadRequest>,
    log: Vec<LoadEvent>,
}

impl PendingLoads {
    fn take_pending(&mut self, slot: Option<SlotId>) -> Vec<LoadRequest> {
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|r| slot.is_none_or(|s| r.slot == s));
        self.pending = kept;
        taken
    }

    fn drain_log(&mut self) -> Vec<LoadEvent> {
        std::mem::take(&mut self.log)
    }
}

impl LoadSink for PendingLoads {
    fn request(&mut self, request: LoadRequest) {
        self.log.push(LoadEvent::Requested(request.clone()));
        self.pending.push(request);
    }

    fn release(&mut self, slot: SlotId, ticket: RequestTicket) {
        self.pending.retain(|r| !(r.slot == slot && r.ticket == ticket));
        self.log.push(LoadEvent::Released { slot, ticket });
    }
}

// =============================================================================
// Report
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    pub at_ms: u64,
    pub label: String,
    pub loads: Vec<LoadEvent>,
    pub updates: Vec<SlotUpdate>,
}

impl StepReport {
    fn new(at_ms: u64, label: String, updates: Vec<SlotUpdate>, loads: Vec<LoadEvent>) -> Self {
        Self {
            at_ms,
            label,
            loads,
            updates,
        }
    }

    pub fn is_quiet(&self) -> bool {
        self.loads.is_empty() && self.updates.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotSummary {
    pub name: String,
    pub slot: SlotId,
    pub state: SlotState,
    pub presentation: Presentation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioReport {
    /// Slot names in declaration order; `SlotId(i)` is `names[i]`.
    pub names: Vec<String>,
    pub steps: Vec<StepReport>,
    /// Final state of every slot still registered, in declaration order.
    pub slots: Vec<SlotSummary>,
}

impl ScenarioReport {
    pub fn slot_name(&self, id: SlotId) -> String {
        self.names
            .get(id.0)
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }

    /// Every URL requested over the run, in order.
    pub fn requested_urls(&self) -> Vec<&str> {
        self.steps
            .iter()
            .flat_map(|s| &s.loads)
            .filter_map(|l| match l {
                LoadEvent::Requested(r) => Some(r.url.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn slot(&self, name: &str) -> Option<&SlotSummary> {
        self.slots.iter().find(|s| s.name == name)
    }
}
