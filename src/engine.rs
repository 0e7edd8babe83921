use log::{debug, info, trace};
use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};

use crate::catalog::BeaconCatalog;
use crate::config::Config;
use crate::distance::{distance_category, format_distance, map_strength_percent, Reliability};
use crate::events::{SensorEvent, SensorKind};
use crate::fusion::{bearing, relative_angle};
use crate::output::{HapticIntensity, OutputRequest};
use crate::registry::{BeaconObservation, BeaconRegistry, ObserveOutcome, TrackedBeacon};
use crate::selection::{SelectionChange, SelectionPolicy};
use crate::sensors::{GeoPoint, SensorStore};
use crate::session::{ScanSession, ScanState, StopReason};
use crate::state::GuidanceState;
use crate::throttle::GuidanceThrottler;

pub const MSG_GUIDANCE_STARTED: &str = "Audio guidance started.";
pub const MSG_GUIDANCE_STOPPED: &str = "Audio guidance stopped.";
pub const MSG_SCAN_STARTED: &str = "Scanning for beacons.";
pub const MSG_SCAN_STOPPED: &str = "Scan stopped.";
pub const ALERT_NO_BEACONS: &str = "No beacons detected";
pub const ALERT_CALIBRATION: &str = "Compass calibration";
pub const ALERT_SENSOR_UNAVAILABLE: &str = "Sensor unavailable";

/// Display-ready view of the selected beacon
#[derive(Debug, Clone, PartialEq)]
pub struct BeaconStatus {
    pub id: String,
    pub name: String,
    pub distance_m: f64,
    pub strength_percent: u8,
    pub reliability: Reliability,
    /// Readings currently in the smoothing window
    pub samples: usize,
}

impl From<&TrackedBeacon> for BeaconStatus {
    fn from(b: &TrackedBeacon) -> Self {
        BeaconStatus {
            id: b.id.clone(),
            name: b.display_name.clone(),
            distance_m: b.estimated_distance,
            strength_percent: map_strength_percent(b.smoothed_rssi),
            reliability: b.reliability,
            samples: b.window_len(),
        }
    }
}

/// Point-in-time view of the engine, for status lines
#[derive(Debug, Clone, PartialEq)]
pub struct GuidanceSnapshot {
    pub scan_state: ScanState,
    pub tracked: usize,
    pub selected: Option<BeaconStatus>,
    /// Every tracked beacon, nearest first
    pub ranked: Vec<BeaconStatus>,
    pub direction_angle: Option<f64>,
    pub heading: Option<f64>,
    pub position: Option<GeoPoint>,
}

impl fmt::Display for GuidanceSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scan={} tracked={}", self.scan_state, self.tracked)?;
        match &self.selected {
            Some(b) => write!(
                f,
                " target={} ({}) {} [{}] signal={}% reliability={}",
                b.name,
                b.id,
                format_distance(b.distance_m),
                distance_category(b.distance_m),
                b.strength_percent,
                b.reliability
            )?,
            None => write!(f, " target=none")?,
        }
        if let Some(angle) = self.direction_angle {
            write!(f, " direction={:.0}deg", angle)?;
        }
        Ok(())
    }
}

/// Single owner of the registry, sensor store and guidance state.
///
/// Every method takes `now` explicitly; the engine never reads the clock for
/// cooldowns or timeouts.
pub struct GuidanceEngine {
    catalog: BeaconCatalog,
    registry: BeaconRegistry,
    sensors: SensorStore,
    state: GuidanceState,
    session: ScanSession,
    selection: SelectionPolicy,
    throttler: GuidanceThrottler,
    scan_timeout: Duration,
    notices: HashSet<SensorKind>,
}

impl GuidanceEngine {
    pub fn new(config: &Config, catalog: BeaconCatalog) -> Self {
        let guidance = &config.guidance;
        let scan_timeout = Duration::from_secs(config.scan.timeout_secs);

        GuidanceEngine {
            catalog,
            registry: BeaconRegistry::new(config.filter.window_size, config.filter.reference_power_dbm),
            sensors: SensorStore::new(),
            state: GuidanceState::new(guidance.smoothing_gain),
            session: ScanSession::new(scan_timeout),
            selection: SelectionPolicy::new(guidance.arrival_distance_m, guidance.switch_margin_m),
            throttler: GuidanceThrottler::new(
                guidance.speech_cooldown(),
                guidance.haptic_cooldown(),
                guidance.messages.clone(),
            ),
            scan_timeout,
            notices: HashSet::new(),
        }
    }

    /// Route one inbound event to its handler
    pub fn handle(&mut self, event: SensorEvent, now: Instant) -> Vec<OutputRequest> {
        if self.session.is_released() {
            trace!("Ignoring {:?} after view exit", event);
            return Vec::new();
        }

        match event {
            SensorEvent::Advertisement(sample) => {
                self.on_beacon_advertisement(&sample);
                Vec::new()
            }
            SensorEvent::Heading(degrees) => {
                self.on_heading_changed(degrees);
                Vec::new()
            }
            SensorEvent::Position { lat, lon } => {
                self.on_position_changed(lat, lon);
                Vec::new()
            }
            SensorEvent::StartScan => self.start_scan(now),
            SensorEvent::StopScan => self.stop_scan(),
            SensorEvent::ViewExited => self.view_exited(),
            SensorEvent::SensorUnavailable { kind, detail } => self.sensor_unavailable(kind, &detail),
            SensorEvent::CalibrationTip => self.calibration_tip(),
        }
    }

    /// Greeting spoken when the guidance view opens
    pub fn open(&self) -> Vec<OutputRequest> {
        vec![OutputRequest::speech(MSG_GUIDANCE_STARTED)]
    }

    /// Fold an advertisement into the registry; only accepted while scanning
    pub fn on_beacon_advertisement(&mut self, sample: &BeaconObservation) -> Option<ObserveOutcome> {
        if !self.session.is_scanning() {
            trace!("Not scanning, dropping advertisement from {}", sample.id);
            return None;
        }
        Some(self.registry.observe(&self.catalog, sample))
    }

    pub fn on_heading_changed(&mut self, degrees: f64) {
        if self.sensors.update_heading(degrees) {
            // Heading moves fast; keep the direction estimate in step with it
            self.fuse();
        }
    }

    pub fn on_position_changed(&mut self, lat: f64, lon: f64) {
        if self.sensors.update_position(lat, lon) {
            debug!("Position updated: {:.6}, {:.6}", lat, lon);
        }
    }

    /// Idle/Stopped -> Scanning; clears the registry and session state
    pub fn start_scan(&mut self, now: Instant) -> Vec<OutputRequest> {
        if !self.session.start(now) {
            return Vec::new();
        }

        self.registry.clear();
        self.state.reset();

        vec![
            OutputRequest::speech(MSG_SCAN_STARTED),
            OutputRequest::Haptic(HapticIntensity::Light),
        ]
    }

    /// Explicit stop; no-op unless scanning
    pub fn stop_scan(&mut self) -> Vec<OutputRequest> {
        if !self.session.stop(StopReason::Requested) {
            return Vec::new();
        }
        vec![
            OutputRequest::speech(MSG_SCAN_STOPPED),
            OutputRequest::Haptic(HapticIntensity::Light),
        ]
    }

    /// When the running scan is due to stop on its own
    pub fn scan_deadline(&self) -> Option<Instant> {
        self.session.deadline()
    }

    /// Stop a scan whose timeout has elapsed and escalate if nothing was found
    pub fn check_scan_timeout(&mut self, now: Instant) -> Vec<OutputRequest> {
        if !self.session.has_timed_out(now) {
            return Vec::new();
        }
        self.session.stop(StopReason::TimedOut);

        let mut requests = vec![
            OutputRequest::speech(MSG_SCAN_STOPPED),
            OutputRequest::Haptic(HapticIntensity::Light),
        ];

        if self.registry.is_empty() {
            info!("Scan timed out with no beacons");
            requests.push(OutputRequest::alert(
                ALERT_NO_BEACONS,
                format!(
                    "No BLE beacons were found after {} seconds.",
                    self.scan_timeout.as_secs()
                ),
            ));
        } else if self.state.selected_beacon_id.is_none() {
            self.selection.update(&self.registry, &mut self.state);
        }

        requests
    }

    /// Leaving the view: stop scanning, release everything. Idempotent.
    pub fn view_exited(&mut self) -> Vec<OutputRequest> {
        if !self.session.release() {
            return Vec::new();
        }
        info!("Guidance view closed");
        vec![OutputRequest::speech(MSG_GUIDANCE_STOPPED)]
    }

    pub fn is_finished(&self) -> bool {
        self.session.is_released()
    }

    /// One-time degraded-mode notice per sensor kind
    pub fn sensor_unavailable(&mut self, kind: SensorKind, detail: &str) -> Vec<OutputRequest> {
        if !self.notices.insert(kind) {
            debug!("{} unavailable notice already given", kind);
            return Vec::new();
        }
        info!("{} unavailable, continuing in degraded mode: {}", kind, detail);

        let spoken = match kind {
            SensorKind::Bluetooth => Some("Bluetooth could not be started."),
            SensorKind::Compass => Some("Compass unavailable. Direction guidance is limited."),
            SensorKind::Gps => Some("Location unavailable. Direction guidance is limited."),
            // No point asking a broken speech backend to speak
            SensorKind::Speech => None,
        };

        let mut requests = Vec::new();
        if let Some(text) = spoken {
            requests.push(OutputRequest::speech(text));
        }
        requests.push(OutputRequest::alert(
            ALERT_SENSOR_UNAVAILABLE,
            format!("{} unavailable: {}", kind, detail),
        ));
        requests
    }

    pub fn calibration_tip(&self) -> Vec<OutputRequest> {
        vec![OutputRequest::alert(
            ALERT_CALIBRATION,
            "Move the phone in a figure eight to improve orientation accuracy.",
        )]
    }

    /// Fast tick: pick the closest beacon and advance the direction filter
    pub fn refresh(&mut self, _now: Instant) {
        if self.session.is_released() {
            return;
        }
        if let SelectionChange::Selected { id, previous } = self.selection.update(&self.registry, &mut self.state) {
            debug!("Selection changed {:?} -> {}", previous, id);
        }
        self.fuse();
        trace!("{}", self.snapshot());
    }

    /// Slow tick: arrival first, otherwise a throttled directional cue
    pub fn guide(&mut self, now: Instant) -> Vec<OutputRequest> {
        if self.session.is_released() {
            return Vec::new();
        }

        if let Some(id) = self.selection.detect_arrival(&self.registry, &mut self.state) {
            let message = self.catalog.arrival_message(&id);
            return self
                .throttler
                .announce(&message, HapticIntensity::Heavy, now, &mut self.state);
        }

        if self.state.selected_beacon_id.is_none() {
            return Vec::new();
        }
        match self.state.smoothed_direction_angle() {
            Some(angle) => self.throttler.evaluate(angle, now, &mut self.state),
            None => Vec::new(),
        }
    }

    /// Advance the smoothed relative angle toward the selected beacon.
    ///
    /// Leaves the angle untouched without a selection, position or heading.
    pub fn fuse(&mut self) -> Option<f64> {
        let id = self.state.selected_beacon_id.as_deref()?;
        let target = self.registry.get(id)?.known_location;
        let position = self.sensors.position()?;
        let heading = self.sensors.heading()?;

        let to_beacon = bearing(position, target);
        let relative = relative_angle(to_beacon, heading);
        Some(self.state.direction.update(relative))
    }

    pub fn snapshot(&self) -> GuidanceSnapshot {
        let selected = self
            .state
            .selected_beacon_id
            .as_deref()
            .and_then(|id| self.registry.get(id))
            .map(BeaconStatus::from);
        let ranked = self
            .registry
            .sorted_by_distance()
            .into_iter()
            .map(BeaconStatus::from)
            .collect();

        GuidanceSnapshot {
            scan_state: self.session.state(),
            tracked: self.registry.len(),
            selected,
            ranked,
            direction_angle: self.state.smoothed_direction_angle(),
            heading: self.sensors.heading(),
            position: self.sensors.position(),
        }
    }

    pub fn registry(&self) -> &BeaconRegistry {
        &self.registry
    }

    pub fn state(&self) -> &GuidanceState {
        &self.state
    }
}
