use std::collections::HashSet;
use std::time::Instant;

use crate::fusion::DirectionFilter;

/// Per-session guidance state, owned by the engine.
///
/// Rebuilt on every scan start so arrivals and cooldowns never carry over.
#[derive(Debug, Clone)]
pub struct GuidanceState {
    pub selected_beacon_id: Option<String>,
    pub direction: DirectionFilter,
    pub arrival_notified: HashSet<String>,
    pub last_spoken_at: Option<Instant>,
    pub last_vibrated_at: Option<Instant>,
}

impl GuidanceState {
    pub fn new(smoothing_gain: f64) -> Self {
        GuidanceState {
            selected_beacon_id: None,
            direction: DirectionFilter::new(smoothing_gain),
            arrival_notified: HashSet::new(),
            last_spoken_at: None,
            last_vibrated_at: None,
        }
    }

    pub fn reset(&mut self) {
        self.selected_beacon_id = None;
        self.direction.reset();
        self.arrival_notified.clear();
        self.last_spoken_at = None;
        self.last_vibrated_at = None;
    }

    /// Smoothed relative angle, once fusion has produced one
    pub fn smoothed_direction_angle(&self) -> Option<f64> {
        self.direction.is_primed().then(|| self.direction.angle())
    }
}
