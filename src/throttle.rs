use log::debug;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::output::{HapticIntensity, OutputRequest};
use crate::state::GuidanceState;

/// Directional band of the smoothed relative angle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionBand {
    /// [0, 15] or [345, 360)
    OnCourse,
    /// (15, 90): target is off to the right
    CorrectRight,
    /// (270, 345): target is off to the left
    CorrectLeft,
    /// [90, 270]
    TurnAround,
}

impl DirectionBand {
    pub fn classify(angle: f64) -> Self {
        if angle <= 15.0 || angle >= 345.0 {
            DirectionBand::OnCourse
        } else if angle < 90.0 {
            DirectionBand::CorrectRight
        } else if angle > 270.0 {
            DirectionBand::CorrectLeft
        } else {
            DirectionBand::TurnAround
        }
    }

    pub fn haptic(self) -> HapticIntensity {
        match self {
            DirectionBand::TurnAround => HapticIntensity::Heavy,
            _ => HapticIntensity::Medium,
        }
    }
}

/// Spoken text per band. Wording is deployment policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandMessages {
    pub on_course: String,
    pub correct_right: String,
    pub correct_left: String,
    pub turn_around: String,
}

impl Default for BandMessages {
    fn default() -> Self {
        BandMessages {
            on_course: "You are heading in the right direction.".to_string(),
            correct_right: "Turn slightly right, you are drifting off course.".to_string(),
            correct_left: "Turn slightly left, you are drifting off course.".to_string(),
            turn_around: "You are moving away. Turn around.".to_string(),
        }
    }
}

impl BandMessages {
    pub fn for_band(&self, band: DirectionBand) -> &str {
        match band {
            DirectionBand::OnCourse => &self.on_course,
            DirectionBand::CorrectRight => &self.correct_right,
            DirectionBand::CorrectLeft => &self.correct_left,
            DirectionBand::TurnAround => &self.turn_around,
        }
    }
}

/// Cooldown-gated speech and haptic cues
#[derive(Debug, Clone)]
pub struct GuidanceThrottler {
    speech_cooldown: Duration,
    haptic_cooldown: Duration,
    messages: BandMessages,
}

impl GuidanceThrottler {
    pub fn new(speech_cooldown: Duration, haptic_cooldown: Duration, messages: BandMessages) -> Self {
        GuidanceThrottler {
            speech_cooldown,
            haptic_cooldown,
            messages,
        }
    }

    pub fn speech_ready(&self, state: &GuidanceState, now: Instant) -> bool {
        cooled_down(state.last_spoken_at, now, self.speech_cooldown)
    }

    pub fn haptic_ready(&self, state: &GuidanceState, now: Instant) -> bool {
        cooled_down(state.last_vibrated_at, now, self.haptic_cooldown)
    }

    /// Directional cue for `angle`; each channel fires only once its
    /// cooldown has elapsed.
    pub fn evaluate(&self, angle: f64, now: Instant, state: &mut GuidanceState) -> Vec<OutputRequest> {
        let band = DirectionBand::classify(angle);
        let mut requests = Vec::new();

        if self.speech_ready(state, now) {
            requests.push(OutputRequest::speech(self.messages.for_band(band)));
            state.last_spoken_at = Some(now);
        }
        if self.haptic_ready(state, now) {
            requests.push(OutputRequest::Haptic(band.haptic()));
            state.last_vibrated_at = Some(now);
        }

        if !requests.is_empty() {
            debug!("Guidance cue {:?} at {:.0} deg", band, angle);
        }
        requests
    }

    /// Unconditional cue (arrival, scan announcements); restarts both cooldowns
    pub fn announce(
        &self,
        text: &str,
        intensity: HapticIntensity,
        now: Instant,
        state: &mut GuidanceState,
    ) -> Vec<OutputRequest> {
        state.last_spoken_at = Some(now);
        state.last_vibrated_at = Some(now);
        vec![OutputRequest::speech(text), OutputRequest::Haptic(intensity)]
    }
}

fn cooled_down(last: Option<Instant>, now: Instant, cooldown: Duration) -> bool {
    match last {
        Some(at) => now.saturating_duration_since(at) > cooldown,
        None => true,
    }
}
