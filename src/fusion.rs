//! Direction fusion: GPS bearing to the beacon, compass heading, smoothing.

use crate::sensors::{normalize_degrees, GeoPoint};

/// Initial great-circle bearing from `from` to `to`, degrees in [0, 360)
pub fn bearing(from: GeoPoint, to: GeoPoint) -> f64 {
    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();
    let d_lon = (to.lon - from.lon).to_radians();

    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();

    normalize_degrees(y.atan2(x).to_degrees())
}

/// Angle the user must turn through, clockwise from where they face
pub fn relative_angle(bearing_deg: f64, heading_deg: f64) -> f64 {
    normalize_degrees(bearing_deg - heading_deg + 360.0)
}

/// Shortest signed difference `to - from`, in [-180, 180)
pub fn signed_delta(from: f64, to: f64) -> f64 {
    (to - from + 540.0).rem_euclid(360.0) - 180.0
}

/// Exponential filter over a circular angle
#[derive(Debug, Clone)]
pub struct DirectionFilter {
    gain: f64,
    angle: f64,
    primed: bool,
}

impl DirectionFilter {
    pub fn new(gain: f64) -> Self {
        DirectionFilter {
            gain,
            angle: 0.0,
            primed: false,
        }
    }

    /// Move the smoothed angle a fixed fraction toward `target`.
    ///
    /// Returns the new smoothed angle.
    pub fn update(&mut self, target: f64) -> f64 {
        let delta = signed_delta(self.angle, target);
        self.angle = normalize_degrees(self.angle + delta * self.gain);
        self.primed = true;
        self.angle
    }

    pub fn angle(&self) -> f64 {
        self.angle
    }

    /// Whether at least one update has run since the last reset
    pub fn is_primed(&self) -> bool {
        self.primed
    }

    pub fn reset(&mut self) {
        self.angle = 0.0;
        self.primed = false;
    }
}
