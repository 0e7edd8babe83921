use log::debug;
use serde::{Deserialize, Serialize};

/// Latitude/longitude pair in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Returns None for non-finite or out-of-range coordinates
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        if !lat.is_finite() || !lon.is_finite() {
            return None;
        }
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return None;
        }
        Some(GeoPoint { lat, lon })
    }
}

/// Latest compass heading and GPS fix.
///
/// Plain overwrite semantics: no history, no filtering. Smoothing happens in
/// the fusion stage.
#[derive(Debug, Clone, Default)]
pub struct SensorStore {
    heading: Option<f64>,
    position: Option<GeoPoint>,
}

impl SensorStore {
    pub fn new() -> Self {
        SensorStore::default()
    }

    /// Store a compass reading, normalized into [0, 360).
    ///
    /// Returns false if the sample was dropped.
    pub fn update_heading(&mut self, degrees: f64) -> bool {
        if !degrees.is_finite() {
            debug!("Dropping non-finite heading sample");
            return false;
        }
        self.heading = Some(normalize_degrees(degrees));
        true
    }

    /// Store a GPS fix. Returns false if the sample was dropped.
    pub fn update_position(&mut self, lat: f64, lon: f64) -> bool {
        match GeoPoint::new(lat, lon) {
            Some(point) => {
                self.position = Some(point);
                true
            }
            None => {
                debug!("Dropping invalid position sample lat={} lon={}", lat, lon);
                false
            }
        }
    }

    pub fn heading(&self) -> Option<f64> {
        self.heading
    }

    pub fn position(&self) -> Option<GeoPoint> {
        self.position
    }
}

/// Wrap any angle into [0, 360)
pub fn normalize_degrees(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_until_first_sample() {
        let store = SensorStore::new();
        assert!(store.heading().is_none());
        assert!(store.position().is_none());
    }

    #[test]
    fn test_last_write_wins() {
        let mut store = SensorStore::new();
        assert!(store.update_heading(10.0));
        assert!(store.update_heading(200.0));
        assert_eq!(store.heading(), Some(200.0));

        assert!(store.update_position(40.0, -3.0));
        assert!(store.update_position(40.5, -3.5));
        assert_eq!(store.position(), Some(GeoPoint { lat: 40.5, lon: -3.5 }));
    }

    #[test]
    fn test_heading_normalized() {
        let mut store = SensorStore::new();
        store.update_heading(370.0);
        assert!((store.heading().unwrap() - 10.0).abs() < 1e-9);
        store.update_heading(-90.0);
        assert!((store.heading().unwrap() - 270.0).abs() < 1e-9);
        store.update_heading(360.0);
        assert_eq!(store.heading(), Some(0.0));
    }

    #[test]
    fn test_invalid_samples_dropped() {
        let mut store = SensorStore::new();
        store.update_heading(45.0);
        assert!(!store.update_heading(f64::NAN));
        assert_eq!(store.heading(), Some(45.0));

        assert!(!store.update_position(91.0, 0.0));
        assert!(!store.update_position(0.0, 181.0));
        assert!(store.position().is_none());
    }
}
