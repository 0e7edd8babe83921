//! Distance estimation from BLE beacon signal strength
//!
//! Uses the empirical log-distance fit common to iBeacon-class transmitters:
//! ratio = rssi / tx_power
//! distance = ratio^10                              (ratio < 1)
//! distance = 0.89976 * ratio^7.7095 + 0.111        (otherwise)
//!
//! Where:
//! - tx_power: Calibrated signal strength at 1 meter (dBm)
//! - rssi: Smoothed received signal strength (dBm)

use serde::{Deserialize, Serialize};
use std::fmt;

/// Calibrated beacon power at 1 meter (dBm)
pub const REFERENCE_POWER_DBM: f64 = -59.0;

/// Returned when the distance cannot be estimated
pub const UNKNOWN_DISTANCE: f64 = -1.0;

/// Minimum samples before reliability can rise above Low
const MIN_RELIABILITY_SAMPLES: usize = 3;
const HIGH_RELIABILITY_VARIANCE: f64 = 4.0;
const MEDIUM_RELIABILITY_VARIANCE: f64 = 10.0;

/// Qualitative stability of a beacon's recent readings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Reliability {
    High,
    Medium,
    #[default]
    Low,
}

impl fmt::Display for Reliability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reliability::High => write!(f, "high"),
            Reliability::Medium => write!(f, "medium"),
            Reliability::Low => write!(f, "low"),
        }
    }
}

/// Estimate distance in meters from smoothed RSSI
///
/// # Arguments
/// * `rssi_dbm` - Smoothed received signal strength in dBm
/// * `tx_power_dbm` - Reference signal at 1 meter (-59 dBm for the deployed beacons)
///
/// # Returns
/// Estimated distance in meters, or `UNKNOWN_DISTANCE` (-1) when RSSI is 0
pub fn estimate_distance(rssi_dbm: f64, tx_power_dbm: f64) -> f64 {
    if rssi_dbm == 0.0 {
        return UNKNOWN_DISTANCE;
    }

    let ratio = rssi_dbm / tx_power_dbm;
    if ratio < 1.0 {
        ratio.powi(10)
    } else {
        0.89976 * ratio.powf(7.7095) + 0.111
    }
}

/// Sort key for distances: the unknown sentinel counts as infinitely far
pub fn effective_distance(distance_m: f64) -> f64 {
    if distance_m < 0.0 || distance_m.is_nan() {
        f64::INFINITY
    } else {
        distance_m
    }
}

/// Map RSSI to a 0-100 signal strength percentage
pub fn map_strength_percent(rssi_dbm: f64) -> u8 {
    if rssi_dbm >= -50.0 {
        return 100;
    }
    if rssi_dbm <= -100.0 {
        return 0;
    }
    ((rssi_dbm + 100.0) * 2.0).round() as u8
}

/// Classify reliability from the variance of recent readings
pub fn classify_reliability(window: &[i32]) -> Reliability {
    if window.len() < MIN_RELIABILITY_SAMPLES {
        return Reliability::Low;
    }

    let n = window.len() as f64;
    let mean = window.iter().map(|&v| v as f64).sum::<f64>() / n;
    let variance = window
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / n;

    if variance < HIGH_RELIABILITY_VARIANCE {
        Reliability::High
    } else if variance < MEDIUM_RELIABILITY_VARIANCE {
        Reliability::Medium
    } else {
        Reliability::Low
    }
}

/// Get a human-readable distance category
pub fn distance_category(distance_m: f64) -> &'static str {
    match distance_m {
        d if d < 0.0 => "unknown",
        d if d < 1.5 => "arrived (<1.5m)",
        d if d < 3.0 => "very close (1.5-3m)",
        d if d < 10.0 => "close (3-10m)",
        d if d < 20.0 => "nearby (10-20m)",
        _ => "far (>20m)",
    }
}

/// Format distance for display
pub fn format_distance(distance_m: f64) -> String {
    if distance_m < 0.0 {
        "unknown".to_string()
    } else if distance_m < 10.0 {
        format!("{:.1}m", distance_m)
    } else {
        format!("{:.0}m", distance_m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_distance() {
        // At tx_power, ~1 meter (ratio 1.0 takes the upper branch: 1.01076)
        let d = estimate_distance(-59.0, REFERENCE_POWER_DBM);
        assert!((d - 1.0).abs() < 0.02);

        // Weaker signal = farther
        let d = estimate_distance(-75.0, REFERENCE_POWER_DBM);
        assert!(d > 3.0);

        // Stronger signal = closer
        let d = estimate_distance(-45.0, REFERENCE_POWER_DBM);
        assert!(d < 1.0);
    }

    #[test]
    fn test_estimate_distance_continuous_at_reference() {
        let below = estimate_distance(-59.0 * (1.0 - 1e-9), REFERENCE_POWER_DBM);
        let above = estimate_distance(-59.0 * (1.0 + 1e-9), REFERENCE_POWER_DBM);
        // The upper branch evaluates to 1.01076 at ratio 1
        assert!((below - 1.0).abs() < 1e-6);
        assert!((above - 1.0).abs() < 0.02);
    }

    #[test]
    fn test_zero_rssi_is_unknown() {
        assert_eq!(estimate_distance(0.0, REFERENCE_POWER_DBM), -1.0);
        assert_eq!(effective_distance(UNKNOWN_DISTANCE), f64::INFINITY);
        assert_eq!(effective_distance(2.5), 2.5);
    }

    #[test]
    fn test_map_strength_percent() {
        assert_eq!(map_strength_percent(-40.0), 100);
        assert_eq!(map_strength_percent(-50.0), 100);
        assert_eq!(map_strength_percent(-75.0), 50);
        assert_eq!(map_strength_percent(-99.7), 1);
        assert_eq!(map_strength_percent(-100.0), 0);
        assert_eq!(map_strength_percent(-120.0), 0);
    }

    #[test]
    fn test_classify_reliability() {
        assert_eq!(classify_reliability(&[]), Reliability::Low);
        assert_eq!(classify_reliability(&[-60, -60]), Reliability::Low);
        assert_eq!(classify_reliability(&[-60, -60, -60, -60]), Reliability::High);
        // mean -60, variance 1
        assert_eq!(classify_reliability(&[-59, -61, -59, -61]), Reliability::High);
        // variance exactly 4 is no longer High
        assert_eq!(classify_reliability(&[-58, -62, -58, -62]), Reliability::Medium);
        // variance 9
        assert_eq!(classify_reliability(&[-57, -63, -57, -63]), Reliability::Medium);
        // variance 16
        assert_eq!(classify_reliability(&[-56, -64, -56, -64]), Reliability::Low);
    }

    #[test]
    fn test_distance_category() {
        assert_eq!(distance_category(-1.0), "unknown");
        assert_eq!(distance_category(1.0), "arrived (<1.5m)");
        assert_eq!(distance_category(2.0), "very close (1.5-3m)");
        assert_eq!(distance_category(5.0), "close (3-10m)");
        assert_eq!(distance_category(15.0), "nearby (10-20m)");
        assert_eq!(distance_category(50.0), "far (>20m)");
    }

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(-1.0), "unknown");
        assert_eq!(format_distance(1.234), "1.2m");
        assert_eq!(format_distance(42.4), "42m");
    }
}
