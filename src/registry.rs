use chrono::{DateTime, Utc};
use log::{debug, trace};
use std::collections::{HashMap, VecDeque};

use crate::catalog::{normalize_id, BeaconCatalog};
use crate::distance::{classify_reliability, effective_distance, estimate_distance, Reliability};
use crate::sensors::GeoPoint;

/// One raw advertisement from the scan channel
#[derive(Debug, Clone, PartialEq)]
pub struct BeaconObservation {
    pub id: String,
    pub rssi: i32,
    pub timestamp: DateTime<Utc>,
}

/// What happened to an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveOutcome {
    Tracked,
    NotAllowed,
    NoLocation,
}

/// Filtered state for one beacon
#[derive(Debug, Clone)]
pub struct TrackedBeacon {
    pub id: String,
    pub display_name: String,
    pub known_location: GeoPoint,
    rssi_window: VecDeque<i32>,
    pub smoothed_rssi: f64,
    pub estimated_distance: f64,
    pub reliability: Reliability,
    pub last_seen: DateTime<Utc>,
    pub sample_count: u64,
}

impl TrackedBeacon {
    fn new(id: String, display_name: String, known_location: GeoPoint, capacity: usize) -> Self {
        TrackedBeacon {
            id,
            display_name,
            known_location,
            rssi_window: VecDeque::with_capacity(capacity),
            smoothed_rssi: 0.0,
            estimated_distance: -1.0,
            reliability: Reliability::Low,
            last_seen: Utc::now(),
            sample_count: 0,
        }
    }

    /// Raw readings, oldest first
    pub fn rssi_window(&self) -> Vec<i32> {
        self.rssi_window.iter().copied().collect()
    }

    pub fn window_len(&self) -> usize {
        self.rssi_window.len()
    }

    fn push(&mut self, rssi: i32, capacity: usize, tx_power_dbm: f64) {
        self.rssi_window.push_back(rssi);
        while self.rssi_window.len() > capacity {
            self.rssi_window.pop_front();
        }

        let sum: i64 = self.rssi_window.iter().map(|&v| v as i64).sum();
        self.smoothed_rssi = sum as f64 / self.rssi_window.len() as f64;
        self.estimated_distance = estimate_distance(self.smoothed_rssi, tx_power_dbm);
        self.reliability = classify_reliability(self.rssi_window.make_contiguous());
        self.sample_count += 1;
    }
}

/// Set of beacons seen during the current scan
#[derive(Debug)]
pub struct BeaconRegistry {
    beacons: HashMap<String, TrackedBeacon>,
    window_size: usize,
    tx_power_dbm: f64,
}

impl BeaconRegistry {
    pub fn new(window_size: usize, tx_power_dbm: f64) -> Self {
        BeaconRegistry {
            beacons: HashMap::new(),
            window_size: window_size.max(1),
            tx_power_dbm,
        }
    }

    /// Fold one advertisement into the matching beacon's window
    pub fn observe(&mut self, catalog: &BeaconCatalog, sample: &BeaconObservation) -> ObserveOutcome {
        let id = normalize_id(&sample.id);

        if !catalog.is_allowed(&id) {
            trace!("Ignoring advertisement from {}", id);
            return ObserveOutcome::NotAllowed;
        }

        let Some(location) = catalog.location(&id) else {
            debug!("Beacon {} has no registered location, dropping sample", id);
            return ObserveOutcome::NoLocation;
        };

        let window_size = self.window_size;
        let beacon = self.beacons.entry(id.clone()).or_insert_with(|| {
            debug!("Tracking new beacon {}", id);
            TrackedBeacon::new(id.clone(), catalog.display_name(&id), location, window_size)
        });

        beacon.push(sample.rssi, window_size, self.tx_power_dbm);
        beacon.last_seen = sample.timestamp;

        trace!(
            "Beacon {} rssi={} smoothed={:.1} distance={:.2}",
            beacon.id,
            sample.rssi,
            beacon.smoothed_rssi,
            beacon.estimated_distance
        );

        ObserveOutcome::Tracked
    }

    pub fn get(&self, id: &str) -> Option<&TrackedBeacon> {
        self.beacons.get(&normalize_id(id))
    }

    /// Tracked beacon with the smallest estimated distance.
    ///
    /// Unknown distances sort last; ties break on id so the choice is stable.
    pub fn closest(&self) -> Option<&TrackedBeacon> {
        self.beacons.values().min_by(|a, b| {
            effective_distance(a.estimated_distance)
                .total_cmp(&effective_distance(b.estimated_distance))
                .then_with(|| a.id.cmp(&b.id))
        })
    }

    /// Beacons sorted nearest first
    pub fn sorted_by_distance(&self) -> Vec<&TrackedBeacon> {
        let mut beacons: Vec<&TrackedBeacon> = self.beacons.values().collect();
        beacons.sort_by(|a, b| {
            effective_distance(a.estimated_distance)
                .total_cmp(&effective_distance(b.estimated_distance))
                .then_with(|| a.id.cmp(&b.id))
        });
        beacons
    }

    pub fn len(&self) -> usize {
        self.beacons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beacons.is_empty()
    }

    pub fn clear(&mut self) {
        self.beacons.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogEntry;

    fn catalog() -> BeaconCatalog {
        let mut catalog = BeaconCatalog::new();
        catalog.allow("AA:BB");
        catalog.register(
            "AA:BB",
            CatalogEntry {
                name: Some("Door".to_string()),
                location: GeoPoint::new(0.0, 0.0),
                arrival_message: None,
            },
        );
        catalog.allow("CC:DD");
        catalog.register(
            "CC:DD",
            CatalogEntry {
                name: None,
                location: GeoPoint::new(0.001, 0.0),
                arrival_message: None,
            },
        );
        // Allowed but never placed on the map
        catalog.allow("EE:FF");
        catalog
    }

    fn sample(id: &str, rssi: i32) -> BeaconObservation {
        BeaconObservation {
            id: id.to_string(),
            rssi,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_window_keeps_last_n_in_order() {
        let catalog = catalog();
        let mut registry = BeaconRegistry::new(8, -59.0);

        for rssi in -70..-50 {
            registry.observe(&catalog, &sample("AA:BB", rssi));
            assert!(registry.get("AA:BB").unwrap().window_len() <= 8);
        }

        let beacon = registry.get("AA:BB").unwrap();
        assert_eq!(beacon.rssi_window(), (-58..-50).collect::<Vec<_>>());
        assert_eq!(beacon.sample_count, 20);
    }

    #[test]
    fn test_smoothed_rssi_is_window_mean() {
        let catalog = catalog();
        let mut registry = BeaconRegistry::new(8, -59.0);

        registry.observe(&catalog, &sample("AA:BB", -60));
        registry.observe(&catalog, &sample("AA:BB", -70));
        let beacon = registry.get("AA:BB").unwrap();
        assert!((beacon.smoothed_rssi - (-65.0)).abs() < 1e-9);
        assert_eq!(beacon.reliability, Reliability::Low);
    }

    #[test]
    fn test_rejects_unknown_and_unlocated() {
        let catalog = catalog();
        let mut registry = BeaconRegistry::new(8, -59.0);

        assert_eq!(
            registry.observe(&catalog, &sample("11:22", -40)),
            ObserveOutcome::NotAllowed
        );
        assert_eq!(
            registry.observe(&catalog, &sample("EE:FF", -40)),
            ObserveOutcome::NoLocation
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reference_scenario_distance() {
        let catalog = catalog();
        let mut registry = BeaconRegistry::new(10, -59.0);

        for _ in 0..10 {
            registry.observe(&catalog, &sample("aa:bb", -59));
        }

        let beacon = registry.get("AA:BB").unwrap();
        assert!((beacon.smoothed_rssi - (-59.0)).abs() < 1e-9);
        assert!((beacon.estimated_distance - 1.0).abs() < 0.02);
        assert_eq!(beacon.reliability, Reliability::High);
        assert_eq!(beacon.display_name, "Door");
    }

    #[test]
    fn test_closest_prefers_stronger_signal() {
        let catalog = catalog();
        let mut registry = BeaconRegistry::new(8, -59.0);

        registry.observe(&catalog, &sample("AA:BB", -80));
        registry.observe(&catalog, &sample("CC:DD", -55));
        assert_eq!(registry.closest().unwrap().id, "CC:DD");

        let order: Vec<&str> = registry
            .sorted_by_distance()
            .iter()
            .map(|b| b.id.as_str())
            .collect();
        assert_eq!(order, vec!["CC:DD", "AA:BB"]);

        registry.clear();
        assert!(registry.closest().is_none());
    }

    #[test]
    fn test_unknown_distance_sorts_last() {
        let catalog = catalog();
        let mut registry = BeaconRegistry::new(8, -59.0);

        // A zero reading yields the -1 sentinel
        registry.observe(&catalog, &sample("AA:BB", 0));
        registry.observe(&catalog, &sample("CC:DD", -90));
        assert_eq!(registry.get("AA:BB").unwrap().estimated_distance, -1.0);
        assert_eq!(registry.closest().unwrap().id, "CC:DD");
    }
}
