use log::info;

use crate::distance::{effective_distance, format_distance};
use crate::registry::BeaconRegistry;
use crate::state::GuidanceState;

/// Outcome of a selection pass
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionChange {
    Unchanged,
    Selected { id: String, previous: Option<String> },
}

/// Picks the beacon to guide toward and detects arrival
#[derive(Debug, Clone)]
pub struct SelectionPolicy {
    arrival_distance_m: f64,
    switch_margin_m: f64,
}

impl SelectionPolicy {
    pub fn new(arrival_distance_m: f64, switch_margin_m: f64) -> Self {
        SelectionPolicy {
            arrival_distance_m,
            switch_margin_m: switch_margin_m.max(0.0),
        }
    }

    /// Select the closest tracked beacon.
    ///
    /// A change of selection clears the arrival set so the new beacon can
    /// announce its own arrival.
    pub fn update(&self, registry: &BeaconRegistry, state: &mut GuidanceState) -> SelectionChange {
        let Some(closest) = registry.closest() else {
            return SelectionChange::Unchanged;
        };

        if state.selected_beacon_id.as_deref() == Some(closest.id.as_str()) {
            return SelectionChange::Unchanged;
        }

        // Hysteresis: the incumbent keeps its place unless clearly beaten
        if let Some(current) = state
            .selected_beacon_id
            .as_deref()
            .and_then(|id| registry.get(id))
        {
            let incumbent = effective_distance(current.estimated_distance);
            let challenger = effective_distance(closest.estimated_distance);
            if self.switch_margin_m > 0.0
                && incumbent.is_finite()
                && challenger + self.switch_margin_m >= incumbent
            {
                return SelectionChange::Unchanged;
            }
        }

        info!(
            "Selected beacon {} ({}) at {}",
            closest.display_name,
            closest.id,
            format_distance(closest.estimated_distance)
        );

        let previous = state.selected_beacon_id.replace(closest.id.clone());
        state.arrival_notified.clear();

        SelectionChange::Selected {
            id: closest.id.clone(),
            previous,
        }
    }

    /// Returns the selected beacon's id the first time it comes within range.
    ///
    /// Marks it as notified; later calls return None until the selection
    /// changes.
    pub fn detect_arrival(&self, registry: &BeaconRegistry, state: &mut GuidanceState) -> Option<String> {
        let id = state.selected_beacon_id.as_deref()?;
        let beacon = registry.get(id)?;

        if effective_distance(beacon.estimated_distance) >= self.arrival_distance_m {
            return None;
        }
        if state.arrival_notified.contains(&beacon.id) {
            return None;
        }

        info!(
            "Arrived at {} ({}), distance {}",
            beacon.display_name,
            beacon.id,
            format_distance(beacon.estimated_distance)
        );
        state.arrival_notified.insert(beacon.id.clone());
        Some(beacon.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{BeaconCatalog, CatalogEntry};
    use crate::registry::BeaconObservation;
    use crate::sensors::GeoPoint;
    use chrono::Utc;

    fn catalog() -> BeaconCatalog {
        let mut catalog = BeaconCatalog::new();
        for (id, lat) in [("AA:BB", 0.0), ("CC:DD", 0.001)] {
            catalog.allow(id);
            catalog.register(
                id,
                CatalogEntry {
                    name: None,
                    location: GeoPoint::new(lat, 0.0),
                    arrival_message: None,
                },
            );
        }
        catalog
    }

    // Fill the whole window so the smoothed value equals `rssi`
    fn settle(registry: &mut BeaconRegistry, catalog: &BeaconCatalog, id: &str, rssi: i32) {
        for _ in 0..8 {
            registry.observe(
                catalog,
                &BeaconObservation {
                    id: id.to_string(),
                    rssi,
                    timestamp: Utc::now(),
                },
            );
        }
    }

    #[test]
    fn test_selects_closest() {
        let catalog = catalog();
        let mut registry = BeaconRegistry::new(8, -59.0);
        let mut state = GuidanceState::new(0.25);
        let policy = SelectionPolicy::new(1.5, 0.0);

        assert_eq!(policy.update(&registry, &mut state), SelectionChange::Unchanged);

        settle(&mut registry, &catalog, "AA:BB", -70);
        settle(&mut registry, &catalog, "CC:DD", -80);
        assert_eq!(
            policy.update(&registry, &mut state),
            SelectionChange::Selected {
                id: "AA:BB".to_string(),
                previous: None
            }
        );
        assert_eq!(policy.update(&registry, &mut state), SelectionChange::Unchanged);
    }

    #[test]
    fn test_arrival_fires_once_despite_oscillation() {
        let catalog = catalog();
        let mut registry = BeaconRegistry::new(8, -59.0);
        let mut state = GuidanceState::new(0.25);
        let policy = SelectionPolicy::new(1.5, 0.0);

        settle(&mut registry, &catalog, "AA:BB", -70);
        policy.update(&registry, &mut state);
        assert!(policy.detect_arrival(&registry, &mut state).is_none());

        let mut arrivals = 0;
        for round in 0..6 {
            // -50 dBm is well inside 1.5 m, -70 dBm well outside
            let rssi = if round % 2 == 0 { -50 } else { -70 };
            settle(&mut registry, &catalog, "AA:BB", rssi);
            policy.update(&registry, &mut state);
            if policy.detect_arrival(&registry, &mut state).is_some() {
                arrivals += 1;
            }
        }
        assert_eq!(arrivals, 1);
    }

    #[test]
    fn test_reselection_rearms_arrival() {
        let catalog = catalog();
        let mut registry = BeaconRegistry::new(8, -59.0);
        let mut state = GuidanceState::new(0.25);
        let policy = SelectionPolicy::new(1.5, 0.0);

        settle(&mut registry, &catalog, "AA:BB", -50);
        settle(&mut registry, &catalog, "CC:DD", -80);
        policy.update(&registry, &mut state);
        assert_eq!(policy.detect_arrival(&registry, &mut state).as_deref(), Some("AA:BB"));

        // CC:DD takes over, then AA:BB wins back the selection
        settle(&mut registry, &catalog, "AA:BB", -85);
        settle(&mut registry, &catalog, "CC:DD", -60);
        policy.update(&registry, &mut state);
        assert_eq!(state.selected_beacon_id.as_deref(), Some("CC:DD"));
        assert!(state.arrival_notified.is_empty());

        settle(&mut registry, &catalog, "AA:BB", -50);
        policy.update(&registry, &mut state);
        assert_eq!(policy.detect_arrival(&registry, &mut state).as_deref(), Some("AA:BB"));
    }

    #[test]
    fn test_unknown_distance_never_arrives() {
        let catalog = catalog();
        let mut registry = BeaconRegistry::new(8, -59.0);
        let mut state = GuidanceState::new(0.25);
        let policy = SelectionPolicy::new(1.5, 0.0);

        settle(&mut registry, &catalog, "AA:BB", 0);
        policy.update(&registry, &mut state);
        assert_eq!(state.selected_beacon_id.as_deref(), Some("AA:BB"));
        assert!(policy.detect_arrival(&registry, &mut state).is_none());
    }

    #[test]
    fn test_switch_margin_holds_incumbent() {
        let catalog = catalog();
        let mut registry = BeaconRegistry::new(8, -59.0);
        let mut state = GuidanceState::new(0.25);
        let policy = SelectionPolicy::new(1.5, 2.0);

        settle(&mut registry, &catalog, "AA:BB", -70);
        policy.update(&registry, &mut state);

        // Slightly closer is not enough
        settle(&mut registry, &catalog, "CC:DD", -69);
        assert_eq!(policy.update(&registry, &mut state), SelectionChange::Unchanged);

        settle(&mut registry, &catalog, "CC:DD", -55);
        assert!(matches!(
            policy.update(&registry, &mut state),
            SelectionChange::Selected { .. }
        ));
    }
}
