use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};

use crate::config::BeaconsConfig;
use crate::sensors::GeoPoint;

/// Label spoken for beacons missing from the name table
pub const DEFAULT_BEACON_NAME: &str = "Beacon";

/// Static facts about one registered beacon
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub name: Option<String>,
    pub location: Option<GeoPoint>,
    pub arrival_message: Option<String>,
}

/// Immutable allow-list plus id -> (name, location) table.
///
/// Built once from configuration and shared read-only with the engine.
#[derive(Debug, Clone, Default)]
pub struct BeaconCatalog {
    allowed: HashSet<String>,
    entries: HashMap<String, CatalogEntry>,
}

/// Normalize a beacon address for comparison
pub fn normalize_id(id: &str) -> String {
    id.trim().to_uppercase().replace(['-', '.'], ":")
}

impl BeaconCatalog {
    pub fn new() -> Self {
        BeaconCatalog::default()
    }

    pub fn from_config(config: &BeaconsConfig) -> Self {
        let mut catalog = BeaconCatalog::new();

        for id in &config.allowed {
            catalog.allow(id);
        }

        for entry in &config.catalog {
            let location = match (entry.latitude, entry.longitude) {
                (Some(lat), Some(lon)) => match GeoPoint::new(lat, lon) {
                    Some(point) => Some(point),
                    None => {
                        warn!("Ignoring out-of-range location for beacon {}", entry.id);
                        None
                    }
                },
                (None, None) => None,
                _ => {
                    warn!("Beacon {} has only one coordinate, ignoring location", entry.id);
                    None
                }
            };

            catalog.register(
                &entry.id,
                CatalogEntry {
                    name: entry.name.clone(),
                    location,
                    arrival_message: entry.arrival_message.clone(),
                },
            );
        }

        let unlocated = catalog
            .allowed
            .iter()
            .filter(|id| catalog.location(id).is_none())
            .count();
        if unlocated > 0 {
            debug!("{} allowed beacons have no registered location", unlocated);
        }

        info!(
            "Loaded beacon catalog: {} allowed, {} registered",
            catalog.allowed.len(),
            catalog.entries.len()
        );
        catalog
    }

    pub fn allow(&mut self, id: &str) {
        self.allowed.insert(normalize_id(id));
    }

    pub fn register(&mut self, id: &str, entry: CatalogEntry) {
        self.entries.insert(normalize_id(id), entry);
    }

    pub fn is_allowed(&self, id: &str) -> bool {
        self.allowed.contains(&normalize_id(id))
    }

    pub fn entry(&self, id: &str) -> Option<&CatalogEntry> {
        self.entries.get(&normalize_id(id))
    }

    pub fn location(&self, id: &str) -> Option<GeoPoint> {
        self.entry(id).and_then(|e| e.location)
    }

    pub fn display_name(&self, id: &str) -> String {
        self.entry(id)
            .and_then(|e| e.name.clone())
            .unwrap_or_else(|| DEFAULT_BEACON_NAME.to_string())
    }

    /// Arrival message for a beacon, falling back to a generic sentence
    pub fn arrival_message(&self, id: &str) -> String {
        match self.entry(id).and_then(|e| e.arrival_message.clone()) {
            Some(message) => message,
            None => format!("You have arrived at {}.", self.display_name(id)),
        }
    }

    pub fn allowed_count(&self) -> usize {
        self.allowed.len()
    }

    /// Allowed ids in stable order, for listings
    pub fn allowed_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.allowed.iter().cloned().collect();
        ids.sort();
        ids
    }
}
