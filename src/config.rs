use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::distance::REFERENCE_POWER_DBM;
use crate::throttle::BandMessages;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub beacons: BeaconsConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub guidance: GuidanceConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
    #[serde(default)]
    pub gps: GpsConfig,
}

/// Allow-list plus the static id -> (name, location) table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeaconsConfig {
    pub allowed: Vec<String>,
    pub catalog: Vec<BeaconEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeaconEntry {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Spoken once when the user reaches this beacon
    #[serde(default)]
    pub arrival_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// RSSI samples kept per beacon (8-10)
    pub window_size: usize,
    /// Reference signal strength at 1 meter (dBm)
    pub reference_power_dbm: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            window_size: 8,
            reference_power_dbm: REFERENCE_POWER_DBM,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuidanceConfig {
    /// Exponential smoothing gain applied to the relative angle
    pub smoothing_gain: f64,
    /// Distance under which the active beacon counts as reached (meters)
    pub arrival_distance_m: f64,
    pub speech_cooldown_ms: u64,
    pub haptic_cooldown_ms: u64,
    /// Fast tick: selection + direction fusion
    pub refresh_interval_ms: u64,
    /// Slow tick: arrival check + spoken/haptic cues
    pub guidance_interval_ms: u64,
    /// A challenger must be this much closer to replace the selected beacon
    pub switch_margin_m: f64,
    #[serde(default)]
    pub messages: BandMessages,
}

impl GuidanceConfig {
    pub fn speech_cooldown(&self) -> Duration {
        Duration::from_millis(self.speech_cooldown_ms)
    }

    pub fn haptic_cooldown(&self) -> Duration {
        Duration::from_millis(self.haptic_cooldown_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn guidance_interval(&self) -> Duration {
        Duration::from_millis(self.guidance_interval_ms)
    }
}

impl Default for GuidanceConfig {
    fn default() -> Self {
        GuidanceConfig {
            smoothing_gain: 0.25,
            arrival_distance_m: 1.5,
            speech_cooldown_ms: 4000,
            haptic_cooldown_ms: 3000,
            refresh_interval_ms: 100,
            guidance_interval_ms: 1500,
            switch_margin_m: 0.0,
            messages: BandMessages::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Scan stops automatically after this many seconds
    pub timeout_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig { timeout_secs: 15 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    pub enabled: bool,
    /// TTS program invoked once per utterance, text appended as last argument
    pub command: String,
    pub args: Vec<String>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        SpeechConfig {
            enabled: true,
            command: "espeak-ng".to_string(),
            args: vec!["-v".to_string(), "en".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpsConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Re-poll interval on top of the gpsd watch stream
    pub poll_interval_secs: u64,
}

impl Default for GpsConfig {
    fn default() -> Self {
        GpsConfig {
            enabled: true,
            host: "localhost".to_string(),
            port: 2947,
            poll_interval_secs: 10,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config = serde_json::from_str(&content)
            .with_context(|| "Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(8..=10).contains(&self.filter.window_size) {
            anyhow::bail!(
                "filter.window_size must be between 8 and 10, got {}",
                self.filter.window_size
            );
        }
        if self.filter.reference_power_dbm >= 0.0 {
            anyhow::bail!("filter.reference_power_dbm must be negative");
        }
        if !(0.0..=1.0).contains(&self.guidance.smoothing_gain) || self.guidance.smoothing_gain == 0.0 {
            anyhow::bail!("guidance.smoothing_gain must be in (0, 1]");
        }
        if self.guidance.refresh_interval_ms == 0 || self.guidance.guidance_interval_ms == 0 {
            anyhow::bail!("guidance tick intervals must be non-zero");
        }
        Ok(())
    }

    pub fn default_config() -> Self {
        // Campus deployment: five beacons around the ground floor
        let catalog = vec![
            campus_beacon(
                "D8:DE:11:70:B3:0A",
                "Stairs",
                40.4734286,
                -3.6974712,
                "You have reached the stairs. Floor 1 offices, floor 2 classrooms.",
            ),
            campus_beacon(
                "F7:31:A1:31:5E:5B",
                "Cafeteria",
                40.4734276,
                -3.6974739,
                "You are in front of the cafeteria. Steps ahead, be careful.",
            ),
            campus_beacon(
                "D7:9B:16:04:4C:C0",
                "Assembly Hall",
                40.4735414,
                -3.6969087,
                "You are next to the assembly hall. Steps ahead, be careful.",
            ),
            campus_beacon(
                "F5:16:21:95:E9:C2",
                "Front Office",
                40.4734276,
                -3.6974739,
                "You have reached the front office.",
            ),
            campus_beacon(
                "E3:B3:F9:53:28:5F",
                "Cafeteria and Entrance Crossing",
                40.4734276,
                -3.6974739,
                "You are at the crossing between the cafeteria and the entrance.",
            ),
        ];

        Config {
            beacons: BeaconsConfig {
                allowed: catalog.iter().map(|b| b.id.clone()).collect(),
                catalog,
            },
            filter: FilterConfig::default(),
            guidance: GuidanceConfig::default(),
            scan: ScanConfig::default(),
            speech: SpeechConfig::default(),
            gps: GpsConfig::default(),
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

fn campus_beacon(id: &str, name: &str, latitude: f64, longitude: f64, arrival: &str) -> BeaconEntry {
    BeaconEntry {
        id: id.to_string(),
        name: Some(name.to_string()),
        latitude: Some(latitude),
        longitude: Some(longitude),
        arrival_message: Some(arrival.to_string()),
    }
}
