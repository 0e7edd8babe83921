use log::{info, warn};
use std::net::{TcpStream, ToSocketAddrs};
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::config::{Config, GpsConfig, SpeechConfig};
use crate::error::GuideError;
use crate::events::{SensorEvent, SensorKind};

/// Result of startup validation
///
/// Nothing here is fatal: every failure becomes a degraded-mode notice.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// None if disabled, Some(true) if reachable, Some(false) if not
    pub gps_available: Option<bool>,
    pub gps_error: Option<GuideError>,
    /// None if disabled, Some(true) if the TTS program runs
    pub speech_available: Option<bool>,
    pub speech_error: Option<GuideError>,
}

impl ValidationResult {
    /// Sensor-unavailable events for everything that failed
    pub fn notices(&self) -> Vec<SensorEvent> {
        let mut events = Vec::new();
        if let Some(e) = &self.speech_error {
            events.push(SensorEvent::SensorUnavailable {
                kind: SensorKind::Speech,
                detail: e.to_string(),
            });
        }
        if let Some(e) = &self.gps_error {
            events.push(SensorEvent::SensorUnavailable {
                kind: SensorKind::Gps,
                detail: e.to_string(),
            });
        }
        events
    }
}

/// Check if gpsd daemon is reachable via TCP connection
pub fn check_gpsd_reachable(config: &GpsConfig) -> Result<(), GuideError> {
    let unreachable = |message: String| GuideError::Gps {
        host: config.host.clone(),
        port: config.port,
        message,
    };

    let addrs: Vec<_> = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|e| unreachable(e.to_string()))?
        .collect();

    for addr in &addrs {
        if TcpStream::connect_timeout(addr, Duration::from_secs(2)).is_ok() {
            info!("GPS daemon reachable at {}", addr);
            return Ok(());
        }
    }

    Err(unreachable("connection refused or timed out".to_string()))
}

/// Check that the TTS program can be launched
pub fn check_speech_backend(config: &SpeechConfig) -> Result<(), GuideError> {
    let status = Command::new(&config.command)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| GuideError::Speech(format!("{}: {}", config.command, e)))?;

    if !status.success() {
        return Err(GuideError::Speech(format!(
            "{} exited with {}",
            config.command, status
        )));
    }
    Ok(())
}

/// Probe optional platform services before the session starts
pub fn validate_startup(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::default();

    if config.speech.enabled {
        match check_speech_backend(&config.speech) {
            Ok(()) => result.speech_available = Some(true),
            Err(e) => {
                warn!("Speech backend unavailable (continuing with log output): {}", e);
                result.speech_available = Some(false);
                result.speech_error = Some(e);
            }
        }
    }

    if config.gps.enabled {
        match check_gpsd_reachable(&config.gps) {
            Ok(()) => result.gps_available = Some(true),
            Err(e) => {
                warn!("GPS validation failed (continuing without GPS): {}", e);
                result.gps_available = Some(false);
                result.gps_error = Some(e);
            }
        }
    }

    result
}
