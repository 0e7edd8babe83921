use log::{debug, info, warn};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, timeout};

use crate::config::GpsConfig;
use crate::error::{GuideError, Result};
use crate::events::{SensorEvent, SensorKind};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Position source backed by a local gpsd
pub struct GpsClient {
    host: String,
    port: u16,
    poll_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsFix {
    pub lat: f64,
    pub lon: f64,
}

impl GpsClient {
    pub fn new(config: &GpsConfig) -> Self {
        GpsClient {
            host: config.host.clone(),
            port: config.port,
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
        }
    }

    /// Stream fixes into the engine until `running` clears or the engine goes away.
    ///
    /// Connection failures are retried; the first one is reported so the
    /// engine can announce degraded mode.
    pub async fn run(&self, tx: mpsc::Sender<SensorEvent>, running: Arc<AtomicBool>) {
        info!("Connecting to gpsd at {}:{}", self.host, self.port);
        let mut reported = false;

        while running.load(Ordering::SeqCst) {
            match self.connect_and_read(&tx, &running).await {
                Ok(()) => break,
                Err(e) => {
                    warn!("GPS connection error: {}, retrying in {}s", e, RECONNECT_DELAY.as_secs());
                    if !reported {
                        reported = true;
                        let event = SensorEvent::SensorUnavailable {
                            kind: SensorKind::Gps,
                            detail: e.to_string(),
                        };
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    sleep(RECONNECT_DELAY).await;
                }
            }
        }

        info!("GPS client stopped");
    }

    fn error(&self, message: impl Into<String>) -> GuideError {
        GuideError::Gps {
            host: self.host.clone(),
            port: self.port,
            message: message.into(),
        }
    }

    async fn connect_and_read(&self, tx: &mpsc::Sender<SensorEvent>, running: &Arc<AtomicBool>) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| self.error("connection timed out"))?
            .map_err(|e| self.error(e.to_string()))?;

        let (read_half, mut write_half) = stream.into_split();

        // Enable JSON watch mode
        write_half
            .write_all(b"?WATCH={\"enable\":true,\"json\":true}\n")
            .await?;
        write_half.flush().await?;

        info!("Connected to gpsd, waiting for position data");

        let mut lines = BufReader::new(read_half).lines();
        let mut poll = interval(self.poll_interval);

        while running.load(Ordering::SeqCst) {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(json) = line? else {
                        return Err(self.error("gpsd closed the connection"));
                    };
                    for fix in parse_gpsd_json(&json) {
                        debug!("GPS: lat={}, lon={}", fix.lat, fix.lon);
                        let event = SensorEvent::Position { lat: fix.lat, lon: fix.lon };
                        if tx.send(event).await.is_err() {
                            return Ok(());
                        }
                    }
                }
                _ = poll.tick() => {
                    // Ask for the current fix even if the watch stream is quiet
                    write_half.write_all(b"?POLL;\n").await?;
                }
            }
        }

        Ok(())
    }
}

/// Extract fixes from a gpsd TPV report or POLL response
fn parse_gpsd_json(json: &str) -> Vec<GpsFix> {
    let Ok(value) = serde_json::from_str::<Value>(json) else {
        return Vec::new();
    };

    match value.get("class").and_then(Value::as_str) {
        Some("TPV") => parse_tpv(&value).into_iter().collect(),
        Some("POLL") => value
            .get("tpv")
            .and_then(Value::as_array)
            .map(|reports| reports.iter().filter_map(parse_tpv).collect())
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn parse_tpv(value: &Value) -> Option<GpsFix> {
    let lat = value.get("lat")?.as_f64()?;
    let lon = value.get("lon")?.as_f64()?;

    // Validate coordinates
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return None;
    }

    // Ignore invalid/zero coordinates
    if lat == 0.0 && lon == 0.0 {
        return None;
    }

    Some(GpsFix { lat, lon })
}
