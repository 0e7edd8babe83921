use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::BufRead;
use std::thread;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::error::{GuideError, Result};
use crate::registry::BeaconObservation;

/// Platform services the engine depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Bluetooth,
    Compass,
    Gps,
    Speech,
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorKind::Bluetooth => write!(f, "Bluetooth"),
            SensorKind::Compass => write!(f, "compass"),
            SensorKind::Gps => write!(f, "GPS"),
            SensorKind::Speech => write!(f, "speech"),
        }
    }
}

/// Everything that can reach the engine from outside
#[derive(Debug, Clone, PartialEq)]
pub enum SensorEvent {
    Advertisement(BeaconObservation),
    Heading(f64),
    Position { lat: f64, lon: f64 },
    StartScan,
    StopScan,
    ViewExited,
    SensorUnavailable { kind: SensorKind, detail: String },
    CalibrationTip,
}

/// One parsed line of an event stream
#[derive(Debug, Clone, PartialEq)]
pub struct TimedEvent {
    /// Pause before delivering the event
    pub delay: Duration,
    pub event: SensorEvent,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum WireEvent {
    Advertisement {
        id: String,
        rssi: i32,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    Heading {
        degrees: f64,
    },
    Position {
        lat: f64,
        lon: f64,
    },
    StartScan,
    StopScan,
    ViewExited,
    SensorUnavailable {
        kind: SensorKind,
        #[serde(default)]
        detail: String,
    },
    CalibrationTip,
}

#[derive(Debug, Deserialize)]
struct WireLine {
    #[serde(default)]
    after_ms: u64,
    #[serde(flatten)]
    event: WireEvent,
}

impl From<WireEvent> for SensorEvent {
    fn from(wire: WireEvent) -> Self {
        match wire {
            WireEvent::Advertisement { id, rssi, timestamp } => {
                SensorEvent::Advertisement(BeaconObservation {
                    id,
                    rssi,
                    timestamp: timestamp.unwrap_or_else(Utc::now),
                })
            }
            WireEvent::Heading { degrees } => SensorEvent::Heading(degrees),
            WireEvent::Position { lat, lon } => SensorEvent::Position { lat, lon },
            WireEvent::StartScan => SensorEvent::StartScan,
            WireEvent::StopScan => SensorEvent::StopScan,
            WireEvent::ViewExited => SensorEvent::ViewExited,
            WireEvent::SensorUnavailable { kind, detail } => {
                SensorEvent::SensorUnavailable { kind, detail }
            }
            WireEvent::CalibrationTip => SensorEvent::CalibrationTip,
        }
    }
}

/// Parse one JSON-lines record.
///
/// Blank lines and `#` comments yield `Ok(None)`.
pub fn parse_event_line(line: &str, line_no: usize) -> Result<Option<TimedEvent>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let wire: WireLine = serde_json::from_str(trimmed).map_err(|e| GuideError::Event {
        line: line_no,
        message: e.to_string(),
    })?;

    Ok(Some(TimedEvent {
        delay: Duration::from_millis(wire.after_ms),
        event: wire.event.into(),
    }))
}

/// Read JSON lines from a blocking source on its own OS thread.
///
/// Blocking reads such as stdin cannot be cancelled, so the thread is never
/// joined: it exits at end of input or on the first send after the engine is
/// gone, and never holds up runtime shutdown. End of input is forwarded as
/// `ViewExited`.
pub fn spawn_line_reader<R>(reader: R, tx: mpsc::Sender<SensorEvent>) -> std::io::Result<thread::JoinHandle<()>>
where
    R: BufRead + Send + 'static,
{
    thread::Builder::new()
        .name("event-reader".to_string())
        .spawn(move || {
            match pump_lines_blocking(reader, &tx) {
                Ok(count) => debug!("Event source delivered {} events", count),
                Err(e) => warn!("Event source failed: {}", e),
            }
            let _ = tx.blocking_send(SensorEvent::ViewExited);
        })
}

fn pump_lines_blocking<R: BufRead>(reader: R, tx: &mpsc::Sender<SensorEvent>) -> Result<usize> {
    let mut delivered = 0;

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let timed = match parse_event_line(&line, index + 1) {
            Ok(Some(timed)) => timed,
            Ok(None) => continue,
            Err(e) => {
                warn!("Skipping event: {}", e);
                continue;
            }
        };

        if !timed.delay.is_zero() {
            thread::sleep(timed.delay);
        }

        if tx.blocking_send(timed.event).is_err() {
            debug!("Engine gone, stopping event reader");
            break;
        }
        delivered += 1;
    }

    info!("Event stream finished after {} events", delivered);
    Ok(delivered)
}

/// Feed events from a JSON-lines stream into the engine channel.
///
/// Malformed lines are logged and skipped. Stops at end of input or when the
/// receiver is gone. Returns the number of events delivered.
pub async fn pump_events<R>(reader: R, tx: mpsc::Sender<SensorEvent>) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut line_no = 0;
    let mut delivered = 0;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;

        let timed = match parse_event_line(&line, line_no) {
            Ok(Some(timed)) => timed,
            Ok(None) => continue,
            Err(e) => {
                warn!("Skipping event: {}", e);
                continue;
            }
        };

        if !timed.delay.is_zero() {
            sleep(timed.delay).await;
        }

        if tx.send(timed.event).await.is_err() {
            debug!("Engine gone, stopping event reader");
            break;
        }
        delivered += 1;
    }

    info!("Event stream finished after {} events", delivered);
    Ok(delivered)
}
