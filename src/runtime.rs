use anyhow::{Context, Result};
use log::{debug, error, info};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};

use crate::catalog::BeaconCatalog;
use crate::config::Config;
use crate::distance::format_distance;
use crate::engine::{GuidanceEngine, GuidanceSnapshot};
use crate::events::{pump_events, spawn_line_reader, SensorEvent};
use crate::gps::GpsClient;
use crate::output::{OutputDispatcher, OutputRequest, Speaker};
use crate::validation::validate_startup;

const EVENT_QUEUE: usize = 1000;
const OUTPUT_QUEUE: usize = 64;

/// Where inbound sensor events come from
#[derive(Debug, Clone)]
pub enum EventSource {
    /// JSON lines on standard input
    Stdin,
    /// Recorded JSON-lines session
    Replay(PathBuf),
    /// Only events sent through [`Session::sender`]
    Channel,
}

/// One guidance session: the engine task plus its producers.
pub struct Session {
    config: Config,
    event_tx: mpsc::Sender<SensorEvent>,
    event_rx: mpsc::Receiver<SensorEvent>,
    running: Arc<AtomicBool>,
}

impl Session {
    pub fn new(config: Config) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);
        Session {
            config,
            event_tx,
            event_rx,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Inject events from outside, e.g. a Ctrl+C handler sending `ViewExited`
    pub fn sender(&self) -> mpsc::Sender<SensorEvent> {
        self.event_tx.clone()
    }

    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Run until the view is exited or every event producer is gone.
    ///
    /// End of the event source counts as leaving the view. Returns the final
    /// engine snapshot.
    pub async fn run(self, source: EventSource) -> Result<GuidanceSnapshot> {
        let Session {
            config,
            event_tx,
            mut event_rx,
            running,
        } = self;

        let catalog = BeaconCatalog::from_config(&config.beacons);
        info!(
            "Loaded {} allowed beacons ({} catalog entries)",
            catalog.allowed_count(),
            config.beacons.catalog.len()
        );

        // Startup probes block on sockets and subprocesses
        let startup_config = config.clone();
        let validation = tokio::task::spawn_blocking(move || validate_startup(&startup_config))
            .await
            .context("Startup validation task failed")?;

        let replay = open_replay(&source).await?;

        let speaker = if validation.speech_available == Some(true) {
            Speaker::new(&config.speech)
        } else {
            Speaker::silent()
        };

        // Nothing below may fail: cleanup must see every spawned task
        let (output_tx, output_rx) = mpsc::channel(OUTPUT_QUEUE);
        let dispatcher = tokio::spawn(OutputDispatcher::new(speaker).run(output_rx));
        let mut producers: Vec<JoinHandle<()>> = Vec::new();

        if let Some(reader) = replay {
            let tx = event_tx.clone();
            producers.push(tokio::spawn(async move {
                match pump_events(reader, tx.clone()).await {
                    Ok(count) => debug!("Event source delivered {} events", count),
                    Err(e) => error!("Event source failed: {}", e),
                }
                let _ = tx.send(SensorEvent::ViewExited).await;
            }));
        }

        if matches!(source, EventSource::Stdin) {
            // A blocked stdin read must not outlive the session
            info!("Reading sensor events from stdin");
            let stdin = std::io::BufReader::new(std::io::stdin());
            if let Err(e) = spawn_line_reader(stdin, event_tx.clone()) {
                error!("Failed to start stdin reader: {}", e);
            }
        }

        if validation.gps_available == Some(true) {
            let client = GpsClient::new(&config.gps);
            let tx = event_tx.clone();
            let gps_running = running.clone();
            producers.push(tokio::spawn(async move {
                client.run(tx, gps_running).await;
            }));
        }

        // Only producers and external senders keep the channel open now
        drop(event_tx);

        let mut engine = GuidanceEngine::new(&config, catalog);
        emit(&output_tx, engine.open()).await;
        for notice in validation.notices() {
            let requests = engine.handle(notice, Instant::now().into_std());
            emit(&output_tx, requests).await;
        }

        drive(&mut engine, &config, &mut event_rx, &output_tx).await;

        running.store(false, Ordering::SeqCst);
        for handle in &producers {
            handle.abort();
        }
        drop(output_tx);
        if let Err(e) = dispatcher.await {
            error!("Output dispatcher failed: {}", e);
        }

        let snapshot = engine.snapshot();
        info!("Session ended: {}", snapshot);
        for beacon in &snapshot.ranked {
            debug!(
                "  {} ({}) {} from {} readings",
                beacon.name,
                beacon.id,
                format_distance(beacon.distance_m),
                beacon.samples
            );
        }
        Ok(snapshot)
    }
}

async fn open_replay(source: &EventSource) -> Result<Option<BufReader<File>>> {
    let EventSource::Replay(path) = source else {
        return Ok(None);
    };
    let file = File::open(path)
        .await
        .with_context(|| format!("Failed to open event file: {:?}", path))?;
    info!("Replaying sensor events from {:?}", path);
    Ok(Some(BufReader::new(file)))
}

/// The actor loop: every engine mutation happens here
async fn drive(
    engine: &mut GuidanceEngine,
    config: &Config,
    events: &mut mpsc::Receiver<SensorEvent>,
    output: &mpsc::Sender<OutputRequest>,
) {
    let mut refresh = interval(config.guidance.refresh_interval());
    refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut guidance = interval(config.guidance.guidance_interval());
    guidance.set_missed_tick_behavior(MissedTickBehavior::Skip);

    while !engine.is_finished() {
        let deadline = engine.scan_deadline();

        tokio::select! {
            event = events.recv() => {
                let now = Instant::now().into_std();
                let requests = match event {
                    Some(event) => engine.handle(event, now),
                    None => {
                        info!("All event sources closed");
                        engine.view_exited()
                    }
                };
                emit(output, requests).await;
            }
            _ = refresh.tick() => {
                engine.refresh(Instant::now().into_std());
            }
            _ = guidance.tick() => {
                let requests = engine.guide(Instant::now().into_std());
                emit(output, requests).await;
            }
            _ = wait_for(deadline) => {
                let requests = engine.check_scan_timeout(Instant::now().into_std());
                emit(output, requests).await;
            }
        }
    }
}

async fn wait_for(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(deadline) => sleep_until(Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

async fn emit(output: &mpsc::Sender<OutputRequest>, requests: Vec<OutputRequest>) {
    for request in requests {
        if output.send(request).await.is_err() {
            debug!("Output dispatcher gone, dropping request");
            return;
        }
    }
}
