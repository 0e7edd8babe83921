use anyhow::{Context, Result};
use beaconguide::catalog::BeaconCatalog;
use beaconguide::config::Config;
use beaconguide::distance::{distance_category, estimate_distance, format_distance, map_strength_percent};
use beaconguide::events::SensorEvent;
use beaconguide::runtime::{EventSource, Session};
use clap::{Parser, Subcommand};
use log::{info, LevelFilter};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "beaconguide")]
#[command(version = "0.1.0")]
#[command(about = "Audio and haptic guidance toward BLE beacons")]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a live guidance session
    Run {
        /// Read sensor events from this file instead of stdin
        #[arg(long)]
        events: Option<PathBuf>,

        /// Do not connect to gpsd
        #[arg(long)]
        no_gps: bool,

        /// Log utterances instead of speaking them
        #[arg(long)]
        no_speech: bool,
    },

    /// Replay a recorded session without speech or gpsd
    Replay {
        /// JSON-lines event file
        file: PathBuf,
    },

    /// List configured beacons
    Beacons,

    /// Estimate distance for an RSSI reading
    Estimate {
        /// Received signal strength in dBm
        #[arg(allow_hyphen_values = true)]
        rssi: f64,
    },

    /// Write a default configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_secs()
        .init();

    // Handle init command before loading config
    if matches!(cli.command, Commands::Init) {
        return handle_init(&cli.config);
    }

    let config = if cli.config.exists() {
        Config::load(&cli.config).context("Failed to load config")?
    } else {
        info!("Config file not found, using defaults");
        Config::default()
    };

    match cli.command {
        Commands::Run {
            events,
            no_gps,
            no_speech,
        } => {
            let source = match events {
                Some(path) => EventSource::Replay(path),
                None => EventSource::Stdin,
            };
            handle_run(config, source, no_gps, no_speech).await
        }
        Commands::Replay { file } => handle_run(config, EventSource::Replay(file), true, true).await,
        Commands::Beacons => handle_beacons(&config),
        Commands::Estimate { rssi } => handle_estimate(&config, rssi),
        Commands::Init => unreachable!(),
    }
}

async fn handle_run(mut config: Config, source: EventSource, no_gps: bool, no_speech: bool) -> Result<()> {
    if no_gps {
        config.gps.enabled = false;
    }
    if no_speech {
        config.speech.enabled = false;
    }

    let session = Session::new(config);

    // Ctrl+C leaves the guidance view
    let tx = session.sender();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived Ctrl+C, stopping guidance...");
        let _ = tx.try_send(SensorEvent::ViewExited);
    })?;

    let snapshot = session.run(source).await?;
    println!("{}", snapshot);
    Ok(())
}

fn handle_beacons(config: &Config) -> Result<()> {
    let catalog = BeaconCatalog::from_config(&config.beacons);
    let allowed = catalog.allowed_ids();

    println!("{} allowed beacons", allowed.len());
    println!();

    for id in &allowed {
        println!("ID: {}", id);
        println!("  Name: {}", catalog.display_name(id));
        match catalog.location(id) {
            Some(point) => println!("  Location: {:.7}, {:.7}", point.lat, point.lon),
            None => println!("  Location: <none, ignored during guidance>"),
        }
        println!("  Arrival: {}", catalog.arrival_message(id));
        println!();
    }

    Ok(())
}

fn handle_estimate(config: &Config, rssi: f64) -> Result<()> {
    let distance = estimate_distance(rssi, config.filter.reference_power_dbm);

    println!("RSSI: {} dBm", rssi);
    println!("  Distance: {}", format_distance(distance));
    println!("  Category: {}", distance_category(distance));
    println!("  Signal: {}%", map_strength_percent(rssi));

    Ok(())
}

fn handle_init(path: &Path) -> Result<()> {
    info!("Initializing beaconguide configuration...");

    let config = Config::default();
    config
        .save(path)
        .with_context(|| format!("Failed to write {:?}", path))?;
    info!("Created {:?}", path);

    info!("Initialization complete!");
    info!("Edit {:?} to set the beacon allow-list and coordinates.", path);
    info!("Run 'beaconguide run' and feed JSON-lines sensor events on stdin.");

    Ok(())
}
