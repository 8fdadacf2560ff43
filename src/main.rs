//! Fleet Telemetry CLI
//!
//! Simulation and aggregation engine for mobile units and charging stations.

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use fleet_telemetry::{
    config::Config,
    core::{FleetSummary, SeriesPoint},
    engine::{Engine, IngestSummary},
    feature_contract,
    quality::{create_shared_log, create_shared_log_with_persistence, SharedQualityLog},
    replay,
    telemetry::{Cadence, DriverConfig, SimulationDriver, SyntheticGenerator, TickBatch},
    FleetReport, VERSION,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const QUALITY_STATS_FILE: &str = "quality_stats.json";

#[derive(Parser)]
#[command(name = "fleet-telemetry")]
#[command(version = VERSION)]
#[command(about = "Telemetry simulation and aggregation for a fleet of mobile units")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the synthetic fleet and aggregate its telemetry
    Run {
        /// Stop after this many seconds (runs until Ctrl+C otherwise)
        #[arg(long)]
        duration: Option<u64>,

        /// Seed the generator for a reproducible run
        #[arg(long)]
        seed: Option<u64>,

        /// Directory for the exported report
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Serve the HTTP read surface on this port (requires server feature)
        #[arg(long)]
        port: Option<u16>,

        /// Only print the final report summary
        #[arg(long)]
        quiet: bool,
    },

    /// Replay recorded raw events (JSON array or JSON Lines)
    Replay {
        /// File to replay
        file: PathBuf,

        /// Only replay events from this UTC day (YYYY-MM-DD)
        #[arg(long)]
        day: Option<NaiveDate>,

        /// Write the full report to this file
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Print the feature contract
    Features,

    /// Show cumulative data-quality statistics
    Status,

    /// Show configuration
    Config,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            duration,
            seed,
            output,
            port,
            quiet,
        } => cmd_run(duration, seed, output, port, quiet),
        Commands::Replay { file, day, output } => cmd_replay(&file, day, output),
        Commands::Features => {
            cmd_features();
            Ok(())
        }
        Commands::Status => cmd_status(),
        Commands::Config => cmd_config(),
    }
}

fn cmd_run(
    duration: Option<u64>,
    seed: Option<u64>,
    output: Option<PathBuf>,
    port: Option<u16>,
    quiet: bool,
) -> anyhow::Result<()> {
    println!("Fleet Telemetry v{VERSION}");
    println!();

    let mut config = Config::load().context("Failed to load configuration")?;
    if seed.is_some() {
        config.simulation.seed = seed;
    }
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    println!("Starting simulation...");
    println!(
        "  Fleet: {} units, {} stations",
        config.simulation.units.len(),
        config.simulation.stations.len()
    );
    println!(
        "  Arena: {} x {}",
        config.simulation.arena.width, config.simulation.arena.height
    );
    println!(
        "  Ticks: fast {}ms, slow {}ms",
        config.simulation.fast_tick.as_millis(),
        config.simulation.slow_tick.as_millis()
    );
    match duration {
        Some(secs) => println!("  Duration: {secs}s"),
        None => println!("  Duration: until Ctrl+C"),
    }

    let quality = create_shared_log_with_persistence(config.data_path.join(QUALITY_STATS_FILE));
    let engine = Arc::new(Engine::new(&config, quality.clone())?);

    #[cfg(feature = "server")]
    let server = match port {
        Some(port) => {
            let runtime = tokio::runtime::Runtime::new()?;
            let (addr, shutdown_tx) = runtime.block_on(fleet_telemetry::server::run(
                fleet_telemetry::server::ServerConfig::new(port, engine.clone()),
            ))?;
            println!("  HTTP: http://{addr}");
            Some((runtime, shutdown_tx))
        }
        None => None,
    };
    #[cfg(not(feature = "server"))]
    if port.is_some() {
        eprintln!("Warning: --port ignored (server feature not enabled at compile time)");
    }

    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    let generator = SyntheticGenerator::new(&config.simulation);
    let mut driver = SimulationDriver::new(generator, DriverConfig::from(&config.simulation));
    driver.start()?;

    let receiver = driver.receiver().clone();
    let deadline = duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut dropped_seen = 0;

    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }

        match receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(batch) => {
                let result = engine.ingest_batch(&batch);
                if !quiet {
                    print_tick(&batch, &result, &engine.summary());
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                eprintln!("Driver disconnected unexpectedly");
                break;
            }
        }

        dropped_seen = sync_dropped(&driver, &quality, dropped_seen);
    }

    println!();
    println!("Stopping simulation...");
    driver.stop()?;
    while let Some(batch) = driver.try_recv() {
        engine.ingest_batch(&batch);
    }
    sync_dropped(&driver, &quality, dropped_seen);

    #[cfg(feature = "server")]
    if let Some((runtime, shutdown_tx)) = server {
        let _ = shutdown_tx.send(());
        runtime.shutdown_timeout(Duration::from_secs(1));
    }

    let report = engine.report(Utc::now());
    print_report(&report);

    let export_dir = output.unwrap_or_else(|| config.export_path.clone());
    let export_path = export_dir.join(report.file_name());
    match report.save(&export_path) {
        Ok(()) => println!("Exported report to {export_path:?}"),
        Err(e) => eprintln!("Error writing report: {e}"),
    }

    if let Err(e) = quality.save() {
        eprintln!("Warning: Could not save data-quality stats: {e}");
    }

    println!();
    println!("{}", quality.summary());
    Ok(())
}

fn cmd_replay(file: &Path, day: Option<NaiveDate>, output: Option<PathBuf>) -> anyhow::Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    let mut events = replay::load_raw_events(file)
        .with_context(|| format!("Failed to read replay file {file:?}"))?;
    println!("Loaded {} events from {:?}", events.len(), file);

    if let Some(day) = day {
        events = replay::restrict_to_day(events, day);
        println!("  {} events on {day}", events.len());
    }

    let quality = create_shared_log();
    let engine = Engine::new(&config, quality.clone())?;
    let result = engine.ingest_raw(&events);
    println!(
        "  Applied {}, stale {}, skipped {}, malformed {}",
        result.applied, result.stale, result.skipped, result.malformed
    );
    println!();

    // Open intervals close at the end of the replayed data, not at wall-clock time
    let end = events
        .iter()
        .map(|e| e.timestamp)
        .max()
        .unwrap_or_else(Utc::now);
    let report = engine.report(end);
    print_report(&report);

    if let Some(path) = output {
        report
            .save(&path)
            .with_context(|| format!("Failed to write report to {path:?}"))?;
        println!("Wrote report to {path:?}");
    }
    Ok(())
}

fn cmd_features() {
    println!("{}", feature_contract());
}

fn cmd_status() -> anyhow::Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    println!("Fleet Telemetry Status");
    println!("======================");
    println!();

    println!("Configuration:");
    println!(
        "  Fleet: {} units, {} stations",
        config.simulation.units.len(),
        config.simulation.stations.len()
    );
    println!("  Bucket granularity: {:?}", config.aggregation.granularity);
    println!("  Window cap: {}", config.aggregation.window_cap);
    println!("  Open intervals: {:?}", config.aggregation.open_interval);
    println!("  Export path: {:?}", config.export_path);
    println!();

    let stats_path = config.data_path.join(QUALITY_STATS_FILE);
    if stats_path.exists() {
        let content = std::fs::read_to_string(&stats_path)?;
        let stats: serde_json::Value = serde_json::from_str(&content)?;
        println!("Cumulative Statistics:");
        for (key, label) in [
            ("events_ingested", "Events ingested"),
            ("events_applied", "Events applied"),
            ("events_stale", "Stale events ignored"),
            ("malformed_values", "Malformed numeric values"),
            ("unknown_features", "Unknown feature codes"),
            ("events_evicted", "Events evicted by retention"),
            ("ticks_emitted", "Ticks emitted"),
            ("ticks_dropped", "Ticks dropped"),
        ] {
            if let Some(value) = stats.get(key) {
                println!("  {label}: {value}");
            }
        }
        if let Some(updated) = stats.get("last_updated").and_then(|v| v.as_str()) {
            println!("  Last updated: {updated}");
        }
    } else {
        println!("No previous run data found.");
    }
    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn print_tick(batch: &TickBatch, result: &IngestSummary, summary: &FleetSummary) {
    let cadence = match batch.cadence {
        Cadence::Initial => "initial",
        Cadence::Fast => "units",
        Cadence::Slow => "station",
    };
    println!(
        "[{}] {:<7} {:>2} events | units {} ({} charging) | battery {} | stations {}/{} occupied",
        batch.at.format("%H:%M:%S"),
        cadence,
        result.total(),
        summary.units,
        summary.units_charging,
        format_battery(summary.mean_battery),
        summary.stations_occupied,
        summary.stations
    );
}

fn print_report(report: &FleetReport) {
    let summary = &report.summary;
    println!("Fleet Summary:");
    println!("  Units: {} ({} charging)", summary.units, summary.units_charging);
    println!("  Mean battery: {}", format_battery(summary.mean_battery));
    println!(
        "  Stations: {} ({} occupied)",
        summary.stations, summary.stations_occupied
    );
    println!();

    if !report.uptime.is_empty() {
        println!("Time Operational:");
        for entity in &report.uptime {
            println!(
                "  {}: {}s",
                entity.entity_id,
                entity.total.num_milliseconds() as f64 / 1000.0
            );
        }
        println!();
    }

    if !report.battery_series.is_empty() {
        println!("Battery Level Trend:");
        print_series(&report.battery_series);
        println!();
    }

    if !report.temperature_averages.is_empty() {
        println!("Temperature Averages:");
        for avg in &report.temperature_averages {
            println!(
                "  {} {}: {:.1}°C ({} samples)",
                avg.entity_id, avg.feature, avg.mean, avg.samples
            );
        }
        println!();
    }
}

fn print_series(points: &[SeriesPoint]) {
    for point in points {
        println!("  {}  {:.1}", point.label, point.mean_value);
    }
}

fn format_battery(mean: Option<f64>) -> String {
    mean.map(|m| format!("{m}%"))
        .unwrap_or_else(|| "n/a".to_string())
}

/// Copy newly dropped ticks from the driver into the quality log.
fn sync_dropped(driver: &SimulationDriver, quality: &SharedQualityLog, seen: u64) -> u64 {
    let dropped = driver.dropped_ticks();
    if dropped > seen {
        quality.record_ticks_dropped(dropped - seen);
    }
    dropped
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl+C handler");
}
