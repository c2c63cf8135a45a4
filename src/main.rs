//! # GNSS Tracker
//!
//! Store-and-forward position tracker for devices with an unreliable uplink.
//!
//! Samples the GNSS receiver at a fixed cadence, writes full batches to disk
//! and spends the rest of each sampling interval delivering them, keeping a
//! durable backlog of whatever could not be sent.

use anyhow::{Context, Result};
use std::path::Path;
use tokio::time::sleep_until;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use gnss_tracker::config::{Config, SourceKind, TransportKind};
use gnss_tracker::gnss::replay::NmeaReplay;
use gnss_tracker::gnss::serial::SerialGnss;
use gnss_tracker::gnss::PositionSource;
use gnss_tracker::tracker::Tracker;
use gnss_tracker::transmit::outbox::OutboxTransport;
use gnss_tracker::transmit::simulated::SimulatedTransport;
use gnss_tracker::transmit::Transport;

/// Configuration file used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Diagnostic log file inside the log directory
const LOG_FILE_NAME: &str = "output.txt";

/// Main entry point for the GNSS tracker
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration (first CLI argument, or `config/default.toml`)
///    - Set up logging to stdout and `<log_dir>/output.txt`
///    - Open the position source and the transport
///    - Restore the backlog from `<log_dir>/backlog.txt`
///
/// 2. **Main Loop**
///    - Run one sampling cycle (acquire, record, batch, transmit)
///    - Sleep until the next sampling instant
///    - Handle Ctrl+C for graceful shutdown
///
/// 3. **Shutdown**
///    - Persist the backlog state
///
/// # Errors
///
/// Returns error if:
/// - The configuration cannot be loaded
/// - The position source cannot be opened or fails mid-run
///
/// A supervisor (systemd, ...) is expected to restart the process on error.
///
/// # Examples
///
/// ```bash
/// cargo run --release -- config/default.toml
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    let _log_guard = init_logging(&config.storage.log_dir)?;

    info!("GNSS Tracker v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from {}", config_path);
    info!("Tracker id: {}", config.tracker.id);

    let source = open_source(&config)?;
    let transport = open_transport(&config)?;
    let mut tracker = Tracker::from_config(&config, source, transport)
        .context("Failed to initialize tracker")?;

    if tracker.is_backlog_pending() {
        info!("Resuming with {} pending batches", tracker.backlog().len());
    }

    let interval = config.sample_interval();
    info!(
        "Sampling every {}s, batches of {} ({:?} encoding)",
        config.gnss.sample_interval_s, config.batch.size, config.batch.encoding
    );
    info!("Press Ctrl+C to exit");

    // Main sampling loop
    loop {
        let cycle_start = match tracker.run_cycle().await {
            Ok(start) => start,
            Err(e) => {
                error!("Sampling cycle failed: {}", e);
                tracker.shutdown();
                return Err(e).context("Position source failed");
            }
        };

        tokio::select! {
            _ = sleep_until(cycle_start + interval) => {}

            // Handle Ctrl+C for graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    tracker.shutdown();
    Ok(())
}

/// Log to stdout and to the persistent diagnostic log
///
/// The returned guard flushes the file writer when dropped.
fn init_logging(log_dir: &str) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir))?;

    let file_appender = tracing_appender::rolling::never(Path::new(log_dir), LOG_FILE_NAME);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .init();

    Ok(guard)
}

fn open_source(config: &Config) -> Result<Box<dyn PositionSource>> {
    match config.gnss.source {
        SourceKind::Serial => {
            let gnss = SerialGnss::open(&config.gnss.port, config.gnss.baud_rate, config.read_window())
                .context("Failed to open GNSS receiver")?;
            info!("GNSS receiver opened at {}", gnss.device_path());
            Ok(Box::new(gnss))
        }
        SourceKind::Replay => {
            let replay = NmeaReplay::from_file(&config.gnss.replay_file).with_context(|| {
                format!("Failed to load NMEA capture {}", config.gnss.replay_file)
            })?;
            warn!(
                "Replaying {} recorded bursts from {}",
                replay.len(),
                config.gnss.replay_file
            );
            Ok(Box::new(replay))
        }
    }
}

fn open_transport(config: &Config) -> Result<Box<dyn Transport>> {
    match config.transport.kind {
        TransportKind::Outbox => {
            let outbox = OutboxTransport::open(&config.transport.outbox_dir).with_context(|| {
                format!("Failed to open outbox {}", config.transport.outbox_dir)
            })?;
            info!("Delivering batches to outbox {}", outbox.dir().display());
            Ok(Box::new(outbox))
        }
        TransportKind::Simulated => {
            warn!(
                "Using simulated transport ({} outage windows)",
                config.transport.outages.len()
            );
            Ok(Box::new(SimulatedTransport::new(
                config.outage_windows(),
                std::time::Duration::from_millis(config.transport.latency_ms),
            )))
        }
    }
}
