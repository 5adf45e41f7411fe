//! # Starlink GPS Bridge
//!
//! Feeds a position daemon from the local GNSS receiver, switching to the
//! Starlink terminal's position while the receiver is unusable.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use starlink_gps_bridge::config::{Config, LoggingConfig};
use starlink_gps_bridge::orchestrator::Orchestrator;
use starlink_gps_bridge::sink::open_sink;
use starlink_gps_bridge::source::primary::PrimarySensor;
use starlink_gps_bridge::source::terminal::{FallbackProvider, GrpcurlClient};
use starlink_gps_bridge::source::PositionSource;
use starlink_gps_bridge::time::TimeSource;

/// File name prefix of the daily rolling log
const LOG_FILE_PREFIX: &str = "starlink-gps-bridge.log";

/// Main entry point
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration from the first argument, or use defaults
///    - Set up logging (`RUST_LOG` overrides the configured level)
///    - Acquire the output sink; failure here is fatal
///    - Synchronize the clock once; failure here is not
///
/// 2. **Main Loop**
///    - One cycle per `[cycle].interval_ms` until Ctrl+C or SIGTERM
///
/// 3. **Graceful Shutdown**
///    - Close the sink, removing a FIFO this process created
///
/// # Errors
///
/// Returns error if:
/// - The configuration file cannot be read or is invalid
/// - The output sink cannot be acquired
///
/// # Examples
///
/// ```bash
/// starlink-gps-bridge /etc/starlink-gps-bridge.toml
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(Path::new(&path))
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => Config::default(),
    };

    let _log_guard = init_logging(&config.logging)?;

    info!("Starlink GPS Bridge v{} starting...", env!("CARGO_PKG_VERSION"));

    let sink = open_sink(&config.output)
        .await
        .context("Failed to acquire output sink")?;

    let primary: Box<dyn PositionSource> = Box::new(PrimarySensor::serial(&config.primary));
    info!(
        "Primary receiver: {} at {} baud",
        config.primary.device, config.primary.baud_rate
    );

    let fallback: Option<Box<dyn PositionSource>> = if config.terminal.enabled {
        info!("Fallback terminal: {}", config.terminal.address);
        Some(Box::new(FallbackProvider::new(GrpcurlClient::new(&config.terminal))))
    } else {
        warn!("Fallback disabled; a failed receiver yields \"no fix\" output");
        None
    };

    let mut time = TimeSource::from_config(&config.time);
    if time.is_enabled() {
        // Logged by the time source; the loop retries in the background
        let _ = time.sync_now(Instant::now()).await;
    }

    let orchestrator = Orchestrator::new(&config, primary, fallback, time, sink, Instant::now());
    orchestrator.run().await?;

    Ok(())
}

/// Install the tracing subscriber
///
/// Returns the file writer's guard, which must live until exit so buffered
/// lines are flushed.
fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .with_context(|| format!("Invalid log level {:?}", config.level))?;

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}
