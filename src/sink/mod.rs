//! # Output Sinks
//!
//! Best-effort, non-blocking delivery of encoded sentences and frames.
//!
//! - [`fifo::FifoSink`] feeds a named pipe read by a position daemon
//! - [`udp::UdpSink`] sends one datagram per sentence/frame
//!
//! A write waits at most [`SINK_WRITE_BUDGET`] for the destination to become
//! writable, then fails with `SinkWriteFailed`; the caller counts it as
//! backpressure and tries again next cycle. Only
//! acquiring the sink at startup can fail fatally (`SinkUnavailable`).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::{OutputConfig, SinkKind};
use crate::error::{BridgeError, Result};

pub mod fifo;
pub mod udp;

pub use fifo::FifoSink;
pub use udp::UdpSink;

/// Longest a single write waits for readiness before it counts as backpressure
pub const SINK_WRITE_BUDGET: Duration = Duration::from_millis(20);

/// Destination for encoded output
#[async_trait]
pub trait Sink: Send {
    /// Write one sentence or frame without blocking
    async fn write(&mut self, frame: &[u8]) -> Result<()>;

    /// Release the resource; further writes fail
    async fn close(&mut self);

    /// Human-readable destination for logs
    fn describe(&self) -> String;
}

/// Acquire the sink selected by the output configuration
///
/// # Errors
///
/// Returns [`BridgeError::SinkUnavailable`] if the FIFO cannot be created or
/// the UDP socket cannot be set up
pub async fn open_sink(config: &OutputConfig) -> Result<Box<dyn Sink>> {
    let sink: Box<dyn Sink> = match config.kind {
        SinkKind::Fifo => Box::new(FifoSink::acquire(&config.fifo_path)?),
        SinkKind::Udp => Box::new(UdpSink::connect(&config.udp_target).await?),
    };

    info!("Output sink ready: {}", sink.describe());
    Ok(sink)
}

/// Coalesces repeated write failures into one warning per interval
#[derive(Debug)]
pub struct WriteFailureTracker {
    warn_interval: Duration,
    consecutive: u64,
    total: u64,
    suppressed: u64,
    last_warned: Option<Instant>,
}

impl WriteFailureTracker {
    pub fn new(warn_interval: Duration) -> Self {
        Self {
            warn_interval,
            consecutive: 0,
            total: 0,
            suppressed: 0,
            last_warned: None,
        }
    }

    /// Count a failed cycle; returns true if a warning was logged
    pub fn record_failure(&mut self, err: &BridgeError, now: Instant) -> bool {
        self.consecutive += 1;
        self.total += 1;

        let due = self
            .last_warned
            .map_or(true, |last| now.saturating_duration_since(last) >= self.warn_interval);

        if !due {
            self.suppressed += 1;
            return false;
        }

        if self.suppressed > 0 {
            warn!(
                "{} ({} consecutive failures, {} warnings suppressed)",
                err, self.consecutive, self.suppressed
            );
        } else {
            warn!("{}", err);
        }

        self.last_warned = Some(now);
        self.suppressed = 0;
        true
    }

    /// Count a successful cycle
    pub fn record_success(&mut self) {
        if self.consecutive > 0 {
            info!("Sink writes resumed after {} failed cycles", self.consecutive);
        }
        self.consecutive = 0;
        self.suppressed = 0;
        self.last_warned = None;
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive
    }

    /// Failed cycles since startup
    pub fn total_failures(&self) -> u64 {
        self.total
    }
}
