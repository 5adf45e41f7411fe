//! # Orchestrator
//!
//! The fixed-cadence main loop. One cycle:
//!
//! 1. Merge any finished background time sync and read the corrected clock
//! 2. Read the primary (and, once it is failing, the terminal concurrently)
//! 3. Fold the primary outcome into the [`HealthMonitor`]
//! 4. Pick the fix to emit for the resulting state
//! 5. Encode it and write every sentence/frame to the sink
//!
//! Every I/O step carries its own timeout, so a cycle is bounded even when
//! both sources hang.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::{Config, OutputConfig, OutputProtocol};
use crate::error::Result;
use crate::fix::{FixSource, PositionFix};
use crate::health::{FailoverPolicy, HealthMonitor, HealthState};
use crate::mavlink::encoder::MavlinkEncoder;
use crate::nmea::encoder::NmeaEncoder;
use crate::sink::{Sink, WriteFailureTracker};
use crate::source::PositionSource;
use crate::time::TimeSource;

/// The configured wire protocol
#[derive(Debug)]
pub enum OutputEncoder {
    Nmea(NmeaEncoder),
    Mavlink(MavlinkEncoder),
}

impl OutputEncoder {
    pub fn from_config(config: &OutputConfig, boot: Instant) -> Self {
        match config.protocol {
            OutputProtocol::Nmea => OutputEncoder::Nmea(NmeaEncoder::new(config.sentences.clone())),
            OutputProtocol::Mavlink => OutputEncoder::Mavlink(
                MavlinkEncoder::new(config.system_id, config.component_id, boot)
                    .with_gps_input(config.gps_input),
            ),
        }
    }

    /// Sentences or frames for one cycle, in write order
    pub fn encode(&mut self, fix: &PositionFix, clock: DateTime<Utc>, now: Instant) -> Vec<Vec<u8>> {
        match self {
            OutputEncoder::Nmea(encoder) => encoder.encode(fix, clock),
            OutputEncoder::Mavlink(encoder) => encoder.encode_cycle(fix, clock, now),
        }
    }
}

/// Counters reported in the periodic status line
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub cycles: u64,
    pub primary_fixes: u64,
    pub fallback_fixes: u64,
    pub no_fix_cycles: u64,
    pub fallback_errors: u64,
    pub frames_written: u64,
}

/// What one cycle did
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub state: HealthState,
    /// The fix that was encoded (possibly a "no fix")
    pub fix: PositionFix,
    /// Corrected clock used for the cycle
    pub clock: DateTime<Utc>,
    pub frames_written: usize,
    pub write_failed: bool,
}

/// Owns every component and runs the loop
pub struct Orchestrator {
    primary: Box<dyn PositionSource>,
    fallback: Option<Box<dyn PositionSource>>,
    monitor: HealthMonitor,
    time: TimeSource,
    encoder: OutputEncoder,
    sink: Box<dyn Sink>,
    failures: WriteFailureTracker,
    interval: Duration,
    status_interval: Duration,
    last_status: Option<Instant>,
    stats: CycleStats,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.monitor.state())
            .field("fallback", &self.fallback.is_some())
            .field("sink", &self.sink.describe())
            .field("interval", &self.interval)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Assemble the loop
    ///
    /// Fallback is enabled exactly when a fallback source is supplied.
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `primary` - Local receiver
    /// * `fallback` - Satellite terminal, or `None` when fallback is disabled
    /// * `time` - Clock correction (possibly disabled)
    /// * `sink` - Acquired output sink
    /// * `boot` - Process start, anchoring MAVLink `time_boot_ms`
    pub fn new(
        config: &Config,
        primary: Box<dyn PositionSource>,
        fallback: Option<Box<dyn PositionSource>>,
        time: TimeSource,
        sink: Box<dyn Sink>,
        boot: Instant,
    ) -> Self {
        let policy = FailoverPolicy::from_config(&config.failover, fallback.is_some());

        Self {
            primary,
            fallback,
            monitor: HealthMonitor::new(policy),
            time,
            encoder: OutputEncoder::from_config(&config.output, boot),
            sink,
            failures: WriteFailureTracker::new(Duration::from_secs(config.output.warn_interval_s)),
            interval: Duration::from_millis(config.cycle.interval_ms),
            status_interval: Duration::from_secs(config.logging.status_interval_s),
            last_status: None,
            stats: CycleStats::default(),
        }
    }

    pub fn state(&self) -> HealthState {
        self.monitor.state()
    }

    pub fn stats(&self) -> CycleStats {
        self.stats
    }

    pub fn write_failures(&self) -> &WriteFailureTracker {
        &self.failures
    }

    /// Run one cycle at `now`
    pub async fn run_cycle(&mut self, now: Instant) -> CycleReport {
        self.time.poll(now).await;
        let clock = self.time.now();

        let state_before = self.monitor.state();
        let probe_primary = self.monitor.should_probe_primary(now);
        let query_fallback = self.fallback.is_some()
            && !matches!(state_before, HealthState::Healthy | HealthState::Unknown);

        let primary = &mut self.primary;
        let fallback = &mut self.fallback;
        let (primary_read, mut fallback_read) = tokio::join!(
            async move {
                if probe_primary {
                    Some(primary.fetch(clock).await)
                } else {
                    None
                }
            },
            async move {
                match fallback.as_mut() {
                    Some(source) if query_fallback => Some(source.fetch(clock).await),
                    _ => None,
                }
            }
        );

        // Kept so a degraded cycle still reports the receiver's satellite count
        let rejected = primary_read
            .as_ref()
            .and_then(|reading| reading.as_ref().ok())
            .map(PositionFix::invalidated);

        let accepted = match primary_read {
            Some(reading) => match self.monitor.observe(reading, now) {
                Ok(fix) => Some(fix),
                Err(err) => {
                    debug!("Primary reading not usable: {}", err);
                    None
                }
            },
            None => None,
        };

        let state = self.monitor.state();

        // Entered fallback this cycle without having asked the terminal yet
        if state == HealthState::Fallback && fallback_read.is_none() {
            if let Some(source) = self.fallback.as_mut() {
                fallback_read = Some(source.fetch(clock).await);
            }
        }

        let fix = self.select_fix(state, accepted, rejected, fallback_read, clock);
        self.emit(state, fix, clock, now).await
    }

    fn select_fix(
        &mut self,
        state: HealthState,
        accepted: Option<PositionFix>,
        rejected: Option<PositionFix>,
        fallback_read: Option<Result<PositionFix>>,
        clock: DateTime<Utc>,
    ) -> PositionFix {
        match state {
            HealthState::Healthy => match accepted {
                Some(fix) => {
                    self.stats.primary_fixes += 1;
                    fix
                }
                None => rejected.unwrap_or_else(|| PositionFix::no_fix(FixSource::Primary, clock)),
            },
            HealthState::Fallback => match fallback_read {
                Some(Ok(fix)) => {
                    self.monitor.note_fallback_fix(&fix);
                    if fix.valid {
                        self.stats.fallback_fixes += 1;
                    }
                    fix
                }
                Some(Err(err)) => {
                    self.stats.fallback_errors += 1;
                    debug!("Terminal query failed: {}", err);
                    PositionFix::no_fix(FixSource::Fallback, clock)
                }
                None => PositionFix::no_fix(FixSource::Fallback, clock),
            },
            // Degraded, Disconnected without fallback, or not yet probed
            HealthState::Unknown | HealthState::Degraded | HealthState::Disconnected => {
                if let Some(Err(err)) = fallback_read {
                    self.stats.fallback_errors += 1;
                    debug!("Terminal query failed: {}", err);
                }
                rejected.unwrap_or_else(|| PositionFix::no_fix(FixSource::Primary, clock))
            }
        }
    }

    async fn emit(
        &mut self,
        state: HealthState,
        fix: PositionFix,
        clock: DateTime<Utc>,
        now: Instant,
    ) -> CycleReport {
        if !fix.valid {
            self.stats.no_fix_cycles += 1;
        }

        let frames = self.encoder.encode(&fix, clock, now);

        let mut written = 0;
        let mut write_failed = false;
        for frame in &frames {
            if let Err(err) = self.sink.write(frame).await {
                // Rest of the cycle would fail the same way
                self.failures.record_failure(&err, now);
                write_failed = true;
                break;
            }
            written += 1;
        }

        if !write_failed {
            self.failures.record_success();
        }

        self.stats.cycles += 1;
        self.stats.frames_written += written as u64;

        CycleReport {
            state,
            fix,
            clock,
            frames_written: written,
            write_failed,
        }
    }

    /// Log the status line if it is due
    fn log_status(&mut self, report: &CycleReport, now: Instant) {
        let due = self
            .last_status
            .map_or(true, |last| now.saturating_duration_since(last) >= self.status_interval);
        if !due {
            return;
        }
        self.last_status = Some(now);

        let correction = self.time.correction();
        let time_status = if correction.available {
            format!(
                "offset {:+.3} s, synced {:.0?} ago",
                correction.offset_seconds,
                self.time.staleness(now).unwrap_or_default()
            )
        } else if self.time.is_enabled() {
            "not synced".to_string()
        } else {
            "disabled".to_string()
        };

        info!(
            "Status: {} cycles, state {}, emitting {} ({}), {} satellites, time {}, {} failed writes",
            self.stats.cycles,
            report.state,
            report.fix.source,
            if report.fix.valid { "fix" } else { "no fix" },
            report.fix.satellites,
            time_status,
            self.failures.total_failures()
        );
    }

    /// Run until Ctrl-C or SIGTERM, then close the sink
    ///
    /// # Errors
    ///
    /// Returns error if the termination signal handler cannot be installed
    pub async fn run(mut self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut terminate = terminate_signal()?;
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        info!(
            "Starting main loop every {:?}, writing to {}",
            self.interval,
            self.sink.describe()
        );
        info!("Press Ctrl+C to exit");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = Instant::now();
                    let report = self.run_cycle(now).await;
                    self.log_status(&report, now);
                }

                _ = &mut ctrl_c => {
                    info!("Received Ctrl+C, shutting down...");
                    break;
                }

                _ = terminate.recv() => {
                    info!("Received SIGTERM, shutting down...");
                    break;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Close the sink and log totals
    pub async fn shutdown(&mut self) {
        self.sink.close().await;
        info!(
            "Stopped after {} cycles ({} primary, {} fallback, {} without fix)",
            self.stats.cycles,
            self.stats.primary_fixes,
            self.stats.fallback_fixes,
            self.stats.no_fix_cycles
        );
        if self.monitor.state() == HealthState::Fallback {
            warn!("Exiting while in fallback");
        }
    }
}

fn terminate_signal() -> Result<tokio::signal::unix::Signal> {
    Ok(tokio::signal::unix::signal(
        tokio::signal::unix::SignalKind::terminate(),
    )?)
}
