//! # Primary Receiver
//!
//! Reads the local GNSS receiver line by line until a GGA sentence yields a
//! position. An RMC seen earlier in the same read window supplies ground
//! speed and course.
//!
//! The port is opened lazily and dropped when the device goes away, so the
//! next read after a USB unplug/replug reopens it.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::port_trait::{SentenceStream, SerialLineStream};
use super::PositionSource;
use crate::config::PrimaryConfig;
use crate::error::{BridgeError, Result};
use crate::fix::{FixSource, PositionFix};
use crate::nmea::decoder::{
    decode_sentence, is_position_sentence, GgaSentence, NmeaSentence, RmcSentence,
};
use crate::nmea::protocol::KNOTS_PER_MPS;

/// Opens a stream for (device path, baud rate)
pub type Connector<S> = Box<dyn FnMut(&str, u32) -> Result<S> + Send>;

/// Local serial GNSS receiver
pub struct PrimarySensor<S> {
    device: String,
    baud_rate: u32,
    read_timeout: Duration,
    connector: Connector<S>,
    port: Option<S>,
}

impl<S> std::fmt::Debug for PrimarySensor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimarySensor")
            .field("device", &self.device)
            .field("baud_rate", &self.baud_rate)
            .field("read_timeout", &self.read_timeout)
            .field("connected", &self.port.is_some())
            .finish_non_exhaustive()
    }
}

impl PrimarySensor<SerialLineStream> {
    /// Receiver on a real serial device
    pub fn serial(config: &PrimaryConfig) -> Self {
        Self::with_connector(config, Box::new(SerialLineStream::open))
    }
}

impl<S: SentenceStream> PrimarySensor<S> {
    /// Receiver whose port is produced by `connector`
    pub fn with_connector(config: &PrimaryConfig, connector: Connector<S>) -> Self {
        Self {
            device: config.device.clone(),
            baud_rate: config.baud_rate,
            read_timeout: Duration::from_millis(config.read_timeout_ms),
            connector,
            port: None,
        }
    }

    /// Whether a port is currently open
    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    /// Read until the next GGA sentence, bounded by the read timeout
    ///
    /// # Errors
    ///
    /// - `SourceUnavailable / Unreachable` if the device cannot be opened, or
    ///   it reports end of stream or an I/O error (the port is dropped)
    /// - `SourceUnavailable / Timeout` if no GGA arrives in time
    /// - `InvalidFix` if a sentence fails its checksum or cannot be parsed
    pub async fn read_fix(&mut self, captured_at: DateTime<Utc>) -> Result<PositionFix> {
        let mut port = match self.port.take() {
            Some(port) => port,
            None => self.connect()?,
        };

        match timeout(self.read_timeout, read_until_gga(&mut port, captured_at)).await {
            Ok(Ok(fix)) => {
                self.port = Some(port);
                Ok(fix)
            }
            Ok(Err(err)) if err.is_device_lost() => {
                warn!("Primary receiver {} lost: {}", self.device, err);
                Err(err)
            }
            Ok(Err(err)) => {
                self.port = Some(port);
                Err(err)
            }
            Err(_) => {
                self.port = Some(port);
                Err(BridgeError::timeout(FixSource::Primary, self.read_timeout))
            }
        }
    }

    fn connect(&mut self) -> Result<S> {
        match (self.connector)(&self.device, self.baud_rate) {
            Ok(port) => {
                info!("Opened primary receiver {} at {} baud", self.device, self.baud_rate);
                Ok(port)
            }
            Err(err) => {
                debug!("Cannot open primary receiver {}: {}", self.device, err);
                if err.is_device_lost() {
                    Err(err)
                } else {
                    Err(BridgeError::unreachable(FixSource::Primary, err.to_string()))
                }
            }
        }
    }
}

async fn read_until_gga<S: SentenceStream>(
    port: &mut S,
    captured_at: DateTime<Utc>,
) -> Result<PositionFix> {
    let mut motion: Option<RmcSentence> = None;

    loop {
        let line = match port.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                return Err(BridgeError::unreachable(FixSource::Primary, "end of stream"));
            }
            Err(e) => {
                return Err(BridgeError::unreachable(
                    FixSource::Primary,
                    format!("read failed: {}", e),
                ));
            }
        };

        let line = line.trim();
        // Partial first line after open, or line noise
        if !line.starts_with('$') {
            continue;
        }

        // Only a broken GGA/RMC says anything about the fix
        match decode_sentence(line) {
            Ok(NmeaSentence::Gga(gga)) => {
                return Ok(fix_from_gga(&gga, motion.as_ref(), captured_at));
            }
            Ok(NmeaSentence::Rmc(rmc)) => motion = Some(rmc),
            Ok(NmeaSentence::Other(_)) => {}
            Err(err) if is_position_sentence(line) => return Err(err),
            Err(err) => debug!("Skipping sentence: {}", err),
        }
    }
}

/// Build a fix from a GGA sentence and optional RMC motion data
///
/// A GGA without quality or coordinates becomes an invalid fix that still
/// carries the satellite count.
pub fn fix_from_gga(
    gga: &GgaSentence,
    rmc: Option<&RmcSentence>,
    captured_at: DateTime<Utc>,
) -> PositionFix {
    let (latitude, longitude) = match (gga.has_fix(), gga.latitude, gga.longitude) {
        (true, Some(lat), Some(lon)) => (lat, lon),
        _ => {
            let mut fix = PositionFix::no_fix(FixSource::Primary, captured_at);
            fix.satellites = gga.satellites;
            return fix;
        }
    };

    let mut fix = PositionFix::new(
        latitude,
        longitude,
        gga.altitude.unwrap_or(0.0),
        gga.satellites,
        FixSource::Primary,
        captured_at,
    );
    fix.hdop = gga.hdop;

    if let Some(rmc) = rmc.filter(|rmc| rmc.active) {
        fix.ground_speed = rmc.speed_knots.map(|knots| knots / KNOTS_PER_MPS);
        fix.course = rmc.course;
    }

    fix
}

#[async_trait]
impl<S: SentenceStream> PositionSource for PrimarySensor<S> {
    async fn fetch(&mut self, captured_at: DateTime<Utc>) -> Result<PositionFix> {
        self.read_fix(captured_at).await
    }

    fn kind(&self) -> FixSource {
        FixSource::Primary
    }
}
