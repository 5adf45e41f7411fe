//! # Position Sources
//!
//! The two places a fix can come from:
//!
//! - [`primary::PrimarySensor`] reads NMEA sentences from a local serial
//!   receiver
//! - [`terminal::FallbackProvider`] queries the satellite terminal's location
//!   and status procedures
//!
//! Both report failures through the bridge error taxonomy so the health
//! monitor can tell a timeout from an absent device from bad data.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::fix::{FixSource, PositionFix};

pub mod port_trait;
pub mod primary;
pub mod terminal;

/// Anything that can produce one [`PositionFix`] per call
#[async_trait]
pub trait PositionSource: Send {
    /// Produce a reading, stamping it with `captured_at`
    ///
    /// # Errors
    ///
    /// - `SourceUnavailable` when the device or endpoint times out or is absent
    /// - `InvalidFix` when it answers with data that cannot be decoded
    async fn fetch(&mut self, captured_at: DateTime<Utc>) -> Result<PositionFix>;

    /// Which source this is
    fn kind(&self) -> FixSource;
}
