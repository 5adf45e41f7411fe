//! # NMEA Protocol Constants and Types
//!
//! Field formats shared by the encoder and decoder.

use serde::Deserialize;

/// Talker prefix used for every emitted sentence
pub const NMEA_TALKER: &str = "GP";

/// Talkers accepted from the primary receiver
pub const ACCEPTED_TALKERS: &[&str] = &["GP", "GN", "GL"];

/// Sentence terminator expected by gpsd
pub const NMEA_LINE_ENDING: &str = "\r\n";

/// Maximum satellites listed in a GSA sentence
pub const GSA_MAX_SATELLITES: usize = 12;

/// HDOP reported when the source gives none
pub const DEFAULT_HDOP: f64 = 1.0;

/// Knots per meter per second
pub const KNOTS_PER_MPS: f64 = 1.943_844_5;

/// Kilometers per hour per meter per second
pub const KMH_PER_MPS: f64 = 3.6;

/// Sentence types the encoder can render
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SentenceKind {
    /// Global positioning system fix data
    Gga,
    /// Recommended minimum navigation information
    Rmc,
    /// DOP and active satellites
    Gsa,
    /// Track made good and ground speed
    Vtg,
    /// Geographic position
    Gll,
    /// Date and time
    Zda,
}

impl SentenceKind {
    /// Three-letter sentence identifier
    pub fn id(&self) -> &'static str {
        match self {
            SentenceKind::Gga => "GGA",
            SentenceKind::Rmc => "RMC",
            SentenceKind::Gsa => "GSA",
            SentenceKind::Vtg => "VTG",
            SentenceKind::Gll => "GLL",
            SentenceKind::Zda => "ZDA",
        }
    }
}

/// Default sentence set emitted every cycle
pub fn default_sentences() -> Vec<SentenceKind> {
    vec![
        SentenceKind::Gga,
        SentenceKind::Rmc,
        SentenceKind::Gsa,
        SentenceKind::Vtg,
        SentenceKind::Gll,
    ]
}

/// Split an absolute coordinate into whole degrees and minutes rounded to
/// four decimals, carrying a rounded 60.0000' into the next degree
fn degrees_minutes(value: f64) -> (u32, f64) {
    let abs = value.abs();
    let mut degrees = abs.trunc() as u32;
    let mut minutes = ((abs - abs.trunc()) * 60.0 * 10_000.0).round() / 10_000.0;

    if minutes >= 60.0 {
        degrees += 1;
        minutes -= 60.0;
    }

    (degrees, minutes)
}

/// Format latitude as `DDMM.MMMM,H`
///
/// # Examples
///
/// ```
/// use starlink_gps_bridge::nmea::protocol::format_latitude;
///
/// assert_eq!(format_latitude(47.5), "4730.0000,N");
/// assert_eq!(format_latitude(-33.25), "3315.0000,S");
/// ```
pub fn format_latitude(latitude: f64) -> String {
    let (degrees, minutes) = degrees_minutes(latitude);
    let hemisphere = if latitude >= 0.0 { 'N' } else { 'S' };
    format!("{:02}{:07.4},{}", degrees, minutes, hemisphere)
}

/// Format longitude as `DDDMM.MMMM,H`
pub fn format_longitude(longitude: f64) -> String {
    let (degrees, minutes) = degrees_minutes(longitude);
    let hemisphere = if longitude >= 0.0 { 'E' } else { 'W' };
    format!("{:03}{:07.4},{}", degrees, minutes, hemisphere)
}

/// Parse a `(D)DDMM.MMMM` field plus hemisphere letter into signed degrees
pub fn parse_coordinate(field: &str, hemisphere: &str) -> Option<f64> {
    let dot = field.find('.').unwrap_or(field.len());
    if dot < 3 || !field.is_ascii() {
        return None;
    }

    let degrees: f64 = field[..dot - 2].parse().ok()?;
    let minutes: f64 = field[dot - 2..].parse().ok()?;
    if !(0.0..60.0).contains(&minutes) {
        return None;
    }

    let value = degrees + minutes / 60.0;
    match hemisphere {
        "N" | "E" => Some(value),
        "S" | "W" => Some(-value),
        _ => None,
    }
}
