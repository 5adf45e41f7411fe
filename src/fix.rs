//! # Position Fix
//!
//! The single value that flows through one cycle: produced by a position
//! source, judged by the health monitor, rendered by the encoders and then
//! dropped.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::{BridgeError, Result};

/// Mean Earth radius in meters (IUGG)
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Where a fix came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixSource {
    /// Local high-precision receiver on the serial port
    Primary,

    /// Satellite-terminal positioning API
    Fallback,
}

impl FixSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixSource::Primary => "primary",
            FixSource::Fallback => "fallback",
        }
    }
}

impl fmt::Display for FixSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single resolved position reading
///
/// Invalid fixes carry no guarantee on latitude/longitude magnitude; encoders
/// must render them as "no fix".
#[derive(Debug, Clone, PartialEq)]
pub struct PositionFix {
    /// Latitude in degrees, [-90, 90]
    pub latitude: f64,

    /// Longitude in degrees, [-180, 180]
    pub longitude: f64,

    /// Altitude above mean sea level in meters
    pub altitude: f64,

    /// Satellites used in the solution
    pub satellites: u8,

    /// Horizontal accuracy estimate in meters
    pub accuracy: Option<f64>,

    /// Horizontal dilution of precision as reported by the receiver
    pub hdop: Option<f64>,

    /// Ground speed in m/s
    pub ground_speed: Option<f64>,

    /// Course over ground in degrees true
    pub course: Option<f64>,

    /// Whether the source considers this a usable fix
    pub valid: bool,

    pub source: FixSource,

    /// When the reading was captured (corrected clock)
    pub captured_at: DateTime<Utc>,
}

impl PositionFix {
    /// A valid fix with only the mandatory fields populated
    pub fn new(
        latitude: f64,
        longitude: f64,
        altitude: f64,
        satellites: u8,
        source: FixSource,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
            satellites,
            accuracy: None,
            hdop: None,
            ground_speed: None,
            course: None,
            valid: true,
            source,
            captured_at,
        }
    }

    /// An empty reading used when a source has nothing to offer this cycle
    pub fn no_fix(source: FixSource, captured_at: DateTime<Utc>) -> Self {
        Self {
            valid: false,
            ..Self::new(0.0, 0.0, 0.0, 0, source, captured_at)
        }
    }

    /// Copy of this reading demoted to "no fix"
    pub fn invalidated(&self) -> Self {
        Self {
            valid: false,
            ..self.clone()
        }
    }

    /// True when both coordinates are finite and inside their ranges
    pub fn has_plausible_coordinates(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Check the coordinate ranges
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidFix`] when latitude or longitude is out of
    /// range or not finite.
    pub fn ensure_in_range(&self) -> Result<()> {
        if self.has_plausible_coordinates() {
            Ok(())
        } else {
            Err(BridgeError::InvalidFix(format!(
                "coordinates out of range: {}, {}",
                self.latitude, self.longitude
            )))
        }
    }

    /// Great-circle distance to another fix in meters
    pub fn distance_to(&self, other: &PositionFix) -> f64 {
        haversine_distance(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

/// Great-circle distance between two lat/lon points in meters
///
/// # Examples
///
/// ```
/// use starlink_gps_bridge::fix::haversine_distance;
///
/// let d = haversine_distance(0.0, 0.0, 0.0, 180.0);
/// assert!((d - 20_015_000.0).abs() < 200_000.0);
/// ```
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);

    // Clamp guards against a > 1.0 from rounding near antipodes
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * c
}
