//! # NMEA Sentence Decoder
//!
//! Decodes the sentences the primary receiver streams (GGA for position,
//! RMC for speed and course). Everything else is reported as
//! [`NmeaSentence::Other`] and skipped by the caller.

use super::checksum::verify_sentence;
use super::protocol::*;
use crate::error::{BridgeError, Result};

/// GGA: fix data
#[derive(Debug, Clone, PartialEq)]
pub struct GgaSentence {
    /// `None` when the receiver has no position
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// 0 = no fix, 1 = GPS, 2 = DGPS, ...
    pub quality: u8,
    pub satellites: u8,
    pub hdop: Option<f64>,
    pub altitude: Option<f64>,
}

impl GgaSentence {
    /// True when the receiver reports a usable position
    pub fn has_fix(&self) -> bool {
        self.quality > 0 && self.latitude.is_some() && self.longitude.is_some()
    }
}

/// RMC: recommended minimum data
#[derive(Debug, Clone, PartialEq)]
pub struct RmcSentence {
    /// `A` active, `V` void
    pub active: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub speed_knots: Option<f64>,
    pub course: Option<f64>,
}

/// A decoded sentence
#[derive(Debug, Clone, PartialEq)]
pub enum NmeaSentence {
    Gga(GgaSentence),
    Rmc(RmcSentence),
    /// Any other well-formed sentence: the three-letter id of a standard
    /// sentence, or the whole address of a proprietary one (`PUBX`, `PMTK001`)
    Other(String),
}

/// Decode a single line
///
/// # Errors
///
/// Returns [`BridgeError::InvalidFix`] if:
/// - The line is not a `$`-sentence or its checksum does not match
/// - The address is empty or not alphanumeric
/// - A GGA or RMC field cannot be parsed
pub fn decode_sentence(line: &str) -> Result<NmeaSentence> {
    let body = verify_sentence(line.trim()).map_err(BridgeError::InvalidFix)?;
    let fields: Vec<&str> = body.split(',').collect();

    let address = fields[0];
    if address.is_empty() || !address.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(BridgeError::InvalidFix(format!("bad sentence address {:?}", address)));
    }

    // Proprietary sentences carry a vendor address of any length
    if address.starts_with('P') || address.len() != 5 {
        return Ok(NmeaSentence::Other(address.to_string()));
    }

    let (talker, id) = address.split_at(2);
    if !ACCEPTED_TALKERS.contains(&talker) {
        return Ok(NmeaSentence::Other(id.to_string()));
    }

    match id {
        "GGA" => decode_gga(&fields).map(NmeaSentence::Gga),
        "RMC" => decode_rmc(&fields).map(NmeaSentence::Rmc),
        _ => Ok(NmeaSentence::Other(id.to_string())),
    }
}

/// True for a line addressed as a GGA or RMC from an accepted talker
///
/// Used to tell a corrupted position sentence from unrelated traffic
/// without trusting the rest of the line.
pub fn is_position_sentence(line: &str) -> bool {
    let address = line
        .trim()
        .strip_prefix('$')
        .and_then(|rest| rest.split(|c| c == ',' || c == '*').next())
        .unwrap_or("");

    if address.len() != 5 || !address.is_ascii() {
        return false;
    }

    let (talker, id) = address.split_at(2);
    ACCEPTED_TALKERS.contains(&talker) && matches!(id, "GGA" | "RMC")
}

fn field<'a>(fields: &[&'a str], index: usize, id: &str) -> Result<&'a str> {
    fields
        .get(index)
        .copied()
        .ok_or_else(|| BridgeError::InvalidFix(format!("{} too short: missing field {}", id, index)))
}

fn optional_number<T: std::str::FromStr>(value: &str, what: &str) -> Result<Option<T>> {
    if value.is_empty() {
        return Ok(None);
    }

    value
        .parse()
        .map(Some)
        .map_err(|_| BridgeError::InvalidFix(format!("bad {} {:?}", what, value)))
}

fn coordinate(value: &str, hemisphere: &str, what: &str) -> Result<Option<f64>> {
    if value.is_empty() {
        return Ok(None);
    }

    parse_coordinate(value, hemisphere)
        .map(Some)
        .ok_or_else(|| BridgeError::InvalidFix(format!("bad {} {:?},{:?}", what, value, hemisphere)))
}

fn decode_gga(fields: &[&str]) -> Result<GgaSentence> {
    // GGA,hhmmss.ss,llll.ll,a,yyyyy.yy,a,q,nn,h.h,a.a,M,g.g,M,,
    let latitude = coordinate(field(fields, 2, "GGA")?, field(fields, 3, "GGA")?, "latitude")?;
    let longitude = coordinate(field(fields, 4, "GGA")?, field(fields, 5, "GGA")?, "longitude")?;
    let quality = optional_number::<u8>(field(fields, 6, "GGA")?, "quality")?.unwrap_or(0);
    let satellites = optional_number::<u8>(field(fields, 7, "GGA")?, "satellites")?.unwrap_or(0);
    let hdop = optional_number::<f64>(field(fields, 8, "GGA")?, "hdop")?;
    let altitude = optional_number::<f64>(field(fields, 9, "GGA")?, "altitude")?;

    Ok(GgaSentence {
        latitude,
        longitude,
        quality,
        satellites,
        hdop,
        altitude,
    })
}

fn decode_rmc(fields: &[&str]) -> Result<RmcSentence> {
    // RMC,hhmmss.ss,A,llll.ll,a,yyyyy.yy,a,x.x,x.x,ddmmyy,,
    let active = field(fields, 2, "RMC")? == "A";
    let latitude = coordinate(field(fields, 3, "RMC")?, field(fields, 4, "RMC")?, "latitude")?;
    let longitude = coordinate(field(fields, 5, "RMC")?, field(fields, 6, "RMC")?, "longitude")?;
    let speed_knots = optional_number::<f64>(field(fields, 7, "RMC")?, "speed")?;
    let course = optional_number::<f64>(field(fields, 8, "RMC")?, "course")?;

    Ok(RmcSentence {
        active,
        latitude,
        longitude,
        speed_knots,
        course,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fix::{FixSource, PositionFix};
    use crate::nmea::encoder::{encode_gga, encode_rmc};
    use chrono::Utc;

    #[test]
    fn test_decode_reference_gga() {
        let sentence = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";
        let decoded = decode_sentence(sentence).unwrap();

        match decoded {
            NmeaSentence::Gga(gga) => {
                assert!(gga.has_fix());
                assert!((gga.latitude.unwrap() - 48.1173).abs() < 1e-6);
                assert!((gga.longitude.unwrap() - 11.516_666_6).abs() < 1e-6);
                assert_eq!(gga.quality, 1);
                assert_eq!(gga.satellites, 8);
                assert_eq!(gga.hdop, Some(0.9));
                assert_eq!(gga.altitude, Some(545.4));
            }
            other => panic!("Expected GGA, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_gga_no_fix() {
        let line = crate::nmea::checksum::frame_sentence("GNGGA,000001.00,,,,,0,00,99.99,,,,,,");
        match decode_sentence(&line).unwrap() {
            NmeaSentence::Gga(gga) => {
                assert!(!gga.has_fix());
                assert_eq!(gga.latitude, None);
                assert_eq!(gga.satellites, 0);
            }
            other => panic!("Expected GGA, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_bad_checksum() {
        let sentence = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*48";
        assert!(matches!(decode_sentence(sentence), Err(BridgeError::InvalidFix(_))));
    }

    #[test]
    fn test_decode_rejects_truncated_gga() {
        let line = crate::nmea::checksum::frame_sentence("GPGGA,123519,4807.038,N");
        assert!(decode_sentence(&line).is_err());
    }

    #[test]
    fn test_decode_other_sentences() {
        let line = crate::nmea::checksum::frame_sentence("GPGSV,3,1,11,03,03,111,00");
        assert_eq!(decode_sentence(&line).unwrap(), NmeaSentence::Other("GSV".to_string()));

        let line = crate::nmea::checksum::frame_sentence("BDGGA,123519,,,,,0,00,,,,,,,");
        assert_eq!(decode_sentence(&line).unwrap(), NmeaSentence::Other("GGA".to_string()));
    }

    #[test]
    fn test_decode_proprietary_sentences() {
        let line = crate::nmea::checksum::frame_sentence(
            "PUBX,00,081350.00,4717.113210,N,00833.915187,E,546.589,G3,2.1,2.0,0.007,77.52,0.007,,0.92,1.19,0.77,9,0,0",
        );
        assert_eq!(decode_sentence(&line).unwrap(), NmeaSentence::Other("PUBX".to_string()));

        let line = crate::nmea::checksum::frame_sentence("PMTK001,314,3");
        assert_eq!(decode_sentence(&line).unwrap(), NmeaSentence::Other("PMTK001".to_string()));

        // A standard-looking address of the wrong length is still traffic, not an error
        let line = crate::nmea::checksum::frame_sentence("GPGSVX,1");
        assert_eq!(decode_sentence(&line).unwrap(), NmeaSentence::Other("GPGSVX".to_string()));
    }

    #[test]
    fn test_decode_rejects_garbled_address() {
        let line = crate::nmea::checksum::frame_sentence(",123519");
        assert!(matches!(decode_sentence(&line), Err(BridgeError::InvalidFix(_))));

        let line = crate::nmea::checksum::frame_sentence("GP-GA,123519");
        assert!(matches!(decode_sentence(&line), Err(BridgeError::InvalidFix(_))));
    }

    #[test]
    fn test_is_position_sentence() {
        assert!(is_position_sentence("$GPGGA,123519,4807.038,N*00"));
        assert!(is_position_sentence("$GNRMC,123519,A*00\r\n"));
        assert!(is_position_sentence("$GLGGA*47"));
        assert!(!is_position_sentence("$GPGSV,3,1,11*00"));
        assert!(!is_position_sentence("$BDGGA,123519*00"));
        assert!(!is_position_sentence("$PUBX,00,081350.00*00"));
        assert!(!is_position_sentence("GPGGA,123519"));
        assert!(!is_position_sentence(""));
    }

    #[test]
    fn test_decode_rmc() {
        let line = crate::nmea::checksum::frame_sentence(
            "GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W",
        );
        match decode_sentence(&line).unwrap() {
            NmeaSentence::Rmc(rmc) => {
                assert!(rmc.active);
                assert_eq!(rmc.speed_knots, Some(22.4));
                assert_eq!(rmc.course, Some(84.4));
            }
            other => panic!("Expected RMC, got: {:?}", other),
        }
    }

    #[test]
    fn test_gga_round_trip_precision() {
        let coordinates = [
            (47.606_209, -122.332_071),
            (-33.868_820, 151.209_296),
            (0.000_001, -0.000_001),
            (89.123_456, 179.654_321),
            (-12.5, 45.999_999_9),
        ];

        for (lat, lon) in coordinates {
            let fix = PositionFix::new(lat, lon, 10.0, 9, FixSource::Primary, Utc::now());
            let sentence = encode_gga(&fix, Utc::now());

            let NmeaSentence::Gga(gga) = decode_sentence(&sentence).unwrap() else {
                panic!("Expected GGA from {}", sentence);
            };

            // 0.0001 minute expressed in degrees
            let tolerance = 0.0001 / 60.0;
            assert!((gga.latitude.unwrap() - lat).abs() <= tolerance, "{} vs {}", sentence, lat);
            assert!((gga.longitude.unwrap() - lon).abs() <= tolerance, "{} vs {}", sentence, lon);
            assert_eq!(gga.satellites, 9);
        }
    }

    #[test]
    fn test_rmc_round_trip_status() {
        let fix = PositionFix::new(47.0, -122.0, 10.0, 9, FixSource::Primary, Utc::now());

        let NmeaSentence::Rmc(rmc) = decode_sentence(&encode_rmc(&fix, Utc::now())).unwrap() else {
            panic!("Expected RMC");
        };
        assert!(rmc.active);

        let NmeaSentence::Rmc(rmc) =
            decode_sentence(&encode_rmc(&fix.invalidated(), Utc::now())).unwrap()
        else {
            panic!("Expected RMC");
        };
        assert!(!rmc.active);
        assert_eq!(rmc.latitude, None);
    }
}
