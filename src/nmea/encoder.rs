//! # NMEA Sentence Encoder
//!
//! Renders a [`PositionFix`] into NMEA 0183 sentences.
//!
//! Every function here is pure: the same fix and clock always produce the same
//! text. Invalid fixes still produce complete sentences with empty position
//! fields and a "no fix" marker, because position daemons expect an unbroken
//! cadence.

use chrono::{DateTime, Datelike, Timelike, Utc};

use super::checksum::frame_sentence;
use super::protocol::*;
use crate::fix::PositionFix;

/// Renders the configured sentence set for each cycle
#[derive(Debug, Clone)]
pub struct NmeaEncoder {
    sentences: Vec<SentenceKind>,
}

impl Default for NmeaEncoder {
    fn default() -> Self {
        Self::new(default_sentences())
    }
}

impl NmeaEncoder {
    pub fn new(sentences: Vec<SentenceKind>) -> Self {
        Self { sentences }
    }

    pub fn sentences(&self) -> &[SentenceKind] {
        &self.sentences
    }

    /// Encode one cycle as CR/LF terminated lines, one per configured sentence
    pub fn encode(&self, fix: &PositionFix, clock: DateTime<Utc>) -> Vec<Vec<u8>> {
        self.sentences
            .iter()
            .map(|&kind| {
                let mut line = encode_sentence(kind, fix, clock);
                line.push_str(NMEA_LINE_ENDING);
                line.into_bytes()
            })
            .collect()
    }
}

/// Render one sentence without line ending
pub fn encode_sentence(kind: SentenceKind, fix: &PositionFix, clock: DateTime<Utc>) -> String {
    match kind {
        SentenceKind::Gga => encode_gga(fix, clock),
        SentenceKind::Rmc => encode_rmc(fix, clock),
        SentenceKind::Gsa => encode_gsa(fix),
        SentenceKind::Vtg => encode_vtg(fix),
        SentenceKind::Gll => encode_gll(fix, clock),
        SentenceKind::Zda => encode_zda(clock),
    }
}

/// `HHMMSS.ss` in UTC
pub fn format_time(clock: DateTime<Utc>) -> String {
    let centis = (clock.nanosecond() % 1_000_000_000) / 10_000_000;
    format!(
        "{:02}{:02}{:02}.{:02}",
        clock.hour(),
        clock.minute(),
        clock.second(),
        centis
    )
}

/// `DDMMYY` in UTC
pub fn format_date(clock: DateTime<Utc>) -> String {
    format!(
        "{:02}{:02}{:02}",
        clock.day(),
        clock.month(),
        clock.year().rem_euclid(100)
    )
}

/// Latitude and longitude fields, or four empty fields for an invalid fix
fn position_fields(fix: &PositionFix) -> String {
    if fix.valid {
        format!(
            "{},{}",
            format_latitude(fix.latitude),
            format_longitude(fix.longitude)
        )
    } else {
        ",,,".to_string()
    }
}

fn hdop(fix: &PositionFix) -> f64 {
    fix.hdop.unwrap_or(DEFAULT_HDOP)
}

/// GSA/MAVLink style fix dimension: 1 none, 2 for 2D, 3 for 3D
pub fn fix_dimension(fix: &PositionFix) -> u8 {
    if !fix.valid {
        1
    } else if fix.satellites <= 3 {
        2
    } else {
        3
    }
}

/// GGA: fix quality, satellites, HDOP and altitude
pub fn encode_gga(fix: &PositionFix, clock: DateTime<Utc>) -> String {
    let body = if fix.valid {
        format!(
            "{}GGA,{},{},1,{:02},{:.1},{:.1},M,0.0,M,,",
            NMEA_TALKER,
            format_time(clock),
            position_fields(fix),
            fix.satellites,
            hdop(fix),
            fix.altitude
        )
    } else {
        format!(
            "{}GGA,{},{},0,00,,,M,,M,,",
            NMEA_TALKER,
            format_time(clock),
            position_fields(fix)
        )
    };

    frame_sentence(&body)
}

/// RMC: status A/V, speed, course and date
pub fn encode_rmc(fix: &PositionFix, clock: DateTime<Utc>) -> String {
    let (status, speed, course) = if fix.valid {
        (
            'A',
            format!("{:.1}", fix.ground_speed.unwrap_or(0.0) * KNOTS_PER_MPS),
            format!("{:.1}", fix.course.unwrap_or(0.0)),
        )
    } else {
        ('V', String::new(), String::new())
    };

    let body = format!(
        "{}RMC,{},{},{},{},{},{},,",
        NMEA_TALKER,
        format_time(clock),
        status,
        position_fields(fix),
        speed,
        course,
        format_date(clock)
    );

    frame_sentence(&body)
}

/// GSA: 2D/3D flag, used PRNs and DOP values
pub fn encode_gsa(fix: &PositionFix) -> String {
    let used = if fix.valid {
        (fix.satellites as usize).min(GSA_MAX_SATELLITES)
    } else {
        0
    };

    let prns: Vec<String> = (1..=GSA_MAX_SATELLITES)
        .map(|prn| {
            if prn <= used {
                format!("{:02}", prn)
            } else {
                String::new()
            }
        })
        .collect();

    let dops = if fix.valid {
        let dop = format!("{:.1}", hdop(fix));
        format!("{},{},{}", dop, dop, dop)
    } else {
        ",,".to_string()
    };

    let body = format!(
        "{}GSA,A,{},{},{}",
        NMEA_TALKER,
        fix_dimension(fix),
        prns.join(","),
        dops
    );

    frame_sentence(&body)
}

/// VTG: course over ground and ground speed
pub fn encode_vtg(fix: &PositionFix) -> String {
    let body = if fix.valid {
        let speed = fix.ground_speed.unwrap_or(0.0);
        format!(
            "{}VTG,{:.1},T,,M,{:.1},N,{:.1},K,",
            NMEA_TALKER,
            fix.course.unwrap_or(0.0),
            speed * KNOTS_PER_MPS,
            speed * KMH_PER_MPS
        )
    } else {
        format!("{}VTG,,T,,M,,N,,K,", NMEA_TALKER)
    };

    frame_sentence(&body)
}

/// GLL: geographic position with time and status
pub fn encode_gll(fix: &PositionFix, clock: DateTime<Utc>) -> String {
    let body = format!(
        "{}GLL,{},{},{},",
        NMEA_TALKER,
        position_fields(fix),
        format_time(clock),
        if fix.valid { 'A' } else { 'V' }
    );

    frame_sentence(&body)
}

/// ZDA: UTC date and time, local zone fields left empty
pub fn encode_zda(clock: DateTime<Utc>) -> String {
    let body = format!(
        "{}ZDA,{},{:02},{:02},{:04},,",
        NMEA_TALKER,
        format_time(clock),
        clock.day(),
        clock.month(),
        clock.year()
    );

    frame_sentence(&body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fix::FixSource;
    use crate::nmea::checksum::nmea_checksum;
    use chrono::TimeZone;

    fn clock() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 29, 9, 20, 42).unwrap() + chrono::Duration::milliseconds(513)
    }

    fn valid_fix() -> PositionFix {
        let mut fix = PositionFix::new(47.6062, -122.3321, 56.2, 8, FixSource::Fallback, clock());
        fix.hdop = Some(0.9);
        fix
    }

    fn assert_checksum_ok(sentence: &str) {
        let star = sentence.rfind('*').expect("sentence has checksum");
        let body = &sentence[1..star];
        let printed = u8::from_str_radix(&sentence[star + 1..], 16).unwrap();
        assert_eq!(printed, nmea_checksum(body), "bad checksum in {}", sentence);
    }

    #[test]
    fn test_time_and_date_format() {
        assert_eq!(format_time(clock()), "092042.51");
        assert_eq!(format_date(clock()), "291225");
    }

    #[test]
    fn test_gga_valid() {
        let gga = encode_gga(&valid_fix(), clock());
        assert!(gga.starts_with("$GPGGA,092042.51,4736.3720,N,12219.9260,W,1,08,0.9,56.2,M,0.0,M,,*"));
        assert_checksum_ok(&gga);
    }

    #[test]
    fn test_gga_invalid_has_empty_position() {
        let fix = PositionFix::no_fix(FixSource::Fallback, clock());
        let gga = encode_gga(&fix, clock());
        assert!(gga.starts_with("$GPGGA,092042.51,,,,,0,00,,,M,,M,,*"), "{}", gga);
        assert_checksum_ok(&gga);
    }

    #[test]
    fn test_invalid_fix_never_leaks_coordinates() {
        let fix = valid_fix().invalidated();
        for kind in default_sentences() {
            let sentence = encode_sentence(kind, &fix, clock());
            assert!(!sentence.contains("4736"), "{} leaked position", sentence);
            assert_checksum_ok(&sentence);
        }
    }

    #[test]
    fn test_rmc_status() {
        let rmc = encode_rmc(&valid_fix(), clock());
        assert!(rmc.starts_with("$GPRMC,092042.51,A,4736.3720,N,12219.9260,W,0.0,0.0,291225,,*"), "{}", rmc);
        assert_checksum_ok(&rmc);

        let rmc = encode_rmc(&valid_fix().invalidated(), clock());
        assert!(rmc.starts_with("$GPRMC,092042.51,V,,,,,,,291225,,*"), "{}", rmc);
        assert_checksum_ok(&rmc);
    }

    #[test]
    fn test_rmc_speed_in_knots() {
        let mut fix = valid_fix();
        fix.ground_speed = Some(10.0);
        fix.course = Some(271.46);

        let rmc = encode_rmc(&fix, clock());
        assert!(rmc.contains(",19.4,271.5,"), "{}", rmc);
    }

    #[test]
    fn test_gsa_dimension_and_prns() {
        let gsa = encode_gsa(&valid_fix());
        assert!(gsa.starts_with("$GPGSA,A,3,01,02,03,04,05,06,07,08,,,,,0.9,0.9,0.9*"), "{}", gsa);
        assert_checksum_ok(&gsa);

        let mut fix = valid_fix();
        fix.satellites = 3;
        assert!(encode_gsa(&fix).starts_with("$GPGSA,A,2,01,02,03,"));

        fix.satellites = 20;
        assert!(encode_gsa(&fix).contains(",11,12,"));

        let gsa = encode_gsa(&fix.invalidated());
        assert!(gsa.starts_with("$GPGSA,A,1,,,,,,,,,,,,,,,*"), "{}", gsa);
        assert_checksum_ok(&gsa);
    }

    #[test]
    fn test_vtg() {
        let mut fix = valid_fix();
        fix.ground_speed = Some(1.0);
        fix.course = Some(90.0);
        let vtg = encode_vtg(&fix);
        assert!(vtg.starts_with("$GPVTG,90.0,T,,M,1.9,N,3.6,K,*"), "{}", vtg);
        assert_checksum_ok(&vtg);

        assert!(encode_vtg(&fix.invalidated()).starts_with("$GPVTG,,T,,M,,N,,K,*"));
    }

    #[test]
    fn test_gll() {
        let gll = encode_gll(&valid_fix(), clock());
        assert!(gll.starts_with("$GPGLL,4736.3720,N,12219.9260,W,092042.51,A,*"), "{}", gll);
        assert_checksum_ok(&gll);

        let gll = encode_gll(&valid_fix().invalidated(), clock());
        assert!(gll.starts_with("$GPGLL,,,,,092042.51,V,*"), "{}", gll);
    }

    #[test]
    fn test_zda() {
        let zda = encode_zda(clock());
        assert!(zda.starts_with("$GPZDA,092042.51,29,12,2025,,*"), "{}", zda);
        assert_checksum_ok(&zda);
    }

    #[test]
    fn test_checksum_holds_across_positions() {
        let coordinates = [
            (0.0, 0.0),
            (47.0, -122.0),
            (-33.8688, 151.2093),
            (89.999, 179.999),
            (-89.999, -179.999),
            (51.4778, -0.0015),
        ];

        for (lat, lon) in coordinates {
            let fix = PositionFix::new(lat, lon, 12.0, 10, FixSource::Primary, clock());
            for kind in [
                SentenceKind::Gga,
                SentenceKind::Rmc,
                SentenceKind::Gsa,
                SentenceKind::Vtg,
                SentenceKind::Gll,
                SentenceKind::Zda,
            ] {
                assert_checksum_ok(&encode_sentence(kind, &fix, clock()));
            }
        }
    }

    #[test]
    fn test_encoder_emits_configured_lines() {
        let encoder = NmeaEncoder::new(vec![SentenceKind::Gga, SentenceKind::Zda]);
        let lines = encoder.encode(&valid_fix(), clock());

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with(b"$GPGGA"));
        assert!(lines[0].ends_with(b"\r\n"));
        assert!(lines[1].starts_with(b"$GPZDA"));
    }

    #[test]
    fn test_fix_dimension() {
        let mut fix = valid_fix();
        assert_eq!(fix_dimension(&fix), 3);
        fix.satellites = 0;
        assert_eq!(fix_dimension(&fix), 2);
        assert_eq!(fix_dimension(&fix.invalidated()), 1);
    }
}
