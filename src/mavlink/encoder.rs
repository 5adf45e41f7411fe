//! # MAVLink Frame Encoder
//!
//! Builds MAVLink v1 frames from a [`PositionFix`]:
//!
//! ```text
//! STX(0xFE) | LEN | SEQ | SYS_ID | COMP_ID | MSG_ID | PAYLOAD | CRC_LO | CRC_HI
//! ```
//!
//! The sequence number is shared by every message type and wraps at 256.

use std::time::{Duration, Instant};

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Utc};

use super::crc::frame_crc;
use super::protocol::*;
use crate::fix::PositionFix;

/// HEARTBEAT period
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// GPS_STATUS is sent on every Nth cycle
pub const GPS_STATUS_CYCLE_DIVISOR: u64 = 5;

/// Default MAVLink system id
pub const DEFAULT_SYSTEM_ID: u8 = 1;

/// MAV_COMP_ID_GPS
pub const DEFAULT_COMPONENT_ID: u8 = 220;

/// Stateful frame builder: owns the sequence counter and emission cadence
#[derive(Debug)]
pub struct MavlinkEncoder {
    system_id: u8,
    component_id: u8,
    seq: u8,
    cycle: u64,
    last_heartbeat: Option<Instant>,
    boot: Instant,
    gps_input: bool,
}

impl MavlinkEncoder {
    /// Create an encoder; `boot` anchors `time_boot_ms`
    pub fn new(system_id: u8, component_id: u8, boot: Instant) -> Self {
        Self {
            system_id,
            component_id,
            seq: 0,
            cycle: 0,
            last_heartbeat: None,
            boot,
            gps_input: false,
        }
    }

    /// Also emit GPS_INPUT every cycle
    pub fn with_gps_input(mut self, enabled: bool) -> Self {
        self.gps_input = enabled;
        self
    }

    /// Sequence number the next frame will carry
    pub fn next_seq(&self) -> u8 {
        self.seq
    }

    /// Wrap a payload in a complete frame and advance the sequence number
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Instant;
    /// use starlink_gps_bridge::mavlink::encoder::MavlinkEncoder;
    /// use starlink_gps_bridge::mavlink::protocol::Heartbeat;
    ///
    /// let mut encoder = MavlinkEncoder::new(1, 220, Instant::now());
    /// let frame = encoder.encode_message(&Heartbeat::default());
    /// assert_eq!(frame.len(), 6 + 9 + 2);
    /// assert_eq!(frame[0], 0xFE);
    /// ```
    pub fn encode_message<M: MavlinkMessage>(&mut self, message: &M) -> Vec<u8> {
        let mut payload = BytesMut::with_capacity(GPS_STATUS_PAYLOAD_SIZE);
        message.write_payload(&mut payload);

        let mut frame =
            BytesMut::with_capacity(MAVLINK_HEADER_SIZE + payload.len() + MAVLINK_CRC_SIZE);
        frame.put_u8(MAVLINK_V1_STX);
        frame.put_u8(payload.len() as u8);
        frame.put_u8(self.seq);
        frame.put_u8(self.system_id);
        frame.put_u8(self.component_id);
        frame.put_u8(M::MSG_ID);
        frame.put_slice(&payload);

        // CRC over LEN..PAYLOAD, excluding STX
        let crc = frame_crc(&frame[1..], M::CRC_EXTRA);
        frame.put_u16_le(crc);

        self.seq = self.seq.wrapping_add(1);
        frame.to_vec()
    }

    /// Frames for one cycle, in emission order
    ///
    /// - HEARTBEAT at most once per second
    /// - GPS_RAW_INT every cycle
    /// - GPS_INPUT every cycle, when enabled
    /// - GLOBAL_POSITION_INT only for a valid fix
    /// - GPS_STATUS every fifth cycle
    pub fn encode_cycle(
        &mut self,
        fix: &PositionFix,
        clock: DateTime<Utc>,
        now: Instant,
    ) -> Vec<Vec<u8>> {
        let mut frames = Vec::with_capacity(5);

        let heartbeat_due = self
            .last_heartbeat
            .map_or(true, |last| now.saturating_duration_since(last) >= HEARTBEAT_INTERVAL);
        if heartbeat_due {
            frames.push(self.encode_message(&Heartbeat::default()));
            self.last_heartbeat = Some(now);
        }

        frames.push(self.encode_message(&gps_raw_int(fix, clock)));

        if self.gps_input {
            frames.push(self.encode_message(&gps_input(fix, clock)));
        }

        if fix.valid {
            let time_boot_ms = now.saturating_duration_since(self.boot).as_millis() as u32;
            frames.push(self.encode_message(&global_position_int(fix, time_boot_ms)));
        }

        if self.cycle % GPS_STATUS_CYCLE_DIVISOR == 0 {
            let visible = if fix.valid { fix.satellites } else { 0 };
            frames.push(self.encode_message(&GpsStatus::synthesized(visible)));
        }

        self.cycle += 1;
        frames
    }
}

/// GPS_FIX_TYPE for a fix: none, 2D with ≤3 satellites, 3D otherwise
pub fn gps_fix_type(fix: &PositionFix) -> u8 {
    if !fix.valid {
        GPS_FIX_TYPE_NO_FIX
    } else if fix.satellites <= 3 {
        GPS_FIX_TYPE_2D_FIX
    } else {
        GPS_FIX_TYPE_3D_FIX
    }
}

/// Degrees to degrees × 1e7
pub fn degrees_e7(degrees: f64) -> i32 {
    (degrees * 1e7).round() as i32
}

/// Meters to millimeters
pub fn meters_to_mm(meters: f64) -> i32 {
    (meters * 1000.0).round() as i32
}

/// Scale an optional non-negative quantity into a u16 field, or mark unknown
fn scaled_u16(value: Option<f64>, scale: f64) -> u16 {
    match value {
        Some(v) if v.is_finite() && v >= 0.0 && v * scale < UINT16_UNKNOWN as f64 => {
            (v * scale).round() as u16
        }
        _ => UINT16_UNKNOWN,
    }
}

/// Course into centidegrees within [0, 36000)
fn centidegrees(course: Option<f64>) -> u16 {
    let normalized = course.filter(|c| c.is_finite()).map(|c| c.rem_euclid(360.0));
    match scaled_u16(normalized, 100.0) {
        36000 => 0,
        value => value,
    }
}

/// GPS_RAW_INT payload for a fix
pub fn gps_raw_int(fix: &PositionFix, clock: DateTime<Utc>) -> GpsRawInt {
    let time_usec = clock.timestamp_micros().max(0) as u64;

    if !fix.valid {
        return GpsRawInt {
            time_usec,
            lat: 0,
            lon: 0,
            alt: 0,
            eph: UINT16_UNKNOWN,
            epv: UINT16_UNKNOWN,
            vel: UINT16_UNKNOWN,
            cog: UINT16_UNKNOWN,
            fix_type: GPS_FIX_TYPE_NO_FIX,
            satellites_visible: fix.satellites,
        };
    }

    GpsRawInt {
        time_usec,
        lat: degrees_e7(fix.latitude),
        lon: degrees_e7(fix.longitude),
        alt: meters_to_mm(fix.altitude),
        eph: scaled_u16(fix.hdop, 100.0),
        epv: UINT16_UNKNOWN,
        vel: scaled_u16(fix.ground_speed, 100.0),
        cog: centidegrees(fix.course),
        fix_type: gps_fix_type(fix),
        satellites_visible: fix.satellites,
    }
}

/// GLOBAL_POSITION_INT payload for a valid fix
pub fn global_position_int(fix: &PositionFix, time_boot_ms: u32) -> GlobalPositionInt {
    let alt = meters_to_mm(fix.altitude);

    // North/east velocity only when both speed and course are known
    let (vx, vy) = match (fix.ground_speed, fix.course) {
        (Some(speed), Some(course)) if speed.is_finite() && course.is_finite() => {
            let rad = course.to_radians();
            let north = (speed * rad.cos() * 100.0).round();
            let east = (speed * rad.sin() * 100.0).round();
            (
                north.clamp(i16::MIN as f64, i16::MAX as f64) as i16,
                east.clamp(i16::MIN as f64, i16::MAX as f64) as i16,
            )
        }
        _ => (0, 0),
    };

    GlobalPositionInt {
        time_boot_ms,
        lat: degrees_e7(fix.latitude),
        lon: degrees_e7(fix.longitude),
        alt,
        relative_alt: alt,
        vx,
        vy,
        vz: 0,
        hdg: centidegrees(fix.course),
    }
}

/// GPS week number and milliseconds into the week for a UTC instant
pub fn gps_week_time(clock: DateTime<Utc>) -> (u16, u32) {
    let gps_ms =
        clock.timestamp_millis() - (GPS_EPOCH_UNIX_SECONDS - GPS_LEAP_SECONDS) * 1000;
    let week_ms = SECONDS_PER_WEEK * 1000;
    if gps_ms < 0 {
        return (0, 0);
    }
    ((gps_ms / week_ms) as u16, (gps_ms % week_ms) as u32)
}

/// GPS_INPUT payload for a fix
///
/// Unknown quantities are sent as zero with their ignore bit set. Vertical
/// velocity, VDOP and the speed/vertical accuracies are never known.
pub fn gps_input(fix: &PositionFix, clock: DateTime<Utc>) -> GpsInput {
    let (time_week, time_week_ms) = gps_week_time(clock);
    let time_usec = clock.timestamp_micros().max(0) as u64;

    let mut ignore_flags = GPS_INPUT_IGNORE_FLAG_VDOP
        | GPS_INPUT_IGNORE_FLAG_VEL_VERT
        | GPS_INPUT_IGNORE_FLAG_SPEED_ACCURACY
        | GPS_INPUT_IGNORE_FLAG_VERTICAL_ACCURACY;

    if !fix.valid {
        return GpsInput {
            time_usec,
            time_week_ms,
            lat: 0,
            lon: 0,
            alt: 0.0,
            hdop: 0.0,
            vdop: 0.0,
            vn: 0.0,
            ve: 0.0,
            vd: 0.0,
            speed_accuracy: 0.0,
            horiz_accuracy: 0.0,
            vert_accuracy: 0.0,
            ignore_flags: ignore_flags
                | GPS_INPUT_IGNORE_FLAG_ALT
                | GPS_INPUT_IGNORE_FLAG_HDOP
                | GPS_INPUT_IGNORE_FLAG_VEL_HORIZ
                | GPS_INPUT_IGNORE_FLAG_HORIZONTAL_ACCURACY,
            time_week,
            gps_id: 0,
            fix_type: GPS_FIX_TYPE_NO_FIX,
            satellites_visible: fix.satellites,
        };
    }

    let hdop = match fix.hdop.filter(|h| h.is_finite() && *h >= 0.0) {
        Some(h) => h as f32,
        None => {
            ignore_flags |= GPS_INPUT_IGNORE_FLAG_HDOP;
            0.0
        }
    };

    let horiz_accuracy = match fix.accuracy.filter(|a| a.is_finite() && *a >= 0.0) {
        Some(a) => a as f32,
        None => {
            ignore_flags |= GPS_INPUT_IGNORE_FLAG_HORIZONTAL_ACCURACY;
            0.0
        }
    };

    let (vn, ve) = match (fix.ground_speed, fix.course) {
        (Some(speed), Some(course)) if speed.is_finite() && course.is_finite() => {
            let rad = course.to_radians();
            ((speed * rad.cos()) as f32, (speed * rad.sin()) as f32)
        }
        _ => {
            ignore_flags |= GPS_INPUT_IGNORE_FLAG_VEL_HORIZ;
            (0.0, 0.0)
        }
    };

    GpsInput {
        time_usec,
        time_week_ms,
        lat: degrees_e7(fix.latitude),
        lon: degrees_e7(fix.longitude),
        alt: fix.altitude as f32,
        hdop,
        vdop: 0.0,
        vn,
        ve,
        vd: 0.0,
        speed_accuracy: 0.0,
        horiz_accuracy,
        vert_accuracy: 0.0,
        ignore_flags,
        time_week,
        gps_id: 0,
        fix_type: gps_fix_type(fix),
        satellites_visible: fix.satellites,
    }
}
