//! # MAVLink Protocol Constants and Types
//!
//! Message ids, CRC_EXTRA seeds and payload layouts for the common-dialect
//! messages the bridge emits. Payload fields are serialized little-endian in
//! MAVLink wire order (largest types first).

use bytes::{BufMut, BytesMut};

use crate::error::{BridgeError, Result};

/// MAVLink v1 start-of-frame marker
pub const MAVLINK_V1_STX: u8 = 0xFE;

/// STX + LEN + SEQ + SYS + COMP + MSG
pub const MAVLINK_HEADER_SIZE: usize = 6;

/// CRC_LO + CRC_HI
pub const MAVLINK_CRC_SIZE: usize = 2;

/// Protocol version advertised in HEARTBEAT
pub const MAVLINK_VERSION: u8 = 3;

pub const MAVLINK_MSG_ID_HEARTBEAT: u8 = 0;
pub const MAVLINK_MSG_ID_GPS_RAW_INT: u8 = 24;
pub const MAVLINK_MSG_ID_GPS_STATUS: u8 = 25;
pub const MAVLINK_MSG_ID_GLOBAL_POSITION_INT: u8 = 33;
pub const MAVLINK_MSG_ID_GPS_INPUT: u8 = 232;

pub const MAVLINK_CRC_EXTRA_HEARTBEAT: u8 = 50;
pub const MAVLINK_CRC_EXTRA_GPS_RAW_INT: u8 = 24;
pub const MAVLINK_CRC_EXTRA_GPS_STATUS: u8 = 23;
pub const MAVLINK_CRC_EXTRA_GLOBAL_POSITION_INT: u8 = 104;
pub const MAVLINK_CRC_EXTRA_GPS_INPUT: u8 = 151;

pub const HEARTBEAT_PAYLOAD_SIZE: usize = 9;
pub const GPS_RAW_INT_PAYLOAD_SIZE: usize = 30;
pub const GPS_STATUS_PAYLOAD_SIZE: usize = 101;
pub const GLOBAL_POSITION_INT_PAYLOAD_SIZE: usize = 28;
/// GPS_INPUT without the v2-only `yaw` extension
pub const GPS_INPUT_PAYLOAD_SIZE: usize = 63;

/// MAV_TYPE_GCS
pub const MAV_TYPE_GCS: u8 = 6;

/// MAV_AUTOPILOT_INVALID
pub const MAV_AUTOPILOT_INVALID: u8 = 8;

/// MAV_STATE_STANDBY
pub const MAV_STATE_STANDBY: u8 = 3;

/// GPS_FIX_TYPE values
pub const GPS_FIX_TYPE_NO_FIX: u8 = 0;
pub const GPS_FIX_TYPE_2D_FIX: u8 = 2;
pub const GPS_FIX_TYPE_3D_FIX: u8 = 3;

/// Marker for unknown u16 fields (eph, epv, vel, cog, hdg)
pub const UINT16_UNKNOWN: u16 = u16::MAX;

/// Satellite slots in GPS_STATUS
pub const GPS_STATUS_SLOTS: usize = 20;

/// GPS_INPUT_IGNORE_FLAGS: set bits mark fields the autopilot must not use
pub const GPS_INPUT_IGNORE_FLAG_ALT: u16 = 1;
pub const GPS_INPUT_IGNORE_FLAG_HDOP: u16 = 2;
pub const GPS_INPUT_IGNORE_FLAG_VDOP: u16 = 4;
pub const GPS_INPUT_IGNORE_FLAG_VEL_HORIZ: u16 = 8;
pub const GPS_INPUT_IGNORE_FLAG_VEL_VERT: u16 = 16;
pub const GPS_INPUT_IGNORE_FLAG_SPEED_ACCURACY: u16 = 32;
pub const GPS_INPUT_IGNORE_FLAG_HORIZONTAL_ACCURACY: u16 = 64;
pub const GPS_INPUT_IGNORE_FLAG_VERTICAL_ACCURACY: u16 = 128;

/// GPS epoch (1980-01-06T00:00:00Z) as a UNIX timestamp
pub const GPS_EPOCH_UNIX_SECONDS: i64 = 315_964_800;

/// GPS time minus UTC
pub const GPS_LEAP_SECONDS: i64 = 18;

pub const SECONDS_PER_WEEK: i64 = 604_800;

/// CRC_EXTRA for a known message id
pub fn crc_extra_for(msg_id: u8) -> Option<u8> {
    match msg_id {
        MAVLINK_MSG_ID_HEARTBEAT => Some(MAVLINK_CRC_EXTRA_HEARTBEAT),
        MAVLINK_MSG_ID_GPS_RAW_INT => Some(MAVLINK_CRC_EXTRA_GPS_RAW_INT),
        MAVLINK_MSG_ID_GPS_STATUS => Some(MAVLINK_CRC_EXTRA_GPS_STATUS),
        MAVLINK_MSG_ID_GLOBAL_POSITION_INT => Some(MAVLINK_CRC_EXTRA_GLOBAL_POSITION_INT),
        MAVLINK_MSG_ID_GPS_INPUT => Some(MAVLINK_CRC_EXTRA_GPS_INPUT),
        _ => None,
    }
}

/// A payload that knows its id, CRC seed and wire layout
pub trait MavlinkMessage {
    const MSG_ID: u8;
    const CRC_EXTRA: u8;

    /// Serialize the payload in wire order
    fn write_payload(&self, buf: &mut BytesMut);
}

/// HEARTBEAT (#0)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub custom_mode: u32,
    pub mav_type: u8,
    pub autopilot: u8,
    pub base_mode: u8,
    pub system_status: u8,
}

impl Default for Heartbeat {
    /// Ground station, no autopilot, standby
    fn default() -> Self {
        Self {
            custom_mode: 0,
            mav_type: MAV_TYPE_GCS,
            autopilot: MAV_AUTOPILOT_INVALID,
            base_mode: 0,
            system_status: MAV_STATE_STANDBY,
        }
    }
}

impl MavlinkMessage for Heartbeat {
    const MSG_ID: u8 = MAVLINK_MSG_ID_HEARTBEAT;
    const CRC_EXTRA: u8 = MAVLINK_CRC_EXTRA_HEARTBEAT;

    fn write_payload(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.custom_mode);
        buf.put_u8(self.mav_type);
        buf.put_u8(self.autopilot);
        buf.put_u8(self.base_mode);
        buf.put_u8(self.system_status);
        buf.put_u8(MAVLINK_VERSION);
    }
}

/// GPS_RAW_INT (#24)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpsRawInt {
    /// UNIX time in microseconds
    pub time_usec: u64,
    /// Degrees × 1e7
    pub lat: i32,
    pub lon: i32,
    /// Millimeters above MSL
    pub alt: i32,
    /// HDOP in cm, or [`UINT16_UNKNOWN`]
    pub eph: u16,
    pub epv: u16,
    /// Ground speed in cm/s, or [`UINT16_UNKNOWN`]
    pub vel: u16,
    /// Course in centidegrees, or [`UINT16_UNKNOWN`]
    pub cog: u16,
    pub fix_type: u8,
    pub satellites_visible: u8,
}

impl MavlinkMessage for GpsRawInt {
    const MSG_ID: u8 = MAVLINK_MSG_ID_GPS_RAW_INT;
    const CRC_EXTRA: u8 = MAVLINK_CRC_EXTRA_GPS_RAW_INT;

    fn write_payload(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.time_usec);
        buf.put_i32_le(self.lat);
        buf.put_i32_le(self.lon);
        buf.put_i32_le(self.alt);
        buf.put_u16_le(self.eph);
        buf.put_u16_le(self.epv);
        buf.put_u16_le(self.vel);
        buf.put_u16_le(self.cog);
        buf.put_u8(self.fix_type);
        buf.put_u8(self.satellites_visible);
    }
}

/// GLOBAL_POSITION_INT (#33)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalPositionInt {
    /// Milliseconds since boot
    pub time_boot_ms: u32,
    pub lat: i32,
    pub lon: i32,
    /// Millimeters above MSL
    pub alt: i32,
    /// Millimeters above home
    pub relative_alt: i32,
    /// cm/s, 0 when unknown
    pub vx: i16,
    pub vy: i16,
    pub vz: i16,
    /// Centidegrees, or [`UINT16_UNKNOWN`]
    pub hdg: u16,
}

impl MavlinkMessage for GlobalPositionInt {
    const MSG_ID: u8 = MAVLINK_MSG_ID_GLOBAL_POSITION_INT;
    const CRC_EXTRA: u8 = MAVLINK_CRC_EXTRA_GLOBAL_POSITION_INT;

    fn write_payload(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.time_boot_ms);
        buf.put_i32_le(self.lat);
        buf.put_i32_le(self.lon);
        buf.put_i32_le(self.alt);
        buf.put_i32_le(self.relative_alt);
        buf.put_i16_le(self.vx);
        buf.put_i16_le(self.vy);
        buf.put_i16_le(self.vz);
        buf.put_u16_le(self.hdg);
    }
}

/// GPS_INPUT (#232), consumed by ArduPilot with `GPS_TYPE=14`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsInput {
    /// UNIX time in microseconds
    pub time_usec: u64,
    /// Milliseconds into the GPS week
    pub time_week_ms: u32,
    /// Degrees × 1e7
    pub lat: i32,
    pub lon: i32,
    /// Meters above MSL
    pub alt: f32,
    pub hdop: f32,
    pub vdop: f32,
    /// NED velocity in m/s
    pub vn: f32,
    pub ve: f32,
    pub vd: f32,
    /// m/s
    pub speed_accuracy: f32,
    /// Meters
    pub horiz_accuracy: f32,
    pub vert_accuracy: f32,
    /// `GPS_INPUT_IGNORE_FLAG_*` bits
    pub ignore_flags: u16,
    /// Weeks since the GPS epoch
    pub time_week: u16,
    pub gps_id: u8,
    pub fix_type: u8,
    pub satellites_visible: u8,
}

impl MavlinkMessage for GpsInput {
    const MSG_ID: u8 = MAVLINK_MSG_ID_GPS_INPUT;
    const CRC_EXTRA: u8 = MAVLINK_CRC_EXTRA_GPS_INPUT;

    fn write_payload(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.time_usec);
        buf.put_u32_le(self.time_week_ms);
        buf.put_i32_le(self.lat);
        buf.put_i32_le(self.lon);
        buf.put_f32_le(self.alt);
        buf.put_f32_le(self.hdop);
        buf.put_f32_le(self.vdop);
        buf.put_f32_le(self.vn);
        buf.put_f32_le(self.ve);
        buf.put_f32_le(self.vd);
        buf.put_f32_le(self.speed_accuracy);
        buf.put_f32_le(self.horiz_accuracy);
        buf.put_f32_le(self.vert_accuracy);
        buf.put_u16_le(self.ignore_flags);
        buf.put_u16_le(self.time_week);
        buf.put_u8(self.gps_id);
        buf.put_u8(self.fix_type);
        buf.put_u8(self.satellites_visible);
    }
}

/// GPS_STATUS (#25)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpsStatus {
    pub satellites_visible: u8,
    pub satellite_prn: [u8; GPS_STATUS_SLOTS],
    pub satellite_used: [u8; GPS_STATUS_SLOTS],
    pub satellite_elevation: [u8; GPS_STATUS_SLOTS],
    pub satellite_azimuth: [u8; GPS_STATUS_SLOTS],
    pub satellite_snr: [u8; GPS_STATUS_SLOTS],
}

/// Placeholder sky values for synthesized satellite slots
pub const PLACEHOLDER_ELEVATION: u8 = 45;
pub const PLACEHOLDER_SNR: u8 = 40;

impl GpsStatus {
    /// Synthesize slots for `visible` satellites; unused slots stay zero
    ///
    /// The terminal reports only a count, so PRNs are numbered from 1,
    /// every listed satellite is marked used and azimuths are spread evenly
    /// (0..255 maps to 0..360 degrees).
    pub fn synthesized(visible: u8) -> Self {
        let count = (visible as usize).min(GPS_STATUS_SLOTS);
        let mut status = Self {
            satellites_visible: count as u8,
            satellite_prn: [0; GPS_STATUS_SLOTS],
            satellite_used: [0; GPS_STATUS_SLOTS],
            satellite_elevation: [0; GPS_STATUS_SLOTS],
            satellite_azimuth: [0; GPS_STATUS_SLOTS],
            satellite_snr: [0; GPS_STATUS_SLOTS],
        };

        for slot in 0..count {
            status.satellite_prn[slot] = (slot + 1) as u8;
            status.satellite_used[slot] = 1;
            status.satellite_elevation[slot] = PLACEHOLDER_ELEVATION;
            status.satellite_azimuth[slot] = (slot * 256 / count) as u8;
            status.satellite_snr[slot] = PLACEHOLDER_SNR;
        }

        status
    }
}

impl MavlinkMessage for GpsStatus {
    const MSG_ID: u8 = MAVLINK_MSG_ID_GPS_STATUS;
    const CRC_EXTRA: u8 = MAVLINK_CRC_EXTRA_GPS_STATUS;

    fn write_payload(&self, buf: &mut BytesMut) {
        buf.put_u8(self.satellites_visible);
        buf.put_slice(&self.satellite_prn);
        buf.put_slice(&self.satellite_used);
        buf.put_slice(&self.satellite_elevation);
        buf.put_slice(&self.satellite_azimuth);
        buf.put_slice(&self.satellite_snr);
    }
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MavlinkFrame {
    pub seq: u8,
    pub system_id: u8,
    pub component_id: u8,
    pub msg_id: u8,
    pub payload: Vec<u8>,
}

impl MavlinkFrame {
    /// Payload as a fixed-size array
    ///
    /// # Errors
    ///
    /// Returns error if the payload length is not exactly `N`
    pub fn payload_array<const N: usize>(&self) -> Result<[u8; N]> {
        self.payload.as_slice().try_into().map_err(|_| {
            BridgeError::Protocol(format!(
                "message {} payload is {} bytes, expected {}",
                self.msg_id,
                self.payload.len(),
                N
            ))
        })
    }
}
