//! # MAVLink Frame Decoder
//!
//! Validates and unpacks MAVLink v1 frames produced by the encoder.

use bytes::Buf;

use super::crc::frame_crc;
use super::protocol::*;
use crate::error::{BridgeError, Result};

/// Decode a complete MAVLink v1 frame
///
/// # Arguments
///
/// * `frame` - Complete frame bytes (STX, header, payload, CRC)
///
/// # Returns
///
/// * `Result<MavlinkFrame>` - Decoded frame, or error if invalid
///
/// # Errors
///
/// Returns error if:
/// - Frame is too short or its length disagrees with LEN
/// - STX is not 0xFE
/// - Message id has no known CRC_EXTRA
/// - CRC check fails
pub fn decode_frame(frame: &[u8]) -> Result<MavlinkFrame> {
    if frame.len() < MAVLINK_HEADER_SIZE + MAVLINK_CRC_SIZE {
        return Err(BridgeError::Protocol("Frame too short".to_string()));
    }

    if frame[0] != MAVLINK_V1_STX {
        return Err(BridgeError::Protocol(format!(
            "Invalid STX: 0x{:02X}",
            frame[0]
        )));
    }

    let length = frame[1] as usize;
    let expected = MAVLINK_HEADER_SIZE + length + MAVLINK_CRC_SIZE;
    if frame.len() != expected {
        return Err(BridgeError::Protocol(format!(
            "Frame length mismatch: expected {} bytes, got {}",
            expected,
            frame.len()
        )));
    }

    let msg_id = frame[5];
    let crc_extra = crc_extra_for(msg_id)
        .ok_or_else(|| BridgeError::Protocol(format!("Unknown message id {}", msg_id)))?;

    let crc_end = MAVLINK_HEADER_SIZE + length;
    let calculated = frame_crc(&frame[1..crc_end], crc_extra);
    let received = u16::from_le_bytes([frame[crc_end], frame[crc_end + 1]]);

    if calculated != received {
        return Err(BridgeError::Protocol(format!(
            "CRC mismatch: expected 0x{:04X}, got 0x{:04X}",
            calculated, received
        )));
    }

    Ok(MavlinkFrame {
        seq: frame[2],
        system_id: frame[3],
        component_id: frame[4],
        msg_id,
        payload: frame[MAVLINK_HEADER_SIZE..crc_end].to_vec(),
    })
}

/// Decode a GPS_RAW_INT payload
pub fn decode_gps_raw_int(frame: &MavlinkFrame) -> Result<GpsRawInt> {
    expect_msg(frame, MAVLINK_MSG_ID_GPS_RAW_INT)?;
    let bytes = frame.payload_array::<GPS_RAW_INT_PAYLOAD_SIZE>()?;
    let mut buf = &bytes[..];

    Ok(GpsRawInt {
        time_usec: buf.get_u64_le(),
        lat: buf.get_i32_le(),
        lon: buf.get_i32_le(),
        alt: buf.get_i32_le(),
        eph: buf.get_u16_le(),
        epv: buf.get_u16_le(),
        vel: buf.get_u16_le(),
        cog: buf.get_u16_le(),
        fix_type: buf.get_u8(),
        satellites_visible: buf.get_u8(),
    })
}

/// Decode a GLOBAL_POSITION_INT payload
pub fn decode_global_position_int(frame: &MavlinkFrame) -> Result<GlobalPositionInt> {
    expect_msg(frame, MAVLINK_MSG_ID_GLOBAL_POSITION_INT)?;
    let bytes = frame.payload_array::<GLOBAL_POSITION_INT_PAYLOAD_SIZE>()?;
    let mut buf = &bytes[..];

    Ok(GlobalPositionInt {
        time_boot_ms: buf.get_u32_le(),
        lat: buf.get_i32_le(),
        lon: buf.get_i32_le(),
        alt: buf.get_i32_le(),
        relative_alt: buf.get_i32_le(),
        vx: buf.get_i16_le(),
        vy: buf.get_i16_le(),
        vz: buf.get_i16_le(),
        hdg: buf.get_u16_le(),
    })
}

/// Decode a GPS_INPUT payload
pub fn decode_gps_input(frame: &MavlinkFrame) -> Result<GpsInput> {
    expect_msg(frame, MAVLINK_MSG_ID_GPS_INPUT)?;
    let bytes = frame.payload_array::<GPS_INPUT_PAYLOAD_SIZE>()?;
    let mut buf = &bytes[..];

    Ok(GpsInput {
        time_usec: buf.get_u64_le(),
        time_week_ms: buf.get_u32_le(),
        lat: buf.get_i32_le(),
        lon: buf.get_i32_le(),
        alt: buf.get_f32_le(),
        hdop: buf.get_f32_le(),
        vdop: buf.get_f32_le(),
        vn: buf.get_f32_le(),
        ve: buf.get_f32_le(),
        vd: buf.get_f32_le(),
        speed_accuracy: buf.get_f32_le(),
        horiz_accuracy: buf.get_f32_le(),
        vert_accuracy: buf.get_f32_le(),
        ignore_flags: buf.get_u16_le(),
        time_week: buf.get_u16_le(),
        gps_id: buf.get_u8(),
        fix_type: buf.get_u8(),
        satellites_visible: buf.get_u8(),
    })
}

fn expect_msg(frame: &MavlinkFrame, msg_id: u8) -> Result<()> {
    if frame.msg_id != msg_id {
        return Err(BridgeError::Protocol(format!(
            "Expected message {}, got {}",
            msg_id, frame.msg_id
        )));
    }
    Ok(())
}
