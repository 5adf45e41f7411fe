//! # MAVLink Module
//!
//! MAVLink v1 telemetry frames for autopilots and ground stations.
//!
//! This module handles:
//! - HEARTBEAT, GPS_RAW_INT, GLOBAL_POSITION_INT and GPS_STATUS payloads
//! - Optional GPS_INPUT for autopilots taking an external GPS feed
//! - X.25 CRC-16 with per-message CRC_EXTRA
//! - Sequence numbering and per-cycle emission cadence
//! - Frame decoding and CRC verification

pub mod protocol;
pub mod encoder;
pub mod decoder;
pub mod crc;
