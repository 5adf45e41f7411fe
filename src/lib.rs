//! # Starlink GPS Bridge Library
//!
//! Keeps a position daemon fed when the local GNSS receiver loses lock,
//! is jammed or spoofed, or is unplugged.
//!
//! This library reads the primary receiver, falls back to the position
//! reported by a Starlink terminal, corrects timestamps against the
//! terminal's NTP server and emits NMEA 0183 or MAVLink v1 to a FIFO or UDP
//! sink.

pub mod config;
pub mod error;
pub mod fix;
pub mod health;
pub mod mavlink;
pub mod nmea;
pub mod orchestrator;
pub mod sink;
pub mod source;
pub mod time;
