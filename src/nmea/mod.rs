//! # NMEA 0183 Module
//!
//! Textual position sentences for position daemons such as gpsd.
//!
//! This module handles:
//! - Sentence rendering (GGA, RMC, GSA, VTG, GLL, ZDA)
//! - XOR checksum calculation and verification
//! - Decoding GGA/RMC from the primary receiver

pub mod protocol;
pub mod encoder;
pub mod decoder;
pub mod checksum;
