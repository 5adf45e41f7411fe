//! # SNTP Client
//!
//! Minimal SNTPv4 (RFC 4330) client: one 48-byte request, one reply, clock
//! offset from the four timestamps.
//!
//! ```text
//! offset = ((t2 - t1) + (t3 - t4)) / 2
//! ```
//!
//! t1 = client transmit, t2 = server receive, t3 = server transmit,
//! t4 = client receive.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use super::TimeQuery;
use crate::config::TimeConfig;
use crate::error::{BridgeError, Result};

/// Seconds between 1900-01-01 (NTP era 0) and 1970-01-01
pub const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// SNTP packet size without extensions
pub const NTP_PACKET_SIZE: usize = 48;

/// LI = 0, VN = 4, Mode = 3 (client)
pub const NTP_CLIENT_HEADER: u8 = 0x23;

const NTP_MODE_SERVER: u8 = 4;
const ORIGINATE_OFFSET: usize = 24;
const RECEIVE_OFFSET: usize = 32;
const TRANSMIT_OFFSET: usize = 40;

/// Convert UNIX seconds to a 64-bit NTP timestamp (32.32 fixed point)
pub fn to_ntp_timestamp(unix_seconds: f64) -> u64 {
    let ntp = unix_seconds + NTP_UNIX_OFFSET as f64;
    let seconds = ntp.trunc() as u64 & 0xFFFF_FFFF;
    let fraction = ((ntp.fract() * 4_294_967_296.0) as u64).min(0xFFFF_FFFF);
    (seconds << 32) | fraction
}

/// Convert a 64-bit NTP timestamp to UNIX seconds
///
/// Timestamps whose seconds field has wrapped (era 1, from 2036) are mapped
/// past 2036 rather than back to 1900.
pub fn from_ntp_timestamp(timestamp: u64) -> f64 {
    let seconds = (timestamp >> 32) as i64;
    let fraction = (timestamp & 0xFFFF_FFFF) as f64 / 4_294_967_296.0;

    let mut unix = seconds - NTP_UNIX_OFFSET as i64;
    if unix < 0 {
        unix += 1 << 32;
    }
    unix as f64 + fraction
}

/// Current wall clock as UNIX seconds
fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn read_timestamp(packet: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&packet[offset..offset + 8]);
    u64::from_be_bytes(bytes)
}

/// Client request carrying `transmit` as its transmit timestamp
pub fn build_request(transmit: u64) -> [u8; NTP_PACKET_SIZE] {
    let mut packet = [0u8; NTP_PACKET_SIZE];
    packet[0] = NTP_CLIENT_HEADER;
    packet[TRANSMIT_OFFSET..TRANSMIT_OFFSET + 8].copy_from_slice(&transmit.to_be_bytes());
    packet
}

/// Validate a server reply and compute the clock offset in seconds
///
/// # Arguments
///
/// * `packet` - Reply bytes
/// * `sent` - Transmit timestamp of our request (t1), as sent
/// * `received_at` - UNIX time the reply arrived (t4)
///
/// # Errors
///
/// Returns [`BridgeError::TimeSyncFailed`] if the reply is short, not in
/// server mode, a kiss-o'-death (stratum 0), or does not answer our request
pub fn parse_response(packet: &[u8], sent: u64, received_at: f64) -> Result<f64> {
    if packet.len() < NTP_PACKET_SIZE {
        return Err(BridgeError::TimeSyncFailed(format!(
            "reply too short: {} bytes",
            packet.len()
        )));
    }

    let mode = packet[0] & 0x07;
    if mode != NTP_MODE_SERVER {
        return Err(BridgeError::TimeSyncFailed(format!("unexpected mode {}", mode)));
    }

    if packet[1] == 0 {
        return Err(BridgeError::TimeSyncFailed("kiss-o'-death (stratum 0)".to_string()));
    }

    if read_timestamp(packet, ORIGINATE_OFFSET) != sent {
        return Err(BridgeError::TimeSyncFailed(
            "reply does not match request".to_string(),
        ));
    }

    let t1 = from_ntp_timestamp(sent);
    let t2 = from_ntp_timestamp(read_timestamp(packet, RECEIVE_OFFSET));
    let t3 = from_ntp_timestamp(read_timestamp(packet, TRANSMIT_OFFSET));
    let t4 = received_at;

    Ok(((t2 - t1) + (t3 - t4)) / 2.0)
}

/// SNTP client bound to one server
#[derive(Debug, Clone)]
pub struct SntpClient {
    server: String,
    timeout: Duration,
}

impl SntpClient {
    pub fn new(server: impl Into<String>, timeout: Duration) -> Self {
        Self {
            server: server.into(),
            timeout,
        }
    }

    pub fn from_config(config: &TimeConfig) -> Self {
        Self::new(config.server.clone(), Duration::from_millis(config.timeout_ms))
    }

    async fn exchange(&self) -> Result<f64> {
        let fail = |what: &str, e: std::io::Error| {
            BridgeError::TimeSyncFailed(format!("{} {}: {}", what, self.server, e))
        };

        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| fail("bind for", e))?;
        socket
            .connect(&self.server)
            .await
            .map_err(|e| fail("connect to", e))?;

        let sent = to_ntp_timestamp(unix_now());
        socket
            .send(&build_request(sent))
            .await
            .map_err(|e| fail("send to", e))?;

        let mut buf = [0u8; 128];
        loop {
            let len = socket.recv(&mut buf).await.map_err(|e| fail("receive from", e))?;
            let received_at = unix_now();

            // Late reply to an earlier request on a reused port
            if len >= NTP_PACKET_SIZE && read_timestamp(&buf, ORIGINATE_OFFSET) != sent {
                continue;
            }

            return parse_response(&buf[..len], sent, received_at);
        }
    }
}

#[async_trait]
impl TimeQuery for SntpClient {
    async fn query_offset(&self) -> Result<f64> {
        match timeout(self.timeout, self.exchange()).await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::TimeSyncFailed(format!(
                "no reply from {} within {:?}",
                self.server, self.timeout
            ))),
        }
    }
}
