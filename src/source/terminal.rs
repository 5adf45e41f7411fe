//! # Satellite Terminal Fallback
//!
//! The terminal exposes its gRPC `Handle` procedure on the local network.
//! [`GrpcurlClient`] drives it through the `grpcurl` tool and decodes the
//! JSON replies into typed structs; [`FallbackProvider`] combines the
//! location and status replies into a [`PositionFix`].

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use super::PositionSource;
use crate::config::TerminalConfig;
use crate::error::{BridgeError, Result};
use crate::fix::{FixSource, PositionFix};

/// Request body for the location procedure
pub const GET_LOCATION_REQUEST: &str = r#"{"get_location":{}}"#;

/// Request body for the status procedure
pub const GET_STATUS_REQUEST: &str = r#"{"get_status":{}}"#;

/// Position reported by the terminal
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerminalLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    /// 1-sigma horizontal uncertainty in meters
    pub accuracy: Option<f64>,
}

/// GNSS status reported by the terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalStatus {
    pub gps_valid: bool,
    pub satellites: u8,
}

/// The two terminal procedures the bridge needs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TerminalApi: Send + Sync {
    async fn get_location(&self) -> Result<TerminalLocation>;

    async fn get_status(&self) -> Result<TerminalStatus>;
}

// Wire shapes. proto3 JSON omits default values, so every level is optional
// and the checks live in the parse functions.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocationReply {
    get_location: Option<LocationBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocationBody {
    lla: Option<Lla>,
    sigma_m: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Lla {
    lat: Option<f64>,
    lon: Option<f64>,
    #[serde(default)]
    alt: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusReply {
    dish_get_status: Option<StatusBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody {
    gps_stats: Option<GpsStats>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GpsStats {
    #[serde(default)]
    gps_valid: bool,
    #[serde(default)]
    gps_sats: u32,
}

/// Decode a location reply
///
/// # Errors
///
/// Returns [`BridgeError::InvalidFix`] if the JSON is malformed or
/// `getLocation.lla.lat`/`lon` is missing
pub fn parse_location(json: &str) -> Result<TerminalLocation> {
    let reply: LocationReply = serde_json::from_str(json)
        .map_err(|e| BridgeError::InvalidFix(format!("location reply: {}", e)))?;

    let body = reply
        .get_location
        .ok_or_else(|| BridgeError::InvalidFix("location reply has no getLocation".to_string()))?;
    let lla = body
        .lla
        .ok_or_else(|| BridgeError::InvalidFix("location reply has no lla".to_string()))?;

    match (lla.lat, lla.lon) {
        (Some(latitude), Some(longitude)) => Ok(TerminalLocation {
            latitude,
            longitude,
            altitude: lla.alt,
            accuracy: body.sigma_m,
        }),
        _ => Err(BridgeError::InvalidFix("location reply lacks lat/lon".to_string())),
    }
}

/// Decode a status reply
///
/// # Errors
///
/// Returns [`BridgeError::InvalidFix`] if the JSON is malformed or
/// `dishGetStatus.gpsStats` is missing
pub fn parse_status(json: &str) -> Result<TerminalStatus> {
    let reply: StatusReply = serde_json::from_str(json)
        .map_err(|e| BridgeError::InvalidFix(format!("status reply: {}", e)))?;

    let stats = reply
        .dish_get_status
        .and_then(|status| status.gps_stats)
        .ok_or_else(|| BridgeError::InvalidFix("status reply has no gpsStats".to_string()))?;

    Ok(TerminalStatus {
        gps_valid: stats.gps_valid,
        satellites: stats.gps_sats.min(u8::MAX as u32) as u8,
    })
}

/// Terminal client that shells out to `grpcurl -plaintext`
#[derive(Debug, Clone)]
pub struct GrpcurlClient {
    grpcurl: String,
    address: String,
    service: String,
    timeout: Duration,
}

impl GrpcurlClient {
    pub fn new(config: &TerminalConfig) -> Self {
        Self {
            grpcurl: config.grpcurl.clone(),
            address: config.address.clone(),
            service: config.service.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    /// Invoke the Handle procedure with `request` and return stdout
    async fn call(&self, request: &str) -> Result<String> {
        let child = Command::new(&self.grpcurl)
            .arg("-plaintext")
            .arg("-d")
            .arg(request)
            .arg(&self.address)
            .arg(&self.service)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BridgeError::unreachable(
                    FixSource::Fallback,
                    format!("cannot run {}: {}", self.grpcurl, e),
                )
            })?;

        // On timeout the child is dropped, which kills it
        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(BridgeError::unreachable(FixSource::Fallback, e.to_string())),
            Err(_) => return Err(BridgeError::timeout(FixSource::Fallback, self.timeout)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BridgeError::unreachable(
                FixSource::Fallback,
                format!("{} exited with {}: {}", self.grpcurl, output.status, stderr.trim()),
            ));
        }

        String::from_utf8(output.stdout)
            .map_err(|e| BridgeError::InvalidFix(format!("terminal reply is not UTF-8: {}", e)))
    }
}

#[async_trait]
impl TerminalApi for GrpcurlClient {
    async fn get_location(&self) -> Result<TerminalLocation> {
        parse_location(&self.call(GET_LOCATION_REQUEST).await?)
    }

    async fn get_status(&self) -> Result<TerminalStatus> {
        parse_status(&self.call(GET_STATUS_REQUEST).await?)
    }
}

/// Turns terminal replies into fallback fixes
#[derive(Debug)]
pub struct FallbackProvider<T> {
    api: T,
}

impl<T: TerminalApi> FallbackProvider<T> {
    pub fn new(api: T) -> Self {
        Self { api }
    }

    /// Query location and status concurrently and combine them
    ///
    /// Both calls must succeed. The fix is valid only when the terminal
    /// reports a valid GNSS solution with in-range coordinates.
    pub async fn query(&self, captured_at: DateTime<Utc>) -> Result<PositionFix> {
        let (location, status) = tokio::join!(self.api.get_location(), self.api.get_status());
        let (location, status) = (location?, status?);

        let mut fix = PositionFix::new(
            location.latitude,
            location.longitude,
            location.altitude,
            status.satellites,
            FixSource::Fallback,
            captured_at,
        );
        fix.accuracy = location.accuracy;
        fix.valid = status.gps_valid && fix.has_plausible_coordinates();

        debug!(
            "Terminal fix: {:.6}, {:.6}, {:.1} m, {} sats, valid={}",
            fix.latitude, fix.longitude, fix.altitude, fix.satellites, fix.valid
        );

        Ok(fix)
    }
}

#[async_trait]
impl<T: TerminalApi> PositionSource for FallbackProvider<T> {
    async fn fetch(&mut self, captured_at: DateTime<Utc>) -> Result<PositionFix> {
        self.query(captured_at).await
    }

    fn kind(&self) -> FixSource {
        FixSource::Fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UnavailableReason;

    const LOCATION_JSON: &str = r#"{
        "apiVersion": "25",
        "getLocation": {
            "lla": { "lat": 47.6062, "lon": -122.3321, "alt": 56.2 },
            "source": "GNC_FUSED",
            "sigmaM": 4.5,
            "horizontalSpeedMps": 0.1
        }
    }"#;

    const STATUS_JSON: &str = r#"{
        "apiVersion": "25",
        "dishGetStatus": {
            "deviceInfo": { "id": "ut01000000-00000000-00000000" },
            "gpsStats": { "gpsValid": true, "gpsSats": 8 }
        }
    }"#;

    #[test]
    fn test_parse_location() {
        let location = parse_location(LOCATION_JSON).unwrap();
        assert_eq!(location.latitude, 47.6062);
        assert_eq!(location.longitude, -122.3321);
        assert_eq!(location.altitude, 56.2);
        assert_eq!(location.accuracy, Some(4.5));
    }

    #[test]
    fn test_parse_location_defaults() {
        let location = parse_location(r#"{"getLocation":{"lla":{"lat":1.5,"lon":2.5}}}"#).unwrap();
        assert_eq!(location.altitude, 0.0);
        assert_eq!(location.accuracy, None);
    }

    #[test]
    fn test_parse_location_schema_mismatch() {
        for json in [
            "{}",
            r#"{"getLocation":{}}"#,
            r#"{"getLocation":{"lla":{"lat":1.0}}}"#,
            r#"{"getLocation":{"lla":{"lat":"north","lon":2.0}}}"#,
            "not json",
        ] {
            assert!(
                matches!(parse_location(json), Err(BridgeError::InvalidFix(_))),
                "{}",
                json
            );
        }
    }

    #[test]
    fn test_parse_status() {
        let status = parse_status(STATUS_JSON).unwrap();
        assert!(status.gps_valid);
        assert_eq!(status.satellites, 8);
    }

    #[test]
    fn test_parse_status_omitted_defaults() {
        // proto3 JSON drops false and zero
        let status = parse_status(r#"{"dishGetStatus":{"gpsStats":{}}}"#).unwrap();
        assert!(!status.gps_valid);
        assert_eq!(status.satellites, 0);

        assert!(parse_status(r#"{"dishGetStatus":{}}"#).is_err());
    }

    fn mock_terminal(location: TerminalLocation, status: TerminalStatus) -> MockTerminalApi {
        let mut api = MockTerminalApi::new();
        api.expect_get_location().returning(move || Ok(location));
        api.expect_get_status().returning(move || Ok(status));
        api
    }

    fn seattle() -> TerminalLocation {
        TerminalLocation {
            latitude: 47.6062,
            longitude: -122.3321,
            altitude: 56.2,
            accuracy: Some(4.5),
        }
    }

    #[tokio::test]
    async fn test_fallback_fix_from_terminal() {
        let api = mock_terminal(seattle(), TerminalStatus { gps_valid: true, satellites: 8 });
        let mut provider = FallbackProvider::new(api);

        let now = Utc::now();
        let fix = provider.fetch(now).await.unwrap();
        assert!(fix.valid);
        assert_eq!(fix.source, FixSource::Fallback);
        assert_eq!(fix.latitude, 47.6062);
        assert_eq!(fix.satellites, 8);
        assert_eq!(fix.accuracy, Some(4.5));
        assert_eq!(fix.captured_at, now);
        assert_eq!(provider.kind(), FixSource::Fallback);
    }

    #[tokio::test]
    async fn test_fallback_fix_invalid_without_gps() {
        let api = mock_terminal(seattle(), TerminalStatus { gps_valid: false, satellites: 2 });
        let fix = FallbackProvider::new(api).query(Utc::now()).await.unwrap();
        assert!(!fix.valid);
    }

    #[tokio::test]
    async fn test_fallback_fix_invalid_out_of_range() {
        let mut location = seattle();
        location.latitude = 91.0;
        let api = mock_terminal(location, TerminalStatus { gps_valid: true, satellites: 9 });
        let fix = FallbackProvider::new(api).query(Utc::now()).await.unwrap();
        assert!(!fix.valid);
    }

    #[tokio::test]
    async fn test_fallback_requires_both_calls() {
        let mut api = MockTerminalApi::new();
        api.expect_get_location().returning(|| Ok(seattle()));
        api.expect_get_status()
            .returning(|| Err(BridgeError::timeout(FixSource::Fallback, Duration::from_secs(2))));

        match FallbackProvider::new(api).query(Utc::now()).await {
            Err(BridgeError::SourceUnavailable {
                origin: FixSource::Fallback,
                reason: UnavailableReason::Timeout(_),
            }) => {}
            other => panic!("Expected timeout, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_grpcurl_missing_binary_is_unreachable() {
        let config = TerminalConfig {
            grpcurl: "/nonexistent/grpcurl".to_string(),
            ..TerminalConfig::default()
        };
        let client = GrpcurlClient::new(&config);

        let err = client.get_location().await.unwrap_err();
        assert!(err.is_device_lost());
    }

    #[tokio::test]
    async fn test_grpcurl_failed_call_is_unreachable() {
        // `false` ignores its arguments and exits 1
        let config = TerminalConfig {
            grpcurl: "false".to_string(),
            ..TerminalConfig::default()
        };
        let client = GrpcurlClient::new(&config);

        let err = client.get_status().await.unwrap_err();
        assert!(matches!(
            err,
            BridgeError::SourceUnavailable {
                reason: UnavailableReason::Unreachable(_),
                ..
            }
        ));
    }

    #[tokio::test]
    #[ignore] // Requires grpcurl and a terminal at 192.168.100.1
    async fn test_real_terminal() {
        let client = GrpcurlClient::new(&TerminalConfig::default());
        let fix = FallbackProvider::new(client).query(Utc::now()).await;
        assert!(fix.is_ok());
    }
}
