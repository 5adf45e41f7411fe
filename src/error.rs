//! # Error Types
//!
//! Custom error types for the Starlink GPS bridge using `thiserror`.
//!
//! Every variant except [`BridgeError::SinkUnavailable`] is recoverable: the
//! main loop folds it into the failover state or logs it and carries on with
//! the next cycle.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::fix::FixSource;

/// Why a position source could not produce a reading
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnavailableReason {
    /// The call did not complete within its time budget
    Timeout(Duration),

    /// The device or endpoint could not be opened or reached at all
    Unreachable(String),
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnavailableReason::Timeout(after) => write!(f, "timed out after {:?}", after),
            UnavailableReason::Unreachable(msg) => write!(f, "unreachable: {}", msg),
        }
    }
}

/// Main error type for the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Device or API unreachable, or it did not answer in time
    #[error("{origin} source unavailable: {reason}")]
    SourceUnavailable {
        origin: FixSource,
        reason: UnavailableReason,
    },

    /// Malformed or out-of-range position data
    #[error("Invalid fix: {0}")]
    InvalidFix(String),

    /// Candidate position jumped implausibly far from the reference
    #[error("Spoofing suspected: position jumped {distance_m:.0} m (threshold {threshold_m:.0} m)")]
    SpoofingSuspected { distance_m: f64, threshold_m: f64 },

    /// Output could not be written this cycle (no reader, full pipe, I/O error)
    #[error("Sink write failed: {0}")]
    SinkWriteFailed(String),

    /// Output resource could not be acquired at startup
    #[error("Sink unavailable: {0}")]
    SinkUnavailable(String),

    /// Network time query did not complete
    #[error("Time sync failed: {0}")]
    TimeSyncFailed(String),

    /// Wire frame could not be decoded
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Shorthand for a timed-out source
    pub fn timeout(source: FixSource, after: Duration) -> Self {
        BridgeError::SourceUnavailable {
            origin: source,
            reason: UnavailableReason::Timeout(after),
        }
    }

    /// Shorthand for a source that cannot be reached
    pub fn unreachable(source: FixSource, msg: impl Into<String>) -> Self {
        BridgeError::SourceUnavailable {
            origin: source,
            reason: UnavailableReason::Unreachable(msg.into()),
        }
    }

    /// True when the device itself is absent, as opposed to returning bad data
    pub fn is_device_lost(&self) -> bool {
        matches!(
            self,
            BridgeError::SourceUnavailable {
                reason: UnavailableReason::Unreachable(_),
                ..
            }
        )
    }
}

/// Result type alias for the bridge
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_lost_only_for_unreachable() {
        let lost = BridgeError::unreachable(FixSource::Primary, "/dev/ttyACM0 missing");
        assert!(lost.is_device_lost());

        let timeout = BridgeError::timeout(FixSource::Primary, Duration::from_secs(2));
        assert!(!timeout.is_device_lost());

        assert!(!BridgeError::InvalidFix("bad".into()).is_device_lost());
    }

    #[test]
    fn test_error_messages() {
        let err = BridgeError::timeout(FixSource::Fallback, Duration::from_secs(2));
        assert_eq!(err.to_string(), "fallback source unavailable: timed out after 2s");

        let err = BridgeError::SpoofingSuspected {
            distance_m: 2000.4,
            threshold_m: 1000.0,
        };
        assert!(err.to_string().contains("2000 m"));
    }
}
