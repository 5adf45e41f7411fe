//! # Health Monitor
//!
//! Failover state machine arbitrating between the primary receiver and the
//! satellite-terminal fallback.
//!
//! ```text
//!            invalid / no lock                 lock loss > threshold
//!  Healthy ──────────────────────▶ Degraded ──────────────────────────▶ Fallback
//!     ▲                               │  suspicious jump                   │
//!     │         valid fix             │                                    │
//!     └───────────────────────────────┴────────────────────────────────────┘
//!                                                    ▲
//!  any ── device absent ──▶ Disconnected ── instant ─┘
//! ```
//!
//! The monitor owns [`FailoverState`] exclusively. Callers pass the current
//! [`Instant`] in, which keeps every transition deterministic under test.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::FailoverConfig;
use crate::error::{BridgeError, Result};
use crate::fix::PositionFix;

/// Current health of the primary receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Nothing has been read yet
    Unknown,
    /// Primary produces valid, plausible fixes
    Healthy,
    /// Primary is returning bad data but the lock-loss threshold has not expired
    Degraded,
    /// Primary device cannot be opened or read
    Disconnected,
    /// Satellite terminal substitutes for the primary
    Fallback,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Unknown => "unknown",
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Disconnected => "disconnected",
            HealthState::Fallback => "fallback",
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference point for spoofing/jump detection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferencePosition {
    pub latitude: f64,
    pub longitude: f64,
}

impl From<&PositionFix> for ReferencePosition {
    fn from(fix: &PositionFix) -> Self {
        Self {
            latitude: fix.latitude,
            longitude: fix.longitude,
        }
    }
}

/// State persisted across cycles
#[derive(Debug, Clone, PartialEq)]
pub struct FailoverState {
    pub state: HealthState,

    /// When the last healthy primary fix was accepted
    pub last_healthy_at: Option<Instant>,

    /// Start of the current failure streak; anchors the threshold when no
    /// healthy fix was ever accepted
    pub failing_since: Option<Instant>,

    /// Last accepted position, compared against each new candidate
    pub reference: Option<ReferencePosition>,

    pub consecutive_failures: u32,
}

impl Default for FailoverState {
    fn default() -> Self {
        Self {
            state: HealthState::Unknown,
            last_healthy_at: None,
            failing_since: None,
            reference: None,
            consecutive_failures: 0,
        }
    }
}

/// Failover thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FailoverPolicy {
    /// How long the primary may stay degraded before fallback
    pub lock_loss_threshold: Duration,

    /// Largest believable distance between consecutive accepted fixes
    pub position_jump_threshold_m: f64,

    /// Minimum gap between primary probes while in fallback
    pub recovery_check_interval: Duration,

    /// Whether a fallback source exists at all
    pub fallback_enabled: bool,
}

impl Default for FailoverPolicy {
    fn default() -> Self {
        Self {
            lock_loss_threshold: Duration::from_secs(30),
            position_jump_threshold_m: 1000.0,
            recovery_check_interval: Duration::ZERO,
            fallback_enabled: true,
        }
    }
}

impl FailoverPolicy {
    /// Build the policy from configuration
    pub fn from_config(config: &FailoverConfig, fallback_enabled: bool) -> Self {
        Self {
            lock_loss_threshold: Duration::from_secs(config.lock_loss_threshold_s),
            position_jump_threshold_m: config.position_jump_threshold_m,
            recovery_check_interval: Duration::from_millis(config.recovery_check_interval_ms),
            fallback_enabled,
        }
    }
}

/// Drives the failover state machine from primary read outcomes
#[derive(Debug)]
pub struct HealthMonitor {
    policy: FailoverPolicy,
    failover: FailoverState,
    last_probe_at: Option<Instant>,
}

impl HealthMonitor {
    pub fn new(policy: FailoverPolicy) -> Self {
        Self {
            policy,
            failover: FailoverState::default(),
            last_probe_at: None,
        }
    }

    pub fn state(&self) -> HealthState {
        self.failover.state
    }

    pub fn failover(&self) -> &FailoverState {
        &self.failover
    }

    pub fn policy(&self) -> &FailoverPolicy {
        &self.policy
    }

    /// Whether the primary should be read this cycle
    ///
    /// Always true outside fallback. In fallback the primary is re-probed at
    /// most once per recovery interval.
    pub fn should_probe_primary(&self, now: Instant) -> bool {
        if self.failover.state != HealthState::Fallback {
            return true;
        }

        match self.last_probe_at {
            Some(last) => now.saturating_duration_since(last) >= self.policy.recovery_check_interval,
            None => true,
        }
    }

    /// Fold one primary read outcome into the state machine
    ///
    /// # Returns
    ///
    /// * `Ok(fix)` - the fix was accepted; the state is now `Healthy`
    /// * `Err(e)` - the read did not yield a usable fix; `e` says why
    ///   (`SourceUnavailable`, `InvalidFix` or `SpoofingSuspected`)
    pub fn observe(&mut self, reading: Result<PositionFix>, now: Instant) -> Result<PositionFix> {
        self.last_probe_at = Some(now);

        let candidate = match reading {
            Ok(fix) => fix,
            Err(err) if err.is_device_lost() => {
                self.on_device_lost(now);
                return Err(err);
            }
            Err(err) => {
                self.on_bad_read(now, false);
                return Err(err);
            }
        };

        if !candidate.valid {
            self.on_bad_read(now, false);
            return Err(BridgeError::InvalidFix("primary reports no lock".to_string()));
        }

        if let Err(err) = candidate.ensure_in_range() {
            self.on_bad_read(now, false);
            return Err(err);
        }

        if let Some(reference) = self.failover.reference {
            let distance_m = crate::fix::haversine_distance(
                reference.latitude,
                reference.longitude,
                candidate.latitude,
                candidate.longitude,
            );

            if distance_m > self.policy.position_jump_threshold_m {
                warn!(
                    "Rejecting primary fix: jumped {:.0} m from reference (threshold {:.0} m)",
                    distance_m, self.policy.position_jump_threshold_m
                );
                self.on_bad_read(now, true);
                return Err(BridgeError::SpoofingSuspected {
                    distance_m,
                    threshold_m: self.policy.position_jump_threshold_m,
                });
            }
        }

        self.on_accepted(&candidate, now);
        Ok(candidate)
    }

    /// Record a fallback fix that was emitted while in fallback
    ///
    /// Valid terminal fixes move the jump reference along with the vehicle so
    /// a recovering primary is compared against where it is now.
    pub fn note_fallback_fix(&mut self, fix: &PositionFix) {
        if self.failover.state == HealthState::Fallback && fix.valid && fix.has_plausible_coordinates() {
            self.failover.reference = Some(ReferencePosition::from(fix));
        }
    }

    /// Time without a healthy fix, measured from the last accepted fix or,
    /// failing that, from the first failure
    pub fn lock_loss_duration(&self, now: Instant) -> Option<Duration> {
        self.failover
            .last_healthy_at
            .or(self.failover.failing_since)
            .map(|since| now.saturating_duration_since(since))
    }

    fn on_accepted(&mut self, fix: &PositionFix, now: Instant) {
        if self.failover.reference.is_none() {
            debug!(
                "First primary fix accepted as reference: {:.6}, {:.6}",
                fix.latitude, fix.longitude
            );
        }

        self.failover.reference = Some(ReferencePosition::from(fix));
        self.failover.last_healthy_at = Some(now);
        self.failover.failing_since = None;
        self.failover.consecutive_failures = 0;
        self.transition(HealthState::Healthy);
    }

    fn on_bad_read(&mut self, now: Instant, suspicious: bool) {
        self.failover.consecutive_failures = self.failover.consecutive_failures.saturating_add(1);
        if self.failover.failing_since.is_none() {
            self.failover.failing_since = Some(now);
        }

        match self.failover.state {
            HealthState::Unknown | HealthState::Healthy => {
                self.transition(HealthState::Degraded);
            }
            HealthState::Degraded => {
                let expired = self
                    .lock_loss_duration(now)
                    .map_or(false, |lost| lost > self.policy.lock_loss_threshold);

                if self.policy.fallback_enabled && (expired || suspicious) {
                    self.transition(HealthState::Fallback);
                }
            }
            HealthState::Disconnected => {
                // The device answered again, just not with anything useful
                self.transition(HealthState::Degraded);
            }
            HealthState::Fallback => {}
        }
    }

    fn on_device_lost(&mut self, now: Instant) {
        self.failover.consecutive_failures = self.failover.consecutive_failures.saturating_add(1);
        if self.failover.failing_since.is_none() {
            self.failover.failing_since = Some(now);
        }

        if self.failover.state == HealthState::Fallback {
            return;
        }

        self.transition(HealthState::Disconnected);
        if self.policy.fallback_enabled {
            self.transition(HealthState::Fallback);
        }
    }

    fn transition(&mut self, next: HealthState) {
        let previous = self.failover.state;
        if previous == next {
            return;
        }

        match next {
            HealthState::Fallback | HealthState::Disconnected => {
                warn!("Health state {} -> {}", previous, next)
            }
            _ => info!("Health state {} -> {}", previous, next),
        }
        self.failover.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fix::FixSource;
    use chrono::Utc;

    fn valid_fix(lat: f64, lon: f64) -> Result<PositionFix> {
        Ok(PositionFix::new(lat, lon, 50.0, 9, FixSource::Primary, Utc::now()))
    }

    fn invalid_fix() -> Result<PositionFix> {
        Ok(PositionFix::no_fix(FixSource::Primary, Utc::now()))
    }

    fn device_lost() -> Result<PositionFix> {
        Err(BridgeError::unreachable(FixSource::Primary, "no such device"))
    }

    fn monitor() -> HealthMonitor {
        HealthMonitor::new(FailoverPolicy::default())
    }

    #[test]
    fn test_starts_unknown() {
        let monitor = monitor();
        assert_eq!(monitor.state(), HealthState::Unknown);
        assert_eq!(monitor.failover().consecutive_failures, 0);
        assert!(monitor.failover().reference.is_none());
    }

    #[test]
    fn test_unknown_invalid_goes_degraded_not_fallback() {
        let mut monitor = monitor();
        let t0 = Instant::now();

        assert!(monitor.observe(invalid_fix(), t0).is_err());
        assert_eq!(monitor.state(), HealthState::Degraded);
    }

    #[test]
    fn test_first_fix_accepted_unconditionally() {
        let mut monitor = monitor();
        let t0 = Instant::now();

        let fix = monitor.observe(valid_fix(47.0, -122.0), t0).unwrap();
        assert_eq!(fix.latitude, 47.0);
        assert_eq!(monitor.state(), HealthState::Healthy);
        assert_eq!(
            monitor.failover().reference,
            Some(ReferencePosition { latitude: 47.0, longitude: -122.0 })
        );
    }

    #[test]
    fn test_lock_loss_threshold_boundary() {
        let mut monitor = monitor();
        let t0 = Instant::now();

        monitor.observe(valid_fix(47.0, -122.0), t0).unwrap();
        assert_eq!(monitor.state(), HealthState::Healthy);

        // Goes invalid right at t0, stays degraded through the full threshold
        for secs in [0u64, 1, 10, 20, 29, 30] {
            let _ = monitor.observe(invalid_fix(), t0 + Duration::from_secs(secs));
            assert_eq!(monitor.state(), HealthState::Degraded, "at t0+{}s", secs);
        }

        let _ = monitor.observe(invalid_fix(), t0 + Duration::from_millis(30_001));
        assert_eq!(monitor.state(), HealthState::Fallback);
    }

    #[test]
    fn test_valid_read_resets_threshold_clock() {
        let mut monitor = monitor();
        let t0 = Instant::now();

        monitor.observe(valid_fix(47.0, -122.0), t0).unwrap();
        let _ = monitor.observe(invalid_fix(), t0 + Duration::from_secs(1));
        assert_eq!(monitor.state(), HealthState::Degraded);

        monitor.observe(valid_fix(47.0, -122.0), t0 + Duration::from_secs(10)).unwrap();
        assert_eq!(monitor.state(), HealthState::Healthy);
        assert_eq!(monitor.failover().consecutive_failures, 0);

        // 35 s after t0 but only 25 s after the recovery
        let _ = monitor.observe(invalid_fix(), t0 + Duration::from_secs(20));
        let _ = monitor.observe(invalid_fix(), t0 + Duration::from_secs(35));
        assert_eq!(monitor.state(), HealthState::Degraded);

        let _ = monitor.observe(invalid_fix(), t0 + Duration::from_secs(41));
        assert_eq!(monitor.state(), HealthState::Fallback);
    }

    #[test]
    fn test_threshold_from_first_failure_without_history() {
        let mut monitor = monitor();
        let t0 = Instant::now();

        // Five invalid reads spanning 35 s from a cold start
        for i in 0..5u64 {
            let _ = monitor.observe(invalid_fix(), t0 + Duration::from_millis(i * 8_750));
        }

        assert_eq!(monitor.state(), HealthState::Fallback);
        assert_eq!(monitor.failover().consecutive_failures, 5);
    }

    #[test]
    fn test_position_jump_rejected() {
        let mut monitor = monitor();
        let t0 = Instant::now();

        monitor.observe(valid_fix(47.0, -122.0), t0).unwrap();

        // ~2000 m north
        let jumped = 47.0 + 2000.0 / 111_195.0;
        let result = monitor.observe(valid_fix(jumped, -122.0), t0 + Duration::from_secs(1));

        match result {
            Err(BridgeError::SpoofingSuspected { distance_m, threshold_m }) => {
                assert!((distance_m - 2000.0).abs() < 5.0, "distance {}", distance_m);
                assert_eq!(threshold_m, 1000.0);
            }
            other => panic!("Expected SpoofingSuspected, got: {:?}", other),
        }

        assert_ne!(monitor.state(), HealthState::Healthy);
        assert_eq!(
            monitor.failover().reference,
            Some(ReferencePosition { latitude: 47.0, longitude: -122.0 })
        );
    }

    #[test]
    fn test_suspicious_fix_while_degraded_triggers_fallback() {
        let mut monitor = monitor();
        let t0 = Instant::now();

        monitor.observe(valid_fix(47.0, -122.0), t0).unwrap();
        let _ = monitor.observe(invalid_fix(), t0 + Duration::from_secs(1));
        assert_eq!(monitor.state(), HealthState::Degraded);

        let _ = monitor.observe(valid_fix(48.0, -122.0), t0 + Duration::from_secs(2));
        assert_eq!(monitor.state(), HealthState::Fallback);
    }

    #[test]
    fn test_small_move_accepted() {
        let mut monitor = monitor();
        let t0 = Instant::now();

        monitor.observe(valid_fix(47.0, -122.0), t0).unwrap();
        let moved = 47.0 + 500.0 / 111_195.0;
        monitor.observe(valid_fix(moved, -122.0), t0 + Duration::from_secs(1)).unwrap();

        assert_eq!(monitor.state(), HealthState::Healthy);
        assert_eq!(monitor.failover().reference.unwrap().latitude, moved);
    }

    #[test]
    fn test_device_lost_goes_straight_to_fallback() {
        let mut monitor = monitor();
        let t0 = Instant::now();

        monitor.observe(valid_fix(47.0, -122.0), t0).unwrap();
        let err = monitor.observe(device_lost(), t0 + Duration::from_secs(1)).unwrap_err();

        assert!(err.is_device_lost());
        assert_eq!(monitor.state(), HealthState::Fallback);
    }

    #[test]
    fn test_device_lost_without_fallback_stays_disconnected() {
        let mut monitor = HealthMonitor::new(FailoverPolicy {
            fallback_enabled: false,
            ..FailoverPolicy::default()
        });
        let t0 = Instant::now();

        let _ = monitor.observe(device_lost(), t0);
        assert_eq!(monitor.state(), HealthState::Disconnected);

        // Degraded never escalates without a fallback either
        let _ = monitor.observe(invalid_fix(), t0 + Duration::from_secs(1));
        let _ = monitor.observe(invalid_fix(), t0 + Duration::from_secs(100));
        assert_eq!(monitor.state(), HealthState::Degraded);
    }

    #[test]
    fn test_recovery_from_fallback_is_immediate() {
        let mut monitor = monitor();
        let t0 = Instant::now();

        let _ = monitor.observe(device_lost(), t0);
        assert_eq!(monitor.state(), HealthState::Fallback);

        // Still bad: stays in fallback
        let _ = monitor.observe(invalid_fix(), t0 + Duration::from_secs(1));
        let _ = monitor.observe(device_lost(), t0 + Duration::from_secs(2));
        assert_eq!(monitor.state(), HealthState::Fallback);

        monitor.observe(valid_fix(47.0, -122.0), t0 + Duration::from_secs(3)).unwrap();
        assert_eq!(monitor.state(), HealthState::Healthy);
    }

    #[test]
    fn test_fallback_fix_moves_reference() {
        let mut monitor = monitor();
        let t0 = Instant::now();

        monitor.observe(valid_fix(47.0, -122.0), t0).unwrap();
        let _ = monitor.observe(device_lost(), t0 + Duration::from_secs(1));

        // Vehicle travelled ~11 km while on fallback
        let mut terminal = PositionFix::new(47.1, -122.0, 50.0, 8, FixSource::Fallback, Utc::now());
        monitor.note_fallback_fix(&terminal);

        monitor.observe(valid_fix(47.1001, -122.0), t0 + Duration::from_secs(600)).unwrap();
        assert_eq!(monitor.state(), HealthState::Healthy);

        // Invalid terminal fixes and fixes outside fallback are ignored
        terminal.latitude = 10.0;
        monitor.note_fallback_fix(&terminal);
        assert_eq!(monitor.failover().reference.unwrap().latitude, 47.1001);
    }

    #[test]
    fn test_recovery_probe_interval() {
        let mut monitor = HealthMonitor::new(FailoverPolicy {
            recovery_check_interval: Duration::from_secs(1),
            ..FailoverPolicy::default()
        });
        let t0 = Instant::now();

        assert!(monitor.should_probe_primary(t0));
        let _ = monitor.observe(device_lost(), t0);
        assert_eq!(monitor.state(), HealthState::Fallback);

        assert!(!monitor.should_probe_primary(t0 + Duration::from_millis(200)));
        assert!(!monitor.should_probe_primary(t0 + Duration::from_millis(999)));
        assert!(monitor.should_probe_primary(t0 + Duration::from_secs(1)));
    }

    #[test]
    fn test_out_of_range_fix_is_invalid() {
        let mut monitor = monitor();
        let result = monitor.observe(valid_fix(91.0, 0.0), Instant::now());

        assert!(matches!(result, Err(BridgeError::InvalidFix(_))));
        assert_eq!(monitor.state(), HealthState::Degraded);
        assert!(monitor.failover().reference.is_none());
    }

    #[test]
    fn test_timeout_counts_as_bad_read() {
        let mut monitor = monitor();
        let result = monitor.observe(
            Err(BridgeError::timeout(FixSource::Primary, Duration::from_secs(2))),
            Instant::now(),
        );

        assert!(result.is_err());
        assert_eq!(monitor.state(), HealthState::Degraded);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(HealthState::Unknown.to_string(), "unknown");
        assert_eq!(HealthState::Fallback.as_str(), "fallback");
    }
}
