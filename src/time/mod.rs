//! # Time Source
//!
//! Keeps a clock offset obtained from the terminal's NTP server and applies
//! it to output timestamps.
//!
//! The first sync is awaited at startup. After that, syncs run in a spawned
//! task every `sync_interval` and their result is merged on the next
//! [`TimeSource::poll`], so the main loop never waits on the network.
//!
//! A failed sync leaves the previous offset in place: it goes stale but
//! stays usable.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use crate::config::TimeConfig;
use crate::error::{BridgeError, Result};

pub mod sntp;

pub use sntp::SntpClient;

/// One network clock query
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TimeQuery: Send + Sync {
    /// Offset to add to the local clock, in seconds
    async fn query_offset(&self) -> Result<f64>;
}

/// Current clock correction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeCorrection {
    /// Seconds to add to the local clock
    pub offset_seconds: f64,

    /// When the offset was last refreshed
    pub last_sync: Option<Instant>,

    /// Whether any sync has ever succeeded
    pub available: bool,
}

impl Default for TimeCorrection {
    fn default() -> Self {
        Self {
            offset_seconds: 0.0,
            last_sync: None,
            available: false,
        }
    }
}

impl TimeCorrection {
    /// Apply the offset to a local timestamp, or pass it through unchanged
    pub fn apply(&self, local: DateTime<Utc>) -> DateTime<Utc> {
        if !self.available {
            return local;
        }

        let micros = (self.offset_seconds * 1e6).round() as i64;
        local + chrono::Duration::microseconds(micros)
    }
}

/// Owner of the [`TimeCorrection`]
pub struct TimeSource {
    query: Option<Arc<dyn TimeQuery>>,
    sync_interval: Duration,
    correction: TimeCorrection,
    last_attempt: Option<Instant>,
    in_flight: Option<JoinHandle<Result<f64>>>,
}

impl std::fmt::Debug for TimeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeSource")
            .field("enabled", &self.is_enabled())
            .field("sync_interval", &self.sync_interval)
            .field("correction", &self.correction)
            .field("in_flight", &self.in_flight.is_some())
            .finish()
    }
}

impl TimeSource {
    /// Time source backed by `query`, refreshed every `sync_interval`
    pub fn new(query: Arc<dyn TimeQuery>, sync_interval: Duration) -> Self {
        Self {
            query: Some(query),
            sync_interval,
            correction: TimeCorrection::default(),
            last_attempt: None,
            in_flight: None,
        }
    }

    /// Time source that never queries and always reports the local clock
    pub fn disabled() -> Self {
        Self {
            query: None,
            sync_interval: Duration::ZERO,
            correction: TimeCorrection::default(),
            last_attempt: None,
            in_flight: None,
        }
    }

    /// SNTP-backed source, or a disabled one
    pub fn from_config(config: &TimeConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }

        Self::new(
            Arc::new(SntpClient::from_config(config)),
            Duration::from_secs(config.sync_interval_s),
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.query.is_some()
    }

    pub fn correction(&self) -> &TimeCorrection {
        &self.correction
    }

    /// Corrected wall clock
    pub fn now(&self) -> DateTime<Utc> {
        self.correction.apply(Utc::now())
    }

    /// Age of the last successful sync
    pub fn staleness(&self, now: Instant) -> Option<Duration> {
        self.correction
            .last_sync
            .map(|synced| now.saturating_duration_since(synced))
    }

    /// Query immediately and wait for the answer
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::TimeSyncFailed`] if the source is disabled or the
    /// query fails; the previous correction is kept in that case
    pub async fn sync_now(&mut self, now: Instant) -> Result<f64> {
        let query = self
            .query
            .clone()
            .ok_or_else(|| BridgeError::TimeSyncFailed("time correction disabled".to_string()))?;

        self.last_attempt = Some(now);
        let result = query.query_offset().await;
        self.record(result, now)
    }

    /// Merge a finished background sync and start a new one when due
    pub async fn poll(&mut self, now: Instant) {
        let Some(query) = self.query.clone() else {
            return;
        };

        if self.in_flight.as_ref().map_or(false, |handle| handle.is_finished()) {
            if let Some(handle) = self.in_flight.take() {
                let result = match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(BridgeError::TimeSyncFailed(format!("sync task failed: {}", e))),
                };
                // Errors are logged by record
                let _ = self.record(result, now);
            }
        }

        let due = self
            .last_attempt
            .map_or(true, |last| now.saturating_duration_since(last) >= self.sync_interval);

        if due && self.in_flight.is_none() {
            debug!("Starting background time sync");
            self.last_attempt = Some(now);
            self.in_flight = Some(tokio::spawn(async move { query.query_offset().await }));
        }
    }

    fn record(&mut self, result: Result<f64>, now: Instant) -> Result<f64> {
        match result {
            Ok(offset) => {
                if !self.correction.available {
                    info!("Time synchronized, offset {:+.6} s", offset);
                } else {
                    debug!("Time resynchronized, offset {:+.6} s", offset);
                }

                self.correction = TimeCorrection {
                    offset_seconds: offset,
                    last_sync: Some(now),
                    available: true,
                };
                Ok(offset)
            }
            Err(err) => {
                if self.correction.available {
                    warn!(
                        "{}; keeping offset {:+.6} s from {:?} ago",
                        err,
                        self.correction.offset_seconds,
                        self.staleness(now).unwrap_or_default()
                    );
                } else {
                    warn!("{}; using local clock", err);
                }
                Err(err)
            }
        }
    }
}

impl Drop for TimeSource {
    fn drop(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn offset_query(offsets: Vec<Result<f64>>) -> Arc<dyn TimeQuery> {
        let mut query = MockTimeQuery::new();
        let mut offsets = offsets.into_iter();
        let calls = offsets.len();
        query
            .expect_query_offset()
            .times(calls)
            .returning(move || offsets.next().unwrap_or(Ok(0.0)));
        Arc::new(query)
    }

    fn failure() -> Result<f64> {
        Err(BridgeError::TimeSyncFailed("no reply".to_string()))
    }

    #[test]
    fn test_correction_applies_only_when_available() {
        let local = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        let mut correction = TimeCorrection::default();
        correction.offset_seconds = 3600.0;
        assert_eq!(correction.apply(local), local);

        correction.available = true;
        assert_eq!(correction.apply(local), local + chrono::Duration::hours(1));

        correction.offset_seconds = -0.25;
        assert_eq!(correction.apply(local), local - chrono::Duration::milliseconds(250));
    }

    #[tokio::test]
    async fn test_disabled_source_never_queries() {
        let mut time = TimeSource::disabled();
        let now = Instant::now();

        time.poll(now).await;
        assert!(time.sync_now(now).await.is_err());
        assert!(!time.correction().available);
        assert!(time.staleness(now).is_none());
        assert!(!time.is_enabled());
    }

    #[tokio::test]
    async fn test_sync_now_records_offset() {
        let mut time = TimeSource::new(offset_query(vec![Ok(1.5)]), Duration::from_secs(60));
        let now = Instant::now();

        assert_eq!(time.sync_now(now).await.unwrap(), 1.5);
        let correction = time.correction();
        assert!(correction.available);
        assert_eq!(correction.offset_seconds, 1.5);
        assert_eq!(correction.last_sync, Some(now));
        assert_eq!(time.staleness(now + Duration::from_secs(5)), Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_failure_keeps_stale_offset() {
        let mut time = TimeSource::new(offset_query(vec![Ok(2.0), failure()]), Duration::from_secs(60));
        let start = Instant::now();

        time.sync_now(start).await.unwrap();
        let later = start + Duration::from_secs(90);
        assert!(time.sync_now(later).await.is_err());

        let correction = time.correction();
        assert!(correction.available);
        assert_eq!(correction.offset_seconds, 2.0);
        assert_eq!(time.staleness(later), Some(Duration::from_secs(90)));
    }

    #[tokio::test]
    async fn test_failure_before_first_sync_stays_unavailable() {
        let mut time = TimeSource::new(offset_query(vec![failure()]), Duration::from_secs(60));

        assert!(time.sync_now(Instant::now()).await.is_err());
        assert!(!time.correction().available);
    }

    #[tokio::test]
    async fn test_poll_runs_in_background_once_per_interval() {
        let mut time = TimeSource::new(offset_query(vec![Ok(0.75)]), Duration::from_secs(60));
        let start = Instant::now();

        // Spawns the query; nothing merged yet
        time.poll(start).await;
        assert!(!time.correction().available);

        // Let the spawned task finish, then merge
        while !time.in_flight.as_ref().map_or(true, |h| h.is_finished()) {
            tokio::task::yield_now().await;
        }
        time.poll(start + Duration::from_secs(1)).await;
        assert!(time.correction().available);
        assert_eq!(time.correction().offset_seconds, 0.75);

        // Not due again until the interval has passed; the mock allows one call
        time.poll(start + Duration::from_secs(30)).await;
        assert!(time.in_flight.is_none());
    }

    #[tokio::test]
    async fn test_poll_starts_next_sync_when_due() {
        let mut time = TimeSource::new(offset_query(vec![Ok(0.1), Ok(0.2)]), Duration::from_secs(60));
        let start = Instant::now();

        time.sync_now(start).await.unwrap();
        time.poll(start + Duration::from_secs(59)).await;
        assert!(time.in_flight.is_none());

        time.poll(start + Duration::from_secs(60)).await;
        assert!(time.in_flight.is_some());

        while !time.in_flight.as_ref().map_or(true, |h| h.is_finished()) {
            tokio::task::yield_now().await;
        }
        time.poll(start + Duration::from_secs(61)).await;
        assert_eq!(time.correction().offset_seconds, 0.2);
    }
}
