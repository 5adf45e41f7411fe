//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all) yields a working configuration for a terminal at 192.168.100.1 and a
//! receiver on `/dev/ttyACM0`.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{BridgeError, Result};
use crate::nmea::protocol::{default_sentences, SentenceKind};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub primary: PrimaryConfig,

    #[serde(default)]
    pub terminal: TerminalConfig,

    #[serde(default)]
    pub failover: FailoverConfig,

    #[serde(default)]
    pub time: TimeConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub cycle: CycleConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Primary receiver (serial NMEA) configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PrimaryConfig {
    #[serde(default = "default_primary_device")]
    pub device: String,

    #[serde(default = "default_primary_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

/// Satellite terminal (fallback) configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TerminalConfig {
    /// Fallback on/off
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_terminal_address")]
    pub address: String,

    /// grpcurl executable
    #[serde(default = "default_grpcurl")]
    pub grpcurl: String,

    #[serde(default = "default_terminal_service")]
    pub service: String,

    #[serde(default = "default_terminal_timeout_ms")]
    pub timeout_ms: u64,
}

/// Failover thresholds
#[derive(Debug, Deserialize, Clone)]
pub struct FailoverConfig {
    #[serde(default = "default_lock_loss_threshold_s")]
    pub lock_loss_threshold_s: u64,

    #[serde(default = "default_position_jump_threshold_m")]
    pub position_jump_threshold_m: f64,

    /// 0 re-probes the primary on every cycle while in fallback
    #[serde(default = "default_recovery_check_interval_ms")]
    pub recovery_check_interval_ms: u64,
}

/// Network time correction
#[derive(Debug, Deserialize, Clone)]
pub struct TimeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_time_server")]
    pub server: String,

    #[serde(default = "default_time_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_sync_interval_s")]
    pub sync_interval_s: u64,
}

/// Where encoded output goes
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Fifo,
    Udp,
}

/// Which wire protocol is produced
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputProtocol {
    Nmea,
    Mavlink,
}

/// Output configuration
#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_sink_kind")]
    pub kind: SinkKind,

    #[serde(default = "default_output_protocol")]
    pub protocol: OutputProtocol,

    #[serde(default = "default_fifo_path")]
    pub fifo_path: String,

    #[serde(default = "default_udp_target")]
    pub udp_target: String,

    #[serde(default = "default_sentences")]
    pub sentences: Vec<SentenceKind>,

    #[serde(default = "default_system_id")]
    pub system_id: u8,

    #[serde(default = "default_component_id")]
    pub component_id: u8,

    /// Add GPS_INPUT to the MAVLink stream for autopilots with `GPS_TYPE=14`
    #[serde(default)]
    pub gps_input: bool,

    /// Minimum gap between repeated sink warnings
    #[serde(default = "default_warn_interval_s")]
    pub warn_interval_s: u64,
}

/// Main loop cadence
#[derive(Debug, Deserialize, Clone)]
pub struct CycleConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Daily rolling log files are written here when set
    #[serde(default)]
    pub log_dir: Option<String>,

    #[serde(default = "default_status_interval_s")]
    pub status_interval_s: u64,
}

// Default value functions
fn default_true() -> bool { true }

fn default_primary_device() -> String { "/dev/ttyACM0".to_string() }
fn default_primary_baud_rate() -> u32 { 4800 }
fn default_read_timeout_ms() -> u64 { 2000 }

fn default_terminal_address() -> String { "192.168.100.1:9200".to_string() }
fn default_grpcurl() -> String { "grpcurl".to_string() }
fn default_terminal_service() -> String { "SpaceX.API.Device.Device/Handle".to_string() }
fn default_terminal_timeout_ms() -> u64 { 2000 }

fn default_lock_loss_threshold_s() -> u64 { 30 }
fn default_position_jump_threshold_m() -> f64 { 1000.0 }
fn default_recovery_check_interval_ms() -> u64 { 1000 }

fn default_time_server() -> String { "192.168.100.1:123".to_string() }
fn default_time_timeout_ms() -> u64 { 3000 }
fn default_sync_interval_s() -> u64 { 60 }

fn default_sink_kind() -> SinkKind { SinkKind::Fifo }
fn default_output_protocol() -> OutputProtocol { OutputProtocol::Nmea }
fn default_fifo_path() -> String { "/tmp/starlink_nmea_fallback".to_string() }
fn default_udp_target() -> String { "127.0.0.1:14550".to_string() }
fn default_system_id() -> u8 { 1 }
fn default_component_id() -> u8 { 220 }
fn default_warn_interval_s() -> u64 { 10 }

fn default_interval_ms() -> u64 { 200 }

fn default_log_level() -> String { "info".to_string() }
fn default_status_interval_s() -> u64 { 10 }

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            device: default_primary_device(),
            baud_rate: default_primary_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            address: default_terminal_address(),
            grpcurl: default_grpcurl(),
            service: default_terminal_service(),
            timeout_ms: default_terminal_timeout_ms(),
        }
    }
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            lock_loss_threshold_s: default_lock_loss_threshold_s(),
            position_jump_threshold_m: default_position_jump_threshold_m(),
            recovery_check_interval_ms: default_recovery_check_interval_ms(),
        }
    }
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            server: default_time_server(),
            timeout_ms: default_time_timeout_ms(),
            sync_interval_s: default_sync_interval_s(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            kind: default_sink_kind(),
            protocol: default_output_protocol(),
            fifo_path: default_fifo_path(),
            udp_target: default_udp_target(),
            sentences: default_sentences(),
            system_id: default_system_id(),
            component_id: default_component_id(),
            gps_input: false,
            warn_interval_s: default_warn_interval_s(),
        }
    }
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: None,
            status_interval_s: default_status_interval_s(),
        }
    }
}

fn invalid(msg: impl std::fmt::Display) -> BridgeError {
    BridgeError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use starlink_gps_bridge::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // Primary receiver
        if self.primary.device.is_empty() {
            return Err(invalid("primary device cannot be empty"));
        }

        if ![4800, 9600, 19200, 38400, 57600, 115200].contains(&self.primary.baud_rate) {
            return Err(invalid(
                "baud_rate must be one of: 4800, 9600, 19200, 38400, 57600, 115200",
            ));
        }

        if self.primary.read_timeout_ms == 0 || self.primary.read_timeout_ms > 5000 {
            return Err(invalid("read_timeout_ms must be between 1 and 5000"));
        }

        // Terminal
        if self.terminal.enabled {
            if self.terminal.address.is_empty() || self.terminal.grpcurl.is_empty() {
                return Err(invalid("terminal address and grpcurl cannot be empty when enabled"));
            }

            if self.terminal.service.is_empty() {
                return Err(invalid("terminal service cannot be empty when enabled"));
            }
        }

        if self.terminal.timeout_ms == 0 || self.terminal.timeout_ms > 3000 {
            return Err(invalid("terminal timeout_ms must be between 1 and 3000"));
        }

        // Failover
        if self.failover.lock_loss_threshold_s == 0 {
            return Err(invalid("lock_loss_threshold_s must be greater than 0"));
        }

        if !self.failover.position_jump_threshold_m.is_finite()
            || self.failover.position_jump_threshold_m <= 0.0
        {
            return Err(invalid("position_jump_threshold_m must be greater than 0"));
        }

        if self.failover.recovery_check_interval_ms > 60000 {
            return Err(invalid("recovery_check_interval_ms must be between 0 and 60000"));
        }

        // Time
        if self.time.enabled && self.time.server.is_empty() {
            return Err(invalid("time server cannot be empty when enabled"));
        }

        if self.time.timeout_ms == 0 || self.time.timeout_ms > 5000 {
            return Err(invalid("time timeout_ms must be between 1 and 5000"));
        }

        if self.time.sync_interval_s == 0 || self.time.sync_interval_s > 60 {
            return Err(invalid("sync_interval_s must be between 1 and 60"));
        }

        // Output
        match self.output.kind {
            SinkKind::Fifo if self.output.fifo_path.is_empty() => {
                return Err(invalid("fifo_path cannot be empty for a fifo sink"));
            }
            SinkKind::Udp if self.output.udp_target.parse::<std::net::SocketAddr>().is_err() => {
                return Err(invalid(format!(
                    "udp_target {:?} is not a valid host:port address",
                    self.output.udp_target
                )));
            }
            _ => {}
        }

        if self.output.sentences.is_empty() {
            return Err(invalid("sentences must list at least one sentence type"));
        }

        if self.output.warn_interval_s == 0 {
            return Err(invalid("warn_interval_s must be greater than 0"));
        }

        // Cycle
        if self.cycle.interval_ms < 100 || self.cycle.interval_ms > 500 {
            return Err(invalid("cycle interval_ms must be between 100 and 500"));
        }

        // Logging
        if self.logging.level.is_empty() {
            return Err(invalid("log level cannot be empty"));
        }

        if self.logging.status_interval_s == 0 {
            return Err(invalid("status_interval_s must be greater than 0"));
        }

        Ok(())
    }
}
