//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{RelayError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub relay: RelayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub framing: FramingConfig,
    #[serde(default)]
    pub session: SessionConfig,
    pub transport: TransportConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub ack: AckConfig,
    #[serde(default)]
    pub sinks: SinksConfig,
    #[serde(default)]
    pub stats: StatsConfig,
}

/// Which end of the link this process runs
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Air,
    Ground,
}

/// Role selection
#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    pub role: Role,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily-rotated log files; stdout only when unset
    #[serde(default)]
    pub file_dir: Option<String>,
}

/// Serial port configuration (airborne side)
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    /// Tried in order when `port` cannot be opened
    #[serde(default = "default_fallback_ports")]
    pub fallback_ports: Vec<String>,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_reopen_interval_ms")]
    pub reopen_interval_ms: u64,

    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

/// MAVLink framing configuration
#[derive(Debug, Deserialize, Clone)]
pub struct FramingConfig {
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    #[serde(default = "default_accept_unknown_messages")]
    pub accept_unknown_messages: bool,
}

/// What the multiplexer does when the telemetry device goes away
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OnSourceClose {
    /// Treat device loss as total loss: next frames start a new session
    NewSession,
    /// Keep numbering in the current session once the device returns
    Continue,
}

/// Session lifecycle configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_on_source_close")]
    pub on_source_close: OnSourceClose,
}

/// How the transport obtains a connection
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    Dial,
    Listen,
}

/// Reconnecting transport configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TransportConfig {
    /// Defaults to `dial` on the air side and `listen` on the ground side
    #[serde(default)]
    pub mode: Option<TransportMode>,

    #[serde(default)]
    pub peer_address: String,

    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_liveness_timeout_ms")]
    pub liveness_timeout_ms: u64,

    #[serde(default = "default_backoff_min_ms")]
    pub backoff_min_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    #[serde(default = "default_backoff_jitter")]
    pub backoff_jitter: f64,

    #[serde(default = "default_backoff_reset_after_ms")]
    pub backoff_reset_after_ms: u64,
}

/// Replay buffer configuration (airborne side)
#[derive(Debug, Deserialize, Clone)]
pub struct ReplayConfig {
    #[serde(default = "default_replay_capacity")]
    pub capacity: usize,

    /// Entries older than this are evicted on the next enqueue
    #[serde(default)]
    pub max_age_ms: Option<u64>,
}

/// Acknowledgement cadence (ground side)
#[derive(Debug, Deserialize, Clone)]
pub struct AckConfig {
    #[serde(default = "default_ack_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_ack_every_frames")]
    pub every_frames: u64,
}

/// Downstream sink configuration (ground side)
#[derive(Debug, Deserialize, Clone)]
pub struct SinksConfig {
    #[serde(default = "default_backlog_capacity")]
    pub backlog_capacity: usize,

    #[serde(default)]
    pub udp: Vec<UdpSinkConfig>,

    #[serde(default)]
    pub recorder: RecorderConfig,

    #[serde(default)]
    pub vehicle_state: VehicleStateConfig,
}

/// Raw MAVLink forwarding to a ground control station
#[derive(Debug, Deserialize, Clone)]
pub struct UdpSinkConfig {
    pub name: String,
    pub address: String,
}

/// JSONL telemetry recorder
#[derive(Debug, Deserialize, Clone)]
pub struct RecorderConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,
}

/// Per-vehicle state tracking for dashboards
#[derive(Debug, Deserialize, Clone)]
pub struct VehicleStateConfig {
    #[serde(default = "default_vehicle_state_enabled")]
    pub enabled: bool,

    #[serde(default = "default_vehicle_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
}

/// Periodic statistics logging
#[derive(Debug, Deserialize, Clone)]
pub struct StatsConfig {
    #[serde(default = "default_stats_log_interval_ms")]
    pub log_interval_ms: u64,
}

// Default value functions
fn default_log_level() -> String { "info".to_string() }

fn default_serial_port() -> String { "/dev/ttyACM0".to_string() }
fn default_fallback_ports() -> Vec<String> { vec!["/dev/ttyUSB0".to_string()] }
fn default_baud_rate() -> u32 { 57600 }
fn default_reopen_interval_ms() -> u64 { 1000 }
fn default_read_buffer_size() -> usize { 512 }

fn default_max_frame_size() -> usize { 280 }
fn default_accept_unknown_messages() -> bool { true }

fn default_on_source_close() -> OnSourceClose { OnSourceClose::NewSession }

fn default_listen_address() -> String { "0.0.0.0:14650".to_string() }
fn default_connect_timeout_ms() -> u64 { 5000 }
fn default_heartbeat_interval_ms() -> u64 { 1000 }
fn default_liveness_timeout_ms() -> u64 { 5000 }
fn default_backoff_min_ms() -> u64 { 500 }
fn default_backoff_max_ms() -> u64 { 30000 }
fn default_backoff_jitter() -> f64 { 0.2 }
fn default_backoff_reset_after_ms() -> u64 { 10000 }

fn default_replay_capacity() -> usize { 256 }

fn default_ack_interval_ms() -> u64 { 500 }
fn default_ack_every_frames() -> u64 { 32 }

fn default_backlog_capacity() -> usize { 512 }
fn default_log_dir() -> String { "./logs".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }
fn default_vehicle_state_enabled() -> bool { true }
fn default_vehicle_heartbeat_timeout_ms() -> u64 { 10000 }

fn default_stats_log_interval_ms() -> u64 { 10000 }

/// Baud rates accepted for the telemetry port
const SUPPORTED_BAUD_RATES: &[u32] = &[
    9600, 19200, 38400, 57600, 115200, 230400, 460800, 500000, 921600, 1500000,
];

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), file_dir: None }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            fallback_ports: default_fallback_ports(),
            baud_rate: default_baud_rate(),
            reopen_interval_ms: default_reopen_interval_ms(),
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            max_frame_size: default_max_frame_size(),
            accept_unknown_messages: default_accept_unknown_messages(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { on_source_close: default_on_source_close() }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: None,
            peer_address: String::new(),
            listen_address: default_listen_address(),
            connect_timeout_ms: default_connect_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            liveness_timeout_ms: default_liveness_timeout_ms(),
            backoff_min_ms: default_backoff_min_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            backoff_jitter: default_backoff_jitter(),
            backoff_reset_after_ms: default_backoff_reset_after_ms(),
        }
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self { capacity: default_replay_capacity(), max_age_ms: None }
    }
}

impl Default for AckConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_ack_interval_ms(),
            every_frames: default_ack_every_frames(),
        }
    }
}

impl Default for SinksConfig {
    fn default() -> Self {
        Self {
            backlog_capacity: default_backlog_capacity(),
            udp: Vec::new(),
            recorder: RecorderConfig::default(),
            vehicle_state: VehicleStateConfig::default(),
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_dir: default_log_dir(),
            max_records_per_file: default_max_records_per_file(),
            max_files_to_keep: default_max_files_to_keep(),
        }
    }
}

impl Default for VehicleStateConfig {
    fn default() -> Self {
        Self {
            enabled: default_vehicle_state_enabled(),
            heartbeat_timeout_ms: default_vehicle_heartbeat_timeout_ms(),
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self { log_interval_ms: default_stats_log_interval_ms() }
    }
}

impl TransportConfig {
    /// Effective connection mode for a role
    pub fn mode_for(&self, role: Role) -> TransportMode {
        self.mode.unwrap_or(match role {
            Role::Air => TransportMode::Dial,
            Role::Ground => TransportMode::Listen,
        })
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
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
    /// use uav_relay::config::Config;
    ///
    /// let config = Config::load("config/relay.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        let role = self.relay.role;
        let transport = &self.transport;

        // Validate transport endpoints
        match transport.mode_for(role) {
            TransportMode::Dial if transport.peer_address.is_empty() => {
                return Err(RelayError::config("peer_address is required when transport mode is 'dial'"));
            }
            TransportMode::Listen if transport.listen_address.is_empty() => {
                return Err(RelayError::config("listen_address is required when transport mode is 'listen'"));
            }
            _ => {}
        }

        // Validate timing fields
        for (name, value, max) in [
            ("connect_timeout_ms", transport.connect_timeout_ms, 60000),
            ("heartbeat_interval_ms", transport.heartbeat_interval_ms, 60000),
            ("liveness_timeout_ms", transport.liveness_timeout_ms, 300000),
            ("backoff_min_ms", transport.backoff_min_ms, 60000),
            ("backoff_max_ms", transport.backoff_max_ms, 600000),
            ("backoff_reset_after_ms", transport.backoff_reset_after_ms, 600000),
            ("reopen_interval_ms", self.serial.reopen_interval_ms, 60000),
            ("ack.interval_ms", self.ack.interval_ms, 60000),
            ("stats.log_interval_ms", self.stats.log_interval_ms, 3600000),
            ("heartbeat_timeout_ms", self.sinks.vehicle_state.heartbeat_timeout_ms, 600000),
        ] {
            if value == 0 || value > max {
                return Err(RelayError::config(format!("{} must be between 1 and {}", name, max)));
            }
        }

        if transport.heartbeat_interval_ms >= transport.liveness_timeout_ms {
            return Err(RelayError::config("heartbeat_interval_ms must be less than liveness_timeout_ms"));
        }

        if transport.backoff_min_ms > transport.backoff_max_ms {
            return Err(RelayError::config("backoff_min_ms must not exceed backoff_max_ms"));
        }

        if !(0.0..=1.0).contains(&transport.backoff_jitter) {
            return Err(RelayError::config("backoff_jitter must be between 0.0 and 1.0"));
        }

        // Validate framing
        if self.framing.max_frame_size < 8 || self.framing.max_frame_size > 280 {
            return Err(RelayError::config("max_frame_size must be between 8 and 280"));
        }

        // Validate capacities
        if self.replay.capacity == 0 {
            return Err(RelayError::config("replay capacity must be greater than 0"));
        }

        if self.replay.max_age_ms == Some(0) {
            return Err(RelayError::config("replay max_age_ms must be greater than 0 when set"));
        }

        if self.sinks.backlog_capacity == 0 {
            return Err(RelayError::config("backlog_capacity must be greater than 0"));
        }

        if self.ack.every_frames == 0 {
            return Err(RelayError::config("ack every_frames must be greater than 0"));
        }

        // Validate airborne serial settings
        if role == Role::Air {
            if self.serial.port.is_empty() {
                return Err(RelayError::config("serial port cannot be empty"));
            }

            if !SUPPORTED_BAUD_RATES.contains(&self.serial.baud_rate) {
                return Err(RelayError::config(format!(
                    "baud_rate must be one of: {:?}",
                    SUPPORTED_BAUD_RATES
                )));
            }

            if self.serial.read_buffer_size == 0 {
                return Err(RelayError::config("read_buffer_size must be greater than 0"));
            }
        }

        // Validate sinks
        for sink in &self.sinks.udp {
            if sink.name.is_empty() || sink.address.is_empty() {
                return Err(RelayError::config("udp sinks need both a name and an address"));
            }
        }

        let recorder = &self.sinks.recorder;
        if recorder.enabled {
            if recorder.log_dir.is_empty() {
                return Err(RelayError::config("recorder log_dir cannot be empty when enabled"));
            }
            if recorder.max_records_per_file == 0 {
                return Err(RelayError::config("max_records_per_file must be greater than 0"));
            }
            if recorder.max_files_to_keep == 0 {
                return Err(RelayError::config("max_files_to_keep must be greater than 0"));
            }
        }

        Ok(())
    }
}
