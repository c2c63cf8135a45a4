//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::ops::Range;
use std::path::Path;
use std::time::Duration;

use crate::batch::codec::WireFormat;
use crate::error::{Result, TrackerError};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub tracker: TrackerConfig,
    pub gnss: GnssConfig,
    pub batch: BatchConfig,
    pub storage: StorageConfig,
    pub transport: TransportConfig,
    pub scheduler: SchedulerConfig,
}

/// Where position samples come from
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// GNSS receiver on a serial UART
    Serial,
    /// Recorded NMEA capture
    Replay,
}

/// How batch files are delivered
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Copy into a spool directory
    Outbox,
    /// Scripted outages, for bench testing
    Simulated,
}

/// Device identity
#[derive(Debug, Deserialize, Clone)]
pub struct TrackerConfig {
    /// Identifier written into every batch, so a receiver serving several
    /// trackers can tell them apart
    #[serde(default = "default_tracker_id")]
    pub id: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            id: default_tracker_id(),
        }
    }
}

/// GNSS receiver configuration
#[derive(Debug, Deserialize, Clone)]
pub struct GnssConfig {
    #[serde(default = "default_source")]
    pub source: SourceKind,

    #[serde(default = "default_gnss_port")]
    pub port: String,

    #[serde(default = "default_gnss_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default)]
    pub replay_file: String,

    /// Sampling interval, also the per-cycle transmission budget
    #[serde(default = "default_sample_interval_s")]
    pub sample_interval_s: u64,
}

/// Batching configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    #[serde(default = "default_batch_size")]
    pub size: usize,

    #[serde(default = "default_encoding")]
    pub encoding: WireFormat,
}

/// Persistence configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

/// Transport configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TransportConfig {
    #[serde(default = "default_transport_kind")]
    pub kind: TransportKind,

    #[serde(default = "default_outbox_dir")]
    pub outbox_dir: String,

    /// Per-attempt delay of the simulated transport
    #[serde(default)]
    pub latency_ms: u64,

    /// Simulated outage windows as `[start, end)` attempt numbers
    #[serde(default)]
    pub outages: Vec<[u64; 2]>,
}

/// Retry scheduler configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Pause between failed attempts within one sampling cycle
    #[serde(default = "default_retry_spacing_ms")]
    pub retry_spacing_ms: u64,
}

// Default value functions
fn default_tracker_id() -> String { "tracker-01".to_string() }

fn default_source() -> SourceKind { SourceKind::Serial }
fn default_gnss_port() -> String { "/dev/serial0".to_string() }
fn default_gnss_baud_rate() -> u32 { 9600 }
fn default_read_timeout_ms() -> u64 { 500 }
fn default_sample_interval_s() -> u64 { 2 }

fn default_batch_size() -> usize { 10 }
fn default_encoding() -> WireFormat { WireFormat::Scaled }

fn default_log_dir() -> String { "./logs".to_string() }

fn default_transport_kind() -> TransportKind { TransportKind::Outbox }
fn default_outbox_dir() -> String { "./outbox".to_string() }

fn default_retry_spacing_ms() -> u64 { 250 }

fn invalid(msg: impl std::fmt::Display) -> TrackerError {
    TrackerError::Config(toml::de::Error::custom(msg))
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
    /// use gnss_tracker::config::Config;
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

    /// Sampling interval as a [`Duration`]
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.gnss.sample_interval_s)
    }

    /// Receiver read window as a [`Duration`]
    pub fn read_window(&self) -> Duration {
        Duration::from_millis(self.gnss.read_timeout_ms)
    }

    /// Retry spacing as a [`Duration`]
    pub fn retry_spacing(&self) -> Duration {
        Duration::from_millis(self.scheduler.retry_spacing_ms)
    }

    /// Simulated transport outage windows
    pub fn outage_windows(&self) -> Vec<Range<u64>> {
        self.transport
            .outages
            .iter()
            .map(|&[start, end]| start..end)
            .collect()
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        // Validate device identity
        if self.tracker.id.is_empty() || self.tracker.id.len() > 64 {
            return Err(invalid("tracker id must be 1 to 64 characters"));
        }

        if !self
            .tracker
            .id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(invalid(
                "tracker id may only contain ASCII letters, digits, '-', '_' and '.'",
            ));
        }

        // Validate receiver configuration
        match self.gnss.source {
            SourceKind::Serial if self.gnss.port.is_empty() => {
                return Err(invalid("gnss port cannot be empty when source is serial"));
            }
            SourceKind::Replay if self.gnss.replay_file.is_empty() => {
                return Err(invalid("gnss replay_file cannot be empty when source is replay"));
            }
            _ => {}
        }

        if ![4800, 9600, 19200, 38400, 57600, 115200].contains(&self.gnss.baud_rate) {
            return Err(invalid(
                "baud_rate must be one of: 4800, 9600, 19200, 38400, 57600, 115200",
            ));
        }

        if self.gnss.read_timeout_ms == 0 || self.gnss.read_timeout_ms > 10000 {
            return Err(invalid("read_timeout_ms must be between 1 and 10000"));
        }

        if self.gnss.sample_interval_s == 0 || self.gnss.sample_interval_s > 3600 {
            return Err(invalid("sample_interval_s must be between 1 and 3600"));
        }

        // The read window is part of every sampling cycle
        if self.gnss.read_timeout_ms >= self.gnss.sample_interval_s * 1000 {
            return Err(invalid("read_timeout_ms must be shorter than the sampling interval"));
        }

        // Validate batching
        if self.batch.size == 0 || self.batch.size > 1000 {
            return Err(invalid("batch size must be between 1 and 1000"));
        }

        // Validate storage
        if self.storage.log_dir.is_empty() {
            return Err(invalid("storage log_dir cannot be empty"));
        }

        // Validate transport
        if self.transport.kind == TransportKind::Outbox && self.transport.outbox_dir.is_empty() {
            return Err(invalid("outbox_dir cannot be empty when transport kind is outbox"));
        }

        if self.transport.latency_ms > 60000 {
            return Err(invalid("latency_ms must be at most 60000"));
        }

        for &[start, end] in &self.transport.outages {
            if start >= end {
                return Err(invalid(format!(
                    "outage window [{}, {}] must have start < end",
                    start, end
                )));
            }
        }

        // Retries must leave room within one sampling interval
        if self.scheduler.retry_spacing_ms >= self.gnss.sample_interval_s * 1000 {
            return Err(invalid("retry_spacing_ms must be shorter than the sampling interval"));
        }

        Ok(())
    }
}
