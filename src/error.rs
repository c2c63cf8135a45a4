//! # Error Types
//!
//! Custom error types for the GNSS tracker using `thiserror`.

use thiserror::Error;

/// Main error type for the GNSS tracker
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Batch file or backlog state (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// NMEA sentence framing, checksum or field errors
    #[error("NMEA error: {0}")]
    Nmea(String),

    /// Receiver serial port errors
    #[error("Serial port error: {0}")]
    Serial(String),

    /// Compact batch encoding/decoding errors
    #[error("Codec error: {0}")]
    Codec(String),
}

/// Result type alias for the GNSS tracker
pub type Result<T> = std::result::Result<T, TrackerError>;
